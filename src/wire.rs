use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tracing::{debug, error};

use crate::auth::RepairDeskAuthSource;
use crate::engine::{Engine, EngineError, ErrorKind};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, Shape};
use crate::time::format_datetime;
use crate::tools::{
    appointment_details_json, available_technician_json, coverage_json, location_report_json,
    notice_json, policy_json, route_json,
};

pub struct RepairDeskHandler {
    engine: Arc<Engine>,
    query_parser: Arc<RepairDeskQueryParser>,
}

impl RepairDeskHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(RepairDeskQueryParser),
        }
    }

    async fn run(&self, sql: &str, format: Option<&Format>) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd, format).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command, format: Option<&Format>) -> PgWireResult<Response> {
        let engine = self.engine.as_ref();
        let schema = Arc::new(schema_for(cmd.shape(), format));
        match cmd {
            // ── Appointments ─────────────────────────────────
            Command::SelectAppointments {
                customer_id,
                status,
            } => {
                let appointments = engine.list_appointments(customer_id.as_deref(), &status);
                let rows = appointments
                    .iter()
                    .map(|a| record_row(&a.id, a))
                    .collect::<PgWireResult<Vec<_>>>()?;
                records(schema, rows)
            }
            Command::SelectAppointment { id } => {
                let details = engine.appointment_details(&id).map_err(engine_err)?;
                records(schema, vec![(id, appointment_details_json(details).to_string())])
            }
            Command::SelectAvailableSlots(query) => {
                let found = engine.available_slots(&query).await.map_err(engine_err)?;
                debug!(
                    "{} of {} slots across {} technicians",
                    found.slots.len(),
                    found.total_slots,
                    found.qualified_technicians
                );
                let rows: Vec<PgWireResult<_>> = found
                    .slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&format_datetime(slot.datetime))?;
                        encoder.encode_field(&slot.technician_id)?;
                        encoder.encode_field(&slot.technician_name)?;
                        encoder.encode_field(&(slot.duration_minutes as i32))?;
                        encoder.encode_field(&slot.rating)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectAlternativeSlots {
                technician_id,
                preferred,
                duration_minutes,
            } => {
                let alternatives = engine
                    .alternative_slots(&technician_id, preferred, duration_minutes)
                    .await
                    .map_err(engine_err)?;
                let rows: Vec<PgWireResult<_>> = alternatives
                    .into_iter()
                    .map(|alt| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&format_datetime(alt.datetime))?;
                        encoder.encode_field(&alt.technician_id)?;
                        encoder.encode_field(&(alt.duration_minutes as i32))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectFreeWindows {
                technician_id,
                start,
                end,
                min_duration,
            } => {
                let windows = engine
                    .technician_free_windows(&technician_id, start, end, min_duration)
                    .await
                    .map_err(engine_err)?;
                let rows: Vec<PgWireResult<_>> = windows
                    .into_iter()
                    .map(|window| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&technician_id)?;
                        encoder.encode_field(&format_datetime(window.start))?;
                        encoder.encode_field(&format_datetime(window.end))?;
                        encoder.encode_field(&(window.duration_ms() / MINUTE_MS))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::InsertAppointment(new) => {
                let appointment = engine.create_appointment(new).await.map_err(engine_err)?;
                records(schema, vec![record_row(&appointment.id, &appointment)?])
            }
            Command::UpdateAppointment { id, update } => {
                let change = engine
                    .update_appointment(&id, update)
                    .await
                    .map_err(engine_err)?;
                records(schema, vec![record_row(&id, &change.after)?])
            }
            Command::RescheduleAppointment { id, new_datetime } => {
                let moved = engine
                    .reschedule_appointment(&id, new_datetime)
                    .await
                    .map_err(engine_err)?;
                records(schema, vec![record_row(&id, &moved.appointment)?])
            }
            Command::CancelAppointment { id, reason } => {
                let cancelled = engine
                    .cancel_appointment(&id, &reason)
                    .await
                    .map_err(engine_err)?;
                records(schema, vec![record_row(&id, &cancelled.appointment)?])
            }

            // ── Customers and claims ─────────────────────────
            Command::SelectCustomers { id } => {
                let customers = match id {
                    Some(id) => vec![engine.customer(&id).map_err(engine_err)?],
                    None => engine.list_customers(),
                };
                let rows = customers
                    .iter()
                    .map(|c| record_row(&c.id, c))
                    .collect::<PgWireResult<Vec<_>>>()?;
                records(schema, rows)
            }
            Command::SelectPolicy { customer_id } => {
                let customer = engine.customer(&customer_id).map_err(engine_err)?;
                records(schema, vec![(customer_id, policy_json(&customer).to_string())])
            }
            Command::SelectCoverage {
                customer_id,
                appliance_type,
            } => {
                let coverage = engine
                    .check_coverage(&customer_id, &appliance_type)
                    .map_err(engine_err)?;
                records(schema, vec![(customer_id, coverage_json(&coverage).to_string())])
            }
            Command::SelectClaims {
                id,
                customer_id,
                status,
            } => {
                let claims = match (id, customer_id) {
                    (Some(id), _) => vec![engine.claim(&id).map_err(engine_err)?],
                    (None, Some(customer_id)) => engine
                        .claim_history(&customer_id, &status)
                        .map_err(engine_err)?,
                    (None, None) => engine.list_claims(&status),
                };
                let rows = claims
                    .iter()
                    .map(|c| record_row(&c.id, c))
                    .collect::<PgWireResult<Vec<_>>>()?;
                records(schema, rows)
            }
            Command::InsertClaim(new) => {
                let claim = engine.create_claim(new).await.map_err(engine_err)?;
                records(schema, vec![record_row(&claim.id, &claim)?])
            }
            Command::UpdateClaim { id, status, notes } => {
                let change = engine
                    .update_claim_status(&id, status, notes.as_deref())
                    .await
                    .map_err(engine_err)?;
                records(schema, vec![record_row(&id, &change.claim)?])
            }

            // ── Technicians ──────────────────────────────────
            Command::SelectTechnicians { id, status } => {
                let technicians = match id {
                    Some(id) => vec![engine.technician(&id).map_err(engine_err)?],
                    None => engine.list_technicians(&status),
                };
                let rows = technicians
                    .iter()
                    .map(|t| record_row(&t.id, t))
                    .collect::<PgWireResult<Vec<_>>>()?;
                records(schema, rows)
            }
            Command::SelectTechnicianLocation {
                technician_id,
                destination,
            } => {
                let report = engine
                    .technician_location(&technician_id, destination)
                    .await
                    .map_err(engine_err)?;
                let record = location_report_json(&report, engine.now());
                records(schema, vec![(technician_id, record.to_string())])
            }
            Command::SelectTechnicianRoute {
                technician_id,
                destination,
            } => {
                let route = engine
                    .technician_route(&technician_id, destination)
                    .map_err(engine_err)?;
                let record = route_json(&route, engine.now());
                records(schema, vec![(technician_id, record.to_string())])
            }
            Command::SelectAvailableTechnicians {
                datetime,
                specialties,
            } => {
                let rows = engine
                    .available_technicians(datetime, &specialties)
                    .into_iter()
                    .map(|found| {
                        let id = found.technician.id.clone();
                        (id, available_technician_json(found).to_string())
                    })
                    .collect();
                records(schema, rows)
            }
            Command::UpdateTechnician {
                id,
                status,
                location,
                appointment_id,
            } => {
                let change = engine
                    .update_technician_status(&id, status, location, appointment_id.as_deref())
                    .await
                    .map_err(engine_err)?;
                records(schema, vec![record_row(&id, &change.technician)?])
            }
            Command::InsertNotification {
                technician_id,
                appointment_id,
                message,
            } => {
                let notice = engine
                    .notify_status_change(&technician_id, &appointment_id, message.as_deref())
                    .map_err(engine_err)?;
                records(schema, vec![(appointment_id, notice_json(&notice).to_string())])
            }
        }
    }
}

fn field(name: &str, ty: Type, idx: usize, format: Option<&Format>) -> FieldInfo {
    let field_format = format.map_or(FieldFormat::Text, |f| f.format_for(idx));
    FieldInfo::new(name.into(), None, None, ty, field_format)
}

fn schema_for(shape: Shape, format: Option<&Format>) -> Vec<FieldInfo> {
    let columns: &[(&str, Type)] = match shape {
        Shape::Records => &[("id", Type::VARCHAR), ("record", Type::VARCHAR)],
        Shape::Slots => &[
            ("datetime", Type::VARCHAR),
            ("technician_id", Type::VARCHAR),
            ("technician_name", Type::VARCHAR),
            ("duration_minutes", Type::INT4),
            ("rating", Type::FLOAT8),
        ],
        Shape::Alternatives => &[
            ("datetime", Type::VARCHAR),
            ("technician_id", Type::VARCHAR),
            ("duration_minutes", Type::INT4),
        ],
        Shape::Windows => &[
            ("technician_id", Type::VARCHAR),
            ("start", Type::VARCHAR),
            ("end", Type::VARCHAR),
            ("duration_minutes", Type::INT8),
        ],
    };
    columns
        .iter()
        .enumerate()
        .map(|(idx, (name, ty))| field(name, ty.clone(), idx, format))
        .collect()
}

fn record_row<T: Serialize>(id: &str, record: &T) -> PgWireResult<(String, String)> {
    let json = serde_json::to_string(record).map_err(|e| PgWireError::ApiError(Box::new(e)))?;
    Ok((id.to_string(), json))
}

fn records(schema: Arc<Vec<FieldInfo>>, rows: Vec<(String, String)>) -> PgWireResult<Response> {
    let rows: Vec<PgWireResult<_>> = rows
        .into_iter()
        .map(|(id, record)| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&id)?;
            encoder.encode_field(&record)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for RepairDeskHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query, None).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RepairDeskQueryParser;

#[async_trait]
impl QueryParser for RepairDeskQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(sql::result_shape(stmt), column_format))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RepairDeskHandler {
    type Statement = String;
    type QueryParser = RepairDeskQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(&sql, Some(&portal.result_column_format)).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        let shape = sql::result_shape(&target.statement);
        Ok(DescribeStatementResponse::new(param_types, schema_for(shape, None)))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let shape = sql::result_shape(&target.statement.statement);
        Ok(DescribePortalResponse::new(schema_for(
            shape,
            Some(&target.result_column_format),
        )))
    }
}

/// `$N` placeholders outside single-quoted literals, as
/// `(byte_start, byte_end, N)`.
fn placeholders(sql: &str) -> Vec<(usize, usize, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            // A doubled quote inside a literal closes and reopens it.
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    found.push((start, i, n));
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).iter().map(|&(_, _, n)| n).max().unwrap_or(0)
}

fn quote_param(param: Option<&[u8]>) -> String {
    match param {
        Some(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            format!("'{}'", text.replace('\'', "''"))
        }
        None => "NULL".to_string(),
    }
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Bound values are never rescanned, so `$n` text inside them stays literal.
fn substitute(sql: &str, params: &[Option<&[u8]>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (start, end, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|idx| params.get(idx)) else {
            continue;
        };
        result.push_str(&sql[copied..start]);
        result.push_str(&quote_param(*param));
        copied = end;
    }
    result.push_str(&sql[copied..]);
    result
}

fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<&[u8]>> = portal.parameters.iter().map(|p| p.as_deref()).collect();
    substitute(&portal.statement.statement, &params)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RepairDeskFactory {
    handler: Arc<RepairDeskHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<RepairDeskAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RepairDeskFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = RepairDeskAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RepairDeskHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RepairDeskFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(RepairDeskFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

pub fn engine_sqlstate(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NotFound => "P0002",
        ErrorKind::BusinessRule => "P0001",
        ErrorKind::Conflict => "23P01",
        ErrorKind::InvalidInput => "22023",
        ErrorKind::Limit => "54000",
        ErrorKind::Internal => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    let message = match &e {
        EngineError::NotFound { id, .. } => format!("{e}: {id}"),
        EngineError::Conflict(rejection) => {
            let conflict = &rejection.conflict;
            let alternatives: Vec<String> = rejection
                .alternatives
                .iter()
                .map(|alt| format_datetime(alt.datetime))
                .collect();
            format!(
                "{e}: overlaps {} at {} for {} minutes; alternatives: [{}]",
                conflict.appointment_id,
                format_datetime(conflict.existing.start),
                conflict.existing_duration_minutes(),
                alternatives.join(", ")
            )
        }
        EngineError::NotCovered {
            covered_appliances, ..
        } => format!("{e}; covered: {}", Value::from(covered_appliances.clone())),
        EngineError::WalError(detail) => {
            error!("statement failed to persist: {detail}");
            "Internal server error".to_string()
        }
        _ => e.to_string(),
    };
    user_error(engine_sqlstate(e.kind()), message)
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error(e.sqlstate(), e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM customers"), 0);
        assert_eq!(
            count_params("SELECT * FROM coverage WHERE customer_id = $1 AND appliance_type = $2"),
            2
        );
        assert_eq!(count_params("INSERT INTO cancellations VALUES ($12, $3)"), 12);
        assert_eq!(count_params("SELECT '$' FROM customers"), 0);
        assert_eq!(count_params("SELECT * FROM claims WHERE id = 'quote $4'"), 0);
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let sql = "INSERT INTO claims VALUES ($1, $2, $3, $4)";
        let params: [Option<&[u8]>; 4] = [
            Some(b"CUST001"),
            Some(b"refrigerator"),
            Some(b"Quote was $1 too high, it's $10 now"),
            None,
        ];
        assert_eq!(
            substitute(sql, &params),
            "INSERT INTO claims VALUES ('CUST001', 'refrigerator', 'Quote was $1 too high, it''s $10 now', NULL)"
        );
        assert_eq!(
            substitute("SELECT * FROM claims WHERE id = '$1' AND status = $1", &[Some(b"approved")]),
            "SELECT * FROM claims WHERE id = '$1' AND status = 'approved'"
        );
    }

    #[test]
    fn schemas_follow_shape() {
        let names = |shape| -> Vec<String> {
            schema_for(shape, None)
                .iter()
                .map(|f| f.name().to_string())
                .collect()
        };
        assert_eq!(names(Shape::Records), ["id", "record"]);
        assert_eq!(names(Shape::Alternatives), ["datetime", "technician_id", "duration_minutes"]);
        assert_eq!(schema_for(Shape::Slots, None).len(), 5);
        assert_eq!(schema_for(Shape::Windows, None).len(), 4);
    }

    #[test]
    fn engine_errors_map_to_sqlstates() {
        assert_eq!(engine_sqlstate(ErrorKind::NotFound), "P0002");
        assert_eq!(engine_sqlstate(ErrorKind::Conflict), "23P01");
        assert_eq!(engine_sqlstate(ErrorKind::Internal), "58030");
        let err = EngineError::InPast { requested: 0, now: 1 };
        assert_eq!(engine_sqlstate(err.kind()), "22023");
    }
}
