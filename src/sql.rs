use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::engine::{
    AppointmentUpdate, NewAppointment, NewClaim, SlotQuery, DEFAULT_CANCEL_REASON,
    DEFAULT_DURATION_MINUTES,
};
use crate::geo::Coordinates;
use crate::model::*;
use crate::time::parse_datetime;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectAppointments {
        customer_id: Option<String>,
        status: StatusFilter,
    },
    SelectAppointment {
        id: String,
    },
    SelectAvailableSlots(SlotQuery),
    SelectAlternativeSlots {
        technician_id: String,
        preferred: Ms,
        duration_minutes: u32,
    },
    SelectFreeWindows {
        technician_id: String,
        start: Ms,
        end: Ms,
        min_duration: Option<Ms>,
    },
    InsertAppointment(NewAppointment),
    UpdateAppointment {
        id: String,
        update: AppointmentUpdate,
    },
    RescheduleAppointment {
        id: String,
        new_datetime: Ms,
    },
    CancelAppointment {
        id: String,
        reason: String,
    },
    SelectCustomers {
        id: Option<String>,
    },
    SelectPolicy {
        customer_id: String,
    },
    SelectCoverage {
        customer_id: String,
        appliance_type: String,
    },
    SelectClaims {
        id: Option<String>,
        customer_id: Option<String>,
        status: StatusFilter,
    },
    InsertClaim(NewClaim),
    UpdateClaim {
        id: String,
        status: ClaimStatus,
        notes: Option<String>,
    },
    SelectTechnicians {
        id: Option<String>,
        status: StatusFilter,
    },
    SelectTechnicianLocation {
        technician_id: String,
        destination: Option<Coordinates>,
    },
    SelectTechnicianRoute {
        technician_id: String,
        destination: Coordinates,
    },
    SelectAvailableTechnicians {
        datetime: Ms,
        specialties: Vec<String>,
    },
    UpdateTechnician {
        id: String,
        status: TechnicianStatus,
        location: Option<Coordinates>,
        appointment_id: Option<String>,
    },
    InsertNotification {
        technician_id: String,
        appointment_id: String,
        message: Option<String>,
    },
}

/// Column layout of a statement's result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `(id, record)` with the record as a JSON document.
    Records,
    Slots,
    Alternatives,
    Windows,
}

impl Shape {
    fn for_table(table: &str) -> Self {
        match table {
            "available_slots" => Shape::Slots,
            "alternative_slots" => Shape::Alternatives,
            "free_windows" => Shape::Windows,
            _ => Shape::Records,
        }
    }
}

impl Command {
    pub fn shape(&self) -> Shape {
        match self {
            Command::SelectAvailableSlots(_) => Shape::Slots,
            Command::SelectAlternativeSlots { .. } => Shape::Alternatives,
            Command::SelectFreeWindows { .. } => Shape::Windows,
            _ => Shape::Records,
        }
    }
}

fn parse_statements(sql: &str) -> Result<Vec<Statement>, SqlError> {
    let dialect = PostgreSqlDialect {};
    Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let stmts = parse_statements(sql)?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Result layout of `sql` without evaluating its values, so statements with
/// unbound `$n` placeholders can be described.
pub fn result_shape(sql: &str) -> Shape {
    let Ok(stmts) = parse_statements(sql) else {
        return Shape::Records;
    };
    let Some(Statement::Query(query)) = stmts.first() else {
        return Shape::Records;
    };
    match query.body.as_ref() {
        SetExpr::Select(select) => select
            .from
            .first()
            .and_then(|from| table_factor_name(&from.relation).ok())
            .map_or(Shape::Records, |table| Shape::for_table(&table)),
        _ => Shape::Records,
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "appointments" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("appointments", 5, values.len()));
            }
            Ok(Command::InsertAppointment(NewAppointment {
                customer_id: parse_string(&values[0])?,
                technician_id: parse_string(&values[1])?,
                appliance_type: parse_string(&values[2])?,
                issue_description: parse_string(&values[3])?,
                scheduled_datetime: parse_datetime_expr(&values[4])?,
                estimated_duration: match values.get(5) {
                    Some(expr) => parse_minutes_or_null(expr)?.unwrap_or(DEFAULT_DURATION_MINUTES),
                    None => DEFAULT_DURATION_MINUTES,
                },
                claim_id: match values.get(6) {
                    Some(expr) => parse_string_or_null(expr)?,
                    None => None,
                },
            }))
        }
        "reschedules" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("reschedules", 2, values.len()));
            }
            Ok(Command::RescheduleAppointment {
                id: parse_string(&values[0])?,
                new_datetime: parse_datetime_expr(&values[1])?,
            })
        }
        "cancellations" => {
            if values.is_empty() {
                return Err(SqlError::WrongArity("cancellations", 1, 0));
            }
            let reason = match values.get(1) {
                Some(expr) => parse_string_or_null(expr)?,
                None => None,
            };
            Ok(Command::CancelAppointment {
                id: parse_string(&values[0])?,
                reason: reason.unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string()),
            })
        }
        "claims" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("claims", 4, values.len()));
            }
            let urgency = parse_string(&values[3])?;
            let urgency_level = urgency.parse::<UrgencyLevel>().map_err(|_| {
                SqlError::InvalidValue(format!(
                    "Invalid urgency_level. Must be one of: {:?}",
                    UrgencyLevel::ALL
                ))
            })?;
            Ok(Command::InsertClaim(NewClaim {
                customer_id: parse_string(&values[0])?,
                appliance_type: parse_string(&values[1])?,
                issue_description: parse_string(&values[2])?,
                urgency_level,
            }))
        }
        "notifications" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("notifications", 2, values.len()));
            }
            let message = match values.get(2) {
                Some(expr) => parse_string_or_null(expr)?,
                None => None,
            };
            Ok(Command::InsertNotification {
                technician_id: parse_string(&values[0])?,
                appointment_id: parse_string(&values[1])?,
                message,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "appointments" => Ok(Command::CancelAppointment {
            id,
            reason: DEFAULT_CANCEL_REASON.to_string(),
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;
    let mut columns = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()))
            }
        };
        columns.push((column, &assignment.value));
    }

    match table.as_str() {
        "appointments" => {
            let mut update = AppointmentUpdate::default();
            for (column, value) in columns {
                match column.as_str() {
                    "status" => update.status = Some(parse_status(value)?),
                    "scheduled_datetime" => {
                        update.scheduled_datetime = Some(parse_datetime_expr(value)?)
                    }
                    "estimated_duration" => update.estimated_duration = Some(parse_minutes(value)?),
                    "notes" => update.notes = parse_string_or_null(value)?,
                    "issue_description" => update.issue_description = Some(parse_string(value)?),
                    "technician_id" => update.technician_id = Some(parse_string(value)?),
                    "service_details" => update.service_details = Some(parse_json_object(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateAppointment { id, update })
        }
        "claims" => {
            let (mut status, mut notes) = (None, None);
            for (column, value) in columns {
                match column.as_str() {
                    "status" => status = Some(parse_status(value)?),
                    "notes" => notes = parse_string_or_null(value)?,
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateClaim {
                id,
                status: status.ok_or(SqlError::MissingColumn("status"))?,
                notes,
            })
        }
        "technicians" => {
            let (mut status, mut latitude, mut longitude, mut appointment_id) =
                (None, None, None, None);
            for (column, value) in columns {
                match column.as_str() {
                    "status" => status = Some(parse_status(value)?),
                    "latitude" => latitude = Some(parse_f64_expr(value)?),
                    "longitude" => longitude = Some(parse_f64_expr(value)?),
                    "appointment_id" | "current_appointment_id" => {
                        appointment_id = parse_string_or_null(value)?
                    }
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateTechnician {
                id,
                status: status.ok_or(SqlError::MissingColumn("status"))?,
                location: coordinates(latitude, longitude)?,
                appointment_id: appointment_id.filter(|a| !a.is_empty()),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "appointments" => match filters.eq("id") {
            Some(id) => Ok(Command::SelectAppointment { id: parse_string(id)? }),
            None => Ok(Command::SelectAppointments {
                customer_id: filters.optional_string("customer_id")?,
                status: filters.status_filter()?,
            }),
        },
        "available_slots" => Ok(Command::SelectAvailableSlots(SlotQuery {
            appliance_type: parse_string(filters.require(Cmp::Eq, "appliance_type")?)?,
            range_start: parse_datetime_expr(filters.require(Cmp::GtEq, "start")?)?,
            range_end: parse_datetime_expr(filters.require(Cmp::LtEq, "end")?)?,
            duration_minutes: filters.minutes_or("duration", DEFAULT_DURATION_MINUTES)?,
        })),
        "alternative_slots" => Ok(Command::SelectAlternativeSlots {
            technician_id: parse_string(filters.require(Cmp::Eq, "technician_id")?)?,
            preferred: parse_datetime_expr(filters.require(Cmp::Eq, "start")?)?,
            duration_minutes: filters.minutes_or("duration", DEFAULT_DURATION_MINUTES)?,
        }),
        "free_windows" => Ok(Command::SelectFreeWindows {
            technician_id: parse_string(filters.require(Cmp::Eq, "technician_id")?)?,
            start: parse_datetime_expr(filters.require(Cmp::GtEq, "start")?)?,
            end: parse_datetime_expr(filters.require(Cmp::LtEq, "end")?)?,
            min_duration: match filters.eq("min_duration") {
                Some(expr) => Some(Ms::from(parse_minutes(expr)?) * MINUTE_MS),
                None => None,
            },
        }),
        "customers" => Ok(Command::SelectCustomers {
            id: filters.optional_string("id")?,
        }),
        "policies" => Ok(Command::SelectPolicy {
            customer_id: parse_string(filters.require(Cmp::Eq, "customer_id")?)?,
        }),
        "coverage" => Ok(Command::SelectCoverage {
            customer_id: parse_string(filters.require(Cmp::Eq, "customer_id")?)?,
            appliance_type: parse_string(filters.require(Cmp::Eq, "appliance_type")?)?,
        }),
        "claims" => Ok(Command::SelectClaims {
            id: filters.optional_string("id")?,
            customer_id: filters.optional_string("customer_id")?,
            status: filters.status_filter()?,
        }),
        "technicians" => Ok(Command::SelectTechnicians {
            id: filters.optional_string("id")?,
            status: filters.status_filter()?,
        }),
        "technician_locations" => Ok(Command::SelectTechnicianLocation {
            technician_id: parse_string(filters.require(Cmp::Eq, "technician_id")?)?,
            destination: filters.coordinates()?,
        }),
        "technician_routes" => Ok(Command::SelectTechnicianRoute {
            technician_id: parse_string(filters.require(Cmp::Eq, "technician_id")?)?,
            destination: filters
                .coordinates()?
                .ok_or(SqlError::MissingFilter("latitude"))?,
        }),
        "available_technicians" => Ok(Command::SelectAvailableTechnicians {
            datetime: parse_datetime_expr(filters.require(Cmp::Eq, "datetime")?)?,
            specialties: parse_string(filters.require(Cmp::Eq, "specialties")?)?
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmp {
    Eq,
    GtEq,
    LtEq,
}

/// Column comparisons from a conjunctive WHERE clause.
#[derive(Default)]
struct Filters<'a> {
    terms: Vec<(String, Cmp, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn get(&self, cmp: Cmp, column: &str) -> Option<&'a Expr> {
        self.terms
            .iter()
            .rev()
            .find(|(c, op, _)| *op == cmp && c == column)
            .map(|(_, _, expr)| *expr)
    }

    fn eq(&self, column: &str) -> Option<&'a Expr> {
        self.get(Cmp::Eq, column)
    }

    fn require(&self, cmp: Cmp, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(cmp, column).ok_or(SqlError::MissingFilter(column))
    }

    fn optional_string(&self, column: &str) -> Result<Option<String>, SqlError> {
        match self.eq(column) {
            Some(expr) => parse_string_or_null(expr),
            None => Ok(None),
        }
    }

    fn status_filter(&self) -> Result<StatusFilter, SqlError> {
        Ok(self
            .optional_string("status")?
            .map_or(StatusFilter::All, |s| StatusFilter::parse(&s.to_ascii_lowercase())))
    }

    fn minutes_or(&self, column: &str, default: u32) -> Result<u32, SqlError> {
        match self.eq(column) {
            Some(expr) => parse_minutes(expr),
            None => Ok(default),
        }
    }

    fn coordinates(&self) -> Result<Option<Coordinates>, SqlError> {
        let latitude = self.eq("latitude").map(parse_f64_expr).transpose()?;
        let longitude = self.eq("longitude").map(parse_f64_expr).transpose()?;
        coordinates(latitude, longitude)
    }
}

fn collect_filters<'a>(expr: &'a Expr, filters: &mut Filters<'a>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, filters),
        Expr::BinaryOp { left, op, right } => {
            let cmp = match op {
                ast::BinaryOperator::And => {
                    collect_filters(left, filters)?;
                    return collect_filters(right, filters);
                }
                ast::BinaryOperator::Eq => Cmp::Eq,
                ast::BinaryOperator::GtEq => Cmp::GtEq,
                ast::BinaryOperator::LtEq => Cmp::LtEq,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            filters.terms.push((column, cmp, right.as_ref()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn coordinates(latitude: Option<f64>, longitude: Option<f64>) -> Result<Option<Coordinates>, SqlError> {
    match (latitude, longitude) {
        (Some(lat), Some(lon)) => Ok(Some((lat, lon))),
        (None, None) => Ok(None),
        (None, Some(_)) => Err(SqlError::MissingFilter("latitude")),
        (Some(_), None) => Err(SqlError::MissingFilter("longitude")),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<String, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_string(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    parse_string_or_null(expr)?.ok_or_else(|| SqlError::InvalidValue("unexpected NULL".into()))
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|_| SqlError::InvalidValue(format!("expected integer, got {s}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_f64_expr(expr: &Expr) -> Result<f64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|_| SqlError::InvalidValue(format!("expected number, got {s}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_f64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_minutes(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::InvalidValue(format!("{v} out of range for minutes")))
}

fn parse_minutes_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_minutes(expr).map(Some),
    }
}

/// ISO-8601 text or Unix milliseconds.
fn parse_datetime_expr(expr: &Expr) -> Result<Ms, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => match s.trim().parse::<i64>() {
            Ok(ms) => Ok(ms),
            Err(_) => parse_datetime(s).map_err(|e| SqlError::InvalidDatetime(e.to_string())),
        },
        _ => parse_i64_expr(expr),
    }
}

fn parse_status<S: std::str::FromStr<Err = UnknownVariant>>(expr: &Expr) -> Result<S, SqlError> {
    parse_string(expr)?
        .parse()
        .map_err(|e: UnknownVariant| SqlError::InvalidValue(e.to_string()))
}

fn parse_json_object(expr: &Expr) -> Result<serde_json::Map<String, serde_json::Value>, SqlError> {
    let text = parse_string(expr)?;
    match serde_json::from_str(&text) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        _ => Err(SqlError::InvalidValue("service_details must be a JSON object".into())),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    MissingColumn(&'static str),
    InvalidDatetime(String),
    InvalidValue(String),
}

impl SqlError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            SqlError::Parse(_)
            | SqlError::Empty
            | SqlError::WrongArity(..)
            | SqlError::MissingFilter(_)
            | SqlError::MissingColumn(_) => "42601",
            SqlError::Unsupported(_) => "0A000",
            SqlError::UnknownTable(_) => "42P01",
            SqlError::UnknownColumn(_) => "42703",
            SqlError::InvalidDatetime(_) => "22007",
            SqlError::InvalidValue(_) => "22023",
        }
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::InvalidDatetime(msg) | SqlError::InvalidValue(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for SqlError {}
