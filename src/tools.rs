//! Tool catalogue served over MCP.
//!
//! Every tool takes a JSON object of arguments and answers with a JSON
//! document. Business failures are answered too, as `{"error": ...}` plus
//! whatever context helps the caller recover (conflict details, covered
//! appliances, the offending status). Only an unknown tool name is a
//! protocol-level failure.

use std::str::FromStr;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error};

use crate::engine::*;
use crate::geo::Coordinates;
use crate::model::*;
use crate::notify::StatusNotice;
use crate::time::{format_datetime, parse_datetime};

/// Fields of an appointment that `update_appointment` may touch.
const UPDATABLE_FIELDS: [&str; 7] = [
    "status",
    "scheduled_datetime",
    "estimated_duration",
    "notes",
    "issue_description",
    "technician_id",
    "service_details",
];

#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

fn tool(name: &str, description: &str, input_schema: Value) -> Tool {
    Tool {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTool(pub String);

impl std::fmt::Display for UnknownTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown tool: {}", self.0)
    }
}

impl std::error::Error for UnknownTool {}

/// Tool registry.
pub fn tool_definitions() -> Vec<Tool> {
    let appointment_filter = json!({
        "type": "string",
        "description": "Filter by status: all, active, completed, scheduled, confirmed, in_progress, cancelled",
        "default": "all"
    });
    let claim_filter = json!({
        "type": "string",
        "description": "Filter by status: all, active, completed, submitted, under_review, approved, rejected",
        "default": "all"
    });
    let coordinates = json!({
        "type": "array",
        "items": { "type": "number" },
        "minItems": 2,
        "maxItems": 2,
        "description": "[latitude, longitude]"
    });

    vec![
        // ── Appointments ─────────────────────────────────
        tool(
            "list_all_appointments",
            "List all appointments, newest first, with optional status filtering",
            json!({
                "type": "object",
                "properties": { "status_filter": appointment_filter }
            }),
        ),
        tool(
            "list_appointments",
            "List appointments for one customer with optional status filtering",
            json!({
                "type": "object",
                "properties": {
                    "customer_id": { "type": "string", "description": "Customer identifier (e.g., CUST001)" },
                    "status_filter": appointment_filter
                },
                "required": ["customer_id"]
            }),
        ),
        tool(
            "create_appointment",
            "Create a new appointment. Overlapping bookings for the technician are rejected with suggested alternatives.",
            json!({
                "type": "object",
                "properties": {
                    "customer_id": { "type": "string" },
                    "technician_id": { "type": "string" },
                    "appliance_type": { "type": "string", "description": "e.g., refrigerator, washing_machine, dryer, dishwasher" },
                    "issue_description": { "type": "string", "description": "At least 5 characters" },
                    "scheduled_datetime": { "type": "string", "description": "ISO datetime (e.g., 2025-09-05T08:00:00)" },
                    "estimated_duration": { "type": "integer", "description": "Minutes", "default": DEFAULT_DURATION_MINUTES },
                    "claim_id": { "type": "string", "description": "Associated claim (optional)" }
                },
                "required": ["customer_id", "technician_id", "appliance_type", "issue_description", "scheduled_datetime"]
            }),
        ),
        tool(
            "update_appointment",
            "Update fields of an existing appointment. No conflict check is made.",
            json!({
                "type": "object",
                "properties": {
                    "appointment_id": { "type": "string" },
                    "updates": {
                        "type": ["string", "object"],
                        "description": "JSON object with any of: status, scheduled_datetime, estimated_duration, notes, issue_description, technician_id, service_details"
                    }
                },
                "required": ["appointment_id", "updates"]
            }),
        ),
        tool(
            "cancel_appointment",
            "Cancel an appointment that is not already completed or cancelled",
            json!({
                "type": "object",
                "properties": {
                    "appointment_id": { "type": "string" },
                    "reason": { "type": "string", "default": DEFAULT_CANCEL_REASON }
                },
                "required": ["appointment_id"]
            }),
        ),
        tool(
            "get_available_slots",
            "Hourly free slots across qualified technicians in a date range",
            json!({
                "type": "object",
                "properties": {
                    "date_range_start": { "type": "string", "description": "ISO datetime" },
                    "date_range_end": { "type": "string", "description": "ISO datetime" },
                    "appliance_type": { "type": "string" },
                    "duration_minutes": { "type": "integer", "default": DEFAULT_DURATION_MINUTES }
                },
                "required": ["date_range_start", "date_range_end", "appliance_type"]
            }),
        ),
        tool(
            "reschedule_appointment",
            "Move an appointment to a new time, checking for conflicts",
            json!({
                "type": "object",
                "properties": {
                    "appointment_id": { "type": "string" },
                    "new_datetime": { "type": "string", "description": "ISO datetime" }
                },
                "required": ["appointment_id", "new_datetime"]
            }),
        ),
        tool(
            "get_appointment_details",
            "Appointment record with technician details",
            json!({
                "type": "object",
                "properties": { "appointment_id": { "type": "string" } },
                "required": ["appointment_id"]
            }),
        ),
        tool(
            "get_alternative_slots",
            "Free times near a preferred datetime for one technician",
            json!({
                "type": "object",
                "properties": {
                    "technician_id": { "type": "string" },
                    "preferred_datetime": { "type": "string", "description": "ISO datetime" },
                    "duration_minutes": { "type": "integer", "default": DEFAULT_DURATION_MINUTES }
                },
                "required": ["technician_id", "preferred_datetime"]
            }),
        ),
        tool(
            "get_technician_free_windows",
            "Unbooked windows in a technician's schedule",
            json!({
                "type": "object",
                "properties": {
                    "technician_id": { "type": "string" },
                    "date_range_start": { "type": "string" },
                    "date_range_end": { "type": "string" },
                    "min_duration_minutes": { "type": "integer" }
                },
                "required": ["technician_id", "date_range_start", "date_range_end"]
            }),
        ),
        // ── Customers and claims ─────────────────────────
        tool(
            "list_all_customers",
            "List every customer with contact and coverage summary",
            json!({ "type": "object", "properties": {} }),
        ),
        tool(
            "list_all_claims",
            "List all claims, newest first, with optional status filtering",
            json!({
                "type": "object",
                "properties": { "status_filter": claim_filter }
            }),
        ),
        tool(
            "get_customer_profile",
            "Customer contact details and covered appliances",
            json!({
                "type": "object",
                "properties": { "customer_id": { "type": "string" } },
                "required": ["customer_id"]
            }),
        ),
        tool(
            "get_policy_details",
            "Policy number, coverage and policy terms for a customer",
            json!({
                "type": "object",
                "properties": { "customer_id": { "type": "string" } },
                "required": ["customer_id"]
            }),
        ),
        tool(
            "create_claim",
            "File a claim for a covered appliance",
            json!({
                "type": "object",
                "properties": {
                    "customer_id": { "type": "string" },
                    "appliance_type": { "type": "string" },
                    "issue_description": { "type": "string" },
                    "urgency_level": { "type": "string", "enum": UrgencyLevel::ALL }
                },
                "required": ["customer_id", "appliance_type", "issue_description", "urgency_level"]
            }),
        ),
        tool(
            "get_claim_history",
            "Claims filed by one customer",
            json!({
                "type": "object",
                "properties": {
                    "customer_id": { "type": "string" },
                    "status_filter": claim_filter
                },
                "required": ["customer_id"]
            }),
        ),
        tool(
            "get_claim_details",
            "Full claim record",
            json!({
                "type": "object",
                "properties": { "claim_id": { "type": "string" } },
                "required": ["claim_id"]
            }),
        ),
        tool(
            "update_claim_status",
            "Move a claim to a new status, optionally appending a note",
            json!({
                "type": "object",
                "properties": {
                    "claim_id": { "type": "string" },
                    "new_status": { "type": "string", "enum": ClaimStatus::ALL },
                    "notes": { "type": "string" }
                },
                "required": ["claim_id", "new_status"]
            }),
        ),
        tool(
            "check_appliance_coverage",
            "Whether a customer's policy covers an appliance type",
            json!({
                "type": "object",
                "properties": {
                    "customer_id": { "type": "string" },
                    "appliance_type": { "type": "string" }
                },
                "required": ["customer_id", "appliance_type"]
            }),
        ),
        // ── Technicians ──────────────────────────────────
        tool(
            "list_all_technicians",
            "List technicians sorted by name",
            json!({
                "type": "object",
                "properties": {
                    "status_filter": {
                        "type": "string",
                        "description": "all, available, en_route, on_site, busy, off_duty",
                        "default": "all"
                    }
                }
            }),
        ),
        tool(
            "get_technician_status",
            "Current status and assignment of a technician",
            json!({
                "type": "object",
                "properties": { "technician_id": { "type": "string" } },
                "required": ["technician_id"]
            }),
        ),
        tool(
            "get_technician_location",
            "Current (simulated) position of a technician",
            json!({
                "type": "object",
                "properties": {
                    "technician_id": { "type": "string" },
                    "destination": coordinates
                },
                "required": ["technician_id"]
            }),
        ),
        tool(
            "list_available_technicians",
            "Available technicians with any of the given specialties, closest first",
            json!({
                "type": "object",
                "properties": {
                    "area": { "type": "string", "description": "Service area (e.g., Chicago)" },
                    "datetime_str": { "type": "string", "description": "Requested ISO datetime" },
                    "specialties": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["area", "datetime_str", "specialties"]
            }),
        ),
        tool(
            "update_technician_status",
            "Change a technician's status, location or current appointment",
            json!({
                "type": "object",
                "properties": {
                    "technician_id": { "type": "string" },
                    "new_status": { "type": "string", "enum": TechnicianStatus::ALL },
                    "location": coordinates,
                    "appointment_id": { "type": "string" }
                },
                "required": ["technician_id", "new_status"]
            }),
        ),
        tool(
            "get_technician_route",
            "Distance, ETA and waypoints from a technician to a destination",
            json!({
                "type": "object",
                "properties": {
                    "technician_id": { "type": "string" },
                    "destination": coordinates
                },
                "required": ["technician_id", "destination"]
            }),
        ),
        tool(
            "notify_status_change",
            "Send the customer a status message about their technician",
            json!({
                "type": "object",
                "properties": {
                    "technician_id": { "type": "string" },
                    "appointment_id": { "type": "string" },
                    "status_message": { "type": "string" }
                },
                "required": ["technician_id", "appointment_id"]
            }),
        ),
    ]
}

// ── Dispatch ─────────────────────────────────────────────

enum ToolFailure {
    Engine(EngineError),
    /// Malformed arguments, rejected before reaching the engine.
    Argument(String),
}

impl From<EngineError> for ToolFailure {
    fn from(e: EngineError) -> Self {
        ToolFailure::Engine(e)
    }
}

type ToolResult = Result<Value, ToolFailure>;

/// Run one tool. The returned document is the tool's answer, success or
/// business failure alike.
pub async fn call_tool(engine: &Engine, name: &str, args: &Value) -> Result<Value, UnknownTool> {
    let outcome = match name {
        "list_all_appointments" => list_all_appointments(engine, args),
        "list_appointments" => list_appointments(engine, args),
        "create_appointment" => create_appointment(engine, args).await,
        "update_appointment" => update_appointment(engine, args).await,
        "cancel_appointment" => cancel_appointment(engine, args).await,
        "get_available_slots" => get_available_slots(engine, args).await,
        "reschedule_appointment" => reschedule_appointment(engine, args).await,
        "get_appointment_details" => get_appointment_details(engine, args),
        "get_alternative_slots" => get_alternative_slots(engine, args).await,
        "get_technician_free_windows" => get_technician_free_windows(engine, args).await,
        "list_all_customers" => Ok(list_all_customers(engine)),
        "list_all_claims" => list_all_claims(engine, args),
        "get_customer_profile" => get_customer_profile(engine, args),
        "get_policy_details" => get_policy_details(engine, args),
        "create_claim" => create_claim(engine, args).await,
        "get_claim_history" => get_claim_history(engine, args),
        "get_claim_details" => get_claim_details(engine, args),
        "update_claim_status" => update_claim_status(engine, args).await,
        "check_appliance_coverage" => check_appliance_coverage(engine, args),
        "list_all_technicians" => list_all_technicians(engine, args),
        "get_technician_status" => get_technician_status(engine, args),
        "get_technician_location" => get_technician_location(engine, args).await,
        "list_available_technicians" => list_available_technicians(engine, args),
        "update_technician_status" => update_technician_status(engine, args).await,
        "get_technician_route" => get_technician_route(engine, args),
        "notify_status_change" => notify_status_change(engine, args),
        _ => return Err(UnknownTool(name.to_string())),
    };

    let status = if outcome.is_ok() { "ok" } else { "error" };
    metrics::counter!(
        crate::observability::TOOL_CALLS_TOTAL,
        "tool" => name.to_string(),
        "status" => status
    )
    .increment(1);

    Ok(match outcome {
        Ok(payload) => payload,
        Err(ToolFailure::Argument(message)) => {
            debug!("{name}: rejected arguments: {message}");
            json!({ "error": message })
        }
        Err(ToolFailure::Engine(e)) => {
            debug!("{name}: {e}");
            error_payload(&e)
        }
    })
}

/// `{"error": ...}` plus the context fields callers use to recover.
pub fn error_payload(err: &EngineError) -> Value {
    let mut body = Map::new();
    body.insert("error".into(), json!(err.to_string()));
    match err {
        EngineError::NotFound { kind, id } => {
            body.insert(kind.id_field().into(), json!(id));
        }
        EngineError::NoQualifiedTechnicians { appliance_type } => {
            body.insert("appliance_type".into(), json!(appliance_type));
        }
        EngineError::NotSpecialized {
            appliance_type,
            specialties,
            ..
        } => {
            body.insert("appliance_type".into(), json!(appliance_type));
            body.insert("technician_specialties".into(), json!(specialties));
        }
        EngineError::NotCovered {
            appliance_type,
            covered_appliances,
            ..
        } => {
            body.insert("appliance_type".into(), json!(appliance_type));
            body.insert("covered_appliances".into(), json!(covered_appliances));
        }
        EngineError::Conflict(rejection) => {
            body.insert("conflict_details".into(), conflict_json(&rejection.conflict));
            body.insert("suggested_alternatives".into(), to_json(&rejection.alternatives));
        }
        EngineError::AlreadyClosed { status, .. } => {
            body.insert("current_status".into(), json!(status.as_str()));
            body.insert(
                "reason".into(),
                json!("Appointment is already completed or cancelled"),
            );
        }
        EngineError::InPast { requested, now } => {
            body.insert("requested_datetime".into(), json!(format_datetime(*requested)));
            body.insert("current_time".into(), json!(format_datetime(*now)));
        }
        EngineError::InvalidStatus(unknown) => {
            body.insert("provided_status".into(), json!(unknown.value));
        }
        EngineError::InvalidInput(_) | EngineError::LimitExceeded(_) => {}
        EngineError::WalError(detail) => {
            error!("tool call failed to persist: {detail}");
            body.insert("error".into(), json!("Internal server error"));
        }
    }
    Value::Object(body)
}

fn conflict_json(conflict: &Conflict) -> Value {
    json!({
        "conflicting_appointment_id": conflict.appointment_id,
        "conflicting_time": format_datetime(conflict.existing.start),
        "conflicting_duration": conflict.existing_duration_minutes(),
        "overlap_start": format_datetime(conflict.overlap.start),
        "overlap_end": format_datetime(conflict.overlap.end),
    })
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn location_json((latitude, longitude): Coordinates) -> Value {
    json!({ "latitude": latitude, "longitude": longitude })
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

// ── Argument extraction ──────────────────────────────────

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolFailure> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s),
        None | Some(Value::Null) => Err(ToolFailure::Argument(format!(
            "Missing required argument: {key}"
        ))),
        Some(_) => Err(ToolFailure::Argument(format!("{key} must be a string"))),
    }
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Result<Option<&'a str>, ToolFailure> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ToolFailure::Argument(format!("{key} must be a string"))),
    }
}

fn minutes(value: &Value, key: &str) -> Result<u32, ToolFailure> {
    value
        .as_u64()
        .and_then(|m| u32::try_from(m).ok())
        .ok_or_else(|| ToolFailure::Argument(format!("{key} must be a non-negative integer")))
}

fn minutes_or(args: &Value, key: &str, default: u32) -> Result<u32, ToolFailure> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => minutes(value, key),
    }
}

fn datetime_arg(args: &Value, key: &str) -> Result<Ms, ToolFailure> {
    let raw = required_str(args, key)?;
    parse_datetime(raw).map_err(|e| ToolFailure::Argument(e.to_string()))
}

fn coordinates_arg(args: &Value, key: &str) -> Result<Option<Coordinates>, ToolFailure> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) if items.len() == 2 => match (items[0].as_f64(), items[1].as_f64()) {
            (Some(lat), Some(lon)) => Ok(Some((lat, lon))),
            _ => Err(invalid_coordinates(key)),
        },
        Some(_) => Err(invalid_coordinates(key)),
    }
}

fn invalid_coordinates(key: &str) -> ToolFailure {
    ToolFailure::Argument(format!("Invalid {key}. Provide [latitude, longitude]"))
}

fn status_arg<S: FromStr<Err = UnknownVariant>>(args: &Value, key: &str) -> Result<S, ToolFailure> {
    required_str(args, key)?
        .parse()
        .map_err(|e| ToolFailure::Engine(EngineError::InvalidStatus(e)))
}

fn filter_arg<'a>(args: &'a Value) -> Result<&'a str, ToolFailure> {
    Ok(optional_str(args, "status_filter")?.unwrap_or("all"))
}

// ── Appointments ─────────────────────────────────────────

fn list_all_appointments(engine: &Engine, args: &Value) -> ToolResult {
    let filter = filter_arg(args)?;
    let appointments = engine.list_appointments(None, &StatusFilter::parse(filter));
    Ok(json!({
        "total_appointments": appointments.len(),
        "status_filter": filter,
        "appointments": to_json(&appointments),
    }))
}

fn list_appointments(engine: &Engine, args: &Value) -> ToolResult {
    let customer_id = required_str(args, "customer_id")?;
    let filter = filter_arg(args)?;
    let appointments = engine.list_appointments(Some(customer_id), &StatusFilter::parse(filter));
    Ok(json!({
        "customer_id": customer_id,
        "total_appointments": appointments.len(),
        "status_filter": filter,
        "appointments": to_json(&appointments),
    }))
}

async fn create_appointment(engine: &Engine, args: &Value) -> ToolResult {
    let scheduled_datetime = datetime_arg(args, "scheduled_datetime")?;
    let new = NewAppointment {
        customer_id: required_str(args, "customer_id")?.to_string(),
        technician_id: required_str(args, "technician_id")?.to_string(),
        appliance_type: required_str(args, "appliance_type")?.to_string(),
        issue_description: required_str(args, "issue_description")?.to_string(),
        scheduled_datetime,
        estimated_duration: minutes_or(args, "estimated_duration", DEFAULT_DURATION_MINUTES)?,
        claim_id: optional_str(args, "claim_id")?.map(str::to_string),
    };
    let appointment = engine.create_appointment(new).await?;
    Ok(json!({
        "success": true,
        "appointment_id": appointment.id,
        "status": appointment.status.as_str(),
        "message": "Appointment created successfully",
        "appointment": to_json(&appointment),
    }))
}

/// `updates` may arrive as a JSON object or as a string holding one.
fn parse_updates(raw: &Value) -> Result<(AppointmentUpdate, Vec<String>), ToolFailure> {
    let invalid = || ToolFailure::Argument("Invalid JSON format for updates".into());
    let object = match raw {
        Value::Object(map) => map.clone(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            _ => return Err(invalid()),
        },
        _ => return Err(invalid()),
    };

    let mut update = AppointmentUpdate::default();
    for (field, value) in &object {
        if !UPDATABLE_FIELDS.contains(&field.as_str()) || value.is_null() {
            continue;
        }
        let text = || {
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| ToolFailure::Argument(format!("{field} must be a string")))
        };
        match field.as_str() {
            "status" => {
                update.status = Some(
                    text()?
                        .parse()
                        .map_err(|e| ToolFailure::Engine(EngineError::InvalidStatus(e)))?,
                )
            }
            "scheduled_datetime" => {
                let ms = parse_datetime(&text()?).map_err(|_| {
                    ToolFailure::Argument(format!("Invalid datetime format for {field}. Use ISO format"))
                })?;
                update.scheduled_datetime = Some(ms);
            }
            "estimated_duration" => update.estimated_duration = Some(minutes(value, field)?),
            "notes" => update.notes = Some(text()?),
            "issue_description" => update.issue_description = Some(text()?),
            "technician_id" => update.technician_id = Some(text()?),
            "service_details" => match value {
                Value::Object(details) => update.service_details = Some(details.clone()),
                _ => {
                    return Err(ToolFailure::Argument(
                        "service_details must be an object".into(),
                    ))
                }
            },
            _ => {}
        }
    }
    Ok((update, object.keys().cloned().collect()))
}

async fn update_appointment(engine: &Engine, args: &Value) -> ToolResult {
    let id = required_str(args, "appointment_id")?;
    engine.appointment(id)?;
    let raw = args
        .get("updates")
        .ok_or_else(|| ToolFailure::Argument("Missing required argument: updates".into()))?;
    let (update, updated_fields) = parse_updates(raw)?;
    let change = engine.update_appointment(id, update).await?;
    Ok(json!({
        "success": true,
        "appointment_id": id,
        "updated_fields": updated_fields,
        "old_data": to_json(&change.before),
        "updated_appointment": to_json(&change.after),
    }))
}

async fn cancel_appointment(engine: &Engine, args: &Value) -> ToolResult {
    let id = required_str(args, "appointment_id")?;
    let reason = optional_str(args, "reason")?.unwrap_or(DEFAULT_CANCEL_REASON);
    let cancelled = engine.cancel_appointment(id, reason).await?;
    Ok(json!({
        "success": true,
        "appointment_id": id,
        "old_status": cancelled.previous_status.as_str(),
        "new_status": cancelled.appointment.status.as_str(),
        "cancellation_reason": reason,
        "appointment": to_json(&cancelled.appointment),
    }))
}

async fn get_available_slots(engine: &Engine, args: &Value) -> ToolResult {
    let query = SlotQuery {
        range_start: datetime_arg(args, "date_range_start")?,
        range_end: datetime_arg(args, "date_range_end")?,
        appliance_type: required_str(args, "appliance_type")?.to_string(),
        duration_minutes: minutes_or(args, "duration_minutes", DEFAULT_DURATION_MINUTES)?,
    };
    let found = engine.available_slots(&query).await?;
    Ok(json!({
        "appliance_type": query.appliance_type,
        "date_range": {
            "start": required_str(args, "date_range_start")?,
            "end": required_str(args, "date_range_end")?,
        },
        "duration_minutes": query.duration_minutes,
        "total_slots": found.total_slots,
        "qualified_technicians": found.qualified_technicians,
        "available_slots": to_json(&found.slots),
    }))
}

async fn reschedule_appointment(engine: &Engine, args: &Value) -> ToolResult {
    let id = required_str(args, "appointment_id")?;
    let new_datetime = datetime_arg(args, "new_datetime")?;
    let moved = engine.reschedule_appointment(id, new_datetime).await?;
    Ok(json!({
        "success": true,
        "appointment_id": id,
        "old_datetime": format_datetime(moved.previous_datetime),
        "new_datetime": format_datetime(moved.appointment.scheduled_datetime),
        "message": "Appointment rescheduled successfully",
        "appointment": to_json(&moved.appointment),
    }))
}

fn get_appointment_details(engine: &Engine, args: &Value) -> ToolResult {
    let id = required_str(args, "appointment_id")?;
    Ok(appointment_details_json(engine.appointment_details(id)?))
}

/// The appointment with a summary of its technician attached.
pub(crate) fn appointment_details_json(details: AppointmentDetails) -> Value {
    let mut payload = to_json(&details.appointment);
    if let (Some(technician), Value::Object(map)) = (details.technician, &mut payload) {
        map.insert(
            "technician_details".into(),
            json!({
                "name": technician.name,
                "phone": technician.phone,
                "specialties": technician.specialties,
                "current_location": [technician.current_location.0, technician.current_location.1],
                "status": technician.status.as_str(),
                "profile": technician.profile.to_value(),
            }),
        );
    }
    payload
}

async fn get_alternative_slots(engine: &Engine, args: &Value) -> ToolResult {
    let technician_id = required_str(args, "technician_id")?;
    let preferred = datetime_arg(args, "preferred_datetime")?;
    let duration = minutes_or(args, "duration_minutes", DEFAULT_DURATION_MINUTES)?;
    let alternatives = engine.alternative_slots(technician_id, preferred, duration).await?;
    Ok(json!({
        "technician_id": technician_id,
        "preferred_datetime": format_datetime(preferred),
        "duration_minutes": duration,
        "suggested_alternatives": to_json(&alternatives),
    }))
}

async fn get_technician_free_windows(engine: &Engine, args: &Value) -> ToolResult {
    let technician_id = required_str(args, "technician_id")?;
    let start = datetime_arg(args, "date_range_start")?;
    let end = datetime_arg(args, "date_range_end")?;
    let min_duration = match args.get("min_duration_minutes") {
        None | Some(Value::Null) => None,
        Some(value) => Some(Ms::from(minutes(value, "min_duration_minutes")?) * MINUTE_MS),
    };
    let windows = engine
        .technician_free_windows(technician_id, start, end, min_duration)
        .await?;
    let windows: Vec<Value> = windows
        .iter()
        .map(|w| {
            json!({
                "start": format_datetime(w.start),
                "end": format_datetime(w.end),
                "duration_minutes": w.duration_ms() / MINUTE_MS,
            })
        })
        .collect();
    Ok(json!({
        "technician_id": technician_id,
        "date_range": { "start": format_datetime(start), "end": format_datetime(end) },
        "total_windows": windows.len(),
        "free_windows": windows,
    }))
}

// ── Customers and claims ─────────────────────────────────

fn list_all_customers(engine: &Engine) -> Value {
    let customers: Vec<Value> = engine
        .list_customers()
        .into_iter()
        .map(|c| {
            json!({
                "id": c.id,
                "name": c.name,
                "email": c.email,
                "phone": c.phone,
                "policy_number": c.policy_number,
                "covered_appliances": c.covered_appliances,
            })
        })
        .collect();
    json!({ "total_customers": customers.len(), "customers": customers })
}

fn list_all_claims(engine: &Engine, args: &Value) -> ToolResult {
    let filter = filter_arg(args)?;
    let claims = engine.list_claims(&StatusFilter::parse(filter));
    Ok(json!({
        "total_claims": claims.len(),
        "status_filter": filter,
        "claims": to_json(&claims),
    }))
}

fn get_customer_profile(engine: &Engine, args: &Value) -> ToolResult {
    let customer = engine.customer(required_str(args, "customer_id")?)?;
    Ok(json!({
        "id": customer.id,
        "name": customer.name,
        "email": customer.email,
        "phone": customer.phone,
        "address": customer.address,
        "policy_number": customer.policy_number,
        "covered_appliances": customer.covered_appliances,
        "created_at": format_datetime(customer.created_at),
    }))
}

fn get_policy_details(engine: &Engine, args: &Value) -> ToolResult {
    let customer = engine.customer(required_str(args, "customer_id")?)?;
    Ok(policy_json(&customer))
}

pub(crate) fn policy_json(customer: &Customer) -> Value {
    json!({
        "customer_id": customer.id,
        "policy_number": customer.policy_number,
        "covered_appliances": customer.covered_appliances,
        "policy_details": customer.policy_details.to_value(),
        "active": true,
    })
}

async fn create_claim(engine: &Engine, args: &Value) -> ToolResult {
    let urgency: UrgencyLevel = required_str(args, "urgency_level")?.parse().map_err(|_| {
        ToolFailure::Argument(format!(
            "Invalid urgency_level. Must be one of: {:?}",
            UrgencyLevel::ALL
        ))
    })?;
    let claim = engine
        .create_claim(NewClaim {
            customer_id: required_str(args, "customer_id")?.to_string(),
            appliance_type: required_str(args, "appliance_type")?.to_string(),
            issue_description: required_str(args, "issue_description")?.to_string(),
            urgency_level: urgency,
        })
        .await?;
    Ok(json!({
        "success": true,
        "claim_id": claim.id,
        "status": claim.status.as_str(),
        "message": "Claim created successfully",
        "claim": to_json(&claim),
    }))
}

fn get_claim_history(engine: &Engine, args: &Value) -> ToolResult {
    let customer_id = required_str(args, "customer_id")?;
    let filter = filter_arg(args)?;
    let claims = engine.claim_history(customer_id, &StatusFilter::parse(filter))?;
    Ok(json!({
        "customer_id": customer_id,
        "total_claims": claims.len(),
        "status_filter": filter,
        "claims": to_json(&claims),
    }))
}

fn get_claim_details(engine: &Engine, args: &Value) -> ToolResult {
    let claim = engine.claim(required_str(args, "claim_id")?)?;
    Ok(to_json(&claim))
}

async fn update_claim_status(engine: &Engine, args: &Value) -> ToolResult {
    let id = required_str(args, "claim_id")?;
    engine.claim(id)?;
    let status: ClaimStatus = status_arg(args, "new_status")?;
    let notes = optional_str(args, "notes")?;
    let change = engine.update_claim_status(id, status, notes).await?;
    Ok(json!({
        "success": true,
        "claim_id": id,
        "old_status": change.previous_status.as_str(),
        "new_status": change.claim.status.as_str(),
        "updated_at": format_datetime(engine.now()),
        "claim": to_json(&change.claim),
    }))
}

fn check_appliance_coverage(engine: &Engine, args: &Value) -> ToolResult {
    let coverage = engine.check_coverage(
        required_str(args, "customer_id")?,
        required_str(args, "appliance_type")?,
    )?;
    Ok(coverage_json(&coverage))
}

/// Policy terms are included only for covered appliances.
pub(crate) fn coverage_json(coverage: &Coverage) -> Value {
    let customer = &coverage.customer;
    let mut payload = json!({
        "customer_id": customer.id,
        "appliance_type": coverage.appliance_type,
        "is_covered": coverage.is_covered,
        "covered_appliances": customer.covered_appliances,
    });
    if coverage.is_covered {
        let terms = &customer.policy_details;
        payload["policy_info"] = json!({
            "coverage_type": terms.get("coverage_type"),
            "deductible": terms.get("deductible"),
            "annual_limit": terms.get("annual_limit"),
        });
    }
    payload
}

// ── Technicians ──────────────────────────────────────────

fn list_all_technicians(engine: &Engine, args: &Value) -> ToolResult {
    let filter = filter_arg(args)?;
    let technicians: Vec<Value> = engine
        .list_technicians(&StatusFilter::parse(filter))
        .into_iter()
        .map(|t| {
            json!({
                "technician_id": t.id,
                "name": t.name,
                "status": t.status.as_str(),
                "specialties": t.specialties,
                "phone": t.phone,
                "current_appointment_id": t.current_appointment_id,
                "current_location": location_json(t.current_location),
            })
        })
        .collect();
    Ok(json!({
        "total_technicians": technicians.len(),
        "status_filter": filter,
        "technicians": technicians,
    }))
}

fn get_technician_status(engine: &Engine, args: &Value) -> ToolResult {
    let technician = engine.technician(required_str(args, "technician_id")?)?;
    Ok(json!({
        "technician_id": technician.id,
        "name": technician.name,
        "status": technician.status.as_str(),
        "specialties": technician.specialties,
        "phone": technician.phone,
        "current_appointment_id": technician.current_appointment_id,
        "estimated_arrival": technician.estimated_arrival.map(format_datetime),
        "last_updated": format_datetime(engine.now()),
    }))
}

async fn get_technician_location(engine: &Engine, args: &Value) -> ToolResult {
    let id = required_str(args, "technician_id")?;
    let destination = coordinates_arg(args, "destination")?;
    let report = engine.technician_location(id, destination).await?;
    Ok(location_report_json(&report, engine.now()))
}

pub(crate) fn location_report_json(report: &LocationReport, now: Ms) -> Value {
    let technician = &report.technician;
    let mut payload = json!({
        "technician_id": technician.id,
        "name": technician.name,
        "current_location": location_json(technician.current_location),
        "status": technician.status.as_str(),
        "estimated_arrival": technician.estimated_arrival.map(format_datetime),
        "last_location_update": format_datetime(now),
    });
    if let Some(eta) = report.eta_minutes {
        payload["eta_minutes"] = json!(eta);
    }
    if report.overdue {
        payload["status_note"] = json!("Should have arrived");
    }
    payload
}

fn list_available_technicians(engine: &Engine, args: &Value) -> ToolResult {
    let area = required_str(args, "area")?;
    let raw_datetime = required_str(args, "datetime_str")?;
    let requested = datetime_arg(args, "datetime_str")?;
    let specialties: Vec<String> = match args.get("specialties") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|s| s.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(one)) => vec![one.clone()],
        _ => {
            return Err(ToolFailure::Argument(
                "specialties must be a list of strings".into(),
            ))
        }
    };
    let found: Vec<Value> = engine
        .available_technicians(requested, &specialties)
        .into_iter()
        .map(available_technician_json)
        .collect();
    Ok(json!({
        "area": area,
        "requested_datetime": raw_datetime,
        "required_specialties": specialties,
        "total_found": found.len(),
        "available_technicians": found,
    }))
}

pub(crate) fn available_technician_json(found: AvailableTechnician) -> Value {
    let t = found.technician;
    json!({
        "technician_id": t.id,
        "name": t.name,
        "specialties": t.specialties,
        "phone": t.phone,
        "current_location": location_json(t.current_location),
        "distance_miles": round1(found.distance_miles),
        "eta_minutes": found.eta_minutes,
        "estimated_arrival": format_datetime(found.estimated_arrival),
        "profile": t.profile.to_value(),
    })
}

async fn update_technician_status(engine: &Engine, args: &Value) -> ToolResult {
    let id = required_str(args, "technician_id")?;
    engine.technician(id)?;
    let status: TechnicianStatus = status_arg(args, "new_status")?;
    let location = coordinates_arg(args, "location")?;
    let appointment_id = optional_str(args, "appointment_id")?.filter(|a| !a.is_empty());
    let change = engine
        .update_technician_status(id, status, location, appointment_id)
        .await?;
    let technician = &change.technician;
    Ok(json!({
        "success": true,
        "technician_id": id,
        "old_status": change.previous_status.as_str(),
        "new_status": technician.status.as_str(),
        "updated_at": format_datetime(engine.now()),
        "current_appointment_id": technician.current_appointment_id,
        "estimated_arrival": technician.estimated_arrival.map(format_datetime),
    }))
}

fn get_technician_route(engine: &Engine, args: &Value) -> ToolResult {
    let id = required_str(args, "technician_id")?;
    engine.technician(id)?;
    let destination = coordinates_arg(args, "destination")?.ok_or_else(|| {
        ToolFailure::Argument("Invalid destination. Provide [latitude, longitude]".into())
    })?;
    let route = engine.technician_route(id, destination)?;
    Ok(route_json(&route, engine.now()))
}

pub(crate) fn route_json(route: &Route, now: Ms) -> Value {
    json!({
        "technician_id": route.technician_id,
        "technician_name": route.technician_name,
        "origin": location_json(route.origin),
        "destination": location_json(route.destination),
        "distance_miles": round1(route.distance_miles),
        "estimated_travel_time_minutes": route.eta_minutes,
        "estimated_arrival": format_datetime(route.estimated_arrival),
        "traffic_conditions": route.traffic.as_str(),
        "route_waypoints": to_json(&route.waypoints),
        "calculated_at": format_datetime(now),
    })
}

fn notify_status_change(engine: &Engine, args: &Value) -> ToolResult {
    let notice = engine.notify_status_change(
        required_str(args, "technician_id")?,
        required_str(args, "appointment_id")?,
        optional_str(args, "status_message")?,
    )?;
    Ok(notice_json(&notice))
}

pub(crate) fn notice_json(notice: &StatusNotice) -> Value {
    let mut payload = json!({
        "success": true,
        "appointment_id": notice.appointment_id,
        "technician_id": notice.technician_id,
        "technician_name": notice.technician_name,
        "current_status": notice.current_status.as_str(),
        "message": notice.message,
        "timestamp": format_datetime(notice.timestamp),
        "estimated_arrival": notice.estimated_arrival.map(format_datetime),
    });
    if let Some(location) = notice.current_location {
        payload["current_location"] = location_json(location);
    }
    payload
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::Arc;

    use super::*;
    use crate::fixtures::Fixtures;
    use crate::time::FixedClock;

    // 2025-09-01T00:00:00Z
    const SEPT_1: Ms = 1_756_684_800_000;

    fn engine() -> Engine {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("mock_data");
        let fixtures = Fixtures::load(&dir).unwrap();
        Engine::in_memory(fixtures, Arc::new(FixedClock::new(SEPT_1)), 42)
    }

    async fn call(engine: &Engine, name: &str, args: Value) -> Value {
        call_tool(engine, name, &args).await.unwrap()
    }

    #[test]
    fn registry_lists_every_tool_once() {
        let tools = tool_definitions();
        assert_eq!(tools.len(), 26);
        let names: HashSet<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names.len(), tools.len());
        for tool in &tools {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
            let wire = serde_json::to_value(tool).unwrap();
            assert!(wire.get("inputSchema").is_some());
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_a_protocol_error() {
        let engine = engine();
        let err = call_tool(&engine, "drop_tables", &json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown tool: drop_tables");
    }

    #[tokio::test]
    async fn conflicting_create_reports_details_and_alternatives() {
        let engine = engine();
        let payload = call(
            &engine,
            "create_appointment",
            json!({
                "customer_id": "CUST001",
                "technician_id": "TECH001",
                "appliance_type": "refrigerator",
                "issue_description": "Ice maker is jammed",
                "scheduled_datetime": "2025-09-05T09:00:00",
                "estimated_duration": 60
            }),
        )
        .await;
        assert_eq!(payload["error"], "Scheduling conflict detected");
        let details = &payload["conflict_details"];
        assert_eq!(details["conflicting_appointment_id"], "APPT001");
        assert_eq!(details["conflicting_time"], "2025-09-05T08:00:00");
        assert_eq!(details["conflicting_duration"], 120);
        assert_eq!(details["overlap_start"], "2025-09-05T09:00:00");
        assert_eq!(details["overlap_end"], "2025-09-05T10:00:00");
        let alternatives = payload["suggested_alternatives"].as_array().unwrap();
        assert_eq!(alternatives.len(), 5);
        assert_eq!(alternatives[0]["datetime"], "2025-09-02T09:00:00");
    }

    #[tokio::test]
    async fn create_then_read_back() {
        let engine = engine();
        let created = call(
            &engine,
            "create_appointment",
            json!({
                "customer_id": "CUST001",
                "technician_id": "TECH001",
                "appliance_type": "refrigerator",
                "issue_description": "Ice maker is jammed",
                "scheduled_datetime": "2025-09-05T10:00:00",
                "estimated_duration": 60
            }),
        )
        .await;
        assert_eq!(created["success"], true);
        assert_eq!(created["appointment_id"], "APPT003");
        assert_eq!(created["appointment"]["scheduled_datetime"], "2025-09-05T10:00:00");
        assert_eq!(created["appointment"]["service_details"]["warranty_covered"], true);

        let details = call(&engine, "get_appointment_details", json!({"appointment_id": "APPT003"})).await;
        assert_eq!(details["technician_details"]["name"], "Mike Johnson");
        assert_eq!(details["technician_details"]["current_location"], json!([41.8781, -87.6298]));
    }

    #[tokio::test]
    async fn bad_datetime_and_missing_arguments() {
        let engine = engine();
        let payload = call(
            &engine,
            "reschedule_appointment",
            json!({"appointment_id": "APPT001", "new_datetime": "next tuesday"}),
        )
        .await;
        assert_eq!(
            payload["error"],
            "Invalid datetime format. Use ISO format (YYYY-MM-DDTHH:MM:SS)"
        );
        let payload = call(&engine, "get_claim_details", json!({})).await;
        assert_eq!(payload["error"], "Missing required argument: claim_id");
    }

    #[tokio::test]
    async fn coverage_uses_case_insensitive_match() {
        let engine = engine();
        let payload = call(
            &engine,
            "check_appliance_coverage",
            json!({"customer_id": "CUST001", "appliance_type": "REFRIGERATOR"}),
        )
        .await;
        assert_eq!(payload["is_covered"], true);
        assert_eq!(payload["policy_info"]["deductible"], 100);

        let payload = call(
            &engine,
            "check_appliance_coverage",
            json!({"customer_id": "CUST001", "appliance_type": "oven"}),
        )
        .await;
        assert_eq!(payload["is_covered"], false);
        assert!(payload.get("policy_info").is_none());
    }

    #[tokio::test]
    async fn no_technicians_for_appliance() {
        let engine = engine();
        let payload = call(
            &engine,
            "get_available_slots",
            json!({
                "date_range_start": "2025-09-05T00:00:00",
                "date_range_end": "2025-09-06T00:00:00",
                "appliance_type": "hot_tub"
            }),
        )
        .await;
        assert!(payload["error"].as_str().unwrap().contains("No technicians available"));
        assert_eq!(payload["appliance_type"], "hot_tub");
    }

    #[tokio::test]
    async fn cancelling_completed_appointment_reports_status() {
        let engine = engine();
        let payload = call(&engine, "cancel_appointment", json!({"appointment_id": "APPT002"})).await;
        assert_eq!(payload["error"], "Cannot cancel appointment");
        assert_eq!(payload["current_status"], "completed");

        let payload = call(&engine, "cancel_appointment", json!({"appointment_id": "APPT001"})).await;
        assert_eq!(payload["old_status"], "scheduled");
        assert_eq!(payload["new_status"], "cancelled");
        assert_eq!(payload["cancellation_reason"], "Customer request");
    }

    #[tokio::test]
    async fn update_accepts_json_string() {
        let engine = engine();
        let payload = call(
            &engine,
            "update_appointment",
            json!({
                "appointment_id": "APPT001",
                "updates": "{\"status\": \"confirmed\", \"service_details\": {\"priority\": \"low\"}}"
            }),
        )
        .await;
        assert_eq!(payload["success"], true);
        assert_eq!(payload["old_data"]["status"], "scheduled");
        assert_eq!(payload["updated_appointment"]["status"], "confirmed");
        assert_eq!(payload["updated_appointment"]["service_details"]["priority"], "low");
        let mut fields: Vec<String> = serde_json::from_value(payload["updated_fields"].clone()).unwrap();
        fields.sort();
        assert_eq!(fields, ["service_details", "status"]);
    }

    #[tokio::test]
    async fn update_rejects_bad_input() {
        let engine = engine();
        let payload = call(
            &engine,
            "update_appointment",
            json!({"appointment_id": "APPT001", "updates": "{not json"}),
        )
        .await;
        assert_eq!(payload["error"], "Invalid JSON format for updates");

        let payload = call(
            &engine,
            "update_appointment",
            json!({"appointment_id": "APPT001", "updates": {"status": "teleported"}}),
        )
        .await;
        assert_eq!(payload["provided_status"], "teleported");

        let payload = call(
            &engine,
            "update_appointment",
            json!({"appointment_id": "APPT404", "updates": "{not json"}),
        )
        .await;
        assert_eq!(payload["error"], "Appointment not found");
        assert_eq!(payload["appointment_id"], "APPT404");
    }

    #[tokio::test]
    async fn claim_tools() {
        let engine = engine();
        let payload = call(
            &engine,
            "create_claim",
            json!({
                "customer_id": "CUST003",
                "appliance_type": "dryer",
                "issue_description": "Drum will not turn",
                "urgency_level": "high"
            }),
        )
        .await;
        assert_eq!(payload["error"], "Appliance not covered under policy");
        assert_eq!(payload["covered_appliances"], json!(["refrigerator", "microwave"]));

        let payload = call(
            &engine,
            "create_claim",
            json!({
                "customer_id": "CUST003",
                "appliance_type": "Microwave",
                "issue_description": "Sparks when running",
                "urgency_level": "EMERGENCY"
            }),
        )
        .await;
        assert_eq!(payload["claim_id"], "CLAIM003");
        assert_eq!(payload["claim"]["urgency_level"], "emergency");

        let payload = call(
            &engine,
            "update_claim_status",
            json!({"claim_id": "CLAIM003", "new_status": "approved", "notes": "Fast track"}),
        )
        .await;
        assert_eq!(payload["old_status"], "submitted");
        assert_eq!(payload["claim"]["approved_at"], "2025-09-01T00:00:00");

        let history = call(&engine, "get_claim_history", json!({"customer_id": "CUST003"})).await;
        assert_eq!(history["total_claims"], 1);
    }

    #[tokio::test]
    async fn technician_tools() {
        let engine = engine();
        let listed = call(&engine, "list_all_technicians", json!({"status_filter": "available"})).await;
        assert_eq!(listed["total_technicians"], 1);
        assert_eq!(listed["technicians"][0]["current_location"]["latitude"], 41.8781);

        let payload = call(
            &engine,
            "update_technician_status",
            json!({"technician_id": "TECH001", "new_status": "flying"}),
        )
        .await;
        assert!(payload["error"].as_str().unwrap().starts_with("Invalid status. Must be one of"));

        let payload = call(
            &engine,
            "get_technician_route",
            json!({"technician_id": "TECH001", "destination": [41.9]}),
        )
        .await;
        assert_eq!(payload["error"], "Invalid destination. Provide [latitude, longitude]");

        let payload = call(
            &engine,
            "notify_status_change",
            json!({"technician_id": "TECH003", "appointment_id": "APPT001"}),
        )
        .await;
        assert_eq!(
            payload["message"],
            "Status update: Technician David Martinez status is now off_duty."
        );
        assert!(payload.get("current_location").is_none());
    }
}
