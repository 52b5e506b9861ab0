use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Case-insensitive membership test for a policy's covered appliances.
pub fn is_covered(covered_appliances: &[String], appliance_type: &str) -> bool {
    let wanted = appliance_type.to_lowercase();
    covered_appliances
        .iter()
        .any(|covered| covered.to_lowercase() == wanted)
}

/// Case-insensitive membership test for a technician's specialties.
pub fn specializes_in(specialties: &[String], appliance_type: &str) -> bool {
    let wanted = appliance_type.to_lowercase();
    specialties
        .iter()
        .any(|specialty| specialty.to_lowercase() == wanted)
}

/// First active visit overlapping `candidate`, in schedule order.
///
/// Completed and cancelled visits never block. `exclude` skips the
/// appointment being moved so it cannot conflict with itself.
pub fn find_conflict(schedule: &Schedule, candidate: &Span, exclude: Option<&str>) -> Option<Conflict> {
    schedule
        .overlapping(candidate)
        .filter(|visit| visit.is_active())
        .filter(|visit| exclude != Some(visit.appointment_id.as_str()))
        .find_map(|visit| {
            visit.span.intersection(candidate).map(|overlap| Conflict {
                appointment_id: visit.appointment_id.clone(),
                existing: visit.span,
                overlap,
            })
        })
}

pub(crate) fn validate_duration(minutes: u32) -> Result<(), EngineError> {
    if minutes == 0 {
        return Err(EngineError::InvalidInput(
            "estimated_duration must be a positive number of minutes".into(),
        ));
    }
    if minutes > MAX_DURATION_MINUTES {
        return Err(EngineError::LimitExceeded("duration longer than one day"));
    }
    Ok(())
}

pub(crate) fn validate_future(start: Ms, now: Ms) -> Result<(), EngineError> {
    if start <= now {
        return Err(EngineError::InPast {
            requested: start,
            now,
        });
    }
    Ok(())
}

/// Caps the width only; an empty or inverted window simply yields nothing.
pub(crate) fn validate_search_window(start: Ms, end: Ms) -> Result<(), EngineError> {
    if end.saturating_sub(start) > MAX_SEARCH_WINDOW_MS {
        return Err(EngineError::LimitExceeded("search window too wide"));
    }
    Ok(())
}

pub(crate) fn validate_id(field: &'static str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidInput(format!("{field} is required")));
    }
    if value.len() > MAX_ID_LEN {
        return Err(EngineError::LimitExceeded("identifier too long"));
    }
    Ok(())
}

pub(crate) fn validate_text(field: &'static str, value: &str, min_len: usize) -> Result<(), EngineError> {
    if value.trim().chars().count() < min_len {
        return Err(EngineError::InvalidInput(format!(
            "{field} must be at least {min_len} characters"
        )));
    }
    if value.len() > MAX_TEXT_LEN {
        return Err(EngineError::LimitExceeded("text field too long"));
    }
    Ok(())
}
