use crate::model::{Alternative, AppointmentStatus, Conflict, Ms, UnknownVariant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Appointment,
    Technician,
    Customer,
    Claim,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Appointment => "Appointment",
            RecordKind::Technician => "Technician",
            RecordKind::Customer => "Customer",
            RecordKind::Claim => "Claim",
        }
    }

    /// Key under which the missing id is echoed back to callers.
    pub fn id_field(&self) -> &'static str {
        match self {
            RecordKind::Appointment => "appointment_id",
            RecordKind::Technician => "technician_id",
            RecordKind::Customer => "customer_id",
            RecordKind::Claim => "claim_id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedAction {
    Cancel,
    Reschedule,
}

/// A booking rejected because the technician is already busy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRejection {
    pub conflict: Conflict,
    pub alternatives: Vec<Alternative>,
    pub rescheduling: bool,
}

/// Coarse classification used by both front ends to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BusinessRule,
    Conflict,
    InvalidInput,
    Limit,
    Internal,
}

#[derive(Debug)]
pub enum EngineError {
    NotFound {
        kind: RecordKind,
        id: String,
    },
    NoQualifiedTechnicians {
        appliance_type: String,
    },
    NotSpecialized {
        technician_id: String,
        appliance_type: String,
        specialties: Vec<String>,
    },
    NotCovered {
        customer_id: String,
        appliance_type: String,
        covered_appliances: Vec<String>,
    },
    Conflict(Box<ConflictRejection>),
    AlreadyClosed {
        action: ClosedAction,
        status: AppointmentStatus,
    },
    InPast {
        requested: Ms,
        now: Ms,
    },
    InvalidStatus(UnknownVariant),
    InvalidInput(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn not_found(kind: RecordKind, id: &str) -> Self {
        EngineError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound { .. } | EngineError::NoQualifiedTechnicians { .. } => {
                ErrorKind::NotFound
            }
            EngineError::NotSpecialized { .. }
            | EngineError::NotCovered { .. }
            | EngineError::AlreadyClosed { .. } => ErrorKind::BusinessRule,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::InPast { .. }
            | EngineError::InvalidStatus(_)
            | EngineError::InvalidInput(_) => ErrorKind::InvalidInput,
            EngineError::LimitExceeded(_) => ErrorKind::Limit,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound { kind, .. } => write!(f, "{} not found", kind.as_str()),
            EngineError::NoQualifiedTechnicians { .. } => {
                write!(f, "No technicians available for this appliance type")
            }
            EngineError::NotSpecialized { .. } => {
                write!(f, "Technician does not specialize in this appliance type")
            }
            EngineError::NotCovered { .. } => write!(f, "Appliance not covered under policy"),
            EngineError::Conflict(rejection) if rejection.rescheduling => {
                write!(f, "Scheduling conflict detected for new time")
            }
            EngineError::Conflict(_) => write!(f, "Scheduling conflict detected"),
            EngineError::AlreadyClosed { action: ClosedAction::Cancel, .. } => {
                write!(f, "Cannot cancel appointment")
            }
            EngineError::AlreadyClosed { action: ClosedAction::Reschedule, .. } => {
                write!(f, "Cannot reschedule appointment")
            }
            EngineError::InPast { .. } => write!(f, "Scheduled time must be in the future"),
            EngineError::InvalidStatus(unknown) => write!(f, "{unknown}"),
            EngineError::InvalidInput(msg) => write!(f, "{msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
