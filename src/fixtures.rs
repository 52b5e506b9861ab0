//! Seed data loaded at startup from a directory of JSON documents.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{info, warn};

use crate::geo;
use crate::limits::*;
use crate::model::*;

/// Directories searched when `REPAIRDESK_DATA_DIR` is unset.
pub const DEFAULT_DATA_DIRS: [&str; 2] = ["./mock_data", "/app/mock_data"];

#[derive(Debug, Clone, Default)]
pub struct Fixtures {
    pub customers: Vec<Customer>,
    pub technicians: Vec<Technician>,
    pub appointments: Vec<Appointment>,
    pub claims: Vec<Claim>,
}

#[derive(Debug)]
pub enum FixtureError {
    Io(PathBuf, io::Error),
    Parse(PathBuf, serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for FixtureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FixtureError::Io(path, e) => write!(f, "{}: {e}", path.display()),
            FixtureError::Parse(path, e) => write!(f, "{}: {e}", path.display()),
            FixtureError::Invalid(msg) => write!(f, "invalid fixture: {msg}"),
        }
    }
}

impl std::error::Error for FixtureError {}

#[derive(Deserialize)]
struct CustomerFile {
    customers: Vec<Customer>,
}

#[derive(Deserialize)]
struct TechnicianFile {
    technicians: Vec<Technician>,
}

#[derive(Deserialize)]
struct AppointmentFile {
    appointments: Vec<Appointment>,
}

#[derive(Deserialize)]
struct ClaimFile {
    claims: Vec<Claim>,
}

/// Parse `dir/name`, or `None` with a warning when the file is absent.
fn read_document<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<Option<T>, FixtureError> {
    let path = dir.join(name);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("fixture {} not found, starting empty", path.display());
            return Ok(None);
        }
        Err(e) => return Err(FixtureError::Io(path, e)),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| FixtureError::Parse(path, e))
}

fn check_unique<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<(), FixtureError> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.is_empty() || id.len() > MAX_ID_LEN {
            return Err(FixtureError::Invalid(format!("{kind} id {id:?} is empty or too long")));
        }
        if !seen.insert(id) {
            return Err(FixtureError::Invalid(format!("duplicate {kind} id {id}")));
        }
    }
    Ok(())
}

impl Fixtures {
    /// Load every document in `dir`. Missing files are empty collections;
    /// malformed JSON and invariant violations are errors.
    pub fn load(dir: &Path) -> Result<Self, FixtureError> {
        let fixtures = Self {
            customers: read_document::<CustomerFile>(dir, "customers.json")?
                .map(|f| f.customers)
                .unwrap_or_default(),
            technicians: read_document::<TechnicianFile>(dir, "technicians.json")?
                .map(|f| f.technicians)
                .unwrap_or_default(),
            appointments: read_document::<AppointmentFile>(dir, "appointments.json")?
                .map(|f| f.appointments)
                .unwrap_or_default(),
            claims: read_document::<ClaimFile>(dir, "claims.json")?
                .map(|f| f.claims)
                .unwrap_or_default(),
        };
        fixtures.validate()?;
        info!(
            "loaded {} customers, {} technicians, {} appointments, {} claims from {}",
            fixtures.customers.len(),
            fixtures.technicians.len(),
            fixtures.appointments.len(),
            fixtures.claims.len(),
            dir.display()
        );
        Ok(fixtures)
    }

    /// `configured` if given, else the first default directory that exists.
    pub fn discover(configured: Option<&Path>) -> Option<PathBuf> {
        if let Some(dir) = configured {
            return Some(dir.to_path_buf());
        }
        DEFAULT_DATA_DIRS
            .iter()
            .map(PathBuf::from)
            .find(|dir| dir.is_dir())
    }

    pub fn validate(&self) -> Result<(), FixtureError> {
        check_unique("customer", self.customers.iter().map(|c| c.id.as_str()))?;
        check_unique("technician", self.technicians.iter().map(|t| t.id.as_str()))?;
        check_unique("appointment", self.appointments.iter().map(|a| a.id.as_str()))?;
        check_unique("claim", self.claims.iter().map(|c| c.id.as_str()))?;

        for technician in &self.technicians {
            if technician.specialties.iter().all(|s| s.trim().is_empty()) {
                return Err(FixtureError::Invalid(format!(
                    "technician {} has no specialties",
                    technician.id
                )));
            }
            if !geo::valid_coordinates(technician.current_location) {
                return Err(FixtureError::Invalid(format!(
                    "technician {} has an out-of-range location",
                    technician.id
                )));
            }
        }
        for appointment in &self.appointments {
            if appointment.estimated_duration == 0 || appointment.estimated_duration > MAX_DURATION_MINUTES {
                return Err(FixtureError::Invalid(format!(
                    "appointment {} has duration {} minutes",
                    appointment.id, appointment.estimated_duration
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("repairdesk_test_fixtures").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    const TECHNICIANS: &str = r#"{"technicians": [{
        "id": "TECH001", "name": "Mike Johnson",
        "specialties": ["refrigerator", "dishwasher"],
        "current_location": [41.8781, -87.6298],
        "status": "available", "phone": "555-0101",
        "profile": {"rating": 4.8}
    }]}"#;

    #[test]
    fn missing_files_load_empty() {
        let dir = tmp_dir("missing");
        fs::write(dir.join("technicians.json"), TECHNICIANS).unwrap();
        let fixtures = Fixtures::load(&dir).unwrap();
        assert_eq!(fixtures.technicians.len(), 1);
        assert_eq!(fixtures.technicians[0].rating(), 4.8);
        assert!(fixtures.customers.is_empty());
        assert!(fixtures.appointments.is_empty());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = tmp_dir("malformed");
        fs::write(dir.join("claims.json"), "{\"claims\": [").unwrap();
        assert!(matches!(Fixtures::load(&dir), Err(FixtureError::Parse(..))));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let dir = tmp_dir("duplicates");
        let doubled = TECHNICIANS.replace("}]}", "}, {\"id\": \"TECH001\", \"name\": \"Again\", \"specialties\": [], \"current_location\": [0.0, 0.0], \"status\": \"busy\", \"phone\": \"\"}]}");
        fs::write(dir.join("technicians.json"), doubled).unwrap();
        let err = Fixtures::load(&dir).unwrap_err();
        assert!(err.to_string().contains("duplicate technician id TECH001"));
    }

    #[test]
    fn zero_duration_appointment_is_rejected() {
        let dir = tmp_dir("zero_duration");
        fs::write(
            dir.join("appointments.json"),
            r#"{"appointments": [{
                "id": "APPT001", "customer_id": "CUST001", "technician_id": "TECH001",
                "appliance_type": "refrigerator", "issue_description": "Not cooling",
                "scheduled_datetime": "2025-09-05T08:00:00", "status": "scheduled",
                "estimated_duration": 0, "created_at": "2025-09-01T00:00:00"
            }]}"#,
        )
        .unwrap();
        assert!(matches!(Fixtures::load(&dir), Err(FixtureError::Invalid(_))));
    }

    #[test]
    fn technician_without_specialties_is_rejected() {
        let dir = tmp_dir("no_specialties");
        let bare = TECHNICIANS.replace(r#"["refrigerator", "dishwasher"]"#, "[]");
        fs::write(dir.join("technicians.json"), bare).unwrap();
        let err = Fixtures::load(&dir).unwrap_err();
        assert!(matches!(err, FixtureError::Invalid(_)));
        assert!(err.to_string().contains("TECH001 has no specialties"));
    }

    #[test]
    fn discover_prefers_configured_dir() {
        let dir = tmp_dir("configured");
        assert_eq!(Fixtures::discover(Some(&dir)), Some(dir.clone()));
    }
}
