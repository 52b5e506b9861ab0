use tokio::sync::OwnedRwLockReadGuard;

use crate::model::*;

use super::availability::{free_windows, qualifies, search_slots, suggest_alternatives, Candidate};
use super::conflict::{is_covered, validate_duration, validate_search_window};
use super::error::RecordKind;
use super::{Engine, EngineError};

/// Parameters of an availability search.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotQuery {
    pub appliance_type: String,
    pub range_start: Ms,
    pub range_end: Ms,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone)]
pub struct AppointmentDetails {
    pub appointment: Appointment,
    /// Missing when the appointment references an unknown technician.
    pub technician: Option<Technician>,
}

#[derive(Debug, Clone)]
pub struct Coverage {
    pub customer: Customer,
    pub appliance_type: String,
    pub is_covered: bool,
}

fn newest_first<T>(records: &mut [T], key: impl Fn(&T) -> (Ms, &str)) {
    records.sort_by(|a, b| {
        let (ta, ia) = key(a);
        let (tb, ib) = key(b);
        tb.cmp(&ta).then_with(|| ia.cmp(ib))
    });
}

impl Engine {
    // ── Appointments ─────────────────────────────────────────

    /// Appointments matching the filter, newest scheduled first. `customer`
    /// narrows to one customer.
    pub fn list_appointments(&self, customer: Option<&str>, filter: &StatusFilter) -> Vec<Appointment> {
        let mut appointments: Vec<Appointment> = self
            .store
            .appointments()
            .into_iter()
            .filter(|a| customer.is_none_or(|c| a.customer_id == c))
            .filter(|a| filter.matches(a.status))
            .collect();
        newest_first(&mut appointments, |a| (a.scheduled_datetime, a.id.as_str()));
        appointments
    }

    pub fn appointment(&self, id: &str) -> Result<Appointment, EngineError> {
        self.store
            .appointment(id)
            .ok_or_else(|| EngineError::not_found(RecordKind::Appointment, id))
    }

    pub fn appointment_details(&self, id: &str) -> Result<AppointmentDetails, EngineError> {
        let appointment = self.appointment(id)?;
        let technician = self.store.technician(&appointment.technician_id);
        Ok(AppointmentDetails {
            appointment,
            technician,
        })
    }

    /// Hourly free slots across every qualified technician, ordered by id.
    pub async fn available_slots(&self, query: &SlotQuery) -> Result<SlotSearch, EngineError> {
        validate_duration(query.duration_minutes)?;

        let mut technicians: Vec<Technician> = self
            .store
            .technicians()
            .into_iter()
            .filter(|t| qualifies(t, &query.appliance_type))
            .collect();
        if technicians.is_empty() {
            return Err(EngineError::NoQualifiedTechnicians {
                appliance_type: query.appliance_type.clone(),
            });
        }
        validate_search_window(query.range_start, query.range_end)?;
        technicians.sort_by(|a, b| a.id.cmp(&b.id));

        // Read guards in id order, the same order writers lock in.
        let mut guards: Vec<Option<OwnedRwLockReadGuard<Schedule>>> = Vec::with_capacity(technicians.len());
        for technician in &technicians {
            let guard = match self.store.existing_schedule(&technician.id) {
                Some(schedule) => Some(schedule.read_owned().await),
                None => None,
            };
            guards.push(guard);
        }
        let candidates: Vec<Candidate<'_>> = technicians
            .iter()
            .zip(&guards)
            .map(|(technician, guard)| Candidate {
                technician,
                schedule: guard.as_deref(),
            })
            .collect();
        Ok(search_slots(
            &candidates,
            query.range_start,
            query.range_end,
            query.duration_minutes,
        ))
    }

    pub async fn alternative_slots(
        &self,
        technician_id: &str,
        preferred: Ms,
        duration_minutes: u32,
    ) -> Result<Vec<Alternative>, EngineError> {
        validate_duration(duration_minutes)?;
        if self.store.technician(technician_id).is_none() {
            return Err(EngineError::not_found(RecordKind::Technician, technician_id));
        }
        let now = self.now();
        Ok(match self.store.existing_schedule(technician_id) {
            Some(schedule) => {
                let guard = schedule.read().await;
                suggest_alternatives(Some(&guard), technician_id, preferred, duration_minutes, now)
            }
            None => suggest_alternatives(None, technician_id, preferred, duration_minutes, now),
        })
    }

    pub async fn technician_free_windows(
        &self,
        technician_id: &str,
        range_start: Ms,
        range_end: Ms,
        min_duration: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        if range_end <= range_start {
            return Err(EngineError::InvalidInput("end_date must be after start_date".into()));
        }
        validate_search_window(range_start, range_end)?;
        if self.store.technician(technician_id).is_none() {
            return Err(EngineError::not_found(RecordKind::Technician, technician_id));
        }
        let query = Span::new(range_start, range_end);
        Ok(match self.store.existing_schedule(technician_id) {
            Some(schedule) => free_windows(Some(&*schedule.read().await), &query, min_duration),
            None => free_windows(None, &query, min_duration),
        })
    }

    // ── Customers ────────────────────────────────────────────

    pub fn list_customers(&self) -> Vec<Customer> {
        let mut customers = self.store.customers();
        customers.sort_by(|a, b| a.id.cmp(&b.id));
        customers
    }

    pub fn customer(&self, id: &str) -> Result<Customer, EngineError> {
        self.store
            .customer(id)
            .ok_or_else(|| EngineError::not_found(RecordKind::Customer, id))
    }

    pub fn check_coverage(&self, customer_id: &str, appliance_type: &str) -> Result<Coverage, EngineError> {
        let customer = self.customer(customer_id)?;
        let covered = is_covered(&customer.covered_appliances, appliance_type);
        Ok(Coverage {
            customer,
            appliance_type: appliance_type.to_string(),
            is_covered: covered,
        })
    }

    // ── Claims ───────────────────────────────────────────────

    /// Claims matching the filter, newest created first.
    pub fn list_claims(&self, filter: &StatusFilter) -> Vec<Claim> {
        let mut claims: Vec<Claim> = self
            .store
            .claims()
            .into_iter()
            .filter(|c| filter.matches(c.status))
            .collect();
        newest_first(&mut claims, |c| (c.created_at, c.id.as_str()));
        claims
    }

    pub fn claim_history(&self, customer_id: &str, filter: &StatusFilter) -> Result<Vec<Claim>, EngineError> {
        self.customer(customer_id)?;
        let mut claims = self.list_claims(filter);
        claims.retain(|c| c.customer_id == customer_id);
        Ok(claims)
    }

    pub fn claim(&self, id: &str) -> Result<Claim, EngineError> {
        self.store
            .claim(id)
            .ok_or_else(|| EngineError::not_found(RecordKind::Claim, id))
    }

    // ── Technicians ──────────────────────────────────────────

    /// Technicians matching the filter, sorted by name.
    pub fn list_technicians(&self, filter: &StatusFilter) -> Vec<Technician> {
        let mut technicians: Vec<Technician> = self
            .store
            .technicians()
            .into_iter()
            .filter(|t| filter.matches(t.status))
            .collect();
        technicians.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        technicians
    }

    pub fn technician(&self, id: &str) -> Result<Technician, EngineError> {
        self.store
            .technician(id)
            .ok_or_else(|| EngineError::not_found(RecordKind::Technician, id))
    }
}
