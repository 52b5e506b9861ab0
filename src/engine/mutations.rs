use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;
use crate::time::format_datetime;

use super::availability::suggest_alternatives;
use super::conflict::{
    find_conflict, is_covered, specializes_in, validate_duration, validate_future, validate_id,
    validate_text,
};
use super::error::{ClosedAction, ConflictRejection, RecordKind};
use super::{Engine, EngineError};

pub const DEFAULT_DURATION_MINUTES: u32 = 90;
pub const DEFAULT_CANCEL_REASON: &str = "Customer request";

#[derive(Debug, Clone, PartialEq)]
pub struct NewAppointment {
    pub customer_id: String,
    pub technician_id: String,
    pub appliance_type: String,
    pub issue_description: String,
    pub scheduled_datetime: Ms,
    pub estimated_duration: u32,
    pub claim_id: Option<String>,
}

/// Partial update; `None` leaves a field unchanged. `service_details` is
/// merged key by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppointmentUpdate {
    pub status: Option<AppointmentStatus>,
    pub scheduled_datetime: Option<Ms>,
    pub estimated_duration: Option<u32>,
    pub notes: Option<String>,
    pub issue_description: Option<String>,
    pub technician_id: Option<String>,
    pub service_details: Option<Map<String, Value>>,
}

#[derive(Debug, Clone)]
pub struct AppointmentChange {
    pub before: Appointment,
    pub after: Appointment,
}

#[derive(Debug, Clone)]
pub struct Cancellation {
    pub previous_status: AppointmentStatus,
    pub appointment: Appointment,
}

#[derive(Debug, Clone)]
pub struct Reschedule {
    pub previous_datetime: Ms,
    pub appointment: Appointment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewClaim {
    pub customer_id: String,
    pub appliance_type: String,
    pub issue_description: String,
    pub urgency_level: UrgencyLevel,
}

#[derive(Debug, Clone)]
pub struct ClaimChange {
    pub previous_status: ClaimStatus,
    pub claim: Claim,
}

fn default_service_details() -> Attributes {
    let mut details = Attributes::default();
    details.insert("priority", "medium");
    details.insert("parts_needed", json!([]));
    details.insert("estimated_cost", 0.0);
    details.insert("warranty_covered", true);
    details
}

impl Engine {
    fn conflict_error(
        &self,
        schedule: &Schedule,
        conflict: Conflict,
        preferred: Ms,
        duration_minutes: u32,
        rescheduling: bool,
    ) -> EngineError {
        metrics::counter!(crate::observability::SCHEDULING_CONFLICTS_TOTAL).increment(1);
        debug!(
            "conflict on {} with {} at {}",
            schedule.technician_id,
            conflict.appointment_id,
            format_datetime(preferred)
        );
        let alternatives = suggest_alternatives(
            Some(schedule),
            &schedule.technician_id,
            preferred,
            duration_minutes,
            self.now(),
        );
        EngineError::Conflict(Box::new(ConflictRejection {
            conflict,
            alternatives,
            rescheduling,
        }))
    }

    // ── Appointments ─────────────────────────────────────────

    pub async fn create_appointment(&self, new: NewAppointment) -> Result<Appointment, EngineError> {
        validate_id("customer_id", &new.customer_id)?;
        validate_id("technician_id", &new.technician_id)?;
        validate_text("appliance_type", &new.appliance_type, 1)?;
        validate_text(
            "issue_description",
            &new.issue_description,
            MIN_ISSUE_DESCRIPTION_LEN,
        )?;
        if let Some(claim_id) = &new.claim_id {
            validate_id("claim_id", claim_id)?;
        }
        validate_duration(new.estimated_duration)?;
        let now = self.now();
        validate_future(new.scheduled_datetime, now)?;

        let technician = self
            .store
            .technician(&new.technician_id)
            .ok_or_else(|| EngineError::not_found(RecordKind::Technician, &new.technician_id))?;
        if !specializes_in(&technician.specialties, &new.appliance_type) {
            return Err(EngineError::NotSpecialized {
                technician_id: technician.id,
                appliance_type: new.appliance_type,
                specialties: technician.specialties,
            });
        }
        if self.store.appointment_count() >= MAX_APPOINTMENTS {
            return Err(EngineError::LimitExceeded("too many appointments"));
        }

        let schedule = self.store.schedule(&technician.id);
        let mut guard = schedule.write().await;
        let candidate = Span::from_minutes(new.scheduled_datetime, new.estimated_duration);
        if let Some(conflict) = find_conflict(&guard, &candidate, None) {
            return Err(self.conflict_error(
                &guard,
                conflict,
                new.scheduled_datetime,
                new.estimated_duration,
                false,
            ));
        }

        let appointment = Appointment {
            id: self.next_appointment_id(),
            customer_id: new.customer_id,
            technician_id: technician.id,
            notes: Some(format!(
                "Appointment created for {} repair",
                new.appliance_type
            )),
            appliance_type: new.appliance_type,
            issue_description: new.issue_description,
            scheduled_datetime: new.scheduled_datetime,
            status: AppointmentStatus::Scheduled,
            estimated_duration: new.estimated_duration,
            created_at: now,
            claim_id: new.claim_id,
            service_details: default_service_details(),
        };
        let event = Event::AppointmentCreated {
            appointment: appointment.clone(),
        };
        self.persist_appointment(&mut guard, &event).await?;
        metrics::counter!(crate::observability::APPOINTMENTS_CREATED_TOTAL).increment(1);
        info!(
            "created {} for {} with {} at {}",
            appointment.id,
            appointment.customer_id,
            appointment.technician_id,
            format_datetime(appointment.scheduled_datetime)
        );
        Ok(appointment)
    }

    /// Partial update without a conflict check. Reassigning the technician
    /// moves the appointment between schedules under both locks.
    pub async fn update_appointment(
        &self,
        id: &str,
        update: AppointmentUpdate,
    ) -> Result<AppointmentChange, EngineError> {
        if let Some(minutes) = update.estimated_duration {
            validate_duration(minutes)?;
        }
        if let Some(technician_id) = &update.technician_id {
            validate_id("technician_id", technician_id)?;
        }
        if let Some(notes) = &update.notes {
            validate_text("notes", notes, 0)?;
        }
        if let Some(issue) = &update.issue_description {
            validate_text("issue_description", issue, 0)?;
        }

        let mut lock = self
            .lock_appointment(id, update.technician_id.as_deref())
            .await?;
        let before = lock.appointment.clone();
        let mut after = before.clone();
        if let Some(status) = update.status {
            after.status = status;
        }
        if let Some(start) = update.scheduled_datetime {
            after.scheduled_datetime = start;
        }
        if let Some(minutes) = update.estimated_duration {
            after.estimated_duration = minutes;
        }
        if let Some(notes) = update.notes {
            after.notes = Some(notes);
        }
        if let Some(issue) = update.issue_description {
            after.issue_description = issue;
        }
        if let Some(technician_id) = update.technician_id {
            after.technician_id = technician_id;
        }
        if let Some(details) = update.service_details {
            after.service_details.merge(details);
        }

        let event = Event::AppointmentUpdated {
            appointment: after.clone(),
        };
        match lock.target.as_mut() {
            Some(target) => {
                self.persist_appointment(target, &event).await?;
                lock.current.remove_visit(id);
                info!(
                    "reassigned {id} from {} to {}",
                    before.technician_id, after.technician_id
                );
            }
            None => self.persist_appointment(&mut lock.current, &event).await?,
        }
        Ok(AppointmentChange { before, after })
    }

    pub async fn cancel_appointment(&self, id: &str, reason: &str) -> Result<Cancellation, EngineError> {
        validate_text("reason", reason, 0)?;
        let mut lock = self.lock_appointment(id, None).await?;
        let before = lock.appointment.clone();
        if before.status.is_closed() {
            return Err(EngineError::AlreadyClosed {
                action: ClosedAction::Cancel,
                status: before.status,
            });
        }

        let mut after = before.clone();
        after.status = AppointmentStatus::Cancelled;
        after.notes = Some(append_note(
            before.notes.as_deref(),
            &format!("Cancelled: {reason}"),
        ));
        after.service_details.insert("cancellation_reason", reason);
        after
            .service_details
            .insert("cancelled_at", format_datetime(self.now()));

        let event = Event::AppointmentCancelled {
            appointment: after.clone(),
        };
        self.persist_appointment(&mut lock.current, &event).await?;
        info!("cancelled {id}: {reason}");
        Ok(Cancellation {
            previous_status: before.status,
            appointment: after,
        })
    }

    pub async fn reschedule_appointment(
        &self,
        id: &str,
        new_datetime: Ms,
    ) -> Result<Reschedule, EngineError> {
        let mut lock = self.lock_appointment(id, None).await?;
        let before = lock.appointment.clone();
        if before.status.is_closed() {
            return Err(EngineError::AlreadyClosed {
                action: ClosedAction::Reschedule,
                status: before.status,
            });
        }
        validate_future(new_datetime, self.now())?;

        let candidate = Span::from_minutes(new_datetime, before.estimated_duration);
        if let Some(conflict) = find_conflict(&lock.current, &candidate, Some(id)) {
            return Err(self.conflict_error(
                &lock.current,
                conflict,
                new_datetime,
                before.estimated_duration,
                true,
            ));
        }

        let mut after = before.clone();
        after.scheduled_datetime = new_datetime;
        after.notes = Some(append_note(
            before.notes.as_deref(),
            &format!(
                "Rescheduled from {}",
                format_datetime(before.scheduled_datetime)
            ),
        ));
        let event = Event::AppointmentRescheduled {
            appointment: after.clone(),
        };
        self.persist_appointment(&mut lock.current, &event).await?;
        info!(
            "rescheduled {id} to {}",
            format_datetime(after.scheduled_datetime)
        );
        Ok(Reschedule {
            previous_datetime: before.scheduled_datetime,
            appointment: after,
        })
    }

    // ── Claims ───────────────────────────────────────────────

    pub async fn create_claim(&self, new: NewClaim) -> Result<Claim, EngineError> {
        validate_id("customer_id", &new.customer_id)?;
        validate_text("appliance_type", &new.appliance_type, 1)?;
        validate_text(
            "issue_description",
            &new.issue_description,
            MIN_ISSUE_DESCRIPTION_LEN,
        )?;

        let customer = self
            .store
            .customer(&new.customer_id)
            .ok_or_else(|| EngineError::not_found(RecordKind::Customer, &new.customer_id))?;
        if !is_covered(&customer.covered_appliances, &new.appliance_type) {
            return Err(EngineError::NotCovered {
                customer_id: customer.id,
                appliance_type: new.appliance_type,
                covered_appliances: customer.covered_appliances,
            });
        }

        let _records = self.record_lock.lock().await;
        if self.store.claim_count() >= MAX_CLAIMS {
            return Err(EngineError::LimitExceeded("too many claims"));
        }
        let claim = Claim {
            id: self.next_claim_id(),
            customer_id: customer.id,
            notes: Some(format!("Claim created for {} issue", new.appliance_type)),
            appliance_type: new.appliance_type,
            issue_description: new.issue_description,
            status: ClaimStatus::Submitted,
            urgency_level: new.urgency_level,
            created_at: self.now(),
            approved_at: None,
            completed_at: None,
            appointment_id: None,
            estimated_cost: None,
        };
        self.persist_record(&Event::ClaimCreated {
            claim: claim.clone(),
        })
        .await?;
        info!("created {} for {}", claim.id, claim.customer_id);
        Ok(claim)
    }

    /// Move a claim to `status`. Approval and completion timestamps are set
    /// the first time the claim enters those states.
    pub async fn update_claim_status(
        &self,
        id: &str,
        status: ClaimStatus,
        notes: Option<&str>,
    ) -> Result<ClaimChange, EngineError> {
        if let Some(notes) = notes {
            validate_text("notes", notes, 0)?;
        }
        let _records = self.record_lock.lock().await;
        let mut claim = self
            .store
            .claim(id)
            .ok_or_else(|| EngineError::not_found(RecordKind::Claim, id))?;
        let previous_status = claim.status;
        let now = self.now();

        claim.status = status;
        match status {
            ClaimStatus::Approved if claim.approved_at.is_none() => claim.approved_at = Some(now),
            ClaimStatus::Completed if claim.completed_at.is_none() => {
                claim.completed_at = Some(now)
            }
            _ => {}
        }
        if let Some(notes) = notes.filter(|n| !n.is_empty()) {
            claim.notes = Some(append_note(
                claim.notes.as_deref(),
                &format!("Status update: {notes}"),
            ));
        }

        self.persist_record(&Event::ClaimUpdated {
            claim: claim.clone(),
        })
        .await?;
        info!("claim {id}: {previous_status} -> {status}");
        Ok(ClaimChange {
            previous_status,
            claim,
        })
    }
}
