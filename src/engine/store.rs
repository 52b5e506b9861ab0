use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::fixtures::Fixtures;
use crate::model::*;

use super::SharedSchedule;

/// Record maps plus one lock-guarded schedule per technician.
///
/// Appointment records are only written while holding the schedule lock of
/// the technician they belong to, so the map and the schedules never drift.
pub struct InMemoryStore {
    customers: DashMap<String, Customer>,
    technicians: DashMap<String, Technician>,
    appointments: DashMap<String, Appointment>,
    claims: DashMap<String, Claim>,
    schedules: DashMap<String, SharedSchedule>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            customers: DashMap::new(),
            technicians: DashMap::new(),
            appointments: DashMap::new(),
            claims: DashMap::new(),
            schedules: DashMap::new(),
        }
    }

    /// Seed from validated fixtures. Nothing else holds the schedules yet, so
    /// they are built unlocked and wrapped at the end.
    pub fn from_fixtures(fixtures: Fixtures) -> Self {
        let store = Self::new();
        for customer in fixtures.customers {
            store.customers.insert(customer.id.clone(), customer);
        }
        for technician in fixtures.technicians {
            store.technicians.insert(technician.id.clone(), technician);
        }
        for claim in fixtures.claims {
            store.claims.insert(claim.id.clone(), claim);
        }

        let mut schedules: HashMap<String, Schedule> = HashMap::new();
        for appointment in fixtures.appointments {
            schedules
                .entry(appointment.technician_id.clone())
                .or_insert_with(|| Schedule::new(appointment.technician_id.clone()))
                .insert_visit(appointment.visit());
            store.appointments.insert(appointment.id.clone(), appointment);
        }
        for (technician_id, schedule) in schedules {
            store
                .schedules
                .insert(technician_id, Arc::new(RwLock::new(schedule)));
        }
        store
    }

    // ── Customers ────────────────────────────────────────────

    pub fn customer(&self, id: &str) -> Option<Customer> {
        self.customers.get(id).map(|e| e.value().clone())
    }

    pub fn customers(&self) -> Vec<Customer> {
        self.customers.iter().map(|e| e.value().clone()).collect()
    }

    // ── Technicians ──────────────────────────────────────────

    pub fn technician(&self, id: &str) -> Option<Technician> {
        self.technicians.get(id).map(|e| e.value().clone())
    }

    pub fn technicians(&self) -> Vec<Technician> {
        self.technicians.iter().map(|e| e.value().clone()).collect()
    }

    pub fn put_technician(&self, technician: Technician) {
        self.technicians.insert(technician.id.clone(), technician);
    }

    // ── Claims ───────────────────────────────────────────────

    pub fn claim(&self, id: &str) -> Option<Claim> {
        self.claims.get(id).map(|e| e.value().clone())
    }

    pub fn claims(&self) -> Vec<Claim> {
        self.claims.iter().map(|e| e.value().clone()).collect()
    }

    pub fn claim_count(&self) -> usize {
        self.claims.len()
    }

    pub fn put_claim(&self, claim: Claim) {
        self.claims.insert(claim.id.clone(), claim);
    }

    // ── Appointments ─────────────────────────────────────────

    pub fn appointment(&self, id: &str) -> Option<Appointment> {
        self.appointments.get(id).map(|e| e.value().clone())
    }

    pub fn appointments(&self) -> Vec<Appointment> {
        self.appointments.iter().map(|e| e.value().clone()).collect()
    }

    pub fn appointment_count(&self) -> usize {
        self.appointments.len()
    }

    pub fn appointment_ids(&self) -> Vec<String> {
        self.appointments.iter().map(|e| e.key().clone()).collect()
    }

    pub fn claim_ids(&self) -> Vec<String> {
        self.claims.iter().map(|e| e.key().clone()).collect()
    }

    /// Record an appointment snapshot. `schedule` must be the write-locked
    /// schedule of `appointment.technician_id`.
    pub fn put_appointment(&self, schedule: &mut Schedule, appointment: Appointment) {
        schedule.upsert_visit(appointment.visit());
        self.appointments.insert(appointment.id.clone(), appointment);
    }

    // ── Schedules ────────────────────────────────────────────

    /// The technician's schedule, created empty on first use.
    pub fn schedule(&self, technician_id: &str) -> SharedSchedule {
        self.schedules
            .entry(technician_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Schedule::new(technician_id))))
            .value()
            .clone()
    }

    pub fn existing_schedule(&self, technician_id: &str) -> Option<SharedSchedule> {
        self.schedules.get(technician_id).map(|e| e.value().clone())
    }

    // ── Event application ────────────────────────────────────

    /// Apply a claim or technician snapshot. Appointment events go through
    /// `put_appointment` under the schedule lock instead.
    pub fn apply_record(&self, event: &Event) {
        match event {
            Event::ClaimCreated { claim } | Event::ClaimUpdated { claim } => {
                self.put_claim(claim.clone());
            }
            Event::TechnicianUpdated { technician } => self.put_technician(technician.clone()),
            Event::AppointmentCreated { .. }
            | Event::AppointmentUpdated { .. }
            | Event::AppointmentCancelled { .. }
            | Event::AppointmentRescheduled { .. } => {}
        }
    }

    /// Apply a replayed appointment snapshot, detaching it from the previous
    /// technician's schedule if it was reassigned. Only called before the
    /// store is shared, so every lock is free.
    pub fn replay_appointment(&self, appointment: Appointment) -> io::Result<()> {
        let previous = self
            .appointments
            .get(&appointment.id)
            .map(|e| e.technician_id.clone());
        if let Some(previous) = previous
            && previous != appointment.technician_id
            && let Some(old) = self.existing_schedule(&previous)
        {
            let mut guard = old
                .try_write()
                .map_err(|_| io::Error::other("replay: schedule already locked"))?;
            guard.remove_visit(&appointment.id);
        }

        let schedule = self.schedule(&appointment.technician_id);
        let mut guard = schedule
            .try_write()
            .map_err(|_| io::Error::other("replay: schedule already locked"))?;
        self.put_appointment(&mut guard, appointment);
        Ok(())
    }
}
