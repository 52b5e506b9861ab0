//! Technician tracking: status changes, simulated movement, routes and
//! customer notifications.

use rand::Rng;
use tracing::info;

use crate::geo::{self, Coordinates, Traffic, Waypoint};
use crate::model::*;
use crate::notify::{Notice, StatusNotice};

use super::conflict::{specializes_in, validate_id, validate_text};
use super::{Engine, EngineError};

/// Simulated distance range for technicians with no real dispatch data.
const SIMULATED_DISTANCE_MILES: std::ops::RangeInclusive<f64> = 2.0..=15.0;
/// Arrival window assigned when a technician heads to an appointment.
const EN_ROUTE_ARRIVAL_MINUTES: std::ops::RangeInclusive<i64> = 30..=60;

#[derive(Debug, Clone)]
pub struct LocationReport {
    pub technician: Technician,
    /// Minutes until the recorded arrival for en-route technicians; 0 when
    /// it has passed.
    pub eta_minutes: Option<i64>,
    pub overdue: bool,
}

#[derive(Debug, Clone)]
pub struct AvailableTechnician {
    pub technician: Technician,
    pub distance_miles: f64,
    pub eta_minutes: i64,
    pub estimated_arrival: Ms,
}

#[derive(Debug, Clone)]
pub struct TechnicianChange {
    pub previous_status: TechnicianStatus,
    pub technician: Technician,
}

#[derive(Debug, Clone)]
pub struct Route {
    pub technician_id: String,
    pub technician_name: String,
    pub origin: Coordinates,
    pub destination: Coordinates,
    pub distance_miles: f64,
    pub eta_minutes: i64,
    pub estimated_arrival: Ms,
    pub traffic: Traffic,
    pub waypoints: Vec<Waypoint>,
}

fn check_coordinates(field: &str, coordinates: Coordinates) -> Result<(), EngineError> {
    if geo::valid_coordinates(coordinates) {
        Ok(())
    } else {
        Err(EngineError::InvalidInput(format!(
            "Invalid {field}. Provide [latitude, longitude] within range"
        )))
    }
}

fn default_status_message(technician: &Technician, now: Ms) -> String {
    let name = &technician.name;
    match technician.status {
        TechnicianStatus::EnRoute => {
            let eta = technician
                .estimated_arrival
                .map(|arrival| (arrival - now) / MINUTE_MS)
                .filter(|minutes| *minutes > 0)
                .map(|minutes| format!(" ETA: {minutes} minutes"))
                .unwrap_or_default();
            format!("Technician {name} is on the way to your appointment.{eta}")
        }
        TechnicianStatus::OnSite => {
            format!("Technician {name} has arrived and is beginning work on your appliance.")
        }
        TechnicianStatus::Busy => {
            format!("Technician {name} is currently working on your appliance repair.")
        }
        TechnicianStatus::Available => {
            format!("Technician {name} has completed the service call.")
        }
        TechnicianStatus::OffDuty => {
            format!("Status update: Technician {name} status is now {}.", technician.status)
        }
    }
}

impl Engine {
    /// Advance the technician's simulated position and report it.
    ///
    /// Positions are simulation output, so the new fix is stored but not
    /// written to the WAL.
    pub async fn technician_location(
        &self,
        id: &str,
        destination: Option<Coordinates>,
    ) -> Result<LocationReport, EngineError> {
        if let Some(destination) = destination {
            check_coordinates("destination", destination)?;
        }
        let _records = self.record_lock.lock().await;
        let mut technician = self.technician(id)?;
        technician.current_location = self.with_rng(|rng| {
            geo::simulate_location(
                technician.current_location,
                technician.status,
                destination,
                rng,
            )
        });
        self.store.put_technician(technician.clone());

        let now = self.now();
        let (eta_minutes, overdue) = match (technician.status, technician.estimated_arrival) {
            (TechnicianStatus::EnRoute, Some(arrival)) if arrival > now => {
                (Some((arrival - now) / MINUTE_MS), false)
            }
            (TechnicianStatus::EnRoute, Some(_)) => (Some(0), true),
            _ => (None, false),
        };
        Ok(LocationReport {
            technician,
            eta_minutes,
            overdue,
        })
    }

    /// Available technicians sharing any of `specialties`, closest ETA first.
    /// Distances are simulated; `area` is accepted but every technician is
    /// assumed to serve it.
    pub fn available_technicians(&self, requested: Ms, specialties: &[String]) -> Vec<AvailableTechnician> {
        let mut technicians: Vec<Technician> = self
            .store
            .technicians()
            .into_iter()
            .filter(|t| t.status == TechnicianStatus::Available)
            .filter(|t| specialties.iter().any(|s| specializes_in(&t.specialties, s)))
            .collect();
        technicians.sort_by(|a, b| a.id.cmp(&b.id));

        let mut found: Vec<AvailableTechnician> = self.with_rng(|rng| {
            technicians
                .into_iter()
                .map(|technician| {
                    let distance = rng.gen_range(SIMULATED_DISTANCE_MILES);
                    let eta = geo::eta_minutes(distance, Traffic::Moderate.factor(), rng);
                    AvailableTechnician {
                        technician,
                        distance_miles: distance,
                        eta_minutes: eta,
                        estimated_arrival: requested + eta * MINUTE_MS,
                    }
                })
                .collect()
        });
        found.sort_by_key(|a| a.eta_minutes);
        found
    }

    pub async fn update_technician_status(
        &self,
        id: &str,
        status: TechnicianStatus,
        location: Option<Coordinates>,
        appointment_id: Option<&str>,
    ) -> Result<TechnicianChange, EngineError> {
        if let Some(location) = location {
            check_coordinates("location", location)?;
        }
        if let Some(appointment_id) = appointment_id {
            validate_id("appointment_id", appointment_id)?;
        }

        let _records = self.record_lock.lock().await;
        let mut technician = self.technician(id)?;
        let previous_status = technician.status;
        technician.status = status;
        if let Some(location) = location {
            technician.current_location = location;
        }
        match appointment_id {
            Some(appointment_id) => {
                technician.current_appointment_id = Some(appointment_id.to_string())
            }
            None if status == TechnicianStatus::Available => {
                technician.current_appointment_id = None
            }
            None => {}
        }
        match status {
            TechnicianStatus::EnRoute if appointment_id.is_some() => {
                let minutes = self.with_rng(|rng| rng.gen_range(EN_ROUTE_ARRIVAL_MINUTES));
                technician.estimated_arrival = Some(self.now() + minutes * MINUTE_MS);
            }
            TechnicianStatus::Available | TechnicianStatus::OffDuty => {
                technician.estimated_arrival = None
            }
            _ => {}
        }

        self.persist_record(&Event::TechnicianUpdated {
            technician: technician.clone(),
        })
        .await?;
        info!("technician {id}: {previous_status} -> {status}");
        Ok(TechnicianChange {
            previous_status,
            technician,
        })
    }

    pub fn technician_route(&self, id: &str, destination: Coordinates) -> Result<Route, EngineError> {
        check_coordinates("destination", destination)?;
        let technician = self.technician(id)?;
        let origin = technician.current_location;
        let distance = geo::haversine_miles(origin, destination);
        let (traffic, eta, waypoints) = self.with_rng(|rng| {
            let traffic = Traffic::sample(rng);
            let eta = geo::eta_minutes(distance, traffic.factor(), rng);
            let waypoints = geo::waypoints(origin, destination, distance, rng);
            (traffic, eta, waypoints)
        });
        Ok(Route {
            technician_id: technician.id,
            technician_name: technician.name,
            origin,
            destination,
            distance_miles: distance,
            eta_minutes: eta,
            estimated_arrival: self.now() + eta * MINUTE_MS,
            traffic,
            waypoints,
        })
    }

    /// Build a status notice for the appointment's customer and broadcast it
    /// on the technician's channel.
    pub fn notify_status_change(
        &self,
        technician_id: &str,
        appointment_id: &str,
        message: Option<&str>,
    ) -> Result<StatusNotice, EngineError> {
        validate_id("appointment_id", appointment_id)?;
        if let Some(message) = message {
            validate_text("status_message", message, 0)?;
        }
        let technician = self.technician(technician_id)?;
        let now = self.now();
        let message = match message.filter(|m| !m.is_empty()) {
            Some(m) => m.to_string(),
            None => default_status_message(&technician, now),
        };
        let notice = StatusNotice {
            appointment_id: appointment_id.to_string(),
            technician_id: technician.id.clone(),
            technician_name: technician.name.clone(),
            current_status: technician.status,
            message,
            timestamp: now,
            estimated_arrival: technician.estimated_arrival,
            current_location: (technician.status == TechnicianStatus::EnRoute)
                .then_some(technician.current_location),
        };
        self.notify
            .send(&technician.id, Notice::Status(notice.clone()));
        Ok(notice)
    }
}
