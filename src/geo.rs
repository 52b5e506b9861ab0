//! Dispatch geometry: great-circle distance, drive-time estimates and the
//! simulated movement used for technician tracking.

use rand::Rng;
use serde::Serialize;

use crate::model::TechnicianStatus;

pub const EARTH_RADIUS_MILES: f64 = 3956.0;
/// Average city driving speed before traffic.
pub const BASE_SPEED_MPH: f64 = 25.0;
pub const MIN_ETA_MINUTES: i64 = 5;
const ETA_JITTER_MINUTES: i64 = 5;

/// `(latitude, longitude)` in degrees.
pub type Coordinates = (f64, f64);

pub fn valid_coordinates((lat, lon): Coordinates) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Haversine distance in miles.
pub fn haversine_miles(from: Coordinates, to: Coordinates) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_MILES * c
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traffic {
    Light,
    Moderate,
    Heavy,
}

impl Traffic {
    pub fn factor(&self) -> f64 {
        match self {
            Traffic::Light => 1.0,
            Traffic::Moderate => 1.2,
            Traffic::Heavy => 1.5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Traffic::Light => "light",
            Traffic::Moderate => "moderate",
            Traffic::Heavy => "heavy",
        }
    }

    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        match rng.gen_range(0..3) {
            0 => Traffic::Light,
            1 => Traffic::Moderate,
            _ => Traffic::Heavy,
        }
    }
}

/// Drive time in whole minutes with ±5 minutes of jitter, never below 5.
pub fn eta_minutes<R: Rng + ?Sized>(distance_miles: f64, traffic_factor: f64, rng: &mut R) -> i64 {
    let speed = BASE_SPEED_MPH / traffic_factor;
    let minutes = (distance_miles / speed * 60.0) as i64;
    let jitter = rng.gen_range(-ETA_JITTER_MINUTES..=ETA_JITTER_MINUTES);
    (minutes + jitter).max(MIN_ETA_MINUTES)
}

/// Next simulated position for a technician.
///
/// Available technicians wander within about 0.7 miles; en-route technicians
/// with a known destination cover a tenth of the remaining distance; everyone
/// else only drifts.
pub fn simulate_location<R: Rng + ?Sized>(
    current: Coordinates,
    status: TechnicianStatus,
    destination: Option<Coordinates>,
    rng: &mut R,
) -> Coordinates {
    let (lat, lon) = current;
    let next = match (status, destination) {
        (TechnicianStatus::Available, _) => (
            lat + rng.gen_range(-0.01..=0.01),
            lon + rng.gen_range(-0.01..=0.01),
        ),
        (TechnicianStatus::EnRoute, Some((dest_lat, dest_lon))) => (
            lat + (dest_lat - lat) * 0.1,
            lon + (dest_lon - lon) * 0.1,
        ),
        _ => (
            lat + rng.gen_range(-0.001..=0.001),
            lon + rng.gen_range(-0.001..=0.001),
        ),
    };
    (next.0.clamp(-90.0, 90.0), next.1.clamp(-180.0, 180.0))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Waypoint {
    pub latitude: f64,
    pub longitude: f64,
    pub instruction: String,
}

/// Evenly spaced intermediate points: `min(5, max(2, distance / 3))`
/// segments, so one to four waypoints.
pub fn waypoints<R: Rng + ?Sized>(
    origin: Coordinates,
    destination: Coordinates,
    distance_miles: f64,
    rng: &mut R,
) -> Vec<Waypoint> {
    let segments = ((distance_miles / 3.0) as usize).clamp(2, 5);
    (1..segments)
        .map(|i| {
            let progress = i as f64 / segments as f64;
            Waypoint {
                latitude: origin.0 + (destination.0 - origin.0) * progress,
                longitude: origin.1 + (destination.1 - origin.1) * progress,
                instruction: format!("Continue for {:.1} miles", rng.gen_range(0.5..=2.0)),
            }
        })
        .collect()
}
