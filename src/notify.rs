use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::geo::Coordinates;
use crate::model::{Event, Ms, TechnicianStatus};

const CHANNEL_CAPACITY: usize = 256;

/// Status-change message for the customer of an appointment.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusNotice {
    pub appointment_id: String,
    pub technician_id: String,
    pub technician_name: String,
    pub current_status: TechnicianStatus,
    pub message: String,
    pub timestamp: Ms,
    pub estimated_arrival: Option<Ms>,
    /// Only reported while the technician is en route.
    pub current_location: Option<Coordinates>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Recorded(Event),
    Status(StatusNotice),
}

/// Broadcast hub keyed by channel (technician or customer id).
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Notice>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a channel. Creates the channel if needed.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, channel: &str, notice: Notice) {
        if let Some(sender) = self.channels.get(channel) {
            let _ = sender.send(notice);
        }
    }

    pub fn send_event(&self, event: &Event) {
        self.send(event.channel(), Notice::Recorded(event.clone()));
    }
}
