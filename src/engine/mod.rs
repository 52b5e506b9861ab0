mod availability;
mod conflict;
mod dispatch;
mod error;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use availability::{
    free_windows, merge_overlapping, qualifies, search_slots, subtract_intervals,
    suggest_alternatives, Candidate, DAY_OFFSETS, HOUR_OFFSETS,
};
pub use conflict::{find_conflict, is_covered, specializes_in};
pub use dispatch::{AvailableTechnician, LocationReport, Route, TechnicianChange};
pub use error::{ClosedAction, ConflictRejection, EngineError, ErrorKind, RecordKind};
pub use mutations::{
    AppointmentChange, AppointmentUpdate, Cancellation, ClaimChange, NewAppointment, NewClaim,
    Reschedule, DEFAULT_CANCEL_REASON, DEFAULT_DURATION_MINUTES,
};
pub use queries::{AppointmentDetails, Coverage, SlotQuery};
pub use store::InMemoryStore;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::info;

use crate::fixtures::Fixtures;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::time::{Clock, SystemClock};
use crate::wal::Wal;

pub type SharedSchedule = Arc<RwLock<Schedule>>;

pub const APPOINTMENT_ID_PREFIX: &str = "APPT";
pub const CLAIM_ID_PREFIX: &str = "CLAIM";

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Commit what we have before a compaction or stats read.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the
    // next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct EngineOptions {
    /// Durable log of mutations; `None` keeps everything in memory.
    pub wal_path: Option<PathBuf>,
    /// Seed for the simulation RNG; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
    pub clock: Arc<dyn Clock>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            wal_path: None,
            rng_seed: None,
            clock: Arc::new(SystemClock),
        }
    }
}

/// The scheduling core shared by every front end.
pub struct Engine {
    pub(super) store: InMemoryStore,
    pub(super) wal_tx: Option<mpsc::Sender<WalCommand>>,
    pub notify: Arc<NotifyHub>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) rng: Mutex<StdRng>,
    pub(super) appointment_seq: AtomicU32,
    pub(super) claim_seq: AtomicU32,
    /// Held shared by every persist and exclusively by compaction, so a
    /// snapshot never misses an event that reached the old log.
    pub(super) commit_gate: RwLock<()>,
    /// Serializes read-modify-write of claim and technician records.
    pub(super) record_lock: tokio::sync::Mutex<()>,
}

/// Write guards on the schedules touched by one appointment mutation.
pub(super) struct AppointmentLock {
    pub appointment: Appointment,
    pub current: OwnedRwLockWriteGuard<Schedule>,
    /// The reassignment target, when different from the current technician.
    pub target: Option<OwnedRwLockWriteGuard<Schedule>>,
}

impl Engine {
    /// Load fixtures, replay the WAL on top, then start the WAL writer.
    pub fn new(fixtures: Fixtures, options: EngineOptions, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let store = InMemoryStore::from_fixtures(fixtures);

        let wal_tx = match &options.wal_path {
            Some(path) => {
                let events = Wal::replay(path)?;
                let replayed = events.len();
                for event in events {
                    match event.appointment() {
                        Some(appointment) => store.replay_appointment(appointment.clone())?,
                        None => store.apply_record(&event),
                    }
                }
                info!("replayed {replayed} WAL events from {}", path.display());
                let wal = Wal::open(path)?;
                let (tx, rx) = mpsc::channel(4096);
                tokio::spawn(wal_writer_loop(wal, rx));
                Some(tx)
            }
            None => None,
        };

        Ok(Self::assemble(store, wal_tx, notify, options.clock, options.rng_seed))
    }

    /// Memory-only engine with the given clock and RNG seed.
    pub fn in_memory(fixtures: Fixtures, clock: Arc<dyn Clock>, rng_seed: u64) -> Self {
        Self::assemble(
            InMemoryStore::from_fixtures(fixtures),
            None,
            Arc::new(NotifyHub::new()),
            clock,
            Some(rng_seed),
        )
    }

    fn assemble(
        store: InMemoryStore,
        wal_tx: Option<mpsc::Sender<WalCommand>>,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
        rng_seed: Option<u64>,
    ) -> Self {
        let rng = match rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let appointment_seq = max_sequence(&store.appointment_ids(), APPOINTMENT_ID_PREFIX);
        let claim_seq = max_sequence(&store.claim_ids(), CLAIM_ID_PREFIX);
        Self {
            store,
            wal_tx,
            notify,
            clock,
            rng: Mutex::new(rng),
            appointment_seq: AtomicU32::new(appointment_seq),
            claim_seq: AtomicU32::new(claim_seq),
            commit_gate: RwLock::new(()),
            record_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    pub fn has_wal(&self) -> bool {
        self.wal_tx.is_some()
    }

    /// Run `f` with the simulation RNG. Never held across an await.
    pub(super) fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut rng)
    }

    pub(super) fn next_appointment_id(&self) -> String {
        let n = self.appointment_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{APPOINTMENT_ID_PREFIX}{n:03}")
    }

    pub(super) fn next_claim_id(&self) -> String {
        let n = self.claim_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{CLAIM_ID_PREFIX}{n:03}")
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply + notify for an appointment snapshot. The caller
    /// holds the write lock on the appointment's technician schedule.
    pub(super) async fn persist_appointment(
        &self,
        schedule: &mut Schedule,
        event: &Event,
    ) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(event).await?;
        if let Some(appointment) = event.appointment() {
            self.store.put_appointment(schedule, appointment.clone());
        }
        self.notify.send_event(event);
        Ok(())
    }

    /// WAL-append + apply + notify for a claim or technician snapshot.
    pub(super) async fn persist_record(&self, event: &Event) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(event).await?;
        self.store.apply_record(event);
        self.notify.send_event(event);
        Ok(())
    }

    /// Lock the schedule an appointment currently lives on, plus `target`
    /// when it differs, in technician id order.
    pub(super) async fn lock_appointment(
        &self,
        id: &str,
        target: Option<&str>,
    ) -> Result<AppointmentLock, EngineError> {
        loop {
            let seen = self
                .store
                .appointment(id)
                .ok_or_else(|| EngineError::not_found(RecordKind::Appointment, id))?;
            let owner = seen.technician_id.clone();
            let target = target.filter(|t| *t != owner);

            let (current, target_guard) = match target {
                None => (self.store.schedule(&owner).write_owned().await, None),
                Some(t) if owner.as_str() < t => {
                    let current = self.store.schedule(&owner).write_owned().await;
                    let other = self.store.schedule(t).write_owned().await;
                    (current, Some(other))
                }
                Some(t) => {
                    let other = self.store.schedule(t).write_owned().await;
                    let current = self.store.schedule(&owner).write_owned().await;
                    (current, Some(other))
                }
            };

            // A concurrent reassignment may have moved it before we locked.
            let appointment = self
                .store
                .appointment(id)
                .ok_or_else(|| EngineError::not_found(RecordKind::Appointment, id))?;
            if appointment.technician_id == owner {
                return Ok(AppointmentLock {
                    appointment,
                    current,
                    target: target_guard,
                });
            }
        }
    }

    /// Rewrite the WAL as one snapshot event per live record.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let _gate = self.commit_gate.write().await;

        let mut technicians = self.store.technicians();
        technicians.sort_by(|a, b| a.id.cmp(&b.id));
        let mut claims = self.store.claims();
        claims.sort_by(|a, b| a.id.cmp(&b.id));
        let mut appointments = self.store.appointments();
        appointments.sort_by(|a, b| a.id.cmp(&b.id));

        let events: Vec<Event> = technicians
            .into_iter()
            .map(|technician| Event::TechnicianUpdated { technician })
            .chain(claims.into_iter().map(|claim| Event::ClaimCreated { claim }))
            .chain(
                appointments
                    .into_iter()
                    .map(|appointment| Event::AppointmentCreated { appointment }),
            )
            .collect();

        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Appends since the last compaction; 0 when running without a WAL.
    pub async fn wal_appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Highest numeric suffix among ids with `prefix`; ids that don't parse are
/// ignored.
fn max_sequence(ids: &[String], prefix: &str) -> u32 {
    ids.iter()
        .filter_map(|id| id.strip_prefix(prefix)?.parse::<u32>().ok())
        .max()
        .unwrap_or(0)
}
