mod conflict;
mod error;
mod mutations;
mod queries;
mod registry;
mod store;
#[cfg(test)]
mod tests;
mod workload;

pub use conflict::{admission_conflicts, overlap_clusters, resource_conflicts};
pub use error::{EngineError, Entity, Unavailable};
pub use store::InMemoryStore;

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

use crate::model::*;
use crate::wal::Wal;

use store::{event_faculty_id, event_resource_id};

pub type SharedResourceState = Arc<RwLock<ResourceState>>;
pub type SharedFacultyState = Arc<Mutex<FacultyWorkload>>;

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it and every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut pending = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, batch);
                if let Some(other) = pending {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, mut batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, &batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} event(s): {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so the torn bytes belong to this batch.
    let flush_result = wal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flush_result,
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            commit_batch(wal, vec![(event, response)]);
        }
    }
}

// ── Engine ───────────────────────────────────────────────

/// Ledger knobs that are fixed for the lifetime of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub workload_policy: AdmissionPolicy,
    /// Capacity given to faculty registered without one.
    pub default_capacity_points: u32,
    /// Points charged for an allocation that names none.
    pub default_event_points: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workload_policy: AdmissionPolicy::WarnOnly,
            default_capacity_points: 100,
            default_event_points: 10,
        }
    }
}

/// Resource registry, commitment schedules and faculty ledger behind one
/// journal. Each resource and each faculty member has its own lock; a
/// mutation checks, journals and applies while holding it.
pub struct Engine {
    pub(super) store: InMemoryStore,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
    pub(super) settings: EngineSettings,
    /// Serializes registration and removal so count limits and
    /// duplicate checks see a stable map.
    pub(super) registry_lock: Mutex<()>,
}

impl Engine {
    /// Replay the journal at `wal_path` and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: &Path, settings: EngineSettings) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = replay(&events);
        tracing::info!(
            "replayed {} event(s): {} resource(s), {} commitment(s), {} faculty",
            events.len(),
            store.resource_count(),
            store.commitment_count(),
            store.faculty_count()
        );

        Ok(Self {
            store,
            wal_tx: Some(wal_tx),
            settings,
            registry_lock: Mutex::new(()),
        })
    }

    /// An engine with no journal. State lives only as long as the value.
    pub fn in_memory(settings: EngineSettings) -> Self {
        Self {
            store: InMemoryStore::new(),
            wal_tx: None,
            settings,
            registry_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    /// WAL-append then apply to a resource the caller has write-locked.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_resource_event(rs, event);
        Ok(())
    }

    /// WAL-append then apply to a faculty ledger the caller has locked.
    pub(super) async fn persist_and_apply_faculty(
        &self,
        fw: &mut FacultyWorkload,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        InMemoryStore::apply_faculty_event(fw, event);
        Ok(())
    }

    /// Rewrite the journal with only the events needed to rebuild the current
    /// state. Every lock is held until the rewrite lands so no append can
    /// slip between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let _registry = self.registry_lock.lock().await;

        let mut events = Vec::new();
        let mut resource_guards = Vec::new();
        for id in self.store.resource_ids() {
            let Some(rs) = self.store.get_resource(&id) else {
                continue;
            };
            let guard = rs.read_owned().await;
            events.push(Event::ResourceRegistered {
                resource: guard.resource.clone(),
            });
            events.extend(guard.commitments().map(|c| Event::CommitmentAdded {
                commitment: c.clone(),
            }));
            resource_guards.push(guard);
        }

        let mut faculty_guards = Vec::new();
        for id in self.store.faculty_ids() {
            let Some(fw) = self.store.get_faculty(&id) else {
                continue;
            };
            let guard = fw.lock_owned().await;
            events.push(Event::FacultyRegistered {
                id: guard.id.clone(),
                name: guard.name.clone(),
                capacity_points: guard.capacity_points,
            });
            events.extend(guard.assignments.iter().map(|(event_id, points)| {
                Event::FacultyAssigned {
                    faculty_id: guard.id.clone(),
                    event_id: event_id.clone(),
                    points: *points,
                }
            }));
            faculty_guards.push(guard);
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::debug!("WAL compacted to {count} event(s)");
        Ok(())
    }

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

/// Rebuild the in-memory maps from journal events. States are built as plain
/// values first and only wrapped in locks once replay is done.
fn replay(events: &[Event]) -> InMemoryStore {
    let store = InMemoryStore::new();
    let mut resources: HashMap<ResourceId, ResourceState> = HashMap::new();
    let mut faculty: HashMap<FacultyId, FacultyWorkload> = HashMap::new();

    for event in events {
        match event {
            Event::ResourceRegistered { resource } => {
                resources.insert(resource.id.clone(), ResourceState::new(resource.clone()));
            }
            Event::ResourceRemoved { id } => {
                resources.remove(id);
            }
            Event::FacultyRegistered {
                id,
                name,
                capacity_points,
            } => {
                faculty.insert(
                    id.clone(),
                    FacultyWorkload::new(id.clone(), name.clone(), *capacity_points),
                );
            }
            Event::CommitmentUpdated {
                previous_resource_id,
                commitment,
            } if *previous_resource_id != commitment.resource_id => {
                for rid in [previous_resource_id, &commitment.resource_id] {
                    if let Some(rs) = resources.get_mut(rid) {
                        store.apply_resource_event(rs, event);
                    }
                }
            }
            other => {
                if let Some(rid) = event_resource_id(other)
                    && let Some(rs) = resources.get_mut(rid)
                {
                    store.apply_resource_event(rs, other);
                } else if let Some(fid) = event_faculty_id(other)
                    && let Some(fw) = faculty.get_mut(fid)
                {
                    InMemoryStore::apply_faculty_event(fw, other);
                }
            }
        }
    }

    for (id, rs) in resources {
        store.insert_resource(id, Arc::new(RwLock::new(rs)));
    }
    for (id, fw) in faculty {
        store.insert_faculty(id, Arc::new(Mutex::new(fw)));
    }
    store
}
