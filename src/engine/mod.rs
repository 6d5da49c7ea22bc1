mod accountant;
mod batch;
mod error;
mod lifecycle;
mod queries;
mod registry;
mod snapshot;

pub use accountant::{Occupancy, occupancy};
pub use batch::{BatchFailure, BatchResult};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::journal::{EventStore, WalJournal};
use crate::model::*;
use crate::notify::NotificationSink;

pub type SharedAssetState = Arc<RwLock<AssetState>>;

/// The allocation lifecycle engine for one inventory.
///
/// Each asset lives behind its own `RwLock`; that lock is the serialization
/// boundary for every check-then-write on the asset. A mutation validates,
/// journals, and applies while holding the write guard, so two racing
/// allocations for the last seat cannot both pass the capacity check.
pub struct Engine {
    assets: DashMap<Ulid, SharedAssetState>,
    /// asset tag → asset id
    tags: DashMap<String, Ulid>,
    users: DashMap<Ulid, UserProfile>,
    /// Ids with a registration in flight, keyed by kind ("user" / "asset").
    registering: DashSet<(&'static str, Ulid)>,
    store: Arc<dyn EventStore>,
    notify: Arc<dyn NotificationSink>,
    /// Mutations hold it shared; compaction takes it exclusively so the
    /// snapshot it writes can't miss an append. Always taken before any asset lock.
    compaction_gate: RwLock<()>,
}

/// Apply an asset-scoped event to its state (caller holds the lock), then
/// reconcile the occupancy cache from the records.
fn apply_to_asset(state: &mut AssetState, event: &Event) -> Result<(), EngineError> {
    match event {
        Event::SeatsResized { total, .. } => {
            state.capacity = Capacity::SharedSeats { total: *total };
        }
        Event::HoldChanged { hold, .. } => state.hold = *hold,
        Event::AllocationOpened {
            id,
            asset_id,
            holder_id,
            at,
            remarks,
        } => {
            state.open_record(AllocationRecord::open(*id, *asset_id, *holder_id, *at, remarks.clone()));
        }
        Event::ReturnRequested { id, at, remarks, .. } => {
            active_record_mut(state, id)?.request_return(*at, remarks.clone())?;
        }
        Event::ReturnAcknowledged { id, at, .. } => {
            active_record_mut(state, id)?.acknowledge(*at)?;
        }
        Event::ReturnCompleted {
            id,
            at,
            remarks,
            mode,
            ..
        } => {
            active_record_mut(state, id)?.complete(*at, remarks.clone(), *mode)?;
        }
        Event::RecordRestored { record } => state.restore_record(record.clone()),
        // Registry-level events are applied by the engine, not per asset.
        Event::UserRegistered { .. } | Event::AssetRegistered { .. } => {}
    }
    accountant::reconcile(state);
    Ok(())
}

fn active_record_mut<'a>(
    state: &'a mut AssetState,
    id: &Ulid,
) -> Result<&'a mut AllocationRecord, EngineError> {
    state
        .active_record_mut(id)
        .ok_or(EngineError::NotFound { kind: "active allocation", id: *id })
}

/// Clone a record out of the store after a mutation.
fn record_snapshot(state: &AssetState, id: &Ulid) -> Result<AllocationRecord, EngineError> {
    state
        .records()
        .iter()
        .rev()
        .find(|r| r.id == *id)
        .cloned()
        .ok_or(EngineError::NotFound { kind: "allocation", id: *id })
}

impl Engine {
    /// Open the journal at `path`, rebuild state from it, and start the
    /// journal writer. Must run inside a Tokio runtime.
    pub fn new(path: PathBuf, notify: Arc<dyn NotificationSink>) -> io::Result<Self> {
        let (journal, replay) = WalJournal::open(&path)?;
        Ok(Self::from_history(Arc::new(journal), &replay.events, notify))
    }

    /// Build an engine over `store`, replaying `history` (the store's current contents).
    pub fn from_history(
        store: Arc<dyn EventStore>,
        history: &[Event],
        notify: Arc<dyn NotificationSink>,
    ) -> Self {
        let engine = Self {
            assets: DashMap::new(),
            tags: DashMap::new(),
            users: DashMap::new(),
            registering: DashSet::new(),
            store,
            notify,
            compaction_gate: RwLock::new(()),
        };
        for event in history {
            if let Err(e) = engine.replay_event(event) {
                tracing::warn!("replay: skipping {event:?}: {e}");
            }
        }
        engine
    }

    /// Nobody else holds these Arcs during replay, so `try_write` always
    /// succeeds; never block here since replay may run inside async code.
    fn replay_event(&self, event: &Event) -> Result<(), EngineError> {
        match event.asset_id() {
            None => {
                self.apply_registry(event);
                Ok(())
            }
            Some(asset_id) => {
                let rs = self.asset(&asset_id)?;
                let mut guard = rs
                    .try_write()
                    .map_err(|_| EngineError::PersistenceUnavailable("replay: asset locked".into()))?;
                apply_to_asset(&mut guard, event)
            }
        }
    }

    /// Apply an event that creates users or assets.
    fn apply_registry(&self, event: &Event) {
        match event {
            Event::UserRegistered { id, name, email } => {
                self.users.insert(
                    *id,
                    UserProfile {
                        id: *id,
                        name: name.clone(),
                        email: email.clone(),
                    },
                );
            }
            Event::AssetRegistered {
                id,
                tag,
                category,
                capacity,
            } => {
                let state = AssetState::new(*id, tag.clone(), *category, *capacity);
                self.assets.insert(*id, Arc::new(RwLock::new(state)));
                self.tags.insert(tag.clone(), *id);
            }
            _ => {}
        }
    }

    /// Durably record an event. I/O failures surface as `PersistenceUnavailable`
    /// and are never retried here.
    async fn journal(&self, event: &Event) -> Result<(), EngineError> {
        self.store
            .append(event)
            .await
            .map_err(|e| EngineError::PersistenceUnavailable(e.to_string()))
    }

    /// Journal + apply under the caller's asset guard.
    async fn persist_and_apply(&self, state: &mut AssetState, event: &Event) -> Result<(), EngineError> {
        self.journal(event).await?;
        apply_to_asset(state, event)
    }

    fn asset(&self, id: &Ulid) -> Result<SharedAssetState, EngineError> {
        self.assets
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::asset_not_found(*id))
    }

    /// Name for notification text; falls back to the id.
    fn display_name(&self, user_id: &Ulid) -> String {
        self.users
            .get(user_id)
            .map(|u| u.name.clone())
            .unwrap_or_else(|| user_id.to_string())
    }
}
