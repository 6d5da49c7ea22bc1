use ulid::Ulid;

use crate::model::{AssetStatus, ReturnStatus, TransitionError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Ulid },

    #[error("{kind} already exists: {key}")]
    AlreadyExists { kind: &'static str, key: String },

    /// No free seat, or a single-owner asset already has its holder.
    #[error("asset {asset_id} is at capacity: all {capacity} seat(s) occupied")]
    CapacityExceeded { asset_id: Ulid, capacity: u32 },

    #[error("holder {holder_id} already holds asset {asset_id}")]
    DuplicateAllocation { asset_id: Ulid, holder_id: Ulid },

    #[error("holder {holder_id} has no active allocation of asset {asset_id}")]
    NoActiveAllocation { asset_id: Ulid, holder_id: Ulid },

    #[error("invalid return transition: {from} -> {to}")]
    InvalidStateTransition { from: ReturnStatus, to: ReturnStatus },

    #[error("asset {asset_id} is {status}")]
    AssetUnavailable { asset_id: Ulid, status: AssetStatus },

    #[error("asset {asset_id} still has {active} active allocation(s)")]
    HasActiveAllocations { asset_id: Ulid, active: usize },

    #[error("invalid capacity: {0}")]
    InvalidCapacity(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(String),
}

impl EngineError {
    pub(crate) fn asset_not_found(id: Ulid) -> Self {
        EngineError::NotFound { kind: "asset", id }
    }

    /// Short label for the allocation outcome metric.
    pub fn metric_label(&self) -> &'static str {
        match self {
            EngineError::CapacityExceeded { .. } => "capacity_exceeded",
            EngineError::DuplicateAllocation { .. } => "duplicate",
            EngineError::NotFound { .. } => "not_found",
            EngineError::AssetUnavailable { .. } => "unavailable",
            EngineError::PersistenceUnavailable(_) => "persistence_unavailable",
            _ => "other",
        }
    }
}

impl From<TransitionError> for EngineError {
    fn from(e: TransitionError) -> Self {
        EngineError::InvalidStateTransition { from: e.from, to: e.to }
    }
}
