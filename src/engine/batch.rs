use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::MAX_BATCH_SIZE;
use crate::model::{AllocationRecord, ReturnMode};
use crate::notify::{Notification, Recipient, Severity};
use crate::observability;

use super::{Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub holder_id: Ulid,
    pub error: EngineError,
}

/// Per-holder outcome of a batch call. Every requested holder lands in
/// exactly one of the two lists, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub succeeded: Vec<AllocationRecord>,
    pub failed: Vec<BatchFailure>,
}

impl BatchResult {
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    fn severity(&self) -> Severity {
        match (self.succeeded.len(), self.failed.len()) {
            (_, 0) => Severity::Success,
            (0, _) => Severity::Error,
            _ => Severity::Warning,
        }
    }
}

#[derive(Clone, Copy)]
enum BatchOp {
    Allocate,
    Return(ReturnMode),
}

impl BatchOp {
    fn label(self) -> &'static str {
        match self {
            BatchOp::Allocate => "allocate",
            BatchOp::Return(_) => "return",
        }
    }
}

impl Engine {
    /// Allocate one asset to many holders, one at a time.
    ///
    /// Each holder goes through the full `allocate` path, so a failure for
    /// one (already a holder, seats ran out) is recorded and the batch moves
    /// on. A persistence outage ends the batch: the rest are reported failed
    /// with the same cause instead of being attempted.
    pub async fn allocate_many(
        &self,
        asset_id: Ulid,
        holder_ids: &[Ulid],
        remarks: Option<String>,
    ) -> Result<BatchResult, EngineError> {
        self.run_batch(asset_id, holder_ids, remarks, BatchOp::Allocate).await
    }

    /// Complete the returns of many holders of one asset.
    pub async fn return_many(
        &self,
        asset_id: Ulid,
        holder_ids: &[Ulid],
        remarks: Option<String>,
        mode: ReturnMode,
    ) -> Result<BatchResult, EngineError> {
        self.run_batch(asset_id, holder_ids, remarks, BatchOp::Return(mode)).await
    }

    async fn run_batch(
        &self,
        asset_id: Ulid,
        holder_ids: &[Ulid],
        remarks: Option<String>,
        op: BatchOp,
    ) -> Result<BatchResult, EngineError> {
        if holder_ids.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("too many holders in batch"));
        }
        let tag = {
            let rs = self.asset(&asset_id)?;
            rs.read().await.tag.clone()
        };
        let mut result = BatchResult::default();
        if holder_ids.is_empty() {
            return Ok(result);
        }
        metrics::histogram!(observability::BATCH_SIZE, "op" => op.label())
            .record(holder_ids.len() as f64);

        let mut halted: Option<EngineError> = None;
        for &holder_id in holder_ids {
            if let Some(cause) = &halted {
                result.failed.push(BatchFailure { holder_id, error: cause.clone() });
                continue;
            }
            let outcome = match op {
                BatchOp::Allocate => self.allocate(asset_id, holder_id, remarks.clone()).await,
                BatchOp::Return(mode) => {
                    self.complete_return(asset_id, holder_id, remarks.clone(), mode).await
                }
            };
            match outcome {
                Ok(record) => result.succeeded.push(record),
                Err(error) => {
                    debug!("batch {} on {tag}: {holder_id} failed: {error}", op.label());
                    if matches!(error, EngineError::PersistenceUnavailable(_)) {
                        halted = Some(error.clone());
                    }
                    result.failed.push(BatchFailure { holder_id, error });
                }
            }
        }

        let (title, message) = match op {
            BatchOp::Allocate => (
                "Bulk allocation",
                format!("Allocated {tag} to {} of {} users", result.succeeded.len(), result.attempted()),
            ),
            BatchOp::Return(_) => (
                "Bulk return",
                format!("Returned {tag} from {} of {} users", result.succeeded.len(), result.attempted()),
            ),
        };
        info!("{message}");
        self.notify.deliver(
            Notification::new(Recipient::Managers, result.severity(), title, message).about(asset_id),
        );
        Ok(result)
    }
}
