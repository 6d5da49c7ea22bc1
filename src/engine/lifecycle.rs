use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{Notification, Recipient, Severity};
use crate::observability;

use super::accountant::occupancy;
use super::{Engine, EngineError, record_snapshot};

pub(super) fn check_remarks(remarks: Option<&str>) -> Result<(), EngineError> {
    if remarks.is_some_and(|r| r.len() > MAX_REMARKS_LEN) {
        return Err(EngineError::LimitExceeded("remarks too long"));
    }
    Ok(())
}

impl Engine {
    /// Give `holder_id` a seat on `asset_id`.
    ///
    /// Preconditions are checked in order, all under the asset's write lock:
    /// asset exists, no administrative hold, holder exists, holder has no
    /// active record on the asset, a seat is free.
    pub async fn allocate(
        &self,
        asset_id: Ulid,
        holder_id: Ulid,
        remarks: Option<String>,
    ) -> Result<AllocationRecord, EngineError> {
        let result = self.try_allocate(asset_id, holder_id, remarks).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.metric_label(),
        };
        metrics::counter!(observability::ALLOCATIONS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn try_allocate(
        &self,
        asset_id: Ulid,
        holder_id: Ulid,
        remarks: Option<String>,
    ) -> Result<AllocationRecord, EngineError> {
        check_remarks(remarks.as_deref())?;
        let _gate = self.compaction_gate.read().await;
        let rs = self.asset(&asset_id)?;
        let mut guard = rs.write().await;

        if let Some(hold) = guard.hold {
            return Err(EngineError::AssetUnavailable { asset_id, status: hold.status() });
        }
        if !self.users.contains_key(&holder_id) {
            return Err(EngineError::NotFound { kind: "user", id: holder_id });
        }
        if guard.active_for(&holder_id).is_some() {
            return Err(EngineError::DuplicateAllocation { asset_id, holder_id });
        }
        // Fresh count under the lock; the cached counter is never trusted here.
        let occ = occupancy(&guard);
        if !occ.has_free_seat() {
            return Err(EngineError::CapacityExceeded {
                asset_id,
                capacity: occ.total_licenses,
            });
        }
        if guard.records().len() >= MAX_RECORDS_PER_ASSET {
            return Err(EngineError::LimitExceeded("too many allocation records on asset"));
        }

        let id = Ulid::new();
        let event = Event::AllocationOpened {
            id,
            asset_id,
            holder_id,
            at: now_ms(),
            remarks,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let record = record_snapshot(&guard, &id)?;
        let tag = guard.tag.clone();
        let used = guard.used_licenses();
        let total = guard.capacity.total();
        drop(guard);

        info!("allocated {tag} to {holder_id} ({used}/{total} seats used)");
        self.notify.deliver(
            Notification::new(
                Recipient::Holder(holder_id),
                Severity::Success,
                "Asset allocated",
                format!("{tag} has been allocated to you"),
            )
            .about(asset_id),
        );
        Ok(record)
    }

    /// Ask the holder to give the asset back. The seat stays occupied.
    pub async fn request_return(
        &self,
        asset_id: Ulid,
        holder_id: Ulid,
        remarks: String,
    ) -> Result<AllocationRecord, EngineError> {
        check_remarks(Some(&remarks))?;
        let _gate = self.compaction_gate.read().await;
        let rs = self.asset(&asset_id)?;
        let mut guard = rs.write().await;

        let record = guard
            .active_for(&holder_id)
            .ok_or(EngineError::NoActiveAllocation { asset_id, holder_id })?;
        record.check_advance(ReturnStatus::Requested, ReturnMode::Standard)?;
        let id = record.id;

        let event = Event::ReturnRequested {
            id,
            asset_id,
            at: now_ms(),
            remarks: remarks.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let record = record_snapshot(&guard, &id)?;
        let tag = guard.tag.clone();
        drop(guard);

        info!("return of {tag} requested from {holder_id}");
        self.notify.deliver(
            Notification::new(
                Recipient::Holder(holder_id),
                Severity::Warning,
                "Return requested",
                format!("Please return {tag}: {remarks}"),
            )
            .about(asset_id),
        );
        Ok(record)
    }

    /// The holder confirms they will return the asset.
    pub async fn acknowledge_return(
        &self,
        asset_id: Ulid,
        holder_id: Ulid,
    ) -> Result<AllocationRecord, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let rs = self.asset(&asset_id)?;
        let mut guard = rs.write().await;

        let record = match guard.active_for(&holder_id) {
            Some(record) => record,
            // Acknowledging an already-completed return is a state error, not a missing record.
            None => {
                return Err(match guard.latest_for(&holder_id) {
                    Some(latest) => EngineError::InvalidStateTransition {
                        from: latest.return_status,
                        to: ReturnStatus::Acknowledged,
                    },
                    None => EngineError::NoActiveAllocation { asset_id, holder_id },
                });
            }
        };
        record.check_advance(ReturnStatus::Acknowledged, ReturnMode::Standard)?;
        let id = record.id;

        let event = Event::ReturnAcknowledged { id, asset_id, at: now_ms() };
        self.persist_and_apply(&mut guard, &event).await?;
        let record = record_snapshot(&guard, &id)?;
        let tag = guard.tag.clone();
        drop(guard);

        let name = self.display_name(&holder_id);
        info!("{name} acknowledged return of {tag}");
        self.notify.deliver(
            Notification::new(
                Recipient::Managers,
                Severity::Info,
                "Return acknowledged",
                format!("{name} acknowledged the return of {tag}"),
            )
            .about(asset_id),
        );
        Ok(record)
    }

    /// Close the holder's active record and free its seat.
    ///
    /// `Standard` needs a prior request; `Forced` completes from any open
    /// state and defaults the remarks. A second completion finds no active
    /// record and fails with `NoActiveAllocation`, leaving the first untouched.
    pub async fn complete_return(
        &self,
        asset_id: Ulid,
        holder_id: Ulid,
        remarks: Option<String>,
        mode: ReturnMode,
    ) -> Result<AllocationRecord, EngineError> {
        check_remarks(remarks.as_deref())?;
        let remarks = match mode {
            ReturnMode::Forced => {
                Some(remarks.unwrap_or_else(|| DEFAULT_FORCED_RETURN_REMARKS.to_string()))
            }
            ReturnMode::Standard => remarks,
        };
        let _gate = self.compaction_gate.read().await;
        let rs = self.asset(&asset_id)?;
        let mut guard = rs.write().await;

        let record = guard
            .active_for(&holder_id)
            .ok_or(EngineError::NoActiveAllocation { asset_id, holder_id })?;
        record.check_advance(ReturnStatus::Completed, mode)?;
        let id = record.id;
        let skipped_from = record.return_status;

        let event = Event::ReturnCompleted {
            id,
            asset_id,
            at: now_ms(),
            remarks: remarks.clone(),
            mode,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let record = record_snapshot(&guard, &id)?;
        let tag = guard.tag.clone();
        drop(guard);

        let name = self.display_name(&holder_id);
        let mode_label = match mode {
            ReturnMode::Standard => "standard",
            ReturnMode::Forced => "forced",
        };
        metrics::counter!(observability::RETURNS_TOTAL, "mode" => mode_label).increment(1);

        if mode == ReturnMode::Forced {
            let reason = remarks.as_deref().unwrap_or(DEFAULT_FORCED_RETURN_REMARKS);
            warn!("forced return of {tag} from {name} (was {skipped_from}): {reason}");
            self.notify.deliver(
                Notification::new(
                    Recipient::Holder(holder_id),
                    Severity::Warning,
                    "Asset force-returned",
                    format!("{tag} was returned on your behalf: {reason}"),
                )
                .about(asset_id),
            );
        } else {
            info!("{name} returned {tag}");
        }
        self.notify.deliver(
            Notification::new(
                Recipient::Managers,
                Severity::Info,
                "Asset returned",
                format!("{name} returned {tag}"),
            )
            .about(asset_id),
        );
        Ok(record)
    }

    /// Nudge the holder of an overdue return. Changes no state.
    pub async fn remind_overdue(&self, record: &AllocationRecord) -> Result<(), EngineError> {
        let tag = self.get_asset(record.asset_id).await?.tag;
        self.notify.deliver(
            Notification::new(
                Recipient::Holder(record.holder_id),
                Severity::Warning,
                "Return overdue",
                format!("{tag} was requested back and is now overdue"),
            )
            .about(record.asset_id),
        );
        Ok(())
    }
}
