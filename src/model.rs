use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// A label that did not match any variant of the named enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseLabelError {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Hardware,
    Software,
    Accessories,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Hardware => "HARDWARE",
            Category::Software => "SOFTWARE",
            Category::Accessories => "ACCESSORIES",
        }
    }
}

impl FromStr for Category {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "HARDWARE" => Ok(Category::Hardware),
            "SOFTWARE" => Ok(Category::Software),
            "ACCESSORIES" => Ok(Category::Accessories),
            _ => Err(ParseLabelError { kind: "category", value: s.to_string() }),
        }
    }
}

/// How many holders an asset can have at once.
///
/// Single-owner hardware and seat-licensed software follow different
/// allocation rules; keeping them as separate variants means a seat count can
/// never be consulted for a laptop, nor a single-holder check for a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capacity {
    SingleOwner,
    SharedSeats { total: u32 },
}

impl Capacity {
    pub fn total(&self) -> u32 {
        match self {
            Capacity::SingleOwner => 1,
            Capacity::SharedSeats { total } => *total,
        }
    }

    pub fn is_shareable(&self) -> bool {
        matches!(self, Capacity::SharedSeats { .. })
    }
}

/// Administrator override that takes an asset out of circulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminHold {
    Maintenance,
    Retired,
}

impl AdminHold {
    pub fn status(&self) -> AssetStatus {
        match self {
            AdminHold::Maintenance => AssetStatus::Maintenance,
            AdminHold::Retired => AssetStatus::Retired,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetStatus {
    Available,
    Allocated,
    Maintenance,
    Retired,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Available => "AVAILABLE",
            AssetStatus::Allocated => "ALLOCATED",
            AssetStatus::Maintenance => "MAINTENANCE",
            AssetStatus::Retired => "RETIRED",
        }
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AVAILABLE" => Ok(AssetStatus::Available),
            "ALLOCATED" => Ok(AssetStatus::Allocated),
            "MAINTENANCE" => Ok(AssetStatus::Maintenance),
            "RETIRED" => Ok(AssetStatus::Retired),
            _ => Err(ParseLabelError { kind: "asset status", value: s.to_string() }),
        }
    }
}

/// Return sub-state of one allocation. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReturnStatus {
    None,
    Requested,
    Acknowledged,
    Completed,
}

impl ReturnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnStatus::None => "NONE",
            ReturnStatus::Requested => "REQUESTED",
            ReturnStatus::Acknowledged => "ACKNOWLEDGED",
            ReturnStatus::Completed => "COMPLETED",
        }
    }

    /// Forced completion may skip REQUESTED/ACKNOWLEDGED; nothing moves backwards.
    pub fn can_advance_to(self, next: ReturnStatus, mode: ReturnMode) -> bool {
        match (self, next) {
            (ReturnStatus::None, ReturnStatus::Requested)
            | (ReturnStatus::Requested, ReturnStatus::Acknowledged)
            | (ReturnStatus::Requested | ReturnStatus::Acknowledged, ReturnStatus::Completed) => {
                true
            }
            (ReturnStatus::None, ReturnStatus::Completed) => mode == ReturnMode::Forced,
            _ => false,
        }
    }
}

impl fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnMode {
    /// Holder or manager completes a return that was requested.
    Standard,
    /// Administrative override; completes an allocation in any open state.
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot move return status from {from} to {to}")]
pub struct TransitionError {
    pub from: ReturnStatus,
    pub to: ReturnStatus,
}

/// One (asset, holder) allocation. Active until `returned_at` is set, then frozen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub id: Ulid,
    pub asset_id: Ulid,
    pub holder_id: Ulid,
    pub allocated_at: Ms,
    pub returned_at: Option<Ms>,
    pub return_status: ReturnStatus,
    pub return_requested_at: Option<Ms>,
    pub return_request_remarks: Option<String>,
    pub acknowledged_at: Option<Ms>,
    pub remarks: Option<String>,
    pub return_remarks: Option<String>,
    pub forced: bool,
}

impl AllocationRecord {
    pub fn open(id: Ulid, asset_id: Ulid, holder_id: Ulid, at: Ms, remarks: Option<String>) -> Self {
        Self {
            id,
            asset_id,
            holder_id,
            allocated_at: at,
            returned_at: None,
            return_status: ReturnStatus::None,
            return_requested_at: None,
            return_request_remarks: None,
            acknowledged_at: None,
            remarks,
            return_remarks: None,
            forced: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.returned_at.is_none()
    }

    /// Validate a step without applying it.
    pub fn check_advance(&self, next: ReturnStatus, mode: ReturnMode) -> Result<(), TransitionError> {
        if !self.is_active() || !self.return_status.can_advance_to(next, mode) {
            return Err(TransitionError {
                from: self.return_status,
                to: next,
            });
        }
        Ok(())
    }

    pub fn request_return(&mut self, at: Ms, remarks: String) -> Result<(), TransitionError> {
        self.check_advance(ReturnStatus::Requested, ReturnMode::Standard)?;
        self.return_status = ReturnStatus::Requested;
        self.return_requested_at = Some(at);
        self.return_request_remarks = Some(remarks);
        Ok(())
    }

    pub fn acknowledge(&mut self, at: Ms) -> Result<(), TransitionError> {
        self.check_advance(ReturnStatus::Acknowledged, ReturnMode::Standard)?;
        self.return_status = ReturnStatus::Acknowledged;
        self.acknowledged_at = Some(at);
        Ok(())
    }

    pub fn complete(
        &mut self,
        at: Ms,
        remarks: Option<String>,
        mode: ReturnMode,
    ) -> Result<(), TransitionError> {
        self.check_advance(ReturnStatus::Completed, mode)?;
        self.return_status = ReturnStatus::Completed;
        self.returned_at = Some(at);
        self.return_remarks = remarks;
        self.forced = mode == ReturnMode::Forced;
        Ok(())
    }

    /// Derived label only: a still-open return request older than `threshold`.
    pub fn is_overdue(&self, now: Ms, threshold: Ms) -> bool {
        match self.return_requested_at {
            Some(requested_at) if self.is_active() => now - requested_at > threshold,
            _ => false,
        }
    }
}

/// Per-asset state: identity, capacity, and the append-only allocation history.
///
/// `used_licenses` and `status` are a materialized cache; only the capacity
/// accountant writes them, always from a count over `records`.
#[derive(Debug, Clone)]
pub struct AssetState {
    pub id: Ulid,
    pub tag: String,
    pub category: Category,
    pub capacity: Capacity,
    pub hold: Option<AdminHold>,
    records: Vec<AllocationRecord>,
    used_licenses: u32,
    status: AssetStatus,
}

impl AssetState {
    pub fn new(id: Ulid, tag: String, category: Category, capacity: Capacity) -> Self {
        Self {
            id,
            tag,
            category,
            capacity,
            hold: None,
            records: Vec::new(),
            used_licenses: 0,
            status: AssetStatus::Available,
        }
    }

    pub fn used_licenses(&self) -> u32 {
        self.used_licenses
    }

    pub fn status(&self) -> AssetStatus {
        self.status
    }

    pub(crate) fn set_occupancy(&mut self, used_licenses: u32, status: AssetStatus) {
        self.used_licenses = used_licenses;
        self.status = status;
    }

    /// Full history, oldest first.
    pub fn records(&self) -> &[AllocationRecord] {
        &self.records
    }

    pub fn active_records(&self) -> impl Iterator<Item = &AllocationRecord> {
        self.records.iter().filter(|r| r.is_active())
    }

    pub fn active_for(&self, holder_id: &Ulid) -> Option<&AllocationRecord> {
        self.active_records().find(|r| r.holder_id == *holder_id)
    }

    /// Most recent record for a holder, active or not.
    pub fn latest_for(&self, holder_id: &Ulid) -> Option<&AllocationRecord> {
        self.records.iter().rev().find(|r| r.holder_id == *holder_id)
    }

    pub fn open_record(&mut self, record: AllocationRecord) {
        debug_assert!(record.is_active(), "opened records start active");
        self.records.push(record);
    }

    /// Mutable access is only handed out for active records; returned ones are frozen.
    pub fn active_record_mut(&mut self, id: &Ulid) -> Option<&mut AllocationRecord> {
        self.records
            .iter_mut()
            .find(|r| r.id == *id && r.is_active())
    }

    /// Re-insert a record verbatim (snapshot replay), keeping history ordered by `allocated_at`.
    pub fn restore_record(&mut self, record: AllocationRecord) {
        let pos = self
            .records
            .partition_point(|r| r.allocated_at <= record.allocated_at);
        self.records.insert(pos, record);
    }

    pub fn info(&self) -> AssetInfo {
        AssetInfo {
            id: self.id,
            tag: self.tag.clone(),
            category: self.category,
            capacity: self.capacity,
            used_licenses: self.used_licenses,
            status: self.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Ulid,
    pub name: String,
    pub email: Option<String>,
}

/// Journal record format — every state change is one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Ulid,
        name: String,
        email: Option<String>,
    },
    AssetRegistered {
        id: Ulid,
        tag: String,
        category: Category,
        capacity: Capacity,
    },
    SeatsResized {
        id: Ulid,
        total: u32,
    },
    HoldChanged {
        id: Ulid,
        hold: Option<AdminHold>,
    },
    AllocationOpened {
        id: Ulid,
        asset_id: Ulid,
        holder_id: Ulid,
        at: Ms,
        remarks: Option<String>,
    },
    ReturnRequested {
        id: Ulid,
        asset_id: Ulid,
        at: Ms,
        remarks: String,
    },
    ReturnAcknowledged {
        id: Ulid,
        asset_id: Ulid,
        at: Ms,
    },
    ReturnCompleted {
        id: Ulid,
        asset_id: Ulid,
        at: Ms,
        remarks: Option<String>,
        mode: ReturnMode,
    },
    /// Written by compaction: a whole record in its current state.
    RecordRestored {
        record: AllocationRecord,
    },
}

impl Event {
    /// The asset an event mutates, for events applied under an asset lock.
    pub fn asset_id(&self) -> Option<Ulid> {
        match self {
            Event::SeatsResized { id, .. } | Event::HoldChanged { id, .. } => Some(*id),
            Event::AllocationOpened { asset_id, .. }
            | Event::ReturnRequested { asset_id, .. }
            | Event::ReturnAcknowledged { asset_id, .. }
            | Event::ReturnCompleted { asset_id, .. } => Some(*asset_id),
            Event::RecordRestored { record } => Some(record.asset_id),
            Event::UserRegistered { .. } | Event::AssetRegistered { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetInfo {
    pub id: Ulid,
    pub tag: String,
    pub category: Category,
    pub capacity: Capacity,
    pub used_licenses: u32,
    pub status: AssetStatus,
}
