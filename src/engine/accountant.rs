//! Capacity accounting. The only writer of an asset's `used_licenses` and
//! `status`; both are always derived from the active records.

use ulid::Ulid;

use crate::model::{AssetState, AssetStatus};

use super::{Engine, EngineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    pub used_licenses: u32,
    pub total_licenses: u32,
    pub status: AssetStatus,
}

impl Occupancy {
    /// Zero while an administrative hold is in force.
    pub fn available_seats(&self) -> u32 {
        match self.status {
            AssetStatus::Maintenance | AssetStatus::Retired => 0,
            AssetStatus::Available | AssetStatus::Allocated => {
                self.total_licenses.saturating_sub(self.used_licenses)
            }
        }
    }

    pub fn has_free_seat(&self) -> bool {
        self.available_seats() > 0
    }
}

/// Count the asset's active records. Ignores the cached fields entirely.
pub fn occupancy(state: &AssetState) -> Occupancy {
    let active = state.active_records().count();
    let used_licenses = u32::try_from(active).unwrap_or(u32::MAX);
    let status = match state.hold {
        Some(hold) => hold.status(),
        None if used_licenses > 0 => AssetStatus::Allocated,
        None => AssetStatus::Available,
    };
    Occupancy {
        used_licenses,
        total_licenses: state.capacity.total(),
        status,
    }
}

/// Overwrite the cache with freshly derived values. Returns the occupancy and
/// whether the cache had drifted from it.
pub(crate) fn reconcile(state: &mut AssetState) -> (Occupancy, bool) {
    let occ = occupancy(state);
    debug_assert!(occ.used_licenses <= occ.total_licenses, "asset {} over capacity", state.id);
    let drifted = state.used_licenses() != occ.used_licenses || state.status() != occ.status;
    state.set_occupancy(occ.used_licenses, occ.status);
    (occ, drifted)
}

impl Engine {
    /// Re-derive an asset's cached counters from its records.
    pub async fn recompute(&self, asset_id: Ulid) -> Result<Occupancy, EngineError> {
        let rs = self.asset(&asset_id)?;
        let mut guard = rs.write().await;
        let before = (guard.used_licenses(), guard.status());
        let (occ, drifted) = reconcile(&mut guard);
        if drifted {
            tracing::warn!(
                "asset {asset_id}: cached occupancy {}/{} corrected to {}/{}",
                before.0,
                before.1,
                occ.used_licenses,
                occ.status
            );
        }
        Ok(occ)
    }

    pub async fn available_seats(&self, asset_id: Ulid) -> Result<u32, EngineError> {
        let rs = self.asset(&asset_id)?;
        let guard = rs.read().await;
        Ok(occupancy(&guard).available_seats())
    }
}
