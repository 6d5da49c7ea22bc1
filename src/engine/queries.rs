use ulid::Ulid;

use crate::model::*;

use super::accountant::{Occupancy, occupancy};
use super::{Engine, EngineError, SharedAssetState};

impl Engine {
    pub async fn get_asset(&self, asset_id: Ulid) -> Result<AssetInfo, EngineError> {
        let rs = self.asset(&asset_id)?;
        let guard = rs.read().await;
        Ok(guard.info())
    }

    pub fn find_asset_by_tag(&self, tag: &str) -> Option<Ulid> {
        self.tags.get(tag).map(|e| *e.value())
    }

    /// All assets, ordered by tag.
    pub async fn list_assets(&self) -> Vec<AssetInfo> {
        let mut out = Vec::with_capacity(self.assets.len());
        for rs in self.asset_handles() {
            out.push(rs.read().await.info());
        }
        out.sort_by(|a, b| a.tag.cmp(&b.tag));
        out
    }

    pub async fn occupancy(&self, asset_id: Ulid) -> Result<Occupancy, EngineError> {
        let rs = self.asset(&asset_id)?;
        let guard = rs.read().await;
        Ok(occupancy(&guard))
    }

    /// Active records of an asset, oldest first.
    pub async fn current_holders(&self, asset_id: Ulid) -> Result<Vec<AllocationRecord>, EngineError> {
        let rs = self.asset(&asset_id)?;
        let guard = rs.read().await;
        Ok(guard.active_records().cloned().collect())
    }

    /// Every record ever opened on an asset, oldest first.
    pub async fn allocation_history(
        &self,
        asset_id: Ulid,
    ) -> Result<Vec<AllocationRecord>, EngineError> {
        let rs = self.asset(&asset_id)?;
        let guard = rs.read().await;
        Ok(guard.records().to_vec())
    }

    /// Open return requests older than `threshold`, across all assets.
    pub async fn overdue_returns(&self, now: Ms, threshold: Ms) -> Vec<AllocationRecord> {
        let mut out = Vec::new();
        for rs in self.asset_handles() {
            let guard = rs.read().await;
            out.extend(
                guard
                    .active_records()
                    .filter(|r| r.is_overdue(now, threshold))
                    .cloned(),
            );
        }
        out.sort_by_key(|r| r.return_requested_at);
        out
    }

    pub fn get_user(&self, user_id: &Ulid) -> Option<UserProfile> {
        self.users.get(user_id).map(|e| e.value().clone())
    }

    /// Candidate holders, ordered by name.
    pub fn list_users(&self) -> Vec<UserProfile> {
        let mut users: Vec<UserProfile> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        users
    }

    /// Clone the handles out so no DashMap shard lock is held across an await.
    pub(super) fn asset_handles(&self) -> Vec<SharedAssetState> {
        self.assets.iter().map(|e| e.value().clone()).collect()
    }
}
