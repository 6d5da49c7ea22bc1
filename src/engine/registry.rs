use std::sync::Arc;

use dashmap::DashSet;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{Notification, Recipient, Severity};

use super::accountant::occupancy;
use super::{Engine, EngineError};

fn validate_capacity(capacity: &Capacity) -> Result<(), EngineError> {
    match capacity {
        Capacity::SingleOwner => Ok(()),
        Capacity::SharedSeats { total } => validate_total(*total),
    }
}

fn validate_total(total: u32) -> Result<(), EngineError> {
    if total == 0 {
        return Err(EngineError::InvalidCapacity("shared-seat assets need at least one seat".into()));
    }
    if total > MAX_TOTAL_LICENSES {
        return Err(EngineError::InvalidCapacity(format!(
            "{total} seats exceeds the maximum of {MAX_TOTAL_LICENSES}"
        )));
    }
    Ok(())
}

/// Claim on an id while its registration is journaled. Released on drop,
/// after the entity is either inserted or abandoned.
struct Reservation<'a> {
    pending: &'a DashSet<(&'static str, Ulid)>,
    key: (&'static str, Ulid),
}

impl<'a> Reservation<'a> {
    fn claim(
        pending: &'a DashSet<(&'static str, Ulid)>,
        kind: &'static str,
        id: Ulid,
    ) -> Result<Self, EngineError> {
        if !pending.insert((kind, id)) {
            return Err(EngineError::AlreadyExists { kind, key: id.to_string() });
        }
        Ok(Self { pending, key: (kind, id) })
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.key);
    }
}

impl Engine {
    pub async fn register_user(
        &self,
        id: Ulid,
        name: String,
        email: Option<String>,
    ) -> Result<(), EngineError> {
        if name.is_empty() {
            return Err(EngineError::LimitExceeded("user name must not be empty"));
        }
        if name.len() > MAX_NAME_LEN || email.as_ref().is_some_and(|e| e.len() > MAX_NAME_LEN) {
            return Err(EngineError::LimitExceeded("user name or email too long"));
        }
        if self.users.len() >= MAX_USERS_PER_INVENTORY {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        let _gate = self.compaction_gate.read().await;
        let _claim = Reservation::claim(&self.registering, "user", id)?;
        if self.users.contains_key(&id) {
            return Err(EngineError::AlreadyExists { kind: "user", key: id.to_string() });
        }

        let event = Event::UserRegistered { id, name: name.clone(), email };
        self.journal(&event).await?;
        self.apply_registry(&event);
        info!("registered user {name} ({id})");
        Ok(())
    }

    /// Add an asset to the inventory. The tag is unique per inventory.
    pub async fn register_asset(
        &self,
        id: Ulid,
        tag: String,
        category: Category,
        capacity: Capacity,
    ) -> Result<AssetInfo, EngineError> {
        if tag.is_empty() || tag.len() > MAX_TAG_LEN {
            return Err(EngineError::LimitExceeded("asset tag must be 1-64 bytes"));
        }
        validate_capacity(&capacity)?;
        if self.assets.len() >= MAX_ASSETS_PER_INVENTORY {
            return Err(EngineError::LimitExceeded("too many assets"));
        }
        let _gate = self.compaction_gate.read().await;
        let _claim = Reservation::claim(&self.registering, "asset", id)?;
        if self.assets.contains_key(&id) {
            return Err(EngineError::AlreadyExists { kind: "asset", key: id.to_string() });
        }
        match self.tags.entry(tag.clone()) {
            Entry::Occupied(_) => {
                return Err(EngineError::AlreadyExists { kind: "asset tag", key: tag });
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let event = Event::AssetRegistered { id, tag: tag.clone(), category, capacity };
        if let Err(e) = self.journal(&event).await {
            self.tags.remove(&tag);
            return Err(e);
        }
        let state = AssetState::new(id, tag.clone(), category, capacity);
        let info = state.info();
        self.assets.insert(id, Arc::new(RwLock::new(state)));
        info!("registered {} asset {tag} with {} seat(s)", category.as_str(), capacity.total());
        Ok(info)
    }

    /// Change the seat count of a shared-seat asset. Never below the seats in use.
    pub async fn resize_seats(&self, asset_id: Ulid, total: u32) -> Result<AssetInfo, EngineError> {
        validate_total(total)?;
        let _gate = self.compaction_gate.read().await;
        let rs = self.asset(&asset_id)?;
        let mut guard = rs.write().await;

        if !guard.capacity.is_shareable() {
            return Err(EngineError::InvalidCapacity(format!(
                "{} is single-owner and has no seat count",
                guard.tag
            )));
        }
        let used = occupancy(&guard).used_licenses;
        if total < used {
            return Err(EngineError::InvalidCapacity(format!(
                "{} has {used} seats in use, cannot shrink to {total}",
                guard.tag
            )));
        }

        let event = Event::SeatsResized { id: asset_id, total };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("{} resized to {total} seats", guard.tag);
        Ok(guard.info())
    }

    /// Place or lift an administrative hold. Holds can only be placed on an
    /// asset nobody holds, and a retired asset stays retired.
    pub async fn set_hold(
        &self,
        asset_id: Ulid,
        hold: Option<AdminHold>,
    ) -> Result<AssetInfo, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let rs = self.asset(&asset_id)?;
        let mut guard = rs.write().await;

        if guard.hold == hold {
            return Ok(guard.info());
        }
        if guard.hold == Some(AdminHold::Retired) {
            return Err(EngineError::AssetUnavailable { asset_id, status: AssetStatus::Retired });
        }
        let active = guard.active_records().count();
        if hold.is_some() && active > 0 {
            return Err(EngineError::HasActiveAllocations { asset_id, active });
        }

        let event = Event::HoldChanged { id: asset_id, hold };
        self.persist_and_apply(&mut guard, &event).await?;
        let info = guard.info();
        drop(guard);

        info!("{} is now {}", info.tag, info.status);
        self.notify.deliver(
            Notification::new(
                Recipient::Managers,
                Severity::Info,
                "Asset status changed",
                format!("{} is now {}", info.tag, info.status),
            )
            .about(asset_id),
        );
        Ok(info)
    }
}
