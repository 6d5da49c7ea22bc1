use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::engine::Engine;
use crate::limits::*;
use crate::model::Ms;
use crate::notify::NotifyHub;
use crate::observability;
use crate::sweeper;

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("inventory name too long")]
    NameTooLong,
    #[error("empty inventory name")]
    EmptyName,
    #[error("too many inventories")]
    TooMany,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Background-task settings shared by every inventory.
#[derive(Debug, Clone, Copy)]
pub struct InventorySettings {
    pub compact_threshold: u64,
    pub overdue_after_ms: Ms,
    pub sweep_interval: Duration,
}

impl Default for InventorySettings {
    fn default() -> Self {
        Self {
            compact_threshold: 1_000,
            overdue_after_ms: DEFAULT_OVERDUE_AFTER_MS,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// One isolated asset namespace: its engine and its notification hub.
pub struct Inventory {
    pub engine: Arc<Engine>,
    pub notifications: Arc<NotifyHub>,
}

/// Manages per-inventory engines. Each inventory gets its own engine, journal,
/// overdue sweeper and compactor. Inventory = database name from the pgwire
/// connection.
pub struct InventoryManager {
    inventories: DashMap<String, Arc<Inventory>>,
    data_dir: PathBuf,
    settings: InventorySettings,
}

impl InventoryManager {
    pub fn new(data_dir: PathBuf, settings: InventorySettings) -> Self {
        Self {
            inventories: DashMap::new(),
            data_dir,
            settings,
        }
    }

    pub fn overdue_after_ms(&self) -> Ms {
        self.settings.overdue_after_ms
    }

    /// Get or lazily open the inventory for `name`. Names that sanitize to
    /// the same string share one inventory, since they share one journal file.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<Inventory>, InventoryError> {
        if name.len() > MAX_INVENTORY_NAME_LEN {
            return Err(InventoryError::NameTooLong);
        }
        // Only these characters reach the filesystem.
        let safe_name: String = name
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(InventoryError::EmptyName);
        }
        if let Some(inventory) = self.inventories.get(&safe_name) {
            return Ok(inventory.value().clone());
        }
        if self.inventories.len() >= MAX_INVENTORIES {
            return Err(InventoryError::TooMany);
        }

        // Two connections may race to open the same inventory; the entry lock
        // makes sure only one engine ever owns the journal file.
        let inventory = match self.inventories.entry(safe_name) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => {
                let inventory = self.open(slot.key())?;
                slot.insert(inventory.clone());
                inventory
            }
        };
        metrics::gauge!(observability::INVENTORIES_ACTIVE).set(self.inventories.len() as f64);
        Ok(inventory)
    }

    fn open(&self, safe_name: &str) -> Result<Arc<Inventory>, InventoryError> {
        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notifications = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notifications.clone())?);
        tracing::info!("opened inventory {safe_name}");

        let settings = self.settings;
        tokio::spawn(sweeper::run_overdue_sweeper(
            engine.clone(),
            settings.overdue_after_ms,
            settings.sweep_interval,
        ));
        tokio::spawn(sweeper::run_compactor(
            engine.clone(),
            settings.compact_threshold,
            settings.sweep_interval,
        ));

        Ok(Arc::new(Inventory { engine, notifications }))
    }
}
