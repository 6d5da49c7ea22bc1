//! Hard caps applied at the engine and inventory boundaries.

use crate::model::Ms;

pub const MAX_ASSETS_PER_INVENTORY: usize = 100_000;
pub const MAX_USERS_PER_INVENTORY: usize = 100_000;
pub const MAX_RECORDS_PER_ASSET: usize = 1_000_000;

pub const MAX_TAG_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REMARKS_LEN: usize = 2_048;

/// Upper bound on `total_licenses` for a shared-seat asset.
pub const MAX_TOTAL_LICENSES: u32 = 1_000_000;

/// Max holders in one allocate-many / return-many call.
pub const MAX_BATCH_SIZE: usize = 1_000;

pub const MAX_INVENTORIES: usize = 1_000;
pub const MAX_INVENTORY_NAME_LEN: usize = 128;

/// Default age after which an unanswered return request is labelled overdue (7 days).
pub const DEFAULT_OVERDUE_AFTER_MS: Ms = 7 * 24 * 3_600_000;

/// Remarks stamped on a forced return when the caller gives none.
pub const DEFAULT_FORCED_RETURN_REMARKS: &str = "Force-returned by administrator";

/// Largest journal frame payload. A length prefix above this is corruption.
pub const MAX_FRAME_LEN: usize = 1 << 20;
