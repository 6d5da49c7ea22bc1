pub mod config;
pub mod engine;
pub mod inventory;
pub mod journal;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod sql;
pub mod sweeper;
pub mod wal;
pub mod wire;
