pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod schema;
pub mod store;
pub mod sweeper;

pub use engine::{EngineConfig, InventoryEngine, ReleaseMode};
pub use error::{ErrorKind, InventoryError};
