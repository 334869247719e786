// Core modules
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod models;
pub mod persistence;
pub mod plan;
pub mod risk;

// Re-export commonly used types
pub use api::*;
pub use error::{LedgerError, OrchestratorError, TradeError};
pub use execution::{PositionLedger, PositionOrchestrator};
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
