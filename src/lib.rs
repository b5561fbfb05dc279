// Core modules
pub mod api;
pub mod credentials;
pub mod error;
pub mod execution;
pub mod journal;
pub mod loader;
pub mod models;
pub mod settings;

// Re-export commonly used types
pub use error::{Error, ErrorClass, Result};
pub use models::{TradeBatch, TradeRecord, TradeStatus};
