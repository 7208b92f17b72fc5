// Core modules
pub mod config;
pub mod exchange;
pub mod indicators;
pub mod models;
pub mod persistence;
pub mod strategy;

// Re-export commonly used types
pub use config::BotConfig;
pub use exchange::{BitgetClient, Exchange, ExchangeError};
pub use models::*;
pub use strategy::{CycleReport, EnvelopeRunner};
