// State persisted between invocations
pub mod tracker;

pub use tracker::{TrackerError, TrackerState, TrackerStore, TradeStatus};
