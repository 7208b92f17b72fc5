// Envelope breakout strategy: level planning and the per-cycle runner
pub mod envelope;
pub mod runner;

pub use envelope::{
    can_trade_direction, plan_levels, select_position, should_resume, trading_balance, LevelPlan,
};
pub use runner::{CycleReport, EnvelopeRunner, PlacedLevel};
