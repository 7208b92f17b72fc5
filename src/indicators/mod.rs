// Technical indicators module
// Donchian channel midpoint and the percentage envelopes built around it

pub mod donchian;
pub mod envelope;

pub use donchian::calculate_donchian_mid;
pub use envelope::{envelope_bands, EnvelopeBand, LatestLevels, MarketSnapshot};
