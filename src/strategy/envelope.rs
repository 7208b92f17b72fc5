use crate::indicators::LatestLevels;
use crate::models::{Position, PositionSide};

/// One bracket (entry, exit, stop-loss) for a single envelope level
#[derive(Debug, Clone, PartialEq)]
pub struct LevelPlan {
    /// 1-based envelope level
    pub level: usize,
    pub direction: PositionSide,
    /// Limit price of the entry: the band price
    pub entry_price: f64,
    /// Entry trigger, offset from the band so the limit order is live before price reaches it
    pub trigger_price: f64,
    /// Take-profit trigger: the average
    pub exit_price: f64,
    pub stop_price: f64,
    pub amount: f64,
}

/// After a stop-loss, trading resumes once price has come back to the average
///
/// A long stop waits for `close >= average`, a short stop for `close <= average`.
/// Without a known side trading stays blocked.
pub fn should_resume(last_side: Option<PositionSide>, close: f64, average: f64) -> bool {
    match last_side {
        Some(PositionSide::Long) => close >= average,
        Some(PositionSide::Short) => close <= average,
        None => false,
    }
}

/// Notional available for new entries
pub fn trading_balance(total_quote: f64, balance_fraction: f64, leverage: u32) -> f64 {
    balance_fraction * leverage as f64 * total_quote
}

/// New entries in `direction` are allowed when flat or already positioned that way
pub fn can_trade_direction(direction: PositionSide, position: Option<&Position>) -> bool {
    position.map_or(true, |p| p.side == direction)
}

/// Split `positions` into the most recently opened one and the rest
pub fn select_position(mut positions: Vec<Position>) -> (Option<Position>, Vec<Position>) {
    positions.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
    let mut rest = positions.into_iter();
    let keep = rest.next();
    (keep, rest.collect())
}

/// Bracket prices and sizes for every envelope level in one direction
///
/// Longs buy at `band_low`, shorts sell at `band_high`. Each level gets an
/// equal share of `balance`.
pub fn plan_levels(
    direction: PositionSide,
    latest: &LatestLevels,
    balance: f64,
    trigger_price_delta: f64,
    stop_loss_pct: f64,
) -> Vec<LevelPlan> {
    let bands = match direction {
        PositionSide::Long => &latest.band_low,
        PositionSide::Short => &latest.band_high,
    };
    let share = balance / bands.len().max(1) as f64;

    bands
        .iter()
        .enumerate()
        .map(|(i, &entry_price)| {
            let (trigger_price, stop_price) = match direction {
                PositionSide::Long => (
                    entry_price * (1.0 + trigger_price_delta),
                    entry_price * (1.0 - stop_loss_pct),
                ),
                PositionSide::Short => (
                    entry_price * (1.0 - trigger_price_delta),
                    entry_price * (1.0 + stop_loss_pct),
                ),
            };

            LevelPlan {
                level: i + 1,
                direction,
                entry_price,
                trigger_price,
                exit_price: latest.average,
                stop_price,
                amount: share / entry_price,
            }
        })
        .collect()
}
