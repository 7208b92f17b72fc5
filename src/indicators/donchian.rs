use crate::models::Candle;

/// Donchian channel midpoint: (highest high + lowest low) / 2 over `period` candles
///
/// Returns one value per candle. The first `period - 1` values are `None`
/// since the window is not full yet.
pub fn calculate_donchian_mid(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; candles.len()];
    }

    (0..candles.len())
        .map(|i| {
            if i + 1 < period {
                return None;
            }
            let window = &candles[i + 1 - period..=i];
            let highest = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
            let lowest = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
            Some((highest + lowest) / 2.0)
        })
        .collect()
}
