use crate::config::AverageType;
use crate::indicators::calculate_donchian_mid;
use crate::models::Candle;

/// Upper and lower band for one envelope fraction `e`
///
/// `high = average / (1 - e)`, `low = average * (1 - e)`
pub fn envelope_bands(average: f64, envelope: f64) -> (f64, f64) {
    (average / (1.0 - envelope), average * (1.0 - envelope))
}

/// Band series for one envelope level
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeBand {
    pub envelope: f64,
    pub high: Vec<Option<f64>>,
    pub low: Vec<Option<f64>>,
}

/// Completed candles annotated with the average and envelope bands
///
/// Built once per cycle and never modified afterwards.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    candles: Vec<Candle>,
    average: Vec<Option<f64>>,
    bands: Vec<EnvelopeBand>,
}

/// Values on the most recent completed candle
#[derive(Debug, Clone, PartialEq)]
pub struct LatestLevels {
    pub close: f64,
    pub average: f64,
    /// One per envelope level, in configuration order
    pub band_high: Vec<f64>,
    pub band_low: Vec<f64>,
}

impl MarketSnapshot {
    pub fn build(
        candles: Vec<Candle>,
        average_type: AverageType,
        period: usize,
        envelopes: &[f64],
    ) -> Self {
        let average = match average_type {
            AverageType::DonchianMid => calculate_donchian_mid(&candles, period),
        };

        let bands = envelopes
            .iter()
            .map(|&e| {
                let (high, low): (Vec<_>, Vec<_>) = average
                    .iter()
                    .map(|avg| match avg {
                        Some(avg) => {
                            let (h, l) = envelope_bands(*avg, e);
                            (Some(h), Some(l))
                        }
                        None => (None, None),
                    })
                    .unzip();
                EnvelopeBand {
                    envelope: e,
                    high,
                    low,
                }
            })
            .collect();

        Self {
            candles,
            average,
            bands,
        }
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn average(&self) -> &[Option<f64>] {
        &self.average
    }

    pub fn bands(&self) -> &[EnvelopeBand] {
        &self.bands
    }

    /// Levels on the last candle, or `None` if the average is not defined there yet
    pub fn latest(&self) -> Option<LatestLevels> {
        let close = self.candles.last()?.close;
        let average = (*self.average.last()?)?;

        let band_high = self
            .bands
            .iter()
            .map(|b| b.high.last().copied().flatten())
            .collect::<Option<Vec<_>>>()?;
        let band_low = self
            .bands
            .iter()
            .map(|b| b.low.last().copied().flatten())
            .collect::<Option<Vec<_>>>()?;

        Some(LatestLevels {
            close,
            average,
            band_high,
            band_low,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn flat_candles(n: usize, high: f64, low: f64, close: f64) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| Candle {
                timestamp: start + Duration::hours(i as i64),
                open: close,
                high,
                low,
                close,
                volume: 100.0,
            })
            .collect()
    }

    fn round2(x: f64) -> f64 {
        (x * 100.0).round() / 100.0
    }

    #[test]
    fn test_bands_bracket_average() {
        for e in [0.01, 0.07, 0.5, 0.99] {
            let (high, low) = envelope_bands(100.0, e);
            assert!(high > 100.0, "high {} for e={}", high, e);
            assert!(low < 100.0, "low {} for e={}", low, e);
        }
    }

    #[test]
    fn test_reference_levels() {
        // average = 100 with envelopes [0.07, 0.11, 0.14]
        let candles = flat_candles(10, 110.0, 90.0, 101.0);
        let snapshot =
            MarketSnapshot::build(candles, AverageType::DonchianMid, 5, &[0.07, 0.11, 0.14]);

        let latest = snapshot.latest().unwrap();
        assert_eq!(latest.average, 100.0);
        assert_eq!(latest.close, 101.0);

        let lows: Vec<f64> = latest.band_low.iter().copied().map(round2).collect();
        let highs: Vec<f64> = latest.band_high.iter().copied().map(round2).collect();
        assert_eq!(lows, vec![93.0, 89.0, 86.0]);
        assert_eq!(highs, vec![107.53, 112.36, 116.28]);
    }

    #[test]
    fn test_bands_follow_average_gaps() {
        let candles = flat_candles(6, 110.0, 90.0, 100.0);
        let snapshot = MarketSnapshot::build(candles, AverageType::DonchianMid, 5, &[0.1]);

        assert_eq!(snapshot.average().len(), 6);
        assert!(snapshot.bands()[0].low[..4].iter().all(Option::is_none));
        assert_eq!(snapshot.bands()[0].low[4], Some(90.0));
    }

    #[test]
    fn test_latest_none_without_full_window() {
        let candles = flat_candles(3, 110.0, 90.0, 100.0);
        let snapshot = MarketSnapshot::build(candles, AverageType::DonchianMid, 5, &[0.1]);
        assert!(snapshot.latest().is_none());

        let empty = MarketSnapshot::build(vec![], AverageType::DonchianMid, 5, &[0.1]);
        assert!(empty.latest().is_none());
    }
}
