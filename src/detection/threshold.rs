//! Sensitivity to motion-threshold mapping.

use serde::{Deserialize, Serialize};

/// Piecewise-linear map from a 0-100 sensitivity to a motion magnitude
/// threshold (m/s² of accelerometer delta).
///
/// ```text
/// sensitivity:   0 ── 20 ── 40 ── 60 ── 80 ── 100
/// threshold:    high  high  ╲ med  med ╲ low  low
/// ```
///
/// Higher sensitivity never yields a higher threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdModel {
    /// Threshold at sensitivity ≥ 80 (easy to trigger)
    pub low: f64,
    /// Threshold on the 40-60 plateau
    pub medium: f64,
    /// Threshold at sensitivity ≤ 20 (hard to trigger)
    pub high: f64,
}

impl Default for ThresholdModel {
    fn default() -> Self {
        Self {
            low: 2.0,
            medium: 5.0,
            high: 8.0,
        }
    }
}

impl ThresholdModel {
    /// Build a model, ordering the band values so the map stays monotonic.
    pub fn new(low: f64, medium: f64, high: f64) -> Self {
        let mut bands = [low, medium, high];
        bands.sort_by(|a, b| a.total_cmp(b));
        Self {
            low: bands[0],
            medium: bands[1],
            high: bands[2],
        }
    }

    /// Threshold for the given sensitivity; values above 100 are clamped.
    pub fn threshold(&self, sensitivity: u8) -> f64 {
        let s = f64::from(sensitivity.min(100));

        if s <= 20.0 {
            self.high
        } else if s <= 40.0 {
            self.medium + (self.high - self.medium) * (40.0 - s) / 20.0
        } else if s <= 60.0 {
            self.medium
        } else if s <= 80.0 {
            self.low + (self.medium - self.low) * (80.0 - s) / 20.0
        } else {
            self.low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_edges() {
        let model = ThresholdModel::default();
        assert_eq!(model.threshold(0), 8.0);
        assert_eq!(model.threshold(20), 8.0);
        assert_eq!(model.threshold(30), 6.5);
        assert_eq!(model.threshold(40), 5.0);
        assert_eq!(model.threshold(60), 5.0);
        assert_eq!(model.threshold(70), 3.5);
        assert_eq!(model.threshold(80), 2.0);
        assert_eq!(model.threshold(100), 2.0);
        assert_eq!(model.threshold(255), 2.0);
    }

    #[test]
    fn test_monotonic_over_full_range() {
        let model = ThresholdModel::default();
        for s1 in 0..=100u8 {
            for s2 in s1..=100u8 {
                assert!(
                    model.threshold(s1) >= model.threshold(s2),
                    "threshold({s1}) < threshold({s2})"
                );
            }
        }
    }

    #[test]
    fn test_unordered_bands_are_sorted() {
        let model = ThresholdModel::new(9.0, 1.0, 4.0);
        assert_eq!(model.low, 1.0);
        assert_eq!(model.medium, 4.0);
        assert_eq!(model.high, 9.0);
        assert!(model.threshold(10) >= model.threshold(90));
    }
}
