//! # Rainfall Intensity Classification
//!
//! Maps a rainfall rate (mm/h) to a discrete severity level. Thresholds are
//! indexed by the hour of the rainfall: the longer it has been raining, the
//! higher the rate needed to reach the same level. Rows past the end of the
//! table reuse the last row.
//!
//! Each row is scanned from the strongest level to the weakest and the first
//! threshold the rate strictly exceeds wins.

use serde::{Deserialize, Serialize};

/// Intensity levels in ascending order of severity.
///
/// `None` means no rainfall, `Unknown` means a rainfall whose rate cannot be
/// computed yet (all tips within the same second).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    #[default]
    None,
    Unknown,
    Light,
    Shower,
    Moderate,
    Strong,
    Heavy,
    Intense,
    Torrential,
}

/// Levels in table column order, strongest first.
const LEVELS: [Intensity; 7] = [
    Intensity::Torrential,
    Intensity::Intense,
    Intensity::Heavy,
    Intensity::Strong,
    Intensity::Moderate,
    Intensity::Shower,
    Intensity::Light,
];

/// Rate thresholds in mm/h, one row per elapsed rain hour.
const THRESHOLDS: [[f32; 7]; 4] = [
    [50.0, 30.0, 16.0, 8.0, 4.0, 2.0, 0.0],
    [60.0, 36.0, 20.0, 10.0, 5.0, 2.5, 0.0],
    [70.0, 42.0, 24.0, 12.0, 6.0, 3.0, 0.0],
    [80.0, 48.0, 28.0, 14.0, 7.0, 3.5, 0.0],
];

impl Intensity {
    /// Classify a computed rate of a rainfall that has lasted `hours` full
    /// hours. A rate at or below every threshold still reads `Light`.
    pub fn classify(rate: f32, hours: u32) -> Self {
        let row = &THRESHOLDS[(hours as usize).min(THRESHOLDS.len() - 1)];
        LEVELS
            .iter()
            .zip(row.iter())
            .find(|&(_, &threshold)| rate > threshold)
            .map(|(&level, _)| level)
            .unwrap_or(Intensity::Light)
    }

    /// Ordinal used on the query surface (0 = none).
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            Intensity::None => "none",
            Intensity::Unknown => "unknown",
            Intensity::Light => "light",
            Intensity::Shower => "shower",
            Intensity::Moderate => "moderate",
            Intensity::Strong => "strong",
            Intensity::Heavy => "heavy",
            Intensity::Intense => "intense",
            Intensity::Torrential => "torrential",
        }
    }
}

impl std::fmt::Display for Intensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_strictly_greater() {
        assert_eq!(Intensity::classify(4.0, 0), Intensity::Shower);
        assert_eq!(Intensity::classify(4.01, 0), Intensity::Moderate);
        assert_eq!(Intensity::classify(50.0, 0), Intensity::Intense);
        assert_eq!(Intensity::classify(50.5, 0), Intensity::Torrential);
    }

    #[test]
    fn test_zero_rate_reads_light() {
        assert_eq!(Intensity::classify(0.0, 0), Intensity::Light);
        assert_eq!(Intensity::classify(0.1, 3), Intensity::Light);
    }

    #[test]
    fn test_thresholds_rise_with_hours() {
        assert_eq!(Intensity::classify(9.0, 0), Intensity::Strong);
        assert_eq!(Intensity::classify(9.0, 1), Intensity::Moderate);
        assert_eq!(Intensity::classify(9.0, 3), Intensity::Moderate);
        assert_eq!(Intensity::classify(6.5, 3), Intensity::Shower);
    }

    #[test]
    fn test_hour_index_is_clamped() {
        assert_eq!(
            Intensity::classify(75.0, 1_000),
            Intensity::classify(75.0, 3)
        );
        assert_eq!(Intensity::classify(75.0, u32::MAX), Intensity::Intense);
    }

    #[test]
    fn test_monotonic_in_rate() {
        for hours in 0..6 {
            let mut previous = Intensity::Light;
            let mut rate = 0.0f32;
            while rate < 120.0 {
                let level = Intensity::classify(rate, hours);
                assert!(
                    level >= previous,
                    "level dropped at {rate} mm/h, hour {hours}: {previous} -> {level}"
                );
                previous = level;
                rate += 0.25;
            }
            assert_eq!(previous, Intensity::Torrential);
        }
    }

    #[test]
    fn test_ordinals_follow_severity() {
        assert_eq!(Intensity::None.ordinal(), 0);
        assert_eq!(Intensity::Unknown.ordinal(), 1);
        assert_eq!(Intensity::Light.ordinal(), 2);
        assert_eq!(Intensity::Torrential.ordinal(), 8);
    }
}
