//! # Target String Module
//!
//! Standard six-string guitar tuning and the selector that decides which string a
//! reading is measured against: the closest string (auto mode) or a string the
//! user pinned (manual mode).

use crate::error::TunerError;
use crate::notes;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The six strings of a guitar in standard tuning, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum GuitarString {
    #[serde(rename = "E2")]
    LowE,
    A,
    D,
    G,
    B,
    #[serde(rename = "E4")]
    HighE,
}

impl GuitarString {
    pub const ALL: [GuitarString; 6] = [
        GuitarString::LowE,
        GuitarString::A,
        GuitarString::D,
        GuitarString::G,
        GuitarString::B,
        GuitarString::HighE,
    ];

    /// Display name used by tuners: "E2", "A", "D", "G", "B", "E4".
    pub fn name(self) -> &'static str {
        match self {
            GuitarString::LowE => "E2",
            GuitarString::A => "A",
            GuitarString::D => "D",
            GuitarString::G => "G",
            GuitarString::B => "B",
            GuitarString::HighE => "E4",
        }
    }

    /// Standard-tuning frequency in Hz.
    pub fn standard_frequency(self) -> f32 {
        match self {
            GuitarString::LowE => 82.41,
            GuitarString::A => 110.00,
            GuitarString::D => 146.83,
            GuitarString::G => 196.00,
            GuitarString::B => 246.94,
            GuitarString::HighE => 329.63,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for GuitarString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Case-insensitive lookup of string names. A bare "E" is ambiguous and absent.
static STRING_LOOKUP: Lazy<BTreeMap<String, GuitarString>> = Lazy::new(|| {
    let mut lookup = BTreeMap::new();
    for string in GuitarString::ALL {
        lookup.insert(string.name().to_ascii_lowercase(), string);
    }
    lookup.insert("low-e".to_string(), GuitarString::LowE);
    lookup.insert("high-e".to_string(), GuitarString::HighE);
    lookup
});

impl FromStr for GuitarString {
    type Err = TunerError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        STRING_LOOKUP
            .get(&name.trim().to_ascii_lowercase())
            .copied()
            .ok_or_else(|| {
                TunerError::InvalidConfig(format!(
                    "unknown string '{}' (expected one of E2, A, D, G, B, E4)",
                    name
                ))
            })
    }
}

/// Frequencies of the six strings. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct StringTable {
    frequencies: [f32; 6],
}

impl Default for StringTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl StringTable {
    /// Standard tuning: E2 A D G B E4.
    pub fn standard() -> Self {
        Self {
            frequencies: GuitarString::ALL.map(GuitarString::standard_frequency),
        }
    }

    /// Standard tuning with selected strings retuned.
    pub fn with_overrides(overrides: &[(GuitarString, f32)]) -> Self {
        let mut table = Self::standard();
        for &(string, frequency) in overrides {
            table.frequencies[string.index()] = frequency;
        }
        table
    }

    pub fn frequency(&self, string: GuitarString) -> f32 {
        self.frequencies[string.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (GuitarString, f32)> + '_ {
        GuitarString::ALL
            .iter()
            .map(move |&string| (string, self.frequency(string)))
    }

    /// The string whose frequency is closest to `freq`, with the distance in Hz.
    /// Ties go to the lower string.
    pub fn closest(&self, freq: f32) -> (GuitarString, f32) {
        let mut best = (GuitarString::LowE, f32::INFINITY);
        for (string, frequency) in self.iter() {
            let diff = (freq - frequency).abs();
            if diff < best.1 {
                best = (string, diff);
            }
        }
        best
    }
}

/// A pinned string and the frequency it is tuned against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TuningTarget {
    pub string: GuitarString,
    pub frequency: f32,
}

/// Whether readings follow the closest string or a pinned one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetMode {
    Auto,
    Manual(TuningTarget),
}

/// Outcome of evaluating one smoothed frequency against the targets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetReading {
    /// String surfaced by auto matching; `None` in manual mode or without a match.
    pub matched: Option<GuitarString>,
    /// Pinned target in manual mode.
    pub pinned: Option<TuningTarget>,
    /// Deviation from the pinned target (manual mode only).
    pub cents: Option<f32>,
}

/// Tracks the tuning mode and the currently highlighted string.
#[derive(Debug, Clone)]
pub struct TargetSelector {
    table: StringTable,
    threshold_hz: f32,
    mode: TargetMode,
    current_match: Option<GuitarString>,
}

impl TargetSelector {
    pub const DEFAULT_THRESHOLD_HZ: f32 = 10.0;

    pub fn new(table: StringTable, threshold_hz: f32) -> Self {
        Self {
            table,
            threshold_hz,
            mode: TargetMode::Auto,
            current_match: None,
        }
    }

    pub fn mode(&self) -> TargetMode {
        self.mode
    }

    /// The string highlighted by the last auto evaluation.
    pub fn current_match(&self) -> Option<GuitarString> {
        self.current_match
    }

    /// Pins a string (manual mode) or, with `None`, returns to auto mode.
    ///
    /// Any highlight surfaced by earlier auto matching is cleared.
    pub fn select(&mut self, string: Option<GuitarString>) -> TargetMode {
        self.mode = match string {
            Some(string) => TargetMode::Manual(TuningTarget {
                string,
                frequency: self.table.frequency(string),
            }),
            None => TargetMode::Auto,
        };
        self.current_match = None;
        self.mode
    }

    /// Evaluates a smoothed frequency. A non-positive frequency is silence: it
    /// clears the auto highlight and leaves a manual pin in place.
    pub fn evaluate(&mut self, freq: f32) -> TargetReading {
        match self.mode {
            TargetMode::Manual(target) => TargetReading {
                matched: None,
                pinned: Some(target),
                cents: (freq > 0.0).then(|| notes::cents_between(freq, target.frequency)),
            },
            TargetMode::Auto => {
                self.current_match = if freq > 0.0 {
                    let (string, diff) = self.table.closest(freq);
                    (diff < self.threshold_hz).then_some(string)
                } else {
                    None
                };
                TargetReading {
                    matched: self.current_match,
                    pinned: None,
                    cents: None,
                }
            }
        }
    }
}

impl Default for TargetSelector {
    fn default() -> Self {
        Self::new(StringTable::standard(), Self::DEFAULT_THRESHOLD_HZ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn auto_mode_matches_closest_string_within_threshold() {
        let mut selector = TargetSelector::default();
        assert_eq!(selector.evaluate(83.0).matched, Some(GuitarString::LowE));
        assert_eq!(selector.evaluate(90.0).matched, Some(GuitarString::LowE));
        assert_eq!(selector.evaluate(200.0).matched, Some(GuitarString::G));
        assert_eq!(selector.evaluate(329.0).matched, Some(GuitarString::HighE));
    }

    #[test]
    fn auto_mode_clears_highlight_when_nothing_is_close() {
        let mut selector = TargetSelector::default();
        selector.evaluate(110.5);
        assert_eq!(selector.current_match(), Some(GuitarString::A));

        // 128 Hz: 18 Hz above A, 18.83 Hz below D.
        assert_eq!(selector.evaluate(128.0).matched, None);
        assert_eq!(selector.current_match(), None);

        selector.evaluate(146.0);
        assert_eq!(selector.evaluate(0.0).matched, None);
        assert_eq!(selector.current_match(), None);
    }

    #[test]
    fn threshold_is_strict() {
        let mut selector = TargetSelector::default();
        assert_eq!(selector.evaluate(120.0).matched, None);
        assert_eq!(selector.evaluate(119.99).matched, Some(GuitarString::A));
    }

    #[test]
    fn manual_mode_measures_against_pin_regardless_of_distance() {
        let mut selector = TargetSelector::default();
        selector.select(Some(GuitarString::LowE));

        let reading = selector.evaluate(164.82);
        assert_eq!(reading.matched, None);
        assert_eq!(reading.pinned.map(|t| t.string), Some(GuitarString::LowE));
        assert_abs_diff_eq!(reading.cents.unwrap(), 1200.0, epsilon = 0.5);

        let silent = selector.evaluate(0.0);
        assert_eq!(silent.cents, None);
        assert!(matches!(selector.mode(), TargetMode::Manual(_)));
    }

    #[test]
    fn switching_modes_resets_highlight() {
        let mut selector = TargetSelector::default();
        selector.evaluate(196.5);
        assert_eq!(selector.current_match(), Some(GuitarString::G));

        selector.select(Some(GuitarString::B));
        assert_eq!(selector.current_match(), None);

        selector.select(None);
        assert_eq!(selector.mode(), TargetMode::Auto);
        assert_eq!(selector.current_match(), None);
    }

    #[test]
    fn pinned_frequency_comes_from_the_table() {
        let table = StringTable::with_overrides(&[(GuitarString::D, 145.0)]);
        let mut selector = TargetSelector::new(table, 10.0);
        match selector.select(Some(GuitarString::D)) {
            TargetMode::Manual(target) => assert_eq!(target.frequency, 145.0),
            TargetMode::Auto => panic!("expected manual mode"),
        }
    }

    #[test]
    fn parses_string_names() {
        assert_eq!("e2".parse::<GuitarString>().unwrap(), GuitarString::LowE);
        assert_eq!(" E4 ".parse::<GuitarString>().unwrap(), GuitarString::HighE);
        assert_eq!("g".parse::<GuitarString>().unwrap(), GuitarString::G);
        assert_eq!("high-e".parse::<GuitarString>().unwrap(), GuitarString::HighE);
        assert!("E".parse::<GuitarString>().is_err());
        assert!("C".parse::<GuitarString>().is_err());
    }
}
