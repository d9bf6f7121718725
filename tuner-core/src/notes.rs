//! # Musical Note Module
//!
//! Converts frequencies into equal-tempered note names and cent deviations,
//! based on A4 = 440 Hz (MIDI note 69).
//!
//! ## Features
//! - Nearest-note lookup over the whole MIDI range
//! - Cent deviation against the nearest note or any fixed target
//! - Accuracy bands and a clamped meter position for tuning indicators
//!
//! ## Rounding
//! The nearest note index is rounded half away from zero (`f32::round`), so a
//! frequency exactly between two notes maps to the higher one.

use serde::Serialize;

/// Reference pitch of A4 in Hz.
pub const A4_FREQUENCY: f32 = 440.0;

/// MIDI index of A4.
pub const A4_MIDI: i32 = 69;

/// Chromatic note names, starting at C.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Placeholder name shown when there is no pitch.
pub const NO_NOTE: &str = "---";

/// Result of mapping a frequency onto the chromatic scale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteReading {
    /// Note name with octave (e.g. "A4", "C#3"), or "---" for no pitch.
    pub name: String,
    /// Nearest MIDI note index, `None` for no pitch.
    pub midi: Option<i32>,
    /// Frequency of the nearest note in Hz (0 for no pitch).
    pub target_frequency: f32,
    /// Deviation from the nearest note in cents (positive = sharp).
    pub cents: f32,
}

impl NoteReading {
    fn silent() -> Self {
        Self {
            name: NO_NOTE.to_string(),
            midi: None,
            target_frequency: 0.0,
            cents: 0.0,
        }
    }

    /// Position within the octave, 0 = C.
    pub fn note_index(&self) -> Option<usize> {
        self.midi.map(|n| n.rem_euclid(12) as usize)
    }

    pub fn octave(&self) -> Option<i32> {
        self.midi.map(|n| n.div_euclid(12) - 1)
    }
}

/// Finds the nearest equal-tempered note to a frequency.
///
/// # Arguments
/// * `freq` - Input frequency in Hz
///
/// # Returns
/// * `NoteReading` - Nearest note, its frequency and the cent deviation.
///   Non-positive or non-finite input yields "---" with zero frequency and cents.
pub fn map_frequency(freq: f32) -> NoteReading {
    if !(freq > 0.0) || !freq.is_finite() {
        return NoteReading::silent();
    }

    let midi = midi_index(freq);
    let target_frequency = midi_to_frequency(midi);
    let cents = cents_between(freq, target_frequency);

    NoteReading {
        name: note_name(midi),
        midi: Some(midi),
        target_frequency,
        cents,
    }
}

/// Nearest MIDI index, n = round(12·log2(f/440) + 69).
pub fn midi_index(freq: f32) -> i32 {
    (12.0 * (freq / A4_FREQUENCY).log2() + A4_MIDI as f32).round() as i32
}

/// Equal-tempered frequency of a MIDI index.
pub fn midi_to_frequency(midi: i32) -> f32 {
    A4_FREQUENCY * 2.0_f32.powf((midi - A4_MIDI) as f32 / 12.0)
}

/// Note name with octave, e.g. 69 -> "A4", 40 -> "E2".
pub fn note_name(midi: i32) -> String {
    let note_index = midi.rem_euclid(12) as usize;
    let octave = midi.div_euclid(12) - 1;
    format!("{}{}", NOTE_NAMES[note_index], octave)
}

/// Calculates the deviation from a target frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
pub fn cents_between(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// How close a reading is to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Accuracy {
    /// Within ±5 cents.
    Perfect,
    /// Within ±10 cents.
    Good,
    /// Within ±20 cents.
    Fair,
    Poor,
}

impl Accuracy {
    pub fn from_cents(cents: f32) -> Self {
        let deviation = cents.abs();
        if deviation < 5.0 {
            Accuracy::Perfect
        } else if deviation < 10.0 {
            Accuracy::Good
        } else if deviation < 20.0 {
            Accuracy::Fair
        } else {
            Accuracy::Poor
        }
    }
}

/// Maximum cent deviation a tuning meter shows in either direction.
pub const METER_RANGE: i32 = 50;

/// Rounds a cent deviation to a meter position in `-50..=50`.
pub fn meter_position(cents: f32) -> i32 {
    (cents.round() as i32).clamp(-METER_RANGE, METER_RANGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn concert_a_is_a4_with_no_deviation() {
        let reading = map_frequency(440.0);
        assert_eq!(reading.name, "A4");
        assert_eq!(reading.midi, Some(69));
        assert_relative_eq!(reading.target_frequency, 440.0);
        assert_abs_diff_eq!(reading.cents, 0.0, epsilon = 1e-4);
        assert_eq!(reading.note_index(), Some(9));
        assert_eq!(reading.octave(), Some(4));
    }

    #[test]
    fn silence_maps_to_placeholder() {
        for freq in [0.0, -12.0, f32::NAN] {
            let reading = map_frequency(freq);
            assert_eq!(reading.name, NO_NOTE);
            assert_eq!(reading.target_frequency, 0.0);
            assert_eq!(reading.cents, 0.0);
            assert_eq!(reading.midi, None);
        }
    }

    #[test]
    fn guitar_strings_map_to_expected_notes() {
        let cases = [
            (82.41, "E2"),
            (110.0, "A2"),
            (146.83, "D3"),
            (196.0, "G3"),
            (246.94, "B3"),
            (329.63, "E4"),
        ];
        for (freq, name) in cases {
            let reading = map_frequency(freq);
            assert_eq!(reading.name, name, "{} Hz", freq);
            assert!(reading.cents.abs() < 1.0, "{} Hz: {} cents", freq, reading.cents);
        }
    }

    #[test]
    fn cents_sign_follows_sharp_and_flat() {
        assert!(map_frequency(445.0).cents > 0.0);
        assert!(map_frequency(435.0).cents < 0.0);
        assert_abs_diff_eq!(cents_between(880.0, 440.0), 1200.0, epsilon = 1e-3);
    }

    #[test]
    fn cents_corrected_frequency_maps_to_same_note() {
        let mut freq = 30.0_f32;
        while freq < 4000.0 {
            let reading = map_frequency(freq);
            let corrected = freq * 2.0_f32.powf(-reading.cents / 1200.0);
            let again = map_frequency(corrected);
            assert_eq!(again.midi, reading.midi, "round trip failed at {} Hz", freq);
            assert_abs_diff_eq!(corrected, reading.target_frequency, epsilon = 0.05);
            freq *= 1.037;
        }
    }

    #[test]
    fn low_midi_indices_use_floored_octaves() {
        assert_eq!(note_name(0), "C-1");
        assert_eq!(note_name(11), "B-1");
        assert_eq!(note_name(12), "C0");
        assert_eq!(note_name(-1), "B-2");
    }

    #[test]
    fn accuracy_bands_and_meter_clamp() {
        assert_eq!(Accuracy::from_cents(-4.9), Accuracy::Perfect);
        assert_eq!(Accuracy::from_cents(5.0), Accuracy::Good);
        assert_eq!(Accuracy::from_cents(-19.9), Accuracy::Fair);
        assert_eq!(Accuracy::from_cents(20.0), Accuracy::Poor);

        assert_eq!(meter_position(12.4), 12);
        assert_eq!(meter_position(-12.5), -13);
        assert_eq!(meter_position(80.0), 50);
        assert_eq!(meter_position(-300.0), -50);
    }
}
