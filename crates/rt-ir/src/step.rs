//! The internal step form used after import.
//!
//! A `Step` is the richer, resolved version of a pattern cell: the period
//! has been turned into a MIDI note and a frequency, the sample's default
//! volume into a velocity, and `Fxx` has been split into speed vs. tempo.

use crate::effect::EffectCommand;

/// One resolved event on one track of one row.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Step {
    /// Row this step belongs to
    pub row: u16,
    /// MIDI note number (fractional after finetune)
    pub midi: Option<f32>,
    /// Note velocity (0-255)
    pub velocity: Option<u8>,
    /// Instrument slot (1-based, as in the cell)
    pub instrument_id: Option<u8>,
    /// Explicit key release
    pub note_off: bool,
    /// Synth-domain frequency derived from the Amiga period
    pub frequency: Option<f32>,
    /// Pan override (-1..1)
    pub pan: Option<f32>,
    /// Per-track effect
    pub effect: Option<EffectCommand>,
    /// F01-F1F: new ticks-per-row
    pub speed: Option<u8>,
    /// F20-FF: new BPM
    pub tempo: Option<u8>,
}

impl Step {
    /// An empty step at `row`.
    pub fn at(row: u16) -> Self {
        Self {
            row,
            ..Self::default()
        }
    }

    /// Returns true if the step carries nothing the engine acts on.
    pub fn is_empty(&self) -> bool {
        self.midi.is_none()
            && self.instrument_id.is_none()
            && !self.note_off
            && self.effect.is_none()
            && self.speed.is_none()
            && self.tempo.is_none()
    }
}
