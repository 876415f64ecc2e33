//! Low-level processor commands.
//!
//! The effect processor turns `(state, effect, tick)` into an ordered batch
//! of these; the voice allocator maps them onto engine voices.

/// Ramp shape for pitch glides.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlideKind {
    Linear,
    Exponential,
}

/// A command routed from the effect processor to the voice allocator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProcessorCommand {
    /// Trigger a note.
    NoteOn {
        midi: f32,
        velocity: u8,
        /// Explicit frequency for period-mode (MOD-imported) notes
        frequency: Option<f32>,
        pan: Option<f32>,
    },
    /// Release the current note (or a specific one).
    NoteOff { midi: Option<f32> },
    /// Set or glide the voice frequency.
    Pitch {
        frequency: f32,
        glide: Option<GlideKind>,
    },
    /// Set or ramp the voice volume (0-1).
    Volume { volume: f32, ramp: bool },
    /// Set the output-stage pan (-1..1).
    Pan { pan: f32 },
    /// Jump the sample playhead (0-1 of sample length).
    SampleOffset { offset: f32 },
    /// Re-strike the current note, duplicates allowed.
    Retrigger { midi: f32, velocity: u8 },
}

impl ProcessorCommand {
    /// Returns true for the mandatory tick-0 pitch anchor.
    pub fn is_pitch(&self) -> bool {
        matches!(self, Self::Pitch { .. })
    }
}
