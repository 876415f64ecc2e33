//! Playback engine for retrack.
//!
//! The engine is split along the data flow: per-track effect state and the
//! tick-level effect processor, the look-ahead transport scheduler, and
//! the voice allocator that maps processor commands onto a pool of
//! synthesis engines. Audio rendering itself happens behind the
//! [`renderer::VoiceRenderer`] contract.

mod allocator;
mod effect_state;
pub mod import;
mod processor;
pub mod renderer;
mod scheduler;
mod waveform;

pub use allocator::{VoiceAllocator, VoiceSlice, VOICES_PER_ENGINE};
pub use effect_state::{DelayedNote, SlideMode, SlideSource, TrackEffectState};
pub use processor::{process_row_start, process_tick, RowContext};
pub use renderer::{AudioClock, EngineKey, VoiceParam, VoiceRenderer};
pub use scheduler::{EngineEvent, Scheduler, DEFAULT_BPM, DEFAULT_SPEED};
pub use waveform::{Oscillator, Waveform};
