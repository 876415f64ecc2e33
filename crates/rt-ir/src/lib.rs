//! Core IR types for the retrack playback engine.
//!
//! This crate defines the data model shared by the format parsers and the
//! playback engine: songs, patterns, samples, the typed effect-command
//! surface, and the low-level processor commands the engine emits.
//!
//! Designed to be `no_std` compatible with the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod analysis;
mod command;
mod effect;
mod pattern;
mod pitch;
mod position;
mod sample;
mod song;
mod step;

pub use analysis::{analyze, SongFeatures};
pub use command::{GlideKind, ProcessorCommand};
pub use effect::EffectCommand;
pub use pattern::{Pattern, PatternCell};
pub use pitch::{
    arp_period, clamp_period, frequency_to_period, midi_to_frequency, midi_to_period,
    period_to_frequency, period_to_midi, semitone_ratio, AMIGA_CLOCK, PAULA_SCALE, PERIOD_MAX,
    PERIOD_MIN,
};
pub use position::{PlaybackPosition, TransportState};
pub use sample::Sample;
pub use song::{Song, TrackerFlavor};
pub use step::Step;
