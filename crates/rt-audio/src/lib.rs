//! Audio-side adapters for retrack.
//!
//! Thin wrappers only: a cpal-backed [`rt_engine::AudioClock`] and a
//! lock-free bridge that carries the engine's parameter automation to an
//! external DSP consumer. No synthesis happens here.

mod automation;
mod clock;

pub use automation::{automation_channel, AutomationConsumer, AutomationSender, RampKind, RendererEvent};
pub use clock::{StreamClock, SystemClock};

use thiserror::Error;

/// Error type for audio adapter setup.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio output device available")]
    NoDevice,
    #[error("device init error: {0}")]
    DeviceInit(String),
    #[error("stream create error: {0}")]
    StreamCreate(String),
    #[error("playback error: {0}")]
    Playback(String),
}
