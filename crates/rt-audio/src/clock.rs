//! Audio clock sources.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};

use rt_engine::AudioClock;

use crate::AudioError;

/// Frames per processing quantum, matching the renderer's block size.
const QUANTUM_FRAMES: f64 = 128.0;

/// An audio clock driven by a cpal output stream's frame counter.
///
/// The stream outputs silence; it exists so `current_time` advances in
/// lockstep with the device, which is what scheduled automation is timed
/// against.
pub struct StreamClock {
    _stream: Stream,
    frames: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    sample_rate: u32,
}

impl StreamClock {
    /// Open the default output device and start counting frames.
    pub fn new() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
        let config = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceInit(e.to_string()))?;
        let config: StreamConfig = config.into();

        let sample_rate = config.sample_rate.0;
        let channels = config.channels as usize;
        let frames = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(false));

        let cb_frames = frames.clone();
        let cb_running = running.clone();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for sample in data.iter_mut() {
                        *sample = 0.0;
                    }
                    if cb_running.load(Ordering::Relaxed) {
                        cb_frames.fetch_add((data.len() / channels) as u64, Ordering::Relaxed);
                    }
                },
                |err| tracing::warn!("audio stream error: {err}"),
                None,
            )
            .map_err(|e| AudioError::StreamCreate(e.to_string()))?;
        stream
            .play()
            .map_err(|e| AudioError::Playback(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            frames,
            running,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl AudioClock for StreamClock {
    fn current_time(&self) -> f64 {
        self.frames.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn resume(&mut self) {
        self.running.store(true, Ordering::Relaxed);
    }

    fn quantum(&self) -> f64 {
        QUANTUM_FRAMES / self.sample_rate as f64
    }
}

/// Wall-clock fallback for hosts without an audio device.
pub struct SystemClock {
    origin: Instant,
    running: bool,
    sample_rate: u32,
}

impl SystemClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            origin: Instant::now(),
            running: false,
            sample_rate,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(44_100)
    }
}

impl AudioClock for SystemClock {
    fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn resume(&mut self) {
        self.running = true;
    }

    fn quantum(&self) -> f64 {
        QUANTUM_FRAMES / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances_monotonically() {
        let mut clock = SystemClock::new(48_000);
        assert!(!clock.is_running());
        clock.resume();
        assert!(clock.is_running());
        let a = clock.current_time();
        let b = clock.current_time();
        assert!(b >= a);
    }

    #[test]
    fn system_clock_quantum_tracks_sample_rate() {
        let clock = SystemClock::new(48_000);
        assert!((clock.quantum() - 128.0 / 48_000.0).abs() < 1e-12);
    }
}
