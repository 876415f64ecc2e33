//! Contracts to the external DSP renderer and the audio clock.
//!
//! The engine never touches audio buffers. It schedules timestamped
//! parameter automation against a [`VoiceRenderer`] and reads a monotonic
//! clock from an [`AudioClock`]; the sample-accurate synthesis behind the
//! renderer lives outside this crate.

use slotmap::new_key_type;

new_key_type! {
    /// Stable identifier for one synthesis engine in the pool.
    pub struct EngineKey;
}

/// Per-voice parameter namespace. Every engine exposes the same set for
/// each of its voices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceParam {
    /// 0 = off, 1 = on
    Gate,
    /// Oscillator frequency in Hz
    Frequency,
    /// Voice gain, 0..1
    Gain,
    /// Output-stage pan, -1..1
    Pan,
    /// Free-form macro slot (0-3)
    Macro(u8),
}

/// Parameter automation surface of the external renderer.
///
/// Times are audio-clock seconds. Implementations must apply automation
/// for one voice parameter in timestamp order.
pub trait VoiceRenderer {
    /// A new engine joined the pool.
    fn create_engine(&mut self, engine: EngineKey, voice_count: u8);

    /// An engine was compacted away.
    fn destroy_engine(&mut self, engine: EngineKey);

    fn set_value_at_time(
        &mut self,
        engine: EngineKey,
        voice: u8,
        param: VoiceParam,
        value: f32,
        time: f64,
    );

    fn linear_ramp_to_value_at_time(
        &mut self,
        engine: EngineKey,
        voice: u8,
        param: VoiceParam,
        value: f32,
        time: f64,
    );

    fn exponential_ramp_to_value_at_time(
        &mut self,
        engine: EngineKey,
        voice: u8,
        param: VoiceParam,
        value: f32,
        time: f64,
    );

    fn cancel_scheduled_values(&mut self, engine: EngineKey, voice: u8, param: VoiceParam, after: f64);

    /// Bank-wide output gain (global volume).
    fn set_master_gain(&mut self, value: f32, time: f64);

    /// Force every gate to zero within one quantum.
    fn all_notes_off(&mut self);

    /// Bulk-cancel everything scheduled in the future.
    fn cancel_scheduled_notes(&mut self);
}

/// Monotonic audio clock.
pub trait AudioClock {
    /// Current audio time in seconds.
    fn current_time(&self) -> f64;

    /// False while the context is suspended; scheduled commands queue up.
    fn is_running(&self) -> bool;

    /// Ask the context to start running. Idempotent.
    fn resume(&mut self);

    /// Seconds per processing quantum (e.g. 128 frames / sample rate).
    fn quantum(&self) -> f64;
}

/// Test doubles for hosts embedding the engine headless.
pub mod testing {
    use super::*;

    /// A manually stepped clock.
    #[derive(Debug)]
    pub struct ManualClock {
        pub now: f64,
        pub running: bool,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                now: 0.0,
                running: true,
            }
        }

        pub fn advance(&mut self, seconds: f64) {
            self.now += seconds;
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl AudioClock for ManualClock {
        fn current_time(&self) -> f64 {
            self.now
        }

        fn is_running(&self) -> bool {
            self.running
        }

        fn resume(&mut self) {
            self.running = true;
        }

        fn quantum(&self) -> f64 {
            128.0 / 44_100.0
        }
    }

    /// What a [`RecordingRenderer`] captured.
    #[derive(Clone, Debug, PartialEq)]
    pub enum Recorded {
        EngineCreated {
            engine: EngineKey,
            voices: u8,
        },
        EngineDestroyed {
            engine: EngineKey,
        },
        Set {
            engine: EngineKey,
            voice: u8,
            param: VoiceParam,
            value: f32,
            time: f64,
        },
        LinearRamp {
            engine: EngineKey,
            voice: u8,
            param: VoiceParam,
            value: f32,
            time: f64,
        },
        ExponentialRamp {
            engine: EngineKey,
            voice: u8,
            param: VoiceParam,
            value: f32,
            time: f64,
        },
        Cancel {
            engine: EngineKey,
            voice: u8,
            param: VoiceParam,
            after: f64,
        },
        MasterGain {
            value: f32,
            time: f64,
        },
        AllNotesOff,
        CancelScheduledNotes,
    }

    /// Records every renderer call for assertion.
    #[derive(Debug, Default)]
    pub struct RecordingRenderer {
        pub log: Vec<Recorded>,
    }

    impl RecordingRenderer {
        pub fn new() -> Self {
            Self::default()
        }

        /// All gate writes, in call order.
        pub fn gates(&self) -> Vec<(f32, f64)> {
            self.log
                .iter()
                .filter_map(|r| match r {
                    Recorded::Set {
                        param: VoiceParam::Gate,
                        value,
                        time,
                        ..
                    } => Some((*value, *time)),
                    _ => None,
                })
                .collect()
        }

        /// All frequency writes (sets and ramps), in call order.
        pub fn frequencies(&self) -> Vec<(f32, f64)> {
            self.log
                .iter()
                .filter_map(|r| match r {
                    Recorded::Set {
                        param: VoiceParam::Frequency,
                        value,
                        time,
                        ..
                    }
                    | Recorded::LinearRamp {
                        param: VoiceParam::Frequency,
                        value,
                        time,
                        ..
                    }
                    | Recorded::ExponentialRamp {
                        param: VoiceParam::Frequency,
                        value,
                        time,
                        ..
                    } => Some((*value, *time)),
                    _ => None,
                })
                .collect()
        }
    }

    impl VoiceRenderer for RecordingRenderer {
        fn create_engine(&mut self, engine: EngineKey, voice_count: u8) {
            self.log.push(Recorded::EngineCreated {
                engine,
                voices: voice_count,
            });
        }

        fn destroy_engine(&mut self, engine: EngineKey) {
            self.log.push(Recorded::EngineDestroyed { engine });
        }

        fn set_value_at_time(
            &mut self,
            engine: EngineKey,
            voice: u8,
            param: VoiceParam,
            value: f32,
            time: f64,
        ) {
            self.log.push(Recorded::Set {
                engine,
                voice,
                param,
                value,
                time,
            });
        }

        fn linear_ramp_to_value_at_time(
            &mut self,
            engine: EngineKey,
            voice: u8,
            param: VoiceParam,
            value: f32,
            time: f64,
        ) {
            self.log.push(Recorded::LinearRamp {
                engine,
                voice,
                param,
                value,
                time,
            });
        }

        fn exponential_ramp_to_value_at_time(
            &mut self,
            engine: EngineKey,
            voice: u8,
            param: VoiceParam,
            value: f32,
            time: f64,
        ) {
            self.log.push(Recorded::ExponentialRamp {
                engine,
                voice,
                param,
                value,
                time,
            });
        }

        fn cancel_scheduled_values(
            &mut self,
            engine: EngineKey,
            voice: u8,
            param: VoiceParam,
            after: f64,
        ) {
            self.log.push(Recorded::Cancel {
                engine,
                voice,
                param,
                after,
            });
        }

        fn set_master_gain(&mut self, value: f32, time: f64) {
            self.log.push(Recorded::MasterGain { value, time });
        }

        fn all_notes_off(&mut self) {
            self.log.push(Recorded::AllNotesOff);
        }

        fn cancel_scheduled_notes(&mut self) {
            self.log.push(Recorded::CancelScheduledNotes);
        }
    }
}
