//! Lock-free bridge carrying parameter automation to the audio thread.
//!
//! The control task owns an [`AutomationSender`] (a [`VoiceRenderer`]);
//! the DSP side owns the matching consumer and drains timestamped events
//! at its own pace. Events are dropped with a warning when the queue is
//! full — the control task never blocks on audio.

use ringbuf::traits::{Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::warn;

use rt_engine::{EngineKey, VoiceParam, VoiceRenderer};

/// How a parameter write reaches its target value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RampKind {
    Set,
    Linear,
    Exponential,
}

/// One timestamped renderer call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RendererEvent {
    EngineCreated {
        engine: EngineKey,
        voices: u8,
    },
    EngineDestroyed {
        engine: EngineKey,
    },
    Param {
        engine: EngineKey,
        voice: u8,
        param: VoiceParam,
        kind: RampKind,
        value: f32,
        time: f64,
    },
    CancelValues {
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

/// Consumer half handed to the DSP thread.
pub type AutomationConsumer = HeapCons<RendererEvent>;

/// Producer half; implements the renderer contract.
pub struct AutomationSender {
    producer: HeapProd<RendererEvent>,
    dropped: u64,
}

/// Create a bounded automation queue (`capacity` events).
pub fn automation_channel(capacity: usize) -> (AutomationSender, AutomationConsumer) {
    let (producer, consumer) = HeapRb::new(capacity).split();
    (
        AutomationSender {
            producer,
            dropped: 0,
        },
        consumer,
    )
}

impl AutomationSender {
    fn push(&mut self, event: RendererEvent) {
        if self.producer.try_push(event).is_err() {
            self.dropped += 1;
            if self.dropped.is_power_of_two() {
                warn!(dropped = self.dropped, "automation queue full, event dropped");
            }
        }
    }

    /// Events lost to a full queue since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl VoiceRenderer for AutomationSender {
    fn create_engine(&mut self, engine: EngineKey, voice_count: u8) {
        self.push(RendererEvent::EngineCreated {
            engine,
            voices: voice_count,
        });
    }

    fn destroy_engine(&mut self, engine: EngineKey) {
        self.push(RendererEvent::EngineDestroyed { engine });
    }

    fn set_value_at_time(
        &mut self,
        engine: EngineKey,
        voice: u8,
        param: VoiceParam,
        value: f32,
        time: f64,
    ) {
        self.push(RendererEvent::Param {
            engine,
            voice,
            param,
            kind: RampKind::Set,
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
        self.push(RendererEvent::Param {
            engine,
            voice,
            param,
            kind: RampKind::Linear,
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
        self.push(RendererEvent::Param {
            engine,
            voice,
            param,
            kind: RampKind::Exponential,
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
        self.push(RendererEvent::CancelValues {
            engine,
            voice,
            param,
            after,
        });
    }

    fn set_master_gain(&mut self, value: f32, time: f64) {
        self.push(RendererEvent::MasterGain { value, time });
    }

    fn all_notes_off(&mut self) {
        self.push(RendererEvent::AllNotesOff);
    }

    fn cancel_scheduled_notes(&mut self) {
        self.push(RendererEvent::CancelScheduledNotes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::Consumer;

    #[test]
    fn events_cross_the_queue_in_order() {
        let (mut tx, mut rx) = automation_channel(16);
        tx.all_notes_off();
        tx.set_master_gain(0.5, 1.0);

        assert_eq!(rx.try_pop(), Some(RendererEvent::AllNotesOff));
        assert_eq!(
            rx.try_pop(),
            Some(RendererEvent::MasterGain {
                value: 0.5,
                time: 1.0
            })
        );
        assert_eq!(rx.try_pop(), None);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (mut tx, _rx) = automation_channel(2);
        tx.all_notes_off();
        tx.all_notes_off();
        tx.all_notes_off();
        assert_eq!(tx.dropped(), 1);
    }
}
