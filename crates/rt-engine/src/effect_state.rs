//! Per-track effect state.
//!
//! One `TrackEffectState` lives for the whole playback of a track. It holds
//! the current pitch in both coordinate systems (period for MOD-imported
//! notes, frequency otherwise), the oscillators, the slide accumulators,
//! and the last-value memory every parameterized effect falls back to when
//! its parameter is zero.

use rand::rngs::SmallRng;
use rand::SeedableRng;
use rt_ir::{frequency_to_period, midi_to_frequency, period_to_frequency};

use crate::waveform::Oscillator;

/// How the per-row volume slide accumulator was primed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlideMode {
    /// No slide this row
    #[default]
    None,
    /// Applied on every tick 1..N
    Normal,
    /// One-shot, already applied on tick 0
    Fine,
}

/// Which effect primed the volume slide (5xy and 6xy share the machinery).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlideSource {
    #[default]
    VolumeSlide,
    TonePorta,
    Vibrato,
}

/// A note latched by EDx, waiting for its trigger tick (or the next row).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DelayedNote {
    pub midi: f32,
    pub velocity: u8,
    pub frequency: Option<f32>,
}

/// Mutable effect state for one track.
#[derive(Clone, Debug)]
pub struct TrackEffectState {
    // Pitch, kept coherent across both coordinate systems
    pub current_midi: f32,
    pub target_midi: f32,
    pub current_frequency: f32,
    pub target_frequency: f32,
    /// Some = period mode (MOD import path)
    pub current_period: Option<f32>,
    pub target_period: Option<f32>,

    // Mix
    /// Current volume, 0..1
    pub volume: f32,
    /// Current pan, -1..1
    pub pan: f32,

    // Portamento
    /// Signed 1xx/2xx speed (+ = up); period units per tick in period
    /// mode, sixteenths of a semitone otherwise
    pub porta_speed: f32,
    pub tone_porta_speed: f32,
    pub tone_porta_active: bool,
    pub glissando: bool,

    // Oscillators
    pub vibrato: Oscillator,
    pub tremolo: Oscillator,

    // Arpeggio
    pub arp_x: u8,
    pub arp_y: u8,
    pub arp_tick: u8,

    // Per-row volume slide
    pub vol_slide_delta: f32,
    pub vol_slide_mode: SlideMode,
    pub vol_slide_source: SlideSource,

    // Pan slide
    pub pan_slide_speed: f32,

    // Retrigger
    pub retrigger_interval: u8,
    pub retrigger_tick: u8,
    pub retrigger_vol_change: u8,

    // Note cut / delay (-1 = unarmed)
    pub note_cut_tick: i16,
    pub note_delay_tick: i16,
    pub delayed_note: Option<DelayedNote>,
    /// EDx overflow into the next row
    pub carry_delayed_note: Option<DelayedNote>,

    // Effect memory (raw parameter bytes)
    pub last_porta_up: u8,
    pub last_porta_down: u8,
    pub last_tone_porta: u8,
    pub last_vibrato: u8,
    pub last_tremolo: u8,
    pub last_vol_slide: u8,
    pub last_arpeggio: u8,

    // Identity
    pub voice_index: Option<usize>,
    pub instrument_id: Option<u8>,

    pub(crate) rng: SmallRng,
}

impl TrackEffectState {
    /// Create the state for one track. The seed only feeds the random LFO
    /// waveform, which is non-reproducible by contract.
    pub fn new(seed: u64) -> Self {
        Self {
            current_midi: 0.0,
            target_midi: 0.0,
            current_frequency: 0.0,
            target_frequency: 0.0,
            current_period: None,
            target_period: None,
            volume: 1.0,
            pan: 0.0,
            porta_speed: 0.0,
            tone_porta_speed: 0.0,
            tone_porta_active: false,
            glissando: false,
            vibrato: Oscillator::default(),
            tremolo: Oscillator::default(),
            arp_x: 0,
            arp_y: 0,
            arp_tick: 0,
            vol_slide_delta: 0.0,
            vol_slide_mode: SlideMode::None,
            vol_slide_source: SlideSource::VolumeSlide,
            pan_slide_speed: 0.0,
            retrigger_interval: 0,
            retrigger_tick: 0,
            retrigger_vol_change: 0,
            note_cut_tick: -1,
            note_delay_tick: -1,
            delayed_note: None,
            carry_delayed_note: None,
            last_porta_up: 0,
            last_porta_down: 0,
            last_tone_porta: 0,
            last_vibrato: 0,
            last_tremolo: 0,
            last_vol_slide: 0,
            last_arpeggio: 0,
            voice_index: None,
            instrument_id: None,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Returns true when pitch arithmetic runs on periods.
    pub fn period_mode(&self) -> bool {
        self.current_period.is_some()
    }

    /// Set the current frequency, deriving the period when in period mode.
    pub fn set_frequency(&mut self, frequency: f32) {
        self.current_frequency = frequency;
        if self.current_period.is_some() {
            self.current_period = Some(frequency_to_period(frequency));
        }
    }

    /// Set the current period, deriving the frequency.
    pub fn set_period(&mut self, period: f32) {
        self.current_period = Some(period);
        self.current_frequency = period_to_frequency(period);
    }

    /// Set the target frequency, deriving the target period in period mode.
    pub fn set_target_frequency(&mut self, frequency: f32) {
        self.target_frequency = frequency;
        if self.current_period.is_some() {
            self.target_period = Some(frequency_to_period(frequency));
        }
    }

    /// Latch a new note as the current pitch and mirror it to the target.
    ///
    /// An explicit `frequency` marks the MOD import path and switches the
    /// track into period mode; otherwise pitch is 12-TET from the note.
    pub fn latch_note(&mut self, midi: f32, frequency: Option<f32>) {
        self.current_midi = midi;
        self.target_midi = midi;
        match frequency {
            Some(f) => {
                self.current_frequency = f;
                self.current_period = Some(frequency_to_period(f));
            }
            None => {
                self.current_frequency = midi_to_frequency(midi);
                self.current_period = None;
            }
        }
        self.target_frequency = self.current_frequency;
        self.target_period = self.current_period;
    }

    /// Latch a new note as the tone-portamento target only.
    pub fn latch_target(&mut self, midi: f32, frequency: Option<f32>) {
        self.target_midi = midi;
        match frequency {
            Some(f) => {
                self.target_frequency = f;
                self.target_period = Some(frequency_to_period(f));
            }
            None => {
                self.target_frequency = midi_to_frequency(midi);
                if self.current_period.is_some() {
                    self.target_period = Some(frequency_to_period(self.target_frequency));
                }
            }
        }
    }

    /// Reset the per-note transient state. Called for every new note-on
    /// that is not a tone-portamento continuation.
    pub fn reset_for_note(&mut self) {
        self.vibrato.phase = 0;
        self.tremolo.phase = 0;
        self.arp_tick = 0;
        self.retrigger_tick = 0;
        self.note_cut_tick = -1;
        self.note_delay_tick = -1;
        self.delayed_note = None;
        self.tone_porta_active = false;
    }

    /// Reset the per-row volume-slide accumulator. Effect memory survives.
    pub fn begin_row(&mut self) {
        self.vol_slide_mode = SlideMode::None;
        self.vol_slide_delta = 0.0;
        self.vol_slide_source = SlideSource::VolumeSlide;
    }

    /// Apply the primed per-tick volume slide, clamping to [0, 1].
    /// Returns true if the slide is active this row.
    pub fn apply_volume_slide(&mut self) -> bool {
        if self.vol_slide_mode != SlideMode::Normal {
            return false;
        }
        self.volume = (self.volume + self.vol_slide_delta).clamp(0.0, 1.0);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_ir::midi_to_period;

    fn state() -> TrackEffectState {
        TrackEffectState::new(7)
    }

    #[test]
    fn latch_note_without_frequency_uses_equal_temperament() {
        let mut s = state();
        s.latch_note(69.0, None);
        assert!((s.current_frequency - 440.0).abs() < 1e-3);
        assert!(s.current_period.is_none());
        assert_eq!(s.target_frequency, s.current_frequency);
    }

    #[test]
    fn latch_note_with_frequency_enters_period_mode() {
        let mut s = state();
        let freq = period_to_frequency(428.0);
        s.latch_note(48.0, Some(freq));
        assert!(s.period_mode());
        let p = s.current_period.unwrap();
        assert!((p - 428.0).abs() < 0.01, "period {}", p);
        assert_eq!(s.target_period, s.current_period);
    }

    #[test]
    fn set_frequency_keeps_period_coherent() {
        let mut s = state();
        s.latch_note(48.0, Some(period_to_frequency(428.0)));
        s.set_frequency(period_to_frequency(214.0));
        let p = s.current_period.unwrap();
        assert!((p - 214.0).abs() < 0.01);
    }

    #[test]
    fn set_period_derives_frequency() {
        let mut s = state();
        s.latch_note(48.0, Some(period_to_frequency(428.0)));
        s.set_period(214.0);
        assert!((s.current_frequency - period_to_frequency(214.0)).abs() < 1e-3);
    }

    #[test]
    fn latch_target_does_not_move_current() {
        let mut s = state();
        s.latch_note(48.0, Some(period_to_frequency(428.0)));
        s.latch_target(60.0, Some(period_to_frequency(214.0)));
        assert!((s.current_period.unwrap() - 428.0).abs() < 0.01);
        assert!((s.target_period.unwrap() - 214.0).abs() < 0.01);
        assert_eq!(s.target_midi, 60.0);
    }

    #[test]
    fn reset_for_note_clears_transients() {
        let mut s = state();
        s.vibrato.phase = 13;
        s.tremolo.phase = 7;
        s.arp_tick = 2;
        s.retrigger_tick = 3;
        s.note_cut_tick = 4;
        s.note_delay_tick = 2;
        s.delayed_note = Some(DelayedNote {
            midi: 60.0,
            velocity: 64,
            frequency: None,
        });
        s.tone_porta_active = true;

        s.reset_for_note();

        assert_eq!(s.vibrato.phase, 0);
        assert_eq!(s.tremolo.phase, 0);
        assert_eq!(s.arp_tick, 0);
        assert_eq!(s.retrigger_tick, 0);
        assert_eq!(s.note_cut_tick, -1);
        assert_eq!(s.note_delay_tick, -1);
        assert!(s.delayed_note.is_none());
        assert!(!s.tone_porta_active);
    }

    #[test]
    fn reset_for_note_keeps_effect_memory() {
        let mut s = state();
        s.last_tone_porta = 0x40;
        s.last_vol_slide = 0x03;
        s.vibrato.speed = 6;
        s.reset_for_note();
        assert_eq!(s.last_tone_porta, 0x40);
        assert_eq!(s.last_vol_slide, 0x03);
        assert_eq!(s.vibrato.speed, 6);
    }

    #[test]
    fn volume_slide_clamps() {
        let mut s = state();
        s.volume = 0.95;
        s.vol_slide_mode = SlideMode::Normal;
        s.vol_slide_delta = 0.1;
        s.apply_volume_slide();
        assert_eq!(s.volume, 1.0);

        s.vol_slide_delta = -2.0;
        s.apply_volume_slide();
        assert_eq!(s.volume, 0.0);
    }

    #[test]
    fn fine_slide_is_not_reapplied_per_tick() {
        let mut s = state();
        s.volume = 0.5;
        s.vol_slide_mode = SlideMode::Fine;
        s.vol_slide_delta = 0.1;
        assert!(!s.apply_volume_slide());
        assert_eq!(s.volume, 0.5);
    }

    #[test]
    fn period_helpers_match_tables() {
        // sanity: the pitch helpers agree with the period table
        assert_eq!(midi_to_period(48), 428);
    }
}
