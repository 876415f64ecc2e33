//! Per-tick effect evaluation.
//!
//! Two entry points drive a track's [`TrackEffectState`]: [`process_row_start`]
//! for the row's immediate (tick 0) actions and [`process_tick`] for ticks
//! `1..ticks_per_row`. Both mutate the state and return an ordered batch of
//! [`ProcessorCommand`]s. Unknown or malformed effects degrade to no-ops;
//! a tick-0 invocation always emits at least one `Pitch` command so
//! downstream schedulers see a pitch anchor every row.

use rt_ir::{
    arp_period, clamp_period, midi_to_frequency, midi_to_period, period_to_frequency,
    period_to_midi, semitone_ratio, EffectCommand, ProcessorCommand,
};

use crate::effect_state::{DelayedNote, SlideMode, SlideSource, TrackEffectState};
use crate::waveform::Waveform;

/// Inputs for the row's tick-0 invocation.
#[derive(Clone, Copy, Debug, Default)]
pub struct RowContext {
    /// New note for this row (MIDI)
    pub new_note: Option<f32>,
    /// New velocity (0-255)
    pub velocity: Option<u8>,
    /// Explicit frequency accompanying the note (MOD import path)
    pub note_frequency: Option<f32>,
    /// Pan override for this row
    pub pan: Option<f32>,
    /// Current ticks per row
    pub ticks_per_row: u8,
}

/// Process the row's immediate actions (tick 0).
pub fn process_row_start(
    state: &mut TrackEffectState,
    effect: Option<&EffectCommand>,
    ctx: &RowContext,
) -> Vec<ProcessorCommand> {
    let mut out = Vec::new();
    state.begin_row();

    // An EDx from the previous row that overflowed fires now, on an
    // otherwise empty row.
    if effect.is_none() && ctx.new_note.is_none() {
        if let Some(carried) = state.carry_delayed_note.take() {
            state.latch_note(carried.midi, carried.frequency);
            state.volume = carried.velocity as f32 / 255.0;
            out.push(ProcessorCommand::NoteOn {
                midi: carried.midi,
                velocity: carried.velocity,
                frequency: carried.frequency,
                pan: None,
            });
            out.push(ProcessorCommand::Pitch {
                frequency: state.current_frequency,
                glide: None,
            });
            out.push(ProcessorCommand::Volume {
                volume: state.volume,
                ramp: false,
            });
            return out;
        }
    }

    let tone_porta = effect.is_some_and(|e| e.is_tone_porta());
    let note_delay = matches!(effect, Some(EffectCommand::NoteDelay(_)));

    if let Some(midi) = ctx.new_note {
        if tone_porta {
            // A note beside 3xy/5xy only moves the glide target.
            state.latch_target(midi, ctx.note_frequency);
        } else if !note_delay {
            state.latch_note(midi, ctx.note_frequency);
            let velocity = ctx
                .velocity
                .unwrap_or_else(|| (state.volume * 255.0) as u8);
            out.push(ProcessorCommand::NoteOn {
                midi,
                velocity,
                frequency: ctx.note_frequency,
                pan: ctx.pan,
            });
        }
    }

    if let Some(velocity) = ctx.velocity {
        state.volume = velocity as f32 / 255.0;
    }
    if let Some(pan) = ctx.pan {
        state.pan = pan;
    }

    if let Some(effect) = effect {
        dispatch_row_start(state, effect, ctx, &mut out);
    }

    if !out.iter().any(|c| c.is_pitch()) {
        out.push(ProcessorCommand::Pitch {
            frequency: state.current_frequency,
            glide: None,
        });
    }
    out
}

/// Process one of the row's later ticks (`tick` in `1..ticks_per_row`).
pub fn process_tick(
    state: &mut TrackEffectState,
    effect: Option<&EffectCommand>,
    tick: u8,
    ticks_per_row: u8,
) -> Vec<ProcessorCommand> {
    let mut out = Vec::new();

    if state.note_cut_tick == tick as i16 {
        out.push(ProcessorCommand::NoteOff { midi: None });
        state.note_cut_tick = -1;
    }

    if state.note_delay_tick == tick as i16 {
        if let Some(delayed) = state.delayed_note.take() {
            state.latch_note(delayed.midi, delayed.frequency);
            state.volume = delayed.velocity as f32 / 255.0;
            out.push(ProcessorCommand::NoteOn {
                midi: delayed.midi,
                velocity: delayed.velocity,
                frequency: delayed.frequency,
                pan: None,
            });
        }
        state.note_delay_tick = -1;
    }

    let Some(effect) = effect else {
        // A tone portamento keeps gliding through effect-free rows.
        if state.tone_porta_active && state.tone_porta_speed > 0.0 && tone_porta_step(state) {
            out.push(pitch_command(state));
        }
        return out;
    };

    dispatch_tick(state, effect, tick, ticks_per_row, &mut out);
    out
}

fn dispatch_row_start(
    state: &mut TrackEffectState,
    effect: &EffectCommand,
    ctx: &RowContext,
    out: &mut Vec<ProcessorCommand>,
) {
    match *effect {
        EffectCommand::Arpeggio { x, y } => {
            state.arp_x = x;
            state.arp_y = y;
            state.arp_tick = 0;
            state.last_arpeggio = (x << 4) | y;
            out.push(pitch_command(state));
        }
        EffectCommand::PortaUp(param) => {
            if param > 0 {
                state.last_porta_up = param;
            }
            state.porta_speed = state.last_porta_up as f32;
        }
        EffectCommand::PortaDown(param) => {
            if param > 0 {
                state.last_porta_down = param;
            }
            state.porta_speed = -(state.last_porta_down as f32);
        }
        EffectCommand::TonePorta(param) => {
            start_tone_porta(state, param);
            // One step on tick 0 so slides don't stop one step short
            if tone_porta_step(state) {
                out.push(pitch_command(state));
            }
        }
        EffectCommand::TonePortaVolSlide { up, down } => {
            start_tone_porta(state, 0);
            prime_volume_slide(state, up, down, 64.0, SlideSource::TonePorta);
            if tone_porta_step(state) {
                out.push(pitch_command(state));
            }
        }
        EffectCommand::Vibrato { speed, depth } => {
            state.vibrato.update(speed, depth);
            state.last_vibrato = (state.vibrato.speed << 4) | state.vibrato.depth;
        }
        EffectCommand::VibratoVolSlide { up, down } => {
            prime_volume_slide(state, up, down, 64.0, SlideSource::Vibrato);
        }
        EffectCommand::Tremolo { speed, depth } => {
            state.tremolo.update(speed, depth);
            state.last_tremolo = (state.tremolo.speed << 4) | state.tremolo.depth;
        }
        EffectCommand::SetPan(param) => {
            state.pan = (param as f32 - 128.0) / 128.0;
            out.push(ProcessorCommand::Pan { pan: state.pan });
        }
        EffectCommand::SampleOffset(param) => {
            out.push(ProcessorCommand::SampleOffset {
                offset: param as f32 / 255.0,
            });
        }
        EffectCommand::VolumeSlide { up, down } => {
            prime_volume_slide(state, up, down, 128.0, SlideSource::VolumeSlide);
            // Starting anchor for the per-tick slide
            out.push(ProcessorCommand::Volume {
                volume: state.volume,
                ramp: false,
            });
        }
        EffectCommand::SetVolume(param) => {
            state.volume = (param as f32 / 64.0).min(1.0);
            out.push(ProcessorCommand::Volume {
                volume: state.volume,
                ramp: false,
            });
        }
        EffectCommand::FinePortaUp(step) => {
            let ratio = semitone_ratio(step as f32 / 16.0);
            state.set_frequency(state.current_frequency * ratio);
            state.set_target_frequency(state.target_frequency * ratio);
            out.push(pitch_command(state));
        }
        EffectCommand::FinePortaDown(step) => {
            let ratio = semitone_ratio(-(step as f32) / 16.0);
            state.set_frequency(state.current_frequency * ratio);
            state.set_target_frequency(state.target_frequency * ratio);
            out.push(pitch_command(state));
        }
        EffectCommand::GlissandoControl(enabled) => {
            state.glissando = enabled;
        }
        EffectCommand::SetVibratoWaveform(param) => {
            state.vibrato.waveform = Waveform::from_param(param);
        }
        EffectCommand::SetTremoloWaveform(param) => {
            state.tremolo.waveform = Waveform::from_param(param);
        }
        EffectCommand::SetFinetune(steps) => {
            let ratio = semitone_ratio(steps as f32 / 8.0);
            state.set_frequency(state.current_frequency * ratio);
            state.set_target_frequency(state.target_frequency * ratio);
            out.push(pitch_command(state));
        }
        EffectCommand::RetriggerNote(interval) => {
            state.retrigger_interval = interval;
            state.retrigger_vol_change = 0;
        }
        EffectCommand::FineVolumeSlideUp(step) => {
            state.volume = (state.volume + step as f32 / 64.0).clamp(0.0, 1.0);
            state.vol_slide_mode = SlideMode::Fine;
            out.push(ProcessorCommand::Volume {
                volume: state.volume,
                ramp: false,
            });
        }
        EffectCommand::FineVolumeSlideDown(step) => {
            state.volume = (state.volume - step as f32 / 64.0).clamp(0.0, 1.0);
            state.vol_slide_mode = SlideMode::Fine;
            out.push(ProcessorCommand::Volume {
                volume: state.volume,
                ramp: false,
            });
        }
        EffectCommand::NoteCut(tick) => {
            if tick == 0 {
                out.push(ProcessorCommand::NoteOff { midi: None });
            } else {
                state.note_cut_tick = tick as i16;
            }
        }
        EffectCommand::NoteDelay(tick) => {
            if let Some(midi) = ctx.new_note {
                let velocity = ctx
                    .velocity
                    .unwrap_or_else(|| (state.volume * 255.0) as u8);
                let delayed = DelayedNote {
                    midi,
                    velocity,
                    frequency: ctx.note_frequency,
                };
                if tick >= ctx.ticks_per_row {
                    // ProTracker overflow quirk: the note fires at tick 0
                    // of the next row instead of being dropped.
                    state.carry_delayed_note = Some(delayed);
                } else {
                    state.note_delay_tick = tick as i16;
                    state.delayed_note = Some(delayed);
                }
            }
        }
        EffectCommand::KeyOff(tick) => {
            if tick == 0 {
                out.push(ProcessorCommand::NoteOff { midi: None });
            }
        }
        EffectCommand::PanSlide { right, left } => {
            if right > 0 {
                state.pan_slide_speed = right as f32 / 64.0;
            } else if left > 0 {
                state.pan_slide_speed = -(left as f32) / 64.0;
            }
        }
        EffectCommand::Retrigger {
            vol_change,
            interval,
        } => {
            state.retrigger_interval = interval;
            state.retrigger_vol_change = vol_change;
        }
        // Flow control is consumed by the scheduler's first pass; tremor
        // only acts on later ticks.
        EffectCommand::Tremor { .. }
        | EffectCommand::PositionJump(_)
        | EffectCommand::PatternBreak(_)
        | EffectCommand::PatternLoop(_)
        | EffectCommand::PatternDelay(_)
        | EffectCommand::SetSpeed(_)
        | EffectCommand::SetTempo(_)
        | EffectCommand::SetGlobalVolume(_)
        | EffectCommand::GlobalVolumeSlide { .. } => {}
        EffectCommand::FineVibrato { speed, depth } => {
            state.vibrato.update(speed, depth);
            state.last_vibrato = (state.vibrato.speed << 4) | state.vibrato.depth;
        }
    }
}

fn dispatch_tick(
    state: &mut TrackEffectState,
    effect: &EffectCommand,
    tick: u8,
    _ticks_per_row: u8,
    out: &mut Vec<ProcessorCommand>,
) {
    match *effect {
        EffectCommand::Arpeggio { .. } => {
            state.arp_tick = (state.arp_tick + 1) % 3;
            let offset = match state.arp_tick {
                1 => state.arp_x,
                2 => state.arp_y,
                _ => 0,
            };
            let frequency = match state.current_period {
                Some(period) => period_to_frequency(arp_period(period, offset)),
                None => state.current_frequency * semitone_ratio(offset as f32),
            };
            out.push(ProcessorCommand::Pitch {
                frequency,
                glide: None,
            });
        }
        EffectCommand::PortaUp(_) | EffectCommand::PortaDown(_) => {
            porta_step(state);
            out.push(pitch_command(state));
        }
        EffectCommand::TonePorta(_) => {
            if tone_porta_step(state) {
                out.push(pitch_command(state));
            }
        }
        EffectCommand::TonePortaVolSlide { .. } => {
            if tone_porta_step(state) {
                out.push(pitch_command(state));
            }
            if state.apply_volume_slide() {
                out.push(ProcessorCommand::Volume {
                    volume: state.volume,
                    ramp: false,
                });
            }
        }
        EffectCommand::Vibrato { .. } => {
            out.push(vibrato_pitch(state, 1.0));
        }
        EffectCommand::FineVibrato { .. } => {
            out.push(vibrato_pitch(state, 0.25));
        }
        EffectCommand::VibratoVolSlide { .. } => {
            out.push(vibrato_pitch(state, 1.0));
            if state.apply_volume_slide() {
                out.push(ProcessorCommand::Volume {
                    volume: state.volume,
                    ramp: false,
                });
            }
        }
        EffectCommand::Tremolo { .. } => {
            let depth = state.tremolo.depth as f32;
            let wave = {
                let mut osc = state.tremolo;
                let v = osc.tick(&mut state.rng);
                state.tremolo = osc;
                v
            };
            let volume = (state.volume + wave * depth / 64.0).clamp(0.0, 1.0);
            out.push(ProcessorCommand::Volume {
                volume,
                ramp: false,
            });
        }
        EffectCommand::VolumeSlide { .. } => {
            if state.apply_volume_slide() {
                out.push(ProcessorCommand::Volume {
                    volume: state.volume,
                    ramp: false,
                });
            }
        }
        EffectCommand::KeyOff(key_tick) => {
            if tick == key_tick {
                out.push(ProcessorCommand::NoteOff { midi: None });
            }
        }
        EffectCommand::PanSlide { .. } => {
            state.pan = (state.pan + state.pan_slide_speed).clamp(-1.0, 1.0);
            out.push(ProcessorCommand::Pan { pan: state.pan });
        }
        EffectCommand::Retrigger { .. } | EffectCommand::RetriggerNote(_) => {
            if state.retrigger_interval > 0 {
                state.retrigger_tick += 1;
                if state.retrigger_tick >= state.retrigger_interval {
                    state.retrigger_tick = 0;
                    state.volume = retrig_volume(state.volume, state.retrigger_vol_change);
                    out.push(ProcessorCommand::Retrigger {
                        midi: state.current_midi,
                        velocity: (state.volume * 255.0) as u8,
                    });
                }
            }
        }
        EffectCommand::Tremor { on, off } => {
            let cycle = tick % (on + off + 2);
            let volume = if cycle <= on { state.volume } else { 0.0 };
            out.push(ProcessorCommand::Volume {
                volume,
                ramp: false,
            });
        }
        // Row-only and flow effects do nothing on later ticks
        _ => {}
    }
}

/// Resolve the tone portamento speed (memory on zero) and activate it.
fn start_tone_porta(state: &mut TrackEffectState, param: u8) {
    if param > 0 {
        state.last_tone_porta = param;
    }
    state.tone_porta_speed = state.last_tone_porta as f32;
    state.tone_porta_active = true;
}

/// Prime the per-row volume slide accumulator, falling back to memory when
/// both nibbles are zero.
fn prime_volume_slide(
    state: &mut TrackEffectState,
    up: u8,
    down: u8,
    scale: f32,
    source: SlideSource,
) {
    let (up, down) = if up == 0 && down == 0 {
        ((state.last_vol_slide >> 4) & 0x0F, state.last_vol_slide & 0x0F)
    } else {
        state.last_vol_slide = (up << 4) | down;
        (up, down)
    };
    state.vol_slide_delta = if up > 0 {
        up as f32 / scale
    } else {
        -(down as f32) / scale
    };
    state.vol_slide_mode = SlideMode::Normal;
    state.vol_slide_source = source;
}

/// One 1xx/2xx step: additive in period mode, ratio otherwise.
fn porta_step(state: &mut TrackEffectState) {
    match state.current_period {
        Some(period) => {
            let next = clamp_period(period - state.porta_speed);
            state.set_period(next);
        }
        None => {
            let ratio = semitone_ratio(state.porta_speed / 16.0);
            let next = state.current_frequency * ratio;
            state.set_frequency(next);
        }
    }
}

/// One tone-portamento step toward the target. Returns true if the pitch
/// moved. Snaps exactly on arrival and clears the active flag; the slide
/// never crosses its target.
fn tone_porta_step(state: &mut TrackEffectState) -> bool {
    if !state.tone_porta_active || state.tone_porta_speed <= 0.0 {
        return false;
    }
    match (state.current_period, state.target_period) {
        (Some(current), Some(target)) => {
            if (current - target).abs() < f32::EPSILON {
                state.tone_porta_active = false;
                return false;
            }
            let next = if target > current {
                (current + state.tone_porta_speed).min(target)
            } else {
                (current - state.tone_porta_speed).max(target)
            };
            if (next - target).abs() < f32::EPSILON {
                state.tone_porta_active = false;
                state.current_midi = state.target_midi;
            }
            state.set_period(next);
            true
        }
        _ => {
            let current = state.current_frequency;
            let target = state.target_frequency;
            if current <= 0.0 || (current - target).abs() < 1e-4 {
                state.tone_porta_active = false;
                return false;
            }
            let ratio = semitone_ratio(state.tone_porta_speed / 16.0);
            let next = if target > current {
                (current * ratio).min(target)
            } else {
                (current / ratio).max(target)
            };
            if (next - target).abs() < 1e-4 {
                state.tone_porta_active = false;
                state.current_midi = state.target_midi;
                state.set_frequency(target);
            } else {
                state.set_frequency(next);
            }
            true
        }
    }
}

/// The frequency to put on the wire: the glissando flag quantizes a
/// sliding pitch to the nearest semitone without touching the slide state.
fn emitted_frequency(state: &TrackEffectState) -> f32 {
    if !state.glissando || !state.tone_porta_active {
        return state.current_frequency;
    }
    match state.current_period {
        Some(period) => {
            let note = period_to_midi(period as u16);
            period_to_frequency(midi_to_period(note) as f32)
        }
        None => {
            let midi = 69.0 + 12.0 * libm::log2f(state.current_frequency / 440.0);
            midi_to_frequency(libm::roundf(midi))
        }
    }
}

fn pitch_command(state: &TrackEffectState) -> ProcessorCommand {
    ProcessorCommand::Pitch {
        frequency: emitted_frequency(state),
        glide: None,
    }
}

fn vibrato_pitch(state: &mut TrackEffectState, depth_scale: f32) -> ProcessorCommand {
    let depth = state.vibrato.depth as f32 * depth_scale;
    let wave = {
        let mut osc = state.vibrato;
        let v = osc.tick(&mut state.rng);
        state.vibrato = osc;
        v
    };
    let semitones = wave * depth / 16.0;
    ProcessorCommand::Pitch {
        frequency: state.current_frequency * semitone_ratio(semitones),
        glide: None,
    }
}

/// Rxy volume table.
fn retrig_volume(volume: f32, change: u8) -> f32 {
    const STEPS: [f32; 5] = [1.0, 2.0, 4.0, 8.0, 16.0];
    let next = match change {
        1..=5 => volume - STEPS[change as usize - 1] / 64.0,
        6 => volume * 2.0 / 3.0,
        7 => volume * 0.5,
        9..=13 => volume + STEPS[change as usize - 9] / 64.0,
        14 => volume * 1.5,
        15 => volume * 2.0,
        _ => volume,
    };
    next.clamp(0.0, 1.0)
}
