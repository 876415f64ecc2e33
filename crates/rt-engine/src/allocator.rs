//! Voice allocation across a pool of synthesis engines.
//!
//! Engines expose a fixed window of voices with an identical parameter
//! namespace. Instruments own contiguous voice slices inside a single
//! engine (allocations never cross engine boundaries); the pool grows by
//! one engine when no span fits and compacts engines that empty out.
//!
//! The allocator also enforces classic-tracker mono-per-channel behavior:
//! before a note-on, the previous voice on that track is gated off at
//! least one processing quantum earlier.

use std::collections::HashMap;

use heapless::Deque;
use slotmap::SlotMap;
use tracing::{debug, warn};

use rt_ir::{midi_to_frequency, GlideKind, ProcessorCommand};

use crate::renderer::{EngineKey, VoiceParam, VoiceRenderer};

/// Voices provided by every engine.
pub const VOICES_PER_ENGINE: u8 = 8;

/// Bounded back-pressure FIFO; oldest entries drop when full.
const PENDING_CAPACITY: usize = 2048;

/// Exponential ramps cannot reach zero; clamp targets away from it.
const MIN_EXP_FREQUENCY: f32 = 1e-4;

/// Voice occupancy bitmask for one engine.
#[derive(Default)]
struct Engine {
    used: u8,
}

impl Engine {
    fn find_span(&self, count: u8) -> Option<u8> {
        if count == 0 || count > VOICES_PER_ENGINE {
            return None;
        }
        let mask = (1u16 << count) - 1;
        (0..=VOICES_PER_ENGINE - count).find(|&start| (self.used as u16 >> start) & mask == 0)
    }

    fn occupy(&mut self, start: u8, count: u8) {
        self.used |= ((((1u16 << count) - 1) << start) & 0xFF) as u8;
    }

    fn release(&mut self, start: u8, count: u8) {
        self.used &= !(((((1u16 << count) - 1) << start) & 0xFF) as u8);
    }

    fn is_empty(&self) -> bool {
        self.used == 0
    }
}

/// A contiguous run of voices inside one engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoiceSlice {
    pub engine: EngineKey,
    pub start: u8,
    pub count: u8,
}

/// Per-instrument voice table.
struct InstrumentVoices {
    slice: VoiceSlice,
    ready: bool,
    glide: bool,
    max_release: f64,
    /// Sounding note per local voice (rounded MIDI)
    voice_note: Vec<Option<i16>>,
    voice_last_used: Vec<f64>,
    /// 0.0 = not released
    voice_release: Vec<f64>,
    active_notes: HashMap<i16, Vec<u8>>,
    round_robin: u8,
}

impl InstrumentVoices {
    fn new(slice: VoiceSlice, glide: bool, max_release: f64) -> Self {
        let n = slice.count as usize;
        Self {
            slice,
            ready: true,
            glide,
            max_release,
            voice_note: vec![None; n],
            voice_last_used: vec![0.0; n],
            voice_release: vec![0.0; n],
            active_notes: HashMap::new(),
            round_robin: 0,
        }
    }

    fn abs_voice(&self, local: u8) -> u8 {
        self.slice.start + local
    }

    /// Free voice starting at the round-robin cursor; a released voice
    /// only counts as free once its release tail has run out.
    fn find_free(&self, now: f64) -> Option<u8> {
        let count = self.slice.count;
        (0..count)
            .map(|i| (self.round_robin + i) % count)
            .find(|&v| {
                self.voice_note[v as usize].is_none()
                    && (self.voice_release[v as usize] == 0.0
                        || now - self.voice_release[v as usize] >= self.max_release)
            })
    }

    /// Steal the voice used longest ago.
    fn steal(&self) -> u8 {
        (0..self.slice.count)
            .min_by(|&a, &b| {
                self.voice_last_used[a as usize]
                    .total_cmp(&self.voice_last_used[b as usize])
            })
            .unwrap_or(0)
    }

    fn unmap(&mut self, local: u8) {
        if let Some(note) = self.voice_note[local as usize].take() {
            if let Some(list) = self.active_notes.get_mut(&note) {
                list.retain(|&v| v != local);
            }
        }
    }
}

/// A command waiting for its instrument or the audio context.
struct PendingCommand {
    track: u8,
    instrument: u8,
    command: ProcessorCommand,
}

/// Routes processor commands onto engine voices.
pub struct VoiceAllocator<R: VoiceRenderer> {
    renderer: R,
    engines: SlotMap<EngineKey, Engine>,
    instruments: HashMap<u8, InstrumentVoices>,
    /// track -> [(instrument, local voice)] currently sounding
    track_voices: HashMap<u8, Vec<(u8, u8)>>,
    pending: Deque<PendingCommand, PENDING_CAPACITY>,
    suspended: bool,
    quantum: f64,
}

impl<R: VoiceRenderer> VoiceAllocator<R> {
    pub fn new(renderer: R, quantum: f64) -> Self {
        Self {
            renderer,
            engines: SlotMap::with_key(),
            instruments: HashMap::new(),
            track_voices: HashMap::new(),
            pending: Deque::new(),
            suspended: false,
            quantum,
        }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    /// Register an instrument and carve out its voice slice.
    pub fn add_instrument(&mut self, id: u8, voice_count: u8, glide: bool, max_release: f64) {
        let count = voice_count.clamp(1, VOICES_PER_ENGINE);
        let slice = self.allocate_slice(count);
        self.instruments
            .insert(id, InstrumentVoices::new(slice, glide, max_release));
    }

    /// Release an instrument's slice; empty engines are compacted away.
    pub fn remove_instrument(&mut self, id: u8) {
        let Some(inst) = self.instruments.remove(&id) else {
            return;
        };
        let slice = inst.slice;
        if let Some(engine) = self.engines.get_mut(slice.engine) {
            engine.release(slice.start, slice.count);
            if engine.is_empty() {
                self.engines.remove(slice.engine);
                self.renderer.destroy_engine(slice.engine);
            }
        }
        for voices in self.track_voices.values_mut() {
            voices.retain(|&(inst_id, _)| inst_id != id);
        }
    }

    /// The slice an instrument occupies (for hosts wiring up DSP nodes).
    pub fn instrument_slice(&self, id: u8) -> Option<VoiceSlice> {
        self.instruments.get(&id).map(|i| i.slice)
    }

    /// Mark an instrument as still loading; its commands queue up.
    pub fn set_instrument_loading(&mut self, id: u8) {
        if let Some(inst) = self.instruments.get_mut(&id) {
            inst.ready = false;
        }
    }

    /// Mark an instrument ready and replay its queued commands,
    /// time-shifted to `now + quantum`.
    pub fn set_instrument_ready(&mut self, id: u8, now: f64) {
        if let Some(inst) = self.instruments.get_mut(&id) {
            inst.ready = true;
        }
        self.flush_pending(now);
    }

    /// Suspend or resume command delivery (audio context state).
    pub fn set_suspended(&mut self, suspended: bool, now: f64) {
        self.suspended = suspended;
        if !suspended {
            self.flush_pending(now);
        }
    }

    /// Route one processor command for `(track, instrument)` at `time`.
    pub fn apply(
        &mut self,
        track: u8,
        instrument: u8,
        time: f64,
        command: ProcessorCommand,
        now: f64,
    ) {
        let ready = match self.instruments.get(&instrument) {
            Some(inst) => inst.ready,
            None => {
                debug!(instrument, "command for unknown instrument dropped");
                return;
            }
        };
        if self.suspended || !ready {
            self.enqueue(PendingCommand {
                track,
                instrument,
                command,
            });
            return;
        }
        self.dispatch(track, instrument, time, command, now);
    }

    /// Force every voice silent and clear the sounding-note tables.
    pub fn all_off(&mut self) {
        self.renderer.all_notes_off();
        for inst in self.instruments.values_mut() {
            for v in &mut inst.voice_note {
                *v = None;
            }
            for r in &mut inst.voice_release {
                *r = 0.0;
            }
            inst.active_notes.clear();
        }
        self.track_voices.clear();
    }

    /// Bulk-cancel scheduled automation and drop queued commands.
    pub fn cancel_scheduled(&mut self) {
        self.renderer.cancel_scheduled_notes();
        self.pending.clear();
    }

    /// Bank-wide output gain.
    pub fn set_master_gain(&mut self, value: f32, time: f64) {
        self.renderer.set_master_gain(value, time);
    }

    // --- internals ---

    fn allocate_slice(&mut self, count: u8) -> VoiceSlice {
        for (key, engine) in self.engines.iter_mut() {
            if let Some(start) = engine.find_span(count) {
                engine.occupy(start, count);
                return VoiceSlice {
                    engine: key,
                    start,
                    count,
                };
            }
        }
        let key = self.engines.insert(Engine::default());
        self.renderer.create_engine(key, VOICES_PER_ENGINE);
        let engine = self.engines.get_mut(key).expect("just inserted");
        engine.occupy(0, count);
        VoiceSlice {
            engine: key,
            start: 0,
            count,
        }
    }

    fn enqueue(&mut self, entry: PendingCommand) {
        if let Err(entry) = self.pending.push_back(entry) {
            warn!("pending command queue full, dropping oldest entry");
            self.pending.pop_front();
            let _ = self.pending.push_back(entry);
        }
    }

    fn flush_pending(&mut self, now: f64) {
        if self.suspended {
            return;
        }
        let mut requeue = Vec::new();
        let replay_time = now + self.quantum;
        while let Some(entry) = self.pending.pop_front() {
            let ready = self
                .instruments
                .get(&entry.instrument)
                .is_some_and(|i| i.ready);
            if ready {
                self.dispatch(
                    entry.track,
                    entry.instrument,
                    replay_time,
                    entry.command,
                    now,
                );
            } else {
                requeue.push(entry);
            }
        }
        for entry in requeue {
            let _ = self.pending.push_back(entry);
        }
    }

    fn dispatch(
        &mut self,
        track: u8,
        instrument: u8,
        time: f64,
        command: ProcessorCommand,
        now: f64,
    ) {
        match command {
            ProcessorCommand::NoteOn {
                midi,
                velocity,
                frequency,
                pan,
            } => {
                self.note_on(track, instrument, midi, velocity, frequency, pan, time, now, false);
            }
            ProcessorCommand::Retrigger { midi, velocity } => {
                self.note_on(track, instrument, midi, velocity, None, None, time, now, true);
            }
            ProcessorCommand::NoteOff { midi } => self.note_off(track, instrument, midi, time),
            ProcessorCommand::Pitch { frequency, glide } => {
                let Some((engine, voice)) = self.current_voice(track, instrument) else {
                    return;
                };
                match glide {
                    None => self.renderer.set_value_at_time(
                        engine,
                        voice,
                        VoiceParam::Frequency,
                        frequency,
                        time,
                    ),
                    Some(GlideKind::Linear) => self.renderer.linear_ramp_to_value_at_time(
                        engine,
                        voice,
                        VoiceParam::Frequency,
                        frequency,
                        time,
                    ),
                    Some(GlideKind::Exponential) => self.renderer.exponential_ramp_to_value_at_time(
                        engine,
                        voice,
                        VoiceParam::Frequency,
                        frequency.max(MIN_EXP_FREQUENCY),
                        time,
                    ),
                }
            }
            ProcessorCommand::Volume { volume, ramp } => {
                let Some((engine, voice)) = self.current_voice(track, instrument) else {
                    return;
                };
                if ramp {
                    self.renderer.linear_ramp_to_value_at_time(
                        engine,
                        voice,
                        VoiceParam::Gain,
                        volume,
                        time,
                    );
                } else {
                    self.renderer
                        .set_value_at_time(engine, voice, VoiceParam::Gain, volume, time);
                }
            }
            ProcessorCommand::Pan { pan } => {
                let Some((engine, voice)) = self.current_voice(track, instrument) else {
                    return;
                };
                self.renderer
                    .set_value_at_time(engine, voice, VoiceParam::Pan, pan, time);
            }
            ProcessorCommand::SampleOffset { offset } => {
                let Some((engine, voice)) = self.current_voice(track, instrument) else {
                    return;
                };
                self.renderer
                    .set_value_at_time(engine, voice, VoiceParam::Macro(1), offset, time);
            }
        }
    }

    /// Most recent sounding voice for `(track, instrument)`.
    fn current_voice(&self, track: u8, instrument: u8) -> Option<(EngineKey, u8)> {
        let voices = self.track_voices.get(&track)?;
        let (_, local) = voices
            .iter()
            .rev()
            .find(|&&(inst_id, _)| inst_id == instrument)?;
        let inst = self.instruments.get(&instrument)?;
        Some((inst.slice.engine, inst.abs_voice(*local)))
    }

    #[allow(clippy::too_many_arguments)]
    fn note_on(
        &mut self,
        track: u8,
        instrument: u8,
        midi: f32,
        velocity: u8,
        frequency: Option<f32>,
        pan: Option<f32>,
        time: f64,
        now: f64,
        allow_duplicate: bool,
    ) {
        let gate_time = (time - self.quantum).max(0.0);
        self.gate_track_voices(track, Some(instrument), gate_time);

        let note_key = libm::roundf(midi) as i16;
        let Some(inst) = self.instruments.get_mut(&instrument) else {
            return;
        };

        // Glide patches with a single voice slide instead of retriggering.
        let held = self
            .track_voices
            .get(&track)
            .and_then(|v| v.iter().find(|&&(i, _)| i == instrument))
            .map(|&(_, local)| local);
        if let (true, Some(local)) = (inst.glide && inst.slice.count == 1, held) {
            inst.unmap(local);
            inst.voice_note[local as usize] = Some(note_key);
            inst.voice_last_used[local as usize] = now;
            inst.active_notes.entry(note_key).or_default().push(local);
            let engine = inst.slice.engine;
            let abs = inst.abs_voice(local);
            let freq = frequency.unwrap_or_else(|| midi_to_frequency(midi));
            self.renderer
                .set_value_at_time(engine, abs, VoiceParam::Frequency, freq, time);
            self.renderer.set_value_at_time(
                engine,
                abs,
                VoiceParam::Gain,
                velocity as f32 / 255.0,
                time,
            );
            return;
        }

        // Voice choice: same-note reuse, then round-robin free, then steal
        let mut pulse = false;
        let local = if !allow_duplicate {
            match inst
                .active_notes
                .get(&note_key)
                .and_then(|v| v.first().copied())
            {
                Some(v) => {
                    pulse = true;
                    v
                }
                None => match inst.find_free(now) {
                    Some(v) => v,
                    None => {
                        pulse = true;
                        inst.steal()
                    }
                },
            }
        } else {
            match inst.find_free(now) {
                Some(v) => v,
                None => {
                    pulse = true;
                    inst.steal()
                }
            }
        };

        inst.unmap(local);
        inst.voice_note[local as usize] = Some(note_key);
        inst.voice_last_used[local as usize] = now;
        inst.voice_release[local as usize] = 0.0;
        inst.active_notes.entry(note_key).or_default().push(local);
        inst.round_robin = (local + 1) % inst.slice.count;

        let engine = inst.slice.engine;
        let abs = inst.abs_voice(local);
        let freq = if allow_duplicate {
            // retrigger keeps the voice's current pitch
            None
        } else {
            Some(frequency.unwrap_or_else(|| midi_to_frequency(midi)))
        };

        // A reused voice may still be registered to another track
        for voices in self.track_voices.values_mut() {
            voices.retain(|&(i, v)| !(i == instrument && v == local));
        }
        self.track_voices
            .entry(track)
            .or_default()
            .push((instrument, local));

        if pulse {
            self.renderer
                .set_value_at_time(engine, abs, VoiceParam::Gate, 0.0, gate_time);
        }
        self.renderer
            .set_value_at_time(engine, abs, VoiceParam::Gate, 1.0, time);
        if let Some(freq) = freq {
            self.renderer
                .set_value_at_time(engine, abs, VoiceParam::Frequency, freq, time);
        }
        self.renderer.set_value_at_time(
            engine,
            abs,
            VoiceParam::Gain,
            velocity as f32 / 255.0,
            time,
        );
        if let Some(pan) = pan {
            self.renderer
                .set_value_at_time(engine, abs, VoiceParam::Pan, pan, time);
        }
    }

    fn note_off(&mut self, track: u8, instrument: u8, midi: Option<f32>, time: f64) {
        let Some(entries) = self.track_voices.get(&track).cloned() else {
            return;
        };
        let note_key = midi.map(|m| libm::roundf(m) as i16);
        let mut kept = Vec::new();
        for (inst_id, local) in entries {
            if inst_id != instrument {
                kept.push((inst_id, local));
                continue;
            }
            let Some(inst) = self.instruments.get_mut(&inst_id) else {
                continue;
            };
            if let Some(key) = note_key {
                if inst.voice_note[local as usize] != Some(key) {
                    kept.push((inst_id, local));
                    continue;
                }
            }
            inst.unmap(local);
            inst.voice_release[local as usize] = time;
            let engine = inst.slice.engine;
            let abs = inst.abs_voice(local);
            self.renderer
                .set_value_at_time(engine, abs, VoiceParam::Gate, 0.0, time);
        }
        self.track_voices.insert(track, kept);
    }

    /// Gate off everything sounding on `track` at `gate_time`, except a
    /// single-voice glide patch receiving the incoming note.
    fn gate_track_voices(&mut self, track: u8, incoming: Option<u8>, gate_time: f64) {
        let Some(entries) = self.track_voices.get(&track).cloned() else {
            return;
        };
        let mut kept = Vec::new();
        for (inst_id, local) in entries {
            let keep = incoming == Some(inst_id)
                && self
                    .instruments
                    .get(&inst_id)
                    .is_some_and(|i| i.glide && i.slice.count == 1);
            if keep {
                kept.push((inst_id, local));
                continue;
            }
            if let Some(inst) = self.instruments.get_mut(&inst_id) {
                inst.unmap(local);
                inst.voice_release[local as usize] = gate_time;
                let engine = inst.slice.engine;
                let abs = inst.abs_voice(local);
                self.renderer
                    .set_value_at_time(engine, abs, VoiceParam::Gate, 0.0, gate_time);
            }
        }
        self.track_voices.insert(track, kept);
    }
}
