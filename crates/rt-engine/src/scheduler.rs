//! Transport and look-ahead row scheduling.
//!
//! A single cooperative control task calls [`Scheduler::advance`] on a
//! frame callback or timer. Each call schedules every row whose start time
//! falls within the look-ahead window, translating tick-0 and per-tick
//! effect output into timestamped commands on the voice allocator, and
//! applies song flow (speed/tempo, jumps, breaks, pattern loop/delay,
//! global volume) at row boundaries.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, warn};

use rt_ir::{
    EffectCommand, GlideKind, PlaybackPosition, ProcessorCommand, Song, Step, TransportState,
};

use crate::allocator::VoiceAllocator;
use crate::effect_state::TrackEffectState;
use crate::import;
use crate::processor::{process_row_start, process_tick, RowContext};
use crate::renderer::{AudioClock, VoiceRenderer};

/// MOD power-on defaults.
pub const DEFAULT_BPM: u16 = 125;
pub const DEFAULT_SPEED: u8 = 6;

/// Rows later than this count as a scheduling miss.
const LATE_THRESHOLD: f64 = 0.020;
/// Lead applied when catching up after a miss.
const CATCHUP_LEAD: f64 = 0.010;
const FOREGROUND_LOOKAHEAD: f64 = 0.5;
const BACKGROUND_LOOKAHEAD: f64 = 1.0;
const LOOKAHEAD_WIDEN: f64 = 0.5;
/// Misses in a row before the window widens.
const LATE_STREAK_LIMIT: u32 = 3;
/// Runaway protection for a single pump.
const MAX_ROWS_PER_PUMP: u32 = 4096;
/// Voice-reuse guard for MOD instruments.
const DEFAULT_MAX_RELEASE: f64 = 0.05;

/// Events surfaced to the host.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    Position(PlaybackPosition),
    State(TransportState),
    Error(String),
}

#[derive(Default)]
struct PatternLoop {
    start: u16,
    count: u8,
    target: u8,
}

enum FlowCommand {
    PositionJump(u8),
    PatternBreak(u8),
}

/// Flow decisions collected from one row's first pass.
#[derive(Default)]
struct RowFlow {
    command: Option<FlowCommand>,
    delay_armed: bool,
    loop_requested: bool,
}

/// The playback transport.
pub struct Scheduler<C: AudioClock, R: VoiceRenderer> {
    clock: C,
    allocator: VoiceAllocator<R>,
    song: Option<Arc<Song>>,
    registered_instruments: Vec<u8>,

    state: TransportState,
    bpm: u16,
    speed: u8,
    sequence_index: usize,
    next_row: u16,
    next_row_time: f64,

    position_ref_time: f64,
    position_ref_rows: u64,
    last_position: PlaybackPosition,

    loop_song: bool,
    loop_pattern: bool,
    pattern_loop: PatternLoop,
    pattern_delay_remaining: u8,
    delaying_row: Option<u16>,
    global_volume: f32,

    track_states: Vec<TrackEffectState>,

    foreground: bool,
    lookahead_extra: f64,
    late_streak: u32,

    events: VecDeque<EngineEvent>,
}

impl<C: AudioClock, R: VoiceRenderer> Scheduler<C, R> {
    pub fn new(clock: C, renderer: R) -> Self {
        let quantum = clock.quantum();
        Self {
            clock,
            allocator: VoiceAllocator::new(renderer, quantum),
            song: None,
            registered_instruments: Vec::new(),
            state: TransportState::Stopped,
            bpm: DEFAULT_BPM,
            speed: DEFAULT_SPEED,
            sequence_index: 0,
            next_row: 0,
            next_row_time: 0.0,
            position_ref_time: 0.0,
            position_ref_rows: 0,
            last_position: PlaybackPosition::default(),
            loop_song: false,
            loop_pattern: false,
            pattern_loop: PatternLoop::default(),
            pattern_delay_remaining: 0,
            delaying_row: None,
            global_volume: 1.0,
            track_states: Vec::new(),
            foreground: true,
            lookahead_extra: 0.0,
            late_streak: 0,
            events: VecDeque::new(),
        }
    }

    // --- accessors ---

    pub fn transport(&self) -> TransportState {
        self.state
    }

    pub fn position(&self) -> PlaybackPosition {
        self.last_position
    }

    pub fn bpm(&self) -> u16 {
        self.bpm
    }

    pub fn speed(&self) -> u8 {
        self.speed
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn renderer(&self) -> &R {
        self.allocator.renderer()
    }

    pub fn allocator_mut(&mut self) -> &mut VoiceAllocator<R> {
        &mut self.allocator
    }

    /// Drain queued host events.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.events.drain(..).collect()
    }

    // --- control surface ---

    /// Install a song and prime playback at `start_index`.
    pub fn load_song(&mut self, song: Arc<Song>, start_index: usize) {
        self.stop();
        for id in self.registered_instruments.drain(..) {
            self.allocator.remove_instrument(id);
        }
        self.track_states = (0..song.channels)
            .map(|track| {
                let mut state = TrackEffectState::new(track as u64);
                state.pan = import::default_pan(track);
                state
            })
            .collect();
        for (index, sample) in song.samples.iter().enumerate() {
            if sample.is_empty() {
                continue;
            }
            let id = index as u8 + 1;
            self.allocator
                .add_instrument(id, 1, false, DEFAULT_MAX_RELEASE);
            self.registered_instruments.push(id);
        }
        self.bpm = DEFAULT_BPM;
        self.speed = DEFAULT_SPEED;
        self.sequence_index = start_index.min(song.sequence.len().saturating_sub(1));
        self.next_row = 0;
        self.global_volume = 1.0;
        self.last_position = PlaybackPosition {
            row: 0,
            pattern: song.sequence.get(self.sequence_index).copied(),
            sequence_index: self.sequence_index,
        };
        self.song = Some(song);
    }

    /// Start or resume playback. No-op when already playing.
    pub fn play(&mut self) {
        if self.state == TransportState::Playing || self.song.is_none() {
            return;
        }
        let resuming = self.state == TransportState::Paused;
        if !self.clock.is_running() {
            self.clock.resume();
        }
        let now = self.clock.current_time();
        self.state = TransportState::Playing;
        self.next_row_time = now;
        self.position_ref_time = now;
        self.position_ref_rows = self.global_rows_at(self.sequence_index, self.next_row);
        self.push_event(EngineEvent::State(TransportState::Playing));
        if resuming {
            self.push_event(EngineEvent::Position(self.last_position));
        }
    }

    /// Pause, keeping all effect state. No-op when not playing.
    pub fn pause(&mut self) {
        if self.state != TransportState::Playing {
            return;
        }
        self.state = TransportState::Paused;
        self.push_event(EngineEvent::State(TransportState::Paused));
    }

    /// Stop, cancel everything scheduled, and clear effect state. The
    /// position is left intact. No-op when already stopped.
    pub fn stop(&mut self) {
        if self.state == TransportState::Stopped {
            return;
        }
        self.state = TransportState::Stopped;
        self.allocator.cancel_scheduled();
        self.allocator.all_off();
        for (track, state) in self.track_states.iter_mut().enumerate() {
            *state = TrackEffectState::new(track as u64);
            state.pan = import::default_pan(track as u8);
        }
        self.pattern_loop = PatternLoop::default();
        self.pattern_delay_remaining = 0;
        self.delaying_row = None;
        self.push_event(EngineEvent::State(TransportState::Stopped));
    }

    /// Jump to a row of the current pattern.
    pub fn seek(&mut self, row: u16) {
        let Some(song) = self.song.clone() else {
            return;
        };
        let rows = song
            .pattern_at(self.sequence_index)
            .map_or(64, |p| p.rows);
        self.next_row = row.min(rows.saturating_sub(1));
        let now = self.clock.current_time();
        self.next_row_time = now;
        self.position_ref_time = now;
        self.position_ref_rows = self.global_rows_at(self.sequence_index, self.next_row);
        self.last_position.row = self.next_row;
        self.push_event(EngineEvent::Position(self.last_position));
    }

    pub fn set_bpm(&mut self, bpm: u16) {
        self.bpm = bpm.clamp(32, 255);
    }

    pub fn set_loop_song(&mut self, enabled: bool) {
        self.loop_song = enabled;
    }

    pub fn set_loop_pattern(&mut self, enabled: bool) {
        self.loop_pattern = enabled;
    }

    /// Host visibility: background hosts get a wider look-ahead.
    pub fn set_foreground(&mut self, foreground: bool) {
        self.foreground = foreground;
    }

    // --- scheduling loop ---

    /// Schedule all rows due within the look-ahead window and refresh the
    /// reported position. Called from the host's frame callback or timer.
    pub fn advance(&mut self) {
        let Some(song) = self.song.clone() else {
            return;
        };
        if self.state != TransportState::Playing {
            return;
        }
        let now = self.clock.current_time();
        self.allocator.set_suspended(!self.clock.is_running(), now);

        let lookahead = self.lookahead();
        let mut scheduled = 0u32;
        while self.state == TransportState::Playing && self.next_row_time <= now + lookahead {
            self.schedule_row(&song);
            scheduled += 1;
            if scheduled >= MAX_ROWS_PER_PUMP {
                warn!(scheduled, "row scheduling runaway, yielding");
                break;
            }
        }
        self.update_position(now);
    }

    fn lookahead(&self) -> f64 {
        let base = if self.foreground {
            FOREGROUND_LOOKAHEAD
        } else {
            BACKGROUND_LOOKAHEAD
        };
        base + self.lookahead_extra
    }

    /// Seconds one row occupies at the current tempo, treating a beat as
    /// 4 rows at the nominal speed of 6.
    fn sec_per_row(&self) -> f64 {
        60.0 * self.speed as f64 / (self.bpm as f64 * 24.0)
    }

    fn schedule_row(&mut self, song: &Song) {
        let Some(pattern) = song.pattern_at(self.sequence_index) else {
            self.push_event(EngineEvent::Error(format!(
                "sequence entry {} has no pattern",
                self.sequence_index
            )));
            self.finish();
            return;
        };
        let row = self.next_row.min(pattern.rows.saturating_sub(1));
        let now = self.clock.current_time();

        let mut row_time = self.next_row_time;
        if row_time < now - LATE_THRESHOLD {
            self.late_streak += 1;
            warn!(
                behind_ms = ((now - row_time) * 1000.0) as i64,
                row, "row scheduled late, catching up"
            );
            if self.late_streak >= LATE_STREAK_LIMIT {
                self.lookahead_extra += LOOKAHEAD_WIDEN;
                self.late_streak = 0;
                debug!(extra = self.lookahead_extra, "look-ahead widened");
            }
            row_time = now + CATCHUP_LEAD;
            self.next_row_time = row_time;
        } else {
            self.late_streak = 0;
        }

        let steps: Vec<Step> = (0..pattern.channels)
            .map(|ch| import::cell_to_step(pattern.cell(row, ch), row, &song.samples))
            .collect();

        // First pass: tempo and song flow
        let mut flow = RowFlow::default();
        for step in &steps {
            self.apply_step_flow(step, row, row_time, &mut flow);
        }

        let ticks_per_row = self.speed.max(1);
        let sec_per_tick = self.sec_per_row() / ticks_per_row as f64;

        // Second pass: per-track tick 0, then the row's later ticks
        for track in 0..pattern.channels as usize {
            self.schedule_track_row(
                track,
                &steps[track],
                row_time,
                ticks_per_row,
                sec_per_tick,
                now,
            );
        }

        // Flow takes effect at the end of the row
        let pattern_len = pattern.rows;
        if self.pattern_delay_remaining > 0 {
            self.pattern_delay_remaining -= 1;
            // replay the same row, flow skipped
        } else {
            self.delaying_row = None;
            if flow.loop_requested && self.pattern_loop.target > 0 {
                if self.pattern_loop.count < self.pattern_loop.target {
                    self.pattern_loop.count += 1;
                    self.next_row = self.pattern_loop.start;
                } else {
                    self.pattern_loop.target = 0;
                    self.pattern_loop.count = 0;
                    self.advance_flow(song, pattern_len, flow, now);
                }
            } else {
                self.advance_flow(song, pattern_len, flow, now);
            }
        }

        // Durations use the post-Fxx tempo from this row onward
        self.next_row_time += self.sec_per_row();
    }

    fn schedule_track_row(
        &mut self,
        track: usize,
        step: &Step,
        row_time: f64,
        ticks_per_row: u8,
        sec_per_tick: f64,
        now: f64,
    ) {
        let effect = step.effect;
        let effect_for_ticks = effect.filter(|e| !e.is_flow_control());

        let (commands, instrument, default_pan, needs_ticks) = {
            let state = &mut self.track_states[track];
            if step.is_empty() && state.carry_delayed_note.is_none() && !state.tone_porta_active {
                return;
            }
            if let Some(id) = step.instrument_id {
                state.instrument_id = Some(id);
            }
            let fresh_note = step.midi.is_some() && !effect.is_some_and(|e| e.is_tone_porta());
            if fresh_note {
                state.reset_for_note();
            }
            let ctx = RowContext {
                new_note: step.midi,
                velocity: step.velocity,
                note_frequency: step.frequency,
                pan: step.pan,
                ticks_per_row,
            };
            let mut commands = process_row_start(state, effect.as_ref(), &ctx);
            if step.note_off {
                commands.push(ProcessorCommand::NoteOff { midi: None });
            }
            let needs_ticks = effect_for_ticks.is_some()
                || state.tone_porta_active
                || state.note_cut_tick >= 0
                || state.note_delay_tick >= 0;
            (commands, state.instrument_id, state.pan, needs_ticks)
        };

        let Some(instrument) = instrument else {
            return;
        };
        for command in commands {
            let command = match command {
                ProcessorCommand::NoteOn {
                    midi,
                    velocity,
                    frequency,
                    pan,
                } => ProcessorCommand::NoteOn {
                    midi,
                    velocity,
                    frequency,
                    pan: pan.or(Some(default_pan)),
                },
                other => other,
            };
            self.allocator
                .apply(track as u8, instrument, row_time, command, now);
        }

        if !needs_ticks || ticks_per_row < 2 {
            return;
        }

        if effect_for_ticks.is_some_and(|e| e.is_rampable()) {
            // Audio-rate optimization: advance state through every tick
            // but emit a single ramp ending at the last tick.
            let mut final_pitch = None;
            let mut final_volume = None;
            for tick in 1..ticks_per_row {
                let tick_commands = {
                    let state = &mut self.track_states[track];
                    process_tick(state, effect_for_ticks.as_ref(), tick, ticks_per_row)
                };
                for command in tick_commands {
                    match command {
                        ProcessorCommand::Pitch { frequency, .. } => final_pitch = Some(frequency),
                        ProcessorCommand::Volume { volume, .. } => final_volume = Some(volume),
                        other => {
                            let time = row_time + tick as f64 * sec_per_tick;
                            self.allocator.apply(track as u8, instrument, time, other, now);
                        }
                    }
                }
            }
            let end_time = row_time + (ticks_per_row - 1) as f64 * sec_per_tick;
            if let Some(frequency) = final_pitch {
                self.allocator.apply(
                    track as u8,
                    instrument,
                    end_time,
                    ProcessorCommand::Pitch {
                        frequency,
                        glide: Some(GlideKind::Exponential),
                    },
                    now,
                );
            }
            if let Some(volume) = final_volume {
                self.allocator.apply(
                    track as u8,
                    instrument,
                    end_time,
                    ProcessorCommand::Volume { volume, ramp: true },
                    now,
                );
            }
        } else {
            for tick in 1..ticks_per_row {
                let tick_commands = {
                    let state = &mut self.track_states[track];
                    process_tick(state, effect_for_ticks.as_ref(), tick, ticks_per_row)
                };
                let time = row_time + tick as f64 * sec_per_tick;
                for command in tick_commands {
                    self.allocator.apply(track as u8, instrument, time, command, now);
                }
            }
        }
    }

    /// Apply one step's flow-control contribution (first pass).
    fn apply_step_flow(&mut self, step: &Step, row: u16, row_time: f64, flow: &mut RowFlow) {
        if let Some(speed) = step.speed {
            self.speed = speed.clamp(1, 31);
        }
        if let Some(tempo) = step.tempo {
            self.bpm = (tempo as u16).clamp(32, 255);
        }
        match step.effect {
            Some(EffectCommand::PositionJump(target)) => {
                flow.command = Some(FlowCommand::PositionJump(target));
            }
            Some(EffectCommand::PatternBreak(target)) => {
                // posJump wins over patBreak on the same row
                if !matches!(flow.command, Some(FlowCommand::PositionJump(_))) {
                    flow.command = Some(FlowCommand::PatternBreak(target));
                }
            }
            Some(EffectCommand::PatternLoop(count)) => {
                if count == 0 {
                    self.pattern_loop.start = row;
                } else {
                    flow.loop_requested = true;
                    if self.pattern_loop.target == 0 {
                        self.pattern_loop.target = count;
                        self.pattern_loop.count = 0;
                    }
                }
            }
            Some(EffectCommand::PatternDelay(rows)) => {
                flow.delay_armed = true;
                if self.delaying_row != Some(row) && rows > 0 {
                    self.pattern_delay_remaining = rows;
                    self.delaying_row = Some(row);
                }
            }
            Some(EffectCommand::SetGlobalVolume(volume)) => {
                self.global_volume = (volume as f32 / 64.0).min(1.0);
                self.allocator.set_master_gain(self.global_volume, row_time);
            }
            Some(EffectCommand::GlobalVolumeSlide { up, down }) => {
                self.global_volume =
                    (self.global_volume + up as f32 / 64.0 - down as f32 / 64.0).clamp(0.0, 1.0);
                self.allocator.set_master_gain(self.global_volume, row_time);
            }
            _ => {}
        }
    }

    fn advance_flow(&mut self, song: &Song, pattern_len: u16, flow: RowFlow, now: f64) {
        match flow.command {
            Some(FlowCommand::PositionJump(target)) => {
                self.sequence_index = target as usize;
                if self.sequence_index >= song.sequence.len() {
                    if self.loop_song {
                        self.sequence_index = 0;
                    } else {
                        self.finish();
                        return;
                    }
                }
                self.next_row = 0;
                self.pattern_loop = PatternLoop::default();
                // keep updatePosition consistent after the jump
                self.position_ref_time = now;
                self.position_ref_rows = self.global_rows_at(self.sequence_index, 0);
            }
            Some(FlowCommand::PatternBreak(target)) => {
                // ProTracker: a pattern delay on the same row shifts the
                // break target down one row
                let target = target as u16 + flow.delay_armed as u16;
                if !self.enter_next_sequence(song) {
                    return;
                }
                let rows = song
                    .pattern_at(self.sequence_index)
                    .map_or(64, |p| p.rows);
                self.next_row = target.min(rows.saturating_sub(1));
            }
            None => {
                if self.next_row + 1 >= pattern_len {
                    if self.loop_pattern {
                        self.next_row = 0;
                    } else if self.enter_next_sequence(song) {
                        self.next_row = 0;
                    }
                } else {
                    self.next_row += 1;
                }
            }
        }
    }

    /// Advance the sequence pointer, honoring loop-song. Returns false if
    /// the song ended.
    fn enter_next_sequence(&mut self, song: &Song) -> bool {
        self.sequence_index += 1;
        self.pattern_loop = PatternLoop::default();
        if self.sequence_index >= song.sequence.len() {
            if self.loop_song {
                self.sequence_index = 0;
            } else {
                self.finish();
                return false;
            }
        }
        true
    }

    /// Song ran out: stop advancing but let scheduled audio play out.
    fn finish(&mut self) {
        self.state = TransportState::Stopped;
        self.push_event(EngineEvent::State(TransportState::Stopped));
    }

    /// Global row index of `(sequence_index, row)`.
    fn global_rows_at(&self, sequence_index: usize, row: u16) -> u64 {
        let Some(song) = &self.song else {
            return 0;
        };
        let mut rows = 0u64;
        for (i, &pat_idx) in song.sequence.iter().enumerate() {
            if i >= sequence_index {
                break;
            }
            rows += song
                .patterns
                .get(pat_idx as usize)
                .map_or(0, |p| p.rows as u64);
        }
        rows + row as u64
    }

    /// Derive the audible position from elapsed audio time and emit a
    /// `position` event when it changes.
    fn update_position(&mut self, now: f64) {
        let Some(song) = self.song.clone() else {
            return;
        };
        let total = song.sequence_rows();
        if total == 0 {
            return;
        }
        let elapsed = (now - self.position_ref_time).max(0.0);
        let mut global = self.position_ref_rows + (elapsed / self.sec_per_row()) as u64;
        if global >= total {
            if self.loop_song {
                global %= total;
            } else {
                global = total - 1;
            }
        }

        let mut sequence_index = song.sequence.len().saturating_sub(1);
        let mut remainder = global;
        for (i, &pat_idx) in song.sequence.iter().enumerate() {
            let rows = song
                .patterns
                .get(pat_idx as usize)
                .map_or(0, |p| p.rows as u64);
            if remainder < rows {
                sequence_index = i;
                break;
            }
            remainder -= rows;
        }

        let position = PlaybackPosition {
            row: remainder as u16,
            pattern: song.sequence.get(sequence_index).copied(),
            sequence_index,
        };
        if position != self.last_position {
            self.last_position = position;
            self.push_event(EngineEvent::Position(position));
        }
    }

    fn push_event(&mut self, event: EngineEvent) {
        self.events.push_back(event);
    }
}
