//! Scheduler-level playback scenarios driven through the public API.

use std::sync::Arc;

use rt_engine::renderer::testing::{ManualClock, Recorded, RecordingRenderer};
use rt_engine::{Scheduler, VoiceParam};
use rt_ir::{midi_to_period, period_to_frequency, Pattern, PatternCell, Sample, Song};

const SPR: f64 = 0.12; // 125 BPM, speed 6
const SPT: f64 = SPR / 6.0;

fn sample() -> Sample {
    let mut s = Sample::new("test");
    s.pcm = vec![0; 1000];
    s.default_volume = 64;
    s
}

fn song(patterns: Vec<Pattern>) -> Arc<Song> {
    let sequence = (0..patterns.len() as u8).collect();
    let mut song = Song::new("scenario", 4);
    song.patterns = patterns;
    song.sequence = sequence;
    song.samples = vec![sample()];
    Arc::new(song)
}

fn cell(midi: u8, sample: u8, cmd: u8, param: u8) -> PatternCell {
    PatternCell {
        period: if midi > 0 { midi_to_period(midi) } else { 0 },
        sample_number: sample,
        effect_cmd: cmd,
        effect_param: param,
    }
}

fn play_through(song: Arc<Song>, seconds: f64) -> Scheduler<ManualClock, RecordingRenderer> {
    let mut s = Scheduler::new(ManualClock::new(), RecordingRenderer::new());
    s.load_song(song, 0);
    s.play();
    let mut elapsed = 0.0;
    while elapsed < seconds {
        s.advance();
        s.clock_mut().advance(0.033);
        elapsed += 0.033;
    }
    s
}

fn frequency_writes(s: &Scheduler<ManualClock, RecordingRenderer>) -> Vec<(f32, f64)> {
    s.renderer().frequencies()
}

/// A single row `C-5 01 047` at 125 BPM / speed 6 produces pitches at
/// base, +4, +7, base, +4, +7 across the six ticks, one tick apart.
#[test]
fn arpeggio_cycles_six_pitches_per_row() {
    let mut pat = Pattern::new(1, 4);
    *pat.cell_mut(0, 0) = cell(60, 1, 0x0, 0x47);
    let s = play_through(song(vec![pat]), 0.2);

    let freqs = frequency_writes(&s);
    // NoteOn frequency write, then the six per-tick pitches (tick 0
    // anchor + ticks 1..5)
    assert_eq!(freqs.len(), 7);

    let base_period = midi_to_period(60) as f32;
    let base = period_to_frequency(base_period);
    let up4 = period_to_frequency(base_period / 2f32.powf(4.0 / 12.0));
    let up7 = period_to_frequency(base_period / 2f32.powf(7.0 / 12.0));
    let expected = [base, up4, up7, base, up4, up7];

    for (i, &(freq, time)) in freqs.iter().skip(1).enumerate() {
        assert!(
            (freq - expected[i]).abs() < 0.5,
            "tick {}: {} vs {}",
            i,
            freq,
            expected[i]
        );
        let expected_time = i as f64 * SPT;
        assert!((time - expected_time).abs() < 1e-9);
    }
}

/// Tone portamento approaches its target monotonically across rows and
/// lands exactly on it.
#[test]
fn tone_porta_reaches_target_across_rows() {
    let mut pat = Pattern::new(6, 4);
    *pat.cell_mut(0, 0) = cell(48, 1, 0x0, 0x00); // C-4
    *pat.cell_mut(1, 0) = cell(52, 0, 0x3, 0x05); // E-4 305
    *pat.cell_mut(2, 0) = cell(0, 0, 0x3, 0x00); // 300 continues
    *pat.cell_mut(3, 0) = cell(0, 0, 0x3, 0x00);
    *pat.cell_mut(4, 0) = cell(0, 0, 0x3, 0x00);
    let s = play_through(song(vec![pat]), 1.5);

    let freqs = frequency_writes(&s);
    let target = period_to_frequency(midi_to_period(52) as f32);

    // Monotonic rise after the initial note, never crossing the target
    let slide: Vec<f32> = freqs.iter().skip(1).map(|&(f, _)| f).collect();
    for pair in slide.windows(2) {
        assert!(pair[1] >= pair[0] - 1e-4, "slide reversed: {:?}", pair);
        assert!(pair[1] <= target + 1e-3, "crossed target: {:?}", pair);
    }
    let last = *slide.last().unwrap();
    assert!((last - target).abs() < 1e-3, "{} vs {}", last, target);
}

/// `A03` then `A00`: the second row slides by the remembered value.
#[test]
fn volume_slide_memory_spans_rows() {
    let mut pat = Pattern::new(2, 4);
    *pat.cell_mut(0, 0) = cell(60, 1, 0xA, 0x03);
    *pat.cell_mut(1, 0) = cell(0, 0, 0xA, 0x00);
    let s = play_through(song(vec![pat]), 0.5);

    let ramps: Vec<(f32, f64)> = s
        .renderer()
        .log
        .iter()
        .filter_map(|e| match e {
            Recorded::LinearRamp {
                param: VoiceParam::Gain,
                value,
                time,
                ..
            } => Some((*value, *time)),
            _ => None,
        })
        .collect();
    assert_eq!(ramps.len(), 2);

    let per_row = 5.0 * 3.0 / 128.0;
    assert!((ramps[0].0 - (1.0 - per_row)).abs() < 1e-5);
    assert!((ramps[1].0 - (1.0 - 2.0 * per_row)).abs() < 1e-5);
    // each ramp ends at the row's last tick
    assert!((ramps[0].1 - 5.0 * SPT).abs() < 1e-9);
    assert!((ramps[1].1 - (SPR + 5.0 * SPT)).abs() < 1e-9);
}

/// Note delay overflow: `ED8` at speed 6 fires at tick 0 of the next row.
#[test]
fn note_delay_overflow_triggers_next_row() {
    let mut pat = Pattern::new(2, 4);
    *pat.cell_mut(0, 0) = cell(60, 1, 0xE, 0xD8);
    let s = play_through(song(vec![pat]), 0.5);

    let ons: Vec<f64> = s
        .renderer()
        .gates()
        .iter()
        .filter(|&&(v, _)| v == 1.0)
        .map(|&(_, t)| t)
        .collect();
    assert_eq!(ons.len(), 1);
    assert!((ons[0] - SPR).abs() < 1e-9);
}

/// Playback stops by itself when the sequence runs out, and scheduled
/// rows cover the full song.
#[test]
fn song_plays_to_completion() {
    let mut pat = Pattern::new(4, 4);
    for row in 0..4 {
        *pat.cell_mut(row, 0) = cell(48, 1, 0x0, 0x00);
    }
    let s = play_through(song(vec![pat]), 2.0);

    let ons: Vec<f64> = s
        .renderer()
        .gates()
        .iter()
        .filter(|&&(v, _)| v == 1.0)
        .map(|&(_, t)| t)
        .collect();
    assert_eq!(ons.len(), 4);
    assert_eq!(s.transport(), rt_ir::TransportState::Stopped);
}

/// Vibrato emits one pitch per tick without touching the base pitch; a
/// re-struck note on the next row sits back on the base.
#[test]
fn vibrato_returns_to_base_pitch() {
    let mut pat = Pattern::new(2, 4);
    *pat.cell_mut(0, 0) = cell(48, 1, 0x4, 0x48); // vibrato speed 4 depth 8
    *pat.cell_mut(1, 0) = cell(48, 0, 0x0, 0x00); // bare note, instrument memory
    let s = play_through(song(vec![pat]), 0.5);

    let freqs = frequency_writes(&s);
    let base = period_to_frequency(midi_to_period(48) as f32);
    // row 0: note-on write, tick-0 anchor, five vibrato ticks
    assert!(freqs.len() >= 8);
    let wobble: Vec<f32> = freqs[2..7].iter().map(|&(f, _)| f).collect();
    assert!(wobble.iter().any(|&f| (f - base).abs() > 0.1));
    // row 1 re-strikes the note on the base pitch
    let last = freqs.last().unwrap().0;
    assert!((last - base).abs() < 1e-3);
}
