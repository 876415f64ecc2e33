//! Integration tests for the MOD parser against synthesized module buffers.
//!
//! Fixtures are built in memory so the suite carries no binary files.

use pretty_assertions::assert_eq;
use rt_formats::{load_mod, FormatError};
use rt_ir::TrackerFlavor;

const PATTERN_SIZE: usize = 64 * 4 * 4;

struct SampleSpec {
    name: &'static str,
    pcm: Vec<i8>,
    finetune: u8,
    volume: u8,
    loop_start_words: u16,
    loop_len_words: u16,
}

impl SampleSpec {
    fn silent(name: &'static str, frames: usize) -> Self {
        Self {
            name,
            pcm: vec![0; frames],
            finetune: 0,
            volume: 64,
            loop_start_words: 0,
            loop_len_words: 0,
        }
    }
}

fn write_sample_header(out: &mut Vec<u8>, spec: &SampleSpec) {
    let mut name = [0u8; 22];
    name[..spec.name.len()].copy_from_slice(spec.name.as_bytes());
    out.extend_from_slice(&name);
    out.extend_from_slice(&((spec.pcm.len() / 2) as u16).to_be_bytes());
    out.push(spec.finetune);
    out.push(spec.volume);
    out.extend_from_slice(&spec.loop_start_words.to_be_bytes());
    out.extend_from_slice(&spec.loop_len_words.to_be_bytes());
}

/// Build a 31-sample ProTracker module.
fn protracker_module(
    title: &str,
    signature: &[u8; 4],
    orders: &[u8],
    patterns: &[[u8; PATTERN_SIZE]],
    samples: &[SampleSpec],
) -> Vec<u8> {
    let mut out = Vec::new();
    let mut title_bytes = [0u8; 20];
    title_bytes[..title.len()].copy_from_slice(title.as_bytes());
    out.extend_from_slice(&title_bytes);

    for i in 0..31 {
        match samples.get(i) {
            Some(spec) => write_sample_header(&mut out, spec),
            None => out.extend_from_slice(&[0u8; 30]),
        }
    }

    out.push(orders.len() as u8);
    out.push(127); // restart byte
    let mut order_table = [0u8; 128];
    order_table[..orders.len()].copy_from_slice(orders);
    out.extend_from_slice(&order_table);
    out.extend_from_slice(signature);

    for pattern in patterns {
        out.extend_from_slice(pattern);
    }
    for spec in samples {
        out.extend(spec.pcm.iter().map(|&b| b as u8));
    }
    out
}

/// Build a 15-sample Soundtracker module.
fn soundtracker_module(
    orders: &[u8],
    patterns: &[[u8; PATTERN_SIZE]],
    samples: &[SampleSpec],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&[0u8; 20]);

    for i in 0..15 {
        match samples.get(i) {
            Some(spec) => write_sample_header(&mut out, spec),
            None => out.extend_from_slice(&[0u8; 30]),
        }
    }

    out.push(orders.len() as u8);
    out.push(120); // legacy tempo byte
    let mut order_table = [0u8; 128];
    order_table[..orders.len()].copy_from_slice(orders);
    out.extend_from_slice(&order_table);

    for pattern in patterns {
        out.extend_from_slice(pattern);
    }
    for spec in samples {
        out.extend(spec.pcm.iter().map(|&b| b as u8));
    }
    out
}

fn empty_pattern() -> [u8; PATTERN_SIZE] {
    [0u8; PATTERN_SIZE]
}

/// Write a cell into a raw pattern buffer.
fn put_cell(
    pattern: &mut [u8; PATTERN_SIZE],
    row: usize,
    channel: usize,
    sample: u8,
    period: u16,
    cmd: u8,
    param: u8,
) {
    let offset = (row * 4 + channel) * 4;
    pattern[offset] = (sample & 0xF0) | ((period >> 8) as u8 & 0x0F);
    pattern[offset + 1] = period as u8;
    pattern[offset + 2] = ((sample & 0x0F) << 4) | (cmd & 0x0F);
    pattern[offset + 3] = param;
}

// --- ProTracker layout ---

#[test]
fn protracker_structure() {
    let mut pat0 = empty_pattern();
    put_cell(&mut pat0, 0, 0, 1, 428, 0x0, 0x00);
    let pat1 = empty_pattern();
    let pat2 = empty_pattern();

    let samples = [
        SampleSpec::silent("st-01:kick", 1000),
        SampleSpec::silent("st-01:snare", 500),
    ];
    let data = protracker_module(
        "fixture one",
        b"M.K.",
        &[0, 2, 1, 0],
        &[pat0, pat1, pat2],
        &samples,
    );

    let song = load_mod(&data).unwrap();
    assert_eq!(song.title.as_str(), "fixture one");
    assert_eq!(song.channels, 4);
    assert_eq!(song.flavor, TrackerFlavor::ProTracker);
    assert_eq!(song.sequence, vec![0, 2, 1, 0]);
    // max order entry + 1
    assert_eq!(song.patterns.len(), 3);
    for pattern in &song.patterns {
        assert_eq!(pattern.rows, 64);
        assert_eq!(pattern.channels, 4);
        assert_eq!(pattern.data.len(), 64 * 4);
    }
    assert_eq!(song.samples.len(), 31);
    assert_eq!(song.samples[0].name.as_str(), "st-01:kick");
    assert_eq!(song.samples[0].len(), 1000);
    assert_eq!(song.samples[1].len(), 500);
    assert!(song.samples[2].is_empty());
}

#[test]
fn protracker_cell_roundtrip() {
    let mut pat = empty_pattern();
    put_cell(&mut pat, 4, 2, 0x12, 428, 0xC, 0x20);

    let data = protracker_module(
        "cells",
        b"M.K.",
        &[0],
        &[pat],
        &[SampleSpec::silent("a", 64)],
    );
    let song = load_mod(&data).unwrap();

    let cell = song.patterns[0].cell(4, 2);
    assert_eq!(cell.sample_number, 0x12);
    assert_eq!(cell.period, 428);
    assert_eq!(cell.effect_cmd, 0xC);
    assert_eq!(cell.effect_param, 0x20);
}

#[test]
fn signed_pcm_maps_to_normalized_floats() {
    let spec = SampleSpec {
        name: "sweep",
        pcm: vec![-128, -1, 0, 1, 127],
        finetune: 0,
        volume: 64,
        loop_start_words: 0,
        loop_len_words: 0,
    };
    // odd lengths round down to a whole word count
    let data = protracker_module("pcm", b"M.K.", &[0], &[empty_pattern()], &[spec]);
    let song = load_mod(&data).unwrap();

    let sample = &song.samples[0];
    assert_eq!(sample.len(), 4);
    assert_eq!(sample.normalized(0), -1.0);
    assert_eq!(sample.normalized(3), 1.0 / 128.0);
    assert!(sample.normalized(0) >= -1.0);
    assert!(sample.normalized(3) <= 127.0 / 128.0);
}

#[test]
fn finetune_nibble_is_signed() {
    let mut spec = SampleSpec::silent("tuned", 64);
    spec.finetune = 0x0F; // -1
    let data = protracker_module("ft", b"M.K.", &[0], &[empty_pattern()], &[spec]);
    let song = load_mod(&data).unwrap();
    assert_eq!(song.samples[0].finetune, -1);
}

#[test]
fn loop_fields_convert_words_to_bytes() {
    let mut spec = SampleSpec::silent("looped", 256);
    spec.loop_start_words = 8;
    spec.loop_len_words = 32;
    let data = protracker_module("loops", b"M.K.", &[0], &[empty_pattern()], &[spec]);
    let song = load_mod(&data).unwrap();

    let sample = &song.samples[0];
    assert_eq!(sample.loop_start, 16);
    assert_eq!(sample.loop_length, 64);
    assert!(sample.has_loop());
}

#[test]
fn missing_pcm_tail_yields_empty_sample() {
    let spec = SampleSpec::silent("ghost", 5000);
    let mut data = protracker_module("cut", b"M.K.", &[0], &[empty_pattern()], &[spec]);
    // Drop the whole PCM tail
    data.truncate(1084 + PATTERN_SIZE);

    let song = load_mod(&data).unwrap();
    assert!(song.samples[0].is_empty());
}

#[test]
fn truncated_pattern_data_is_unsupported() {
    let data = protracker_module("short", b"M.K.", &[0, 1], &[empty_pattern()], &[]);
    // Order list references pattern 1 but only pattern 0 is present
    assert_eq!(
        load_mod(&data).unwrap_err(),
        FormatError::UnsupportedFormat("pattern data truncated")
    );
}

#[test]
fn noisetracker_signature_sets_flavor() {
    let data = protracker_module("nt", b"N.T.", &[0], &[empty_pattern()], &[]);
    let song = load_mod(&data).unwrap();
    assert_eq!(song.flavor, TrackerFlavor::NoiseTracker);
    assert_eq!(&song.signature, b"N.T.");
}

#[test]
fn all_protracker_signatures_accepted() {
    for sig in [b"M.K.", b"M!K!", b"M&K!", b"FLT4", b"4CHN"] {
        let data = protracker_module("sig", sig, &[0], &[empty_pattern()], &[]);
        let song = load_mod(&data).unwrap_or_else(|e| panic!("{:?} rejected: {e}", sig));
        assert_eq!(song.flavor, TrackerFlavor::ProTracker);
    }
}

// --- Soundtracker layout ---

#[test]
fn soundtracker_structure() {
    let mut pat = empty_pattern();
    put_cell(&mut pat, 0, 0, 1, 856, 0x0, 0x00);

    let samples = [SampleSpec::silent("st-drum", 400)];
    let data = soundtracker_module(&[0, 0], &[pat], &samples);

    let song = load_mod(&data).unwrap();
    assert_eq!(song.flavor, TrackerFlavor::Soundtracker);
    assert_eq!(song.samples.len(), 15);
    assert_eq!(song.sequence, vec![0, 0]);
    assert_eq!(song.patterns.len(), 1);
    assert_eq!(song.samples[0].len(), 400);
    assert_eq!(song.signature, [0; 4]);
}

#[test]
fn ambiguous_untagged_buffer_is_rejected() {
    // Valid length for the 15-sample layout but nonsense structure
    let data = vec![0xFFu8; 2000];
    assert_eq!(
        load_mod(&data).unwrap_err(),
        FormatError::UnsupportedFormat("unrecognized signature")
    );
}
