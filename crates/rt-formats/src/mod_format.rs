//! ProTracker / Soundtracker MOD parser.
//!
//! Two layouts are distinguished by the signature bytes at 1080..1084:
//! the 31-sample ProTracker layout (header 1084 bytes) and the untagged
//! 15-sample Soundtracker layout (header 600 bytes). Untagged buffers that
//! fail structural validation are rejected rather than guessed at.

use rt_ir::{Pattern, PatternCell, Sample, Song, TrackerFlavor};

use crate::FormatError;

/// Signatures of 4-channel ProTracker-family modules.
const SIGNATURES: [&[u8; 4]; 6] = [b"M.K.", b"M!K!", b"M&K!", b"N.T.", b"FLT4", b"4CHN"];

/// Signatures of modules with more than 4 channels. Recognized so the
/// error says "channel count" instead of "signature".
const WIDE_SIGNATURES: [&[u8; 4]; 3] = [b"6CHN", b"8CHN", b"OCTA"];

struct Layout {
    sample_count: usize,
    length_offset: usize,
    order_offset: usize,
    header_len: usize,
    flavor: TrackerFlavor,
}

const PROTRACKER: Layout = Layout {
    sample_count: 31,
    length_offset: 950,
    order_offset: 952,
    header_len: 1084,
    flavor: TrackerFlavor::ProTracker,
};

const SOUNDTRACKER: Layout = Layout {
    sample_count: 15,
    length_offset: 470,
    order_offset: 472,
    header_len: 600,
    flavor: TrackerFlavor::Soundtracker,
};

/// Load a MOD file from bytes.
pub fn load_mod(data: &[u8]) -> Result<Song, FormatError> {
    let (layout, signature) = detect_layout(data)?;

    let title = parse_string(&data[0..20]);
    let mut song = Song::new(&title, 4);
    song.signature = signature;
    song.flavor = if &signature == b"N.T." {
        TrackerFlavor::NoiseTracker
    } else {
        layout.flavor
    };

    // Sample headers (30 bytes each, starting right after the title)
    let mut declared_lengths = Vec::with_capacity(layout.sample_count);
    for i in 0..layout.sample_count {
        let offset = 20 + i * 30;
        let (sample, declared) = parse_sample_header(&data[offset..offset + 30]);
        song.samples.push(sample);
        declared_lengths.push(declared);
    }

    // Order table
    let song_length = (data[layout.length_offset] as usize).min(128);
    for i in 0..song_length {
        song.sequence.push(data[layout.order_offset + i]);
    }

    // Pattern pool: one past the highest referenced pattern
    let pattern_count = song.sequence.iter().max().copied().unwrap_or(0) as usize + 1;
    let pattern_size = 64 * 4 * 4;
    for pat_idx in 0..pattern_count {
        let offset = layout.header_len + pat_idx * pattern_size;
        if offset + pattern_size > data.len() {
            return Err(FormatError::UnsupportedFormat("pattern data truncated"));
        }
        song.patterns
            .push(parse_pattern(&data[offset..offset + pattern_size]));
    }

    // Sample PCM follows the pattern data, in sample-index order.
    // A truncated tail leaves the affected samples empty.
    let mut offset = layout.header_len + pattern_count * pattern_size;
    for (sample, &declared) in song.samples.iter_mut().zip(&declared_lengths) {
        if declared > 0 && offset + declared <= data.len() {
            sample.pcm = data[offset..offset + declared]
                .iter()
                .map(|&b| b as i8)
                .collect();
            offset += declared;

            // Clamp loop bounds to the actual data (common in real files)
            let len = sample.pcm.len() as u32;
            if sample.loop_start >= len {
                sample.loop_length = 0;
            } else if sample.loop_start + sample.loop_length > len {
                sample.loop_length = len - sample.loop_start;
            }
        }
    }

    Ok(song)
}

/// Pick the layout from the signature, or validate the untagged one.
fn detect_layout(data: &[u8]) -> Result<(Layout, [u8; 4]), FormatError> {
    if data.len() >= 1084 {
        let sig: [u8; 4] = data[1080..1084].try_into().unwrap();
        if SIGNATURES.iter().any(|s| **s == sig) {
            return Ok((PROTRACKER, sig));
        }
        if WIDE_SIGNATURES.iter().any(|s| **s == sig) {
            return Err(FormatError::UnsupportedFormat("channel count is not 4"));
        }
    }
    if looks_like_soundtracker(data) {
        return Ok((SOUNDTRACKER, [0; 4]));
    }
    Err(FormatError::UnsupportedFormat("unrecognized signature"))
}

/// Structural validation for the untagged 15-sample layout.
///
/// Best-effort: ambiguous buffers fail here and surface as unsupported.
fn looks_like_soundtracker(data: &[u8]) -> bool {
    if data.len() < SOUNDTRACKER.header_len {
        return false;
    }
    let song_length = data[SOUNDTRACKER.length_offset] as usize;
    if song_length == 0 || song_length > 128 {
        return false;
    }
    let orders = &data[SOUNDTRACKER.order_offset..SOUNDTRACKER.order_offset + song_length];
    if orders.iter().any(|&o| o >= 64) {
        return false;
    }
    // Sample volumes above 64 never occur in real Soundtracker files
    (0..SOUNDTRACKER.sample_count).all(|i| data[20 + i * 30 + 25] <= 64)
}

/// Parse a NUL- or space-terminated string.
fn parse_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).trim_end().to_string()
}

/// Parse a 30-byte sample header, returning the sample and its declared
/// PCM length in bytes. Word counts are big-endian and convert to bytes
/// (x2); the PCM itself is filled in after the pattern data.
fn parse_sample_header(data: &[u8]) -> (Sample, usize) {
    let name = parse_string(&data[0..22]);
    let length = u16::from_be_bytes([data[22], data[23]]) as usize * 2;
    let finetune = (data[24] & 0x0F) as i8;
    let finetune = if finetune > 7 { finetune - 16 } else { finetune };

    let mut sample = Sample::new(&name);
    sample.finetune = finetune;
    sample.default_volume = data[25].min(64);
    sample.loop_start = u16::from_be_bytes([data[26], data[27]]) as u32 * 2;
    sample.loop_length = u16::from_be_bytes([data[28], data[29]]) as u32 * 2;
    (sample, length)
}

/// Parse a 64-row, 4-channel pattern.
fn parse_pattern(data: &[u8]) -> Pattern {
    let mut pattern = Pattern::new(64, 4);
    for row in 0..64u16 {
        for ch in 0..4u8 {
            let offset = (row as usize * 4 + ch as usize) * 4;
            *pattern.cell_mut(row, ch) = parse_cell(&data[offset..offset + 4]);
        }
    }
    pattern
}

/// Decode one 4-byte cell.
///
/// Byte 0: sample high nibble | period high nibble.
/// Byte 1: period low byte.
/// Byte 2: sample low nibble | effect command.
/// Byte 3: effect parameter.
fn parse_cell(data: &[u8]) -> PatternCell {
    let sample_hi = data[0] & 0xF0;
    let sample_lo = (data[2] & 0xF0) >> 4;
    PatternCell {
        period: (((data[0] & 0x0F) as u16) << 8) | data[1] as u16,
        sample_number: sample_hi | sample_lo,
        effect_cmd: data[2] & 0x0F,
        effect_param: data[3],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_decoding_splits_nibbles() {
        // sample 0x12, period 0x1AC (428), effect C, param 0x20
        let cell = parse_cell(&[0x11, 0xAC, 0x2C, 0x20]);
        assert_eq!(cell.sample_number, 0x12);
        assert_eq!(cell.period, 428);
        assert_eq!(cell.effect_cmd, 0xC);
        assert_eq!(cell.effect_param, 0x20);
    }

    #[test]
    fn sample_header_word_counts_double() {
        let mut header = [0u8; 30];
        header[..4].copy_from_slice(b"bass");
        header[22] = 0x10; // 0x1000 words
        header[23] = 0x00;
        header[24] = 0x0F; // finetune -1
        header[25] = 80; // volume clamps to 64
        header[27] = 0x08; // loop start 8 words
        header[29] = 0x04; // loop length 4 words

        let (sample, declared) = parse_sample_header(&header);
        assert_eq!(sample.name.as_str(), "bass");
        assert_eq!(declared, 0x2000);
        assert_eq!(sample.finetune, -1);
        assert_eq!(sample.default_volume, 64);
        assert_eq!(sample.loop_start, 16);
        assert_eq!(sample.loop_length, 8);
    }

    #[test]
    fn empty_buffer_is_unsupported() {
        assert_eq!(
            load_mod(&[]).unwrap_err(),
            FormatError::UnsupportedFormat("unrecognized signature")
        );
    }

    #[test]
    fn wide_modules_are_rejected_for_channel_count() {
        let mut data = vec![0u8; 1084 + 64 * 6 * 4];
        data[1080..1084].copy_from_slice(b"6CHN");
        assert_eq!(
            load_mod(&data).unwrap_err(),
            FormatError::UnsupportedFormat("channel count is not 4")
        );
    }
}
