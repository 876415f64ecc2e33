//! Song feature analysis — scans a Song to report which features are used.

use alloc::collections::BTreeSet;
use core::fmt;

use crate::effect::EffectCommand;
use crate::pitch::period_to_midi;
use crate::song::Song;

/// Summary of features used in a song.
pub struct SongFeatures {
    pub effects: BTreeSet<&'static str>,
    pub note_range: Option<(u8, u8)>,
    pub instruments_used: BTreeSet<u8>,
    pub samples_with_loops: usize,
    pub total_notes: usize,
}

/// Analyze a song and return a summary of which features it uses.
pub fn analyze(song: &Song) -> SongFeatures {
    let mut features = SongFeatures {
        effects: BTreeSet::new(),
        note_range: None,
        instruments_used: BTreeSet::new(),
        samples_with_loops: song.samples.iter().filter(|s| s.has_loop()).count(),
        total_notes: 0,
    };

    for pattern in &song.patterns {
        for cell in &pattern.data {
            if cell.period > 0 {
                features.total_notes += 1;
                let n = period_to_midi(cell.period);
                features.note_range = Some(match features.note_range {
                    Some((lo, hi)) => (lo.min(n), hi.max(n)),
                    None => (n, n),
                });
            }
            if cell.sample_number > 0 {
                features.instruments_used.insert(cell.sample_number);
            }
            if let Some(effect) = EffectCommand::from_mod(cell.effect_cmd, cell.effect_param) {
                features.effects.insert(effect.name());
            }
        }
    }

    features
}

impl fmt::Display for SongFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Notes:    {} total", self.total_notes)?;
        if let Some((lo, hi)) = self.note_range {
            writeln!(f, "Range:    {} - {} (MIDI)", lo, hi)?;
        }
        writeln!(
            f,
            "Instruments: {} used, {} samples with loops",
            self.instruments_used.len(),
            self.samples_with_loops,
        )?;

        if self.effects.is_empty() {
            writeln!(f, "Effects:  (none)")?;
        } else {
            let effects: alloc::vec::Vec<&str> = self.effects.iter().copied().collect();
            writeln!(f, "Effects:  {}", effects.join(", "))?;
        }

        Ok(())
    }
}
