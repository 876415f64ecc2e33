//! Cell-to-step conversion for MOD-imported songs.
//!
//! The scheduler works on `Step`s; this module resolves raw pattern cells
//! into them: period to MIDI note + synth frequency (with the sample's
//! finetune applied), sample default volume to velocity, and `Fxx` split
//! into speed vs. tempo.

use rt_ir::{
    period_to_frequency, period_to_midi, semitone_ratio, EffectCommand, PatternCell, Sample, Step,
};

/// Classic Amiga channel panning: L R R L.
pub fn default_pan(track: u8) -> f32 {
    if track % 4 == 0 || track % 4 == 3 {
        -1.0
    } else {
        1.0
    }
}

/// Map a sample's default volume (0-64) onto the 0-255 velocity range.
pub fn volume_to_velocity(volume: u8) -> u8 {
    ((volume.min(64) as u16 * 255) / 64) as u8
}

/// Resolve one pattern cell into a step.
pub fn cell_to_step(cell: &PatternCell, row: u16, samples: &[Sample]) -> Step {
    let mut step = Step::at(row);

    if cell.sample_number > 0 {
        step.instrument_id = Some(cell.sample_number);
        if let Some(sample) = samples.get(cell.sample_number as usize - 1) {
            step.velocity = Some(volume_to_velocity(sample.default_volume));
        }
    }

    if cell.period > 0 {
        step.midi = Some(period_to_midi(cell.period) as f32);
        let mut frequency = period_to_frequency(cell.period as f32);
        // Finetune is knowable at import time only when the cell names its
        // sample; eighths of a semitone.
        if let Some(sample) = cell
            .sample_number
            .checked_sub(1)
            .and_then(|i| samples.get(i as usize))
        {
            if sample.finetune != 0 {
                frequency *= semitone_ratio(sample.finetune as f32 / 8.0);
            }
        }
        step.frequency = Some(frequency);
    }

    match EffectCommand::from_mod(cell.effect_cmd, cell.effect_param) {
        Some(EffectCommand::SetSpeed(speed)) => step.speed = Some(speed),
        Some(EffectCommand::SetTempo(tempo)) => step.tempo = Some(tempo),
        Some(effect) => step.effect = Some(effect),
        None => {}
    }

    step
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_with(volume: u8, finetune: i8) -> Sample {
        let mut s = Sample::new("test");
        s.pcm = vec![0; 64];
        s.default_volume = volume;
        s.finetune = finetune;
        s
    }

    #[test]
    fn note_cell_resolves_midi_and_frequency() {
        let samples = [sample_with(64, 0)];
        let cell = PatternCell {
            period: 428,
            sample_number: 1,
            effect_cmd: 0,
            effect_param: 0,
        };
        let step = cell_to_step(&cell, 5, &samples);
        assert_eq!(step.row, 5);
        assert_eq!(step.midi, Some(48.0));
        assert_eq!(step.instrument_id, Some(1));
        assert_eq!(step.velocity, Some(255));
        let f = step.frequency.unwrap();
        assert!((f - period_to_frequency(428.0)).abs() < 1e-3);
    }

    #[test]
    fn finetune_shifts_frequency() {
        let samples = [sample_with(64, 4)]; // +half semitone
        let cell = PatternCell {
            period: 428,
            sample_number: 1,
            effect_cmd: 0,
            effect_param: 0,
        };
        let step = cell_to_step(&cell, 0, &samples);
        let expected = period_to_frequency(428.0) * semitone_ratio(0.5);
        assert!((step.frequency.unwrap() - expected).abs() < 1e-3);
    }

    #[test]
    fn velocity_tracks_default_volume() {
        assert_eq!(volume_to_velocity(64), 255);
        assert_eq!(volume_to_velocity(32), 127);
        assert_eq!(volume_to_velocity(0), 0);
        // out-of-range volumes clamp
        assert_eq!(volume_to_velocity(200), 255);
    }

    #[test]
    fn f_commands_split_into_speed_and_tempo() {
        let cell = PatternCell {
            period: 0,
            sample_number: 0,
            effect_cmd: 0xF,
            effect_param: 0x06,
        };
        let step = cell_to_step(&cell, 0, &[]);
        assert_eq!(step.speed, Some(6));
        assert!(step.effect.is_none());

        let cell = PatternCell {
            effect_param: 0x8C,
            ..cell
        };
        let step = cell_to_step(&cell, 0, &[]);
        assert_eq!(step.tempo, Some(140));
    }

    #[test]
    fn effect_cell_keeps_effect() {
        let cell = PatternCell {
            period: 0,
            sample_number: 0,
            effect_cmd: 0x3,
            effect_param: 0x05,
        };
        let step = cell_to_step(&cell, 0, &[]);
        assert_eq!(step.effect, Some(EffectCommand::TonePorta(5)));
        assert!(!step.is_empty());
    }

    #[test]
    fn empty_cell_is_empty_step() {
        let cell = PatternCell::empty();
        assert!(cell_to_step(&cell, 0, &[]).is_empty());
    }

    #[test]
    fn amiga_panning_is_lrrl() {
        assert_eq!(default_pan(0), -1.0);
        assert_eq!(default_pan(1), 1.0);
        assert_eq!(default_pan(2), 1.0);
        assert_eq!(default_pan(3), -1.0);
        assert_eq!(default_pan(4), -1.0);
    }
}
