//! LFO waveforms for vibrato and tremolo.
//!
//! Classic tracker oscillators run over a 64-position cycle; the phase
//! wraps with `& 63`. The random waveform is uniform noise per position
//! and makes no reproducibility promise.

use rand::rngs::SmallRng;
use rand::Rng;

/// Oscillator shape, selected by E4x / E7x (low 2 bits).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Waveform {
    #[default]
    Sine,
    RampDown,
    Square,
    Random,
}

impl Waveform {
    /// Decode the E4x/E7x parameter.
    pub fn from_param(param: u8) -> Self {
        match param & 0x03 {
            0 => Self::Sine,
            1 => Self::RampDown,
            2 => Self::Square,
            _ => Self::Random,
        }
    }

    /// Oscillator value in [-1, 1] at a 64-step phase.
    pub fn sample(self, phase: u8, rng: &mut SmallRng) -> f32 {
        let phase = phase & 63;
        match self {
            Self::Sine => libm::sinf(core::f32::consts::TAU * phase as f32 / 64.0),
            Self::RampDown => 1.0 - 2.0 * phase as f32 / 64.0,
            Self::Square => {
                if phase < 32 {
                    1.0
                } else {
                    -1.0
                }
            }
            Self::Random => rng.gen_range(-1.0..=1.0),
        }
    }
}

/// One oscillator: phase plus the latched speed/depth pair.
#[derive(Clone, Copy, Debug, Default)]
pub struct Oscillator {
    pub phase: u8,
    pub speed: u8,
    pub depth: u8,
    pub waveform: Waveform,
}

impl Oscillator {
    /// Advance by `speed` positions and return the new oscillator value.
    pub fn tick(&mut self, rng: &mut SmallRng) -> f32 {
        self.phase = (self.phase.wrapping_add(self.speed)) & 63;
        self.waveform.sample(self.phase, rng)
    }

    /// Update speed and depth independently; zero nibbles leave the
    /// previous value in place.
    pub fn update(&mut self, speed: u8, depth: u8) {
        if speed > 0 {
            self.speed = speed;
        }
        if depth > 0 {
            self.depth = depth;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(1)
    }

    #[test]
    fn sine_starts_at_zero_and_peaks_at_quarter() {
        let mut r = rng();
        assert!(Waveform::Sine.sample(0, &mut r).abs() < 1e-6);
        assert!((Waveform::Sine.sample(16, &mut r) - 1.0).abs() < 1e-5);
        assert!((Waveform::Sine.sample(48, &mut r) + 1.0).abs() < 1e-5);
    }

    #[test]
    fn ramp_descends_linearly() {
        let mut r = rng();
        assert_eq!(Waveform::RampDown.sample(0, &mut r), 1.0);
        assert_eq!(Waveform::RampDown.sample(32, &mut r), 0.0);
        assert_eq!(Waveform::RampDown.sample(63, &mut r), 1.0 - 2.0 * 63.0 / 64.0);
    }

    #[test]
    fn square_flips_at_half_cycle() {
        let mut r = rng();
        assert_eq!(Waveform::Square.sample(0, &mut r), 1.0);
        assert_eq!(Waveform::Square.sample(31, &mut r), 1.0);
        assert_eq!(Waveform::Square.sample(32, &mut r), -1.0);
    }

    #[test]
    fn phase_masks_to_cycle() {
        let mut r = rng();
        assert_eq!(
            Waveform::Square.sample(64, &mut r),
            Waveform::Square.sample(0, &mut r)
        );
    }

    #[test]
    fn random_stays_in_range() {
        let mut r = rng();
        for phase in 0..64 {
            let v = Waveform::Random.sample(phase, &mut r);
            assert!((-1.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn oscillator_update_keeps_nonzero_memory() {
        let mut osc = Oscillator {
            speed: 8,
            depth: 4,
            ..Default::default()
        };
        osc.update(0, 6);
        assert_eq!(osc.speed, 8);
        assert_eq!(osc.depth, 6);
        osc.update(2, 0);
        assert_eq!(osc.speed, 2);
        assert_eq!(osc.depth, 6);
    }

    #[test]
    fn oscillator_tick_advances_phase() {
        let mut osc = Oscillator {
            speed: 8,
            depth: 4,
            ..Default::default()
        };
        let mut r = rng();
        osc.tick(&mut r);
        assert_eq!(osc.phase, 8);
        osc.tick(&mut r);
        assert_eq!(osc.phase, 16);
    }
}
