//! Frequency-gated side effects of the adversarial loop. Each cadence is
//! evaluated on its own; several may fire on the same step.

use std::time::Duration;

use crate::config::RunOptions;

/// Fires every `freq` steps and on the final step. Never fires when
/// `freq <= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    freq: i64,
}

impl Cadence {
    pub fn steps(freq: i64) -> Self {
        Self { freq }
    }

    /// Frequency given in epochs, converted to steps.
    pub fn epochs(epochs: i64, ntrain: usize) -> Self {
        Self::steps(epochs.saturating_mul(ntrain as i64))
    }

    pub fn is_enabled(&self) -> bool {
        self.freq > 0
    }

    pub fn should(&self, step: usize, max_steps: usize) -> bool {
        self.freq > 0 && ((step as i64 + 1) % self.freq == 0 || step + 1 == max_steps)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fired {
    pub summary: bool,
    pub progress: bool,
    pub display: bool,
    pub validate: bool,
    pub save: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CadenceTable {
    pub summary: Cadence,
    pub progress: Cadence,
    pub display: Cadence,
    pub validate: Cadence,
    pub save: Cadence,
}

impl CadenceTable {
    pub fn from_options(options: &RunOptions, ntrain: usize) -> Self {
        Self {
            summary: Cadence::epochs(options.summary_freq, ntrain),
            progress: Cadence::epochs(options.progress_freq, ntrain),
            display: Cadence::epochs(options.display_freq, ntrain),
            validate: Cadence::epochs(options.validate_freq, ntrain),
            save: Cadence::epochs(options.save_freq, ntrain),
        }
    }

    pub fn evaluate(&self, step: usize, max_steps: usize) -> Fired {
        Fired {
            summary: self.summary.should(step, max_steps),
            progress: self.progress.should(step, max_steps),
            display: self.display.should(step, max_steps),
            validate: self.validate.should(step, max_steps),
            save: self.save.should(step, max_steps),
        }
    }
}

/// Throughput since the adversarial phase began and the time it would take
/// to finish at that rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub epoch: usize,
    pub steps_per_sec: f64,
    pub remaining: Duration,
}

impl Progress {
    pub fn estimate(
        step: usize,
        first_step: usize,
        max_steps: usize,
        ntrain: usize,
        elapsed: Duration,
    ) -> Self {
        let done = (step + 1).saturating_sub(first_step) as f64;
        let secs = elapsed.as_secs_f64();
        let steps_per_sec = if secs > 0.0 { done / secs } else { 0.0 };
        let left = max_steps.saturating_sub(step + 1) as f64;
        let remaining = if steps_per_sec > 0.0 {
            Duration::from_secs_f64(left / steps_per_sec)
        } else {
            Duration::ZERO
        };
        Self {
            epoch: (step + 1) / ntrain.max(1),
            steps_per_sec,
            remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fired_steps(cadence: Cadence, max_steps: usize) -> Vec<usize> {
        (0..max_steps)
            .filter(|&step| cadence.should(step, max_steps))
            .collect()
    }

    #[test]
    fn non_positive_frequency_never_fires() {
        for freq in [-3, -1, 0] {
            assert!(fired_steps(Cadence::steps(freq), 50).is_empty());
        }
    }

    #[test]
    fn fires_every_freq_steps_and_on_the_last_step() {
        assert_eq!(fired_steps(Cadence::steps(3), 10), [2, 5, 8, 9]);
        assert_eq!(fired_steps(Cadence::steps(5), 10), [4, 9]);
        assert_eq!(fired_steps(Cadence::steps(1), 3), [0, 1, 2]);
    }

    #[test]
    fn epoch_frequencies_are_scaled_to_steps() {
        assert_eq!(Cadence::epochs(2, 5), Cadence::steps(10));
        assert!(!Cadence::epochs(0, 5).is_enabled());
    }

    #[test]
    fn cadences_are_independent() {
        let table = CadenceTable {
            summary: Cadence::steps(2),
            progress: Cadence::steps(0),
            display: Cadence::steps(3),
            validate: Cadence::steps(6),
            save: Cadence::steps(4),
        };
        let fired = table.evaluate(5, 100);
        assert_eq!(
            fired,
            Fired {
                summary: true,
                progress: false,
                display: true,
                validate: true,
                save: false,
            }
        );
    }

    #[test]
    fn progress_extrapolates_remaining_time() {
        let progress = Progress::estimate(9, 0, 40, 10, Duration::from_secs(5));
        assert_eq!(progress.epoch, 1);
        assert!((progress.steps_per_sec - 2.0).abs() < 1e-9);
        assert_eq!(progress.remaining, Duration::from_secs(15));
    }
}
