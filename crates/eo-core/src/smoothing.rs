//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Moving-average filters for requested and measured current."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::VecDeque;

/// Mean of the most recent `window` samples. Until the window fills, the mean
/// covers only the samples seen so far.
#[derive(Debug, Clone)]
pub struct MovingAverage<T> {
    window: usize,
    samples: VecDeque<T>,
}

impl<T> MovingAverage<T>
where
    T: Copy + Into<f64>,
{
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    /// Record `sample` and return the updated mean.
    pub fn push(&mut self, sample: T) -> f64 {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.mean()
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.samples.iter().map(|&s| s.into()).sum();
        sum / self.samples.len() as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

impl MovingAverage<i32> {
    /// Integer mean sent to the charger; votes are never negative so this floors.
    pub fn push_amps(&mut self, amps: i32) -> i32 {
        self.push(amps).floor() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_change_converges_after_full_window() {
        let mut filter = MovingAverage::new(9);
        let mut outputs = Vec::new();
        for _ in 0..3 {
            outputs.push(filter.push_amps(0));
        }
        for _ in 0..9 {
            outputs.push(filter.push_amps(18));
        }
        // cycle k averages the last min(k, 9) votes
        assert_eq!(outputs[3], (18.0f64 / 4.0).floor() as i32);
        assert_eq!(outputs[4], (36.0f64 / 5.0).floor() as i32);
        assert_eq!(outputs[8], (18.0 * 6.0f64 / 9.0).floor() as i32);
        assert!(outputs[..11].iter().all(|&amps| amps < 18));
        assert_eq!(outputs[11], 18);
    }

    #[test]
    fn mean_covers_only_seen_samples() {
        let mut filter = MovingAverage::new(9);
        assert_eq!(filter.push_amps(18), 18);
        assert_eq!(filter.push_amps(0), 9);
        assert_eq!(filter.len(), 2);
    }

    #[test]
    fn float_window_drops_oldest() {
        let mut filter = MovingAverage::new(2);
        filter.push(1.0f64);
        filter.push(3.0);
        assert_eq!(filter.push(5.0), 4.0);
    }
}
