use crate::metrics::hrv::{rr_features, RrFeatures};
use crate::signal::{BeatEvent, RRSeries};
use std::collections::VecDeque;

/// Bounded history of recent beat timestamps, oldest evicted first.
#[derive(Debug, Clone)]
pub struct BeatHistory {
    times: VecDeque<f64>,
    capacity: usize,
}

impl BeatHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            times: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, time: f64) {
        if self.times.len() == self.capacity {
            self.times.pop_front();
        }
        self.times.push_back(time);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> impl Iterator<Item = &f64> {
        self.times.iter()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.times.iter().copied().collect()
    }

    pub fn intervals(&self) -> RRSeries {
        RRSeries::from_beat_times(self.times.iter())
    }
}

/// Heart rate from the mean inter-beat interval of the retained beats.
#[derive(Debug, Clone)]
pub struct HeartRateEstimator {
    history: BeatHistory,
}

impl HeartRateEstimator {
    pub fn new(history_len: usize) -> Self {
        Self {
            history: BeatHistory::new(history_len),
        }
    }

    pub fn record(&mut self, beat: BeatEvent) {
        self.history.push(beat.time);
    }

    /// Beats per minute, or `None` with fewer than two beats or a
    /// non-positive mean interval.
    pub fn compute_rate(&self) -> Option<f64> {
        if self.history.len() < 2 {
            return None;
        }
        let rr = self.history.intervals();
        let mean_rr = rr.rr.iter().sum::<f64>() / rr.len() as f64;
        if mean_rr > 0.0 {
            Some(60.0 / mean_rr)
        } else {
            None
        }
    }

    pub fn rr_features(&self) -> Option<RrFeatures> {
        rr_features(&self.history.intervals())
    }

    pub fn history(&self) -> &BeatHistory {
        &self.history
    }
}
