use crate::config::RhythmConfig;
use crate::signal::{ClassProbability, RhythmState};
use log::info;
use serde::Serialize;
use std::collections::VecDeque;

/// Result of one evaluation of the rhythm state machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RhythmUpdate {
    pub state: RhythmState,
    /// True only on the evaluation that moved the state from normal to
    /// abnormal.
    pub onset: bool,
    /// Mean abnormal probability, once the window is full.
    pub mean_abnormal: Option<f64>,
}

/// Debounced rhythm classification over a rolling window of abnormal
/// probabilities, with separate enter and exit thresholds.
#[derive(Debug, Clone)]
pub struct RhythmClassifierState {
    window: VecDeque<f64>,
    capacity: usize,
    enter_threshold: f64,
    exit_threshold: f64,
    state: RhythmState,
}

impl RhythmClassifierState {
    pub fn new(cfg: &RhythmConfig) -> Self {
        let capacity = cfg.window.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            enter_threshold: cfg.enter_threshold,
            exit_threshold: cfg.exit_threshold,
            state: RhythmState::Normal,
        }
    }

    /// Append the abnormal probability, evicting the oldest beyond capacity.
    pub fn ingest(&mut self, p: ClassProbability) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(p.p_abnormal);
    }

    pub fn evaluate(&mut self) -> RhythmUpdate {
        let Some(mean) = self.mean_abnormal() else {
            return RhythmUpdate {
                state: RhythmState::Normal,
                onset: false,
                mean_abnormal: None,
            };
        };
        let mut onset = false;
        match self.state {
            RhythmState::Normal if mean > self.enter_threshold => {
                info!(
                    "rhythm abnormal: mean abnormal probability {:.3} > {:.3}",
                    mean, self.enter_threshold
                );
                self.state = RhythmState::Abnormal;
                onset = true;
            }
            RhythmState::Abnormal if mean < self.exit_threshold => {
                info!(
                    "rhythm back to normal: mean abnormal probability {:.3} < {:.3}",
                    mean, self.exit_threshold
                );
                self.state = RhythmState::Normal;
            }
            _ => {}
        }
        RhythmUpdate {
            state: self.state,
            onset,
            mean_abnormal: Some(mean),
        }
    }

    pub fn state(&self) -> RhythmState {
        self.state
    }

    pub fn is_primed(&self) -> bool {
        self.window.len() == self.capacity
    }

    pub fn mean_abnormal(&self) -> Option<f64> {
        if !self.is_primed() {
            return None;
        }
        Some(self.window.iter().sum::<f64>() / self.window.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}
