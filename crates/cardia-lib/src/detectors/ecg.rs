use crate::{
    config::DetectorConfig,
    error::IngestError,
    signal::{validate_sample, BeatEvent, TimeSeries},
};
use std::collections::VecDeque;

/// Streaming Pan–Tompkins-style QRS detector.
///
/// Each sample goes through derivative → square → moving-window integration,
/// and the integrated energy is compared against `mean + scale * std` of the
/// last second of integrated values. Accepted beats are spaced by more than
/// the refractory period.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    integration_window: usize,
    threshold_span: usize,
    refractory_s: f64,
    threshold_scale: f64,
    prev_sample: f64,
    squared: VecDeque<f64>,
    integrated: VecDeque<f64>,
    running_mean: f64,
    running_std: f64,
    last_integrated: Option<f64>,
    last_beat: Option<f64>,
}

impl BeatDetector {
    /// `fs` sets the one-second threshold span; the integration window is
    /// `integration_window_s * fs` samples, truncated.
    pub fn new(fs: f64, cfg: &DetectorConfig) -> Self {
        let integration_window = ((cfg.integration_window_s * fs) as usize).max(1);
        let threshold_span = (fs as usize).max(integration_window);
        Self {
            integration_window,
            threshold_span,
            refractory_s: cfg.refractory_s,
            threshold_scale: cfg.threshold_scale,
            prev_sample: 0.0,
            squared: VecDeque::with_capacity(integration_window),
            integrated: VecDeque::with_capacity(threshold_span),
            running_mean: 0.0,
            running_std: 1.0,
            last_integrated: None,
            last_beat: None,
        }
    }

    /// Feed one sample observed at `now` seconds. Returns the beat accepted
    /// at this sample, if any. Non-finite input is rejected untouched.
    pub fn process(&mut self, sample: f64, now: f64) -> Result<Option<BeatEvent>, IngestError> {
        validate_sample(sample, now)?;

        let diff = sample - self.prev_sample;
        self.prev_sample = sample;
        push_bounded(&mut self.squared, diff * diff, self.integration_window);
        if self.squared.len() < self.integration_window {
            return Ok(None);
        }

        let integrated = mean(&self.squared);
        self.last_integrated = Some(integrated);
        push_bounded(&mut self.integrated, integrated, self.threshold_span);
        if self.integrated.len() >= self.integration_window {
            let (m, sd) = mean_std(&self.integrated);
            self.running_mean = m;
            self.running_std = sd;
        } else {
            self.running_mean = 0.0;
            self.running_std = 1.0;
        }

        let refractory_ok = match self.last_beat {
            Some(last) => now - last > self.refractory_s,
            None => true,
        };
        if integrated > self.threshold() && refractory_ok {
            self.last_beat = Some(now);
            return Ok(Some(BeatEvent { time: now }));
        }
        Ok(None)
    }

    /// Current adaptive threshold on the integrated energy.
    pub fn threshold(&self) -> f64 {
        self.running_mean + self.threshold_scale * self.running_std
    }

    pub fn running_mean(&self) -> f64 {
        self.running_mean
    }

    pub fn running_std(&self) -> f64 {
        self.running_std
    }

    /// Most recent integrated energy, once the integration window has filled.
    pub fn last_integrated(&self) -> Option<f64> {
        self.last_integrated
    }

    pub fn last_beat_time(&self) -> Option<f64> {
        self.last_beat
    }

    pub fn integration_window(&self) -> usize {
        self.integration_window
    }
}

/// Run the streaming detector over a recorded series, timestamping samples
/// by their index.
pub fn detect_beats(ts: &TimeSeries, cfg: &DetectorConfig) -> Vec<BeatEvent> {
    let mut detector = BeatDetector::new(ts.fs, cfg);
    let mut beats = Vec::new();
    for (i, &v) in ts.data.iter().enumerate() {
        if let Ok(Some(beat)) = detector.process(v, ts.time_of(i)) {
            beats.push(beat);
        }
    }
    beats
}

fn push_bounded(buf: &mut VecDeque<f64>, value: f64, cap: usize) {
    if buf.len() == cap {
        buf.pop_front();
    }
    buf.push_back(value);
}

fn mean(buf: &VecDeque<f64>) -> f64 {
    buf.iter().sum::<f64>() / buf.len() as f64
}

/// Mean and population standard deviation.
fn mean_std(buf: &VecDeque<f64>) -> (f64, f64) {
    let m = mean(buf);
    let var = buf.iter().map(|x| (x - m).powi(2)).sum::<f64>() / buf.len() as f64;
    (m, var.sqrt())
}
