//! Synthetic recordings for demos and end-to-end tests: a QRS-like pulse
//! train with optional noise, and a classifier probability trace with one
//! scripted abnormal episode.

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::f64::consts::PI;
use std::fmt::Write;

const PULSE_HALF_WIDTH_S: f64 = 0.04;
const MIN_RR_S: f64 = 0.35;

#[derive(Debug, Clone)]
pub struct SynthConfig {
    pub fs: f64,
    pub seconds: f64,
    pub heart_rate_bpm: f64,
    /// Uniform amplitude noise half-range (mV).
    pub noise_mv: f64,
    /// Relative RR jitter outside the episode.
    pub rr_jitter: f64,
    /// Relative RR jitter inside the episode.
    pub episode_rr_jitter: f64,
    /// Abnormal episode as `[start, end)` seconds, if any.
    pub episode: Option<(f64, f64)>,
    /// Classifier updates per second.
    pub classifier_hz: f64,
    pub seed: u64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            fs: 256.0,
            seconds: 30.0,
            heart_rate_bpm: 72.0,
            noise_mv: 0.02,
            rr_jitter: 0.02,
            episode_rr_jitter: 0.25,
            episode: None,
            classifier_hz: 1.0,
            seed: 7,
        }
    }
}

impl SynthConfig {
    fn in_episode(&self, t: f64) -> bool {
        self.episode
            .map_or(false, |(start, end)| t >= start && t < end)
    }
}

#[derive(Debug, Clone)]
pub struct Recording {
    pub fs: f64,
    pub samples: Vec<f64>,
    /// Centre of every generated complex (seconds).
    pub beat_times: Vec<f64>,
    /// `(time_s, p_normal, p_abnormal)` classifier updates.
    pub classifications: Vec<(f64, f64, f64)>,
}

pub fn generate(cfg: &SynthConfig) -> Recording {
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let base_rr = 60.0 / cfg.heart_rate_bpm.max(1.0);

    let mut beat_times = Vec::new();
    let mut t = base_rr.min(1.0);
    while t < cfg.seconds - PULSE_HALF_WIDTH_S {
        beat_times.push(t);
        let jitter = if cfg.in_episode(t) {
            cfg.episode_rr_jitter
        } else {
            cfg.rr_jitter
        };
        let scale = if jitter > 0.0 {
            1.0 + rng.gen_range(-jitter..jitter)
        } else {
            1.0
        };
        t += (base_rr * scale).max(MIN_RR_S);
    }

    let n = (cfg.seconds * cfg.fs) as usize;
    let mut samples = vec![0.0; n];
    for &centre in &beat_times {
        let first = ((centre - PULSE_HALF_WIDTH_S) * cfg.fs).ceil().max(0.0) as usize;
        let last = ((centre + PULSE_HALF_WIDTH_S) * cfg.fs).floor() as usize;
        let last = last.min(n.saturating_sub(1));
        for (i, sample) in samples.iter_mut().enumerate().take(last + 1).skip(first) {
            let dt = i as f64 / cfg.fs - centre;
            if dt.abs() < PULSE_HALF_WIDTH_S {
                *sample += 0.5 * (1.0 + (PI * dt / PULSE_HALF_WIDTH_S).cos());
            }
        }
    }
    if cfg.noise_mv > 0.0 {
        for sample in &mut samples {
            *sample += rng.gen_range(-cfg.noise_mv..cfg.noise_mv);
        }
    }

    let updates = (cfg.seconds * cfg.classifier_hz).floor() as usize;
    let classifications = (0..updates)
        .map(|k| {
            let t = (k + 1) as f64 / cfg.classifier_hz;
            let p_abnormal: f64 = if cfg.in_episode(t) {
                rng.gen_range(0.85..0.99)
            } else {
                rng.gen_range(0.01..0.1)
            };
            let p_abnormal = (p_abnormal * 1000.0).round() / 1000.0;
            (t, 1.0 - p_abnormal, p_abnormal)
        })
        .collect();

    Recording {
        fs: cfg.fs,
        samples,
        beat_times,
        classifications,
    }
}

impl Recording {
    /// Render as a device serial log: stamped sample lines with classifier
    /// lines interleaved at their scheduled times.
    pub fn to_serial_log(&self) -> String {
        let mut out = String::from("MAX30003 ready\n");
        let mut pending = self.classifications.iter().peekable();
        for (i, v) in self.samples.iter().enumerate() {
            let t = i as f64 / self.fs;
            while let Some(&&(at, p_normal, p_abnormal)) = pending.peek() {
                if at > t {
                    break;
                }
                let _ = writeln!(out, "Sinus prob: {:.3}, AFib prob: {:.3}", p_normal, p_abnormal);
                pending.next();
            }
            let _ = writeln!(out, "[{} ms] ECG= {:.4} mV", (t * 1000.0) as u64, v);
        }
        for &(_, p_normal, p_abnormal) in pending {
            let _ = writeln!(out, "Sinus = {:.3}, AFib = {:.3}", p_normal, p_abnormal);
        }
        out
    }
}
