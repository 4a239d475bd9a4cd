use crate::error::ConfigError;
use crate::sinks::Tone;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Upper bound on every length the monitor preallocates: ring, threshold
/// span, beat and rhythm histories, outbound queues.
pub const MAX_BUFFER_LEN: usize = 1 << 22;

/// Top-level monitor configuration. Every field has a default, so a TOML file
/// only needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Nominal sampling frequency (Hz).
    pub fs: f64,
    /// Length of the sliding sample window and of each archived window (seconds).
    pub window_sec: f64,
    /// Number of beat timestamps retained for rate estimation.
    pub beat_history: usize,
    pub detector: DetectorConfig,
    pub rhythm: RhythmConfig,
    pub alerts: AlertConfig,
    pub archive: ArchiveConfig,
}

/// Parameters of the streaming QRS detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Moving window integration length (seconds).
    pub integration_window_s: f64,
    /// Minimum spacing between accepted beats (seconds).
    pub refractory_s: f64,
    /// Multiple of the running standard deviation added to the running mean.
    pub threshold_scale: f64,
}

/// Hysteresis parameters of the rhythm state machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RhythmConfig {
    /// Mean abnormal probability above which the state becomes abnormal.
    pub enter_threshold: f64,
    /// Mean abnormal probability below which the state returns to normal.
    pub exit_threshold: f64,
    /// Number of classifier updates averaged.
    pub window: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Emit an alert for every detected beat.
    pub beat_ticks: bool,
    /// Pending alerts beyond this are dropped.
    pub queue_capacity: usize,
    pub beat_tone: Tone,
    pub onset_tone: Tone,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Opaque ground-truth label attached to every archived window.
    pub reference_label: Option<String>,
    /// Pending windows beyond this are dropped.
    pub queue_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            fs: 256.0,
            window_sec: 10.0,
            beat_history: 20,
            detector: DetectorConfig::default(),
            rhythm: RhythmConfig::default(),
            alerts: AlertConfig::default(),
            archive: ArchiveConfig::default(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            integration_window_s: 0.15,
            refractory_s: 0.3,
            threshold_scale: 0.5,
        }
    }
}

impl Default for RhythmConfig {
    fn default() -> Self {
        Self {
            enter_threshold: 0.8,
            exit_threshold: 0.2,
            window: 10,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            beat_ticks: true,
            queue_capacity: 64,
            beat_tone: Tone::new(600, 220),
            onset_tone: Tone::new(1500, 500),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            reference_label: None,
            queue_capacity: 4,
        }
    }
}

impl MonitorConfig {
    /// Samples held by the ring and offered per archived window.
    pub fn window_size(&self) -> usize {
        (self.fs * self.window_sec).round() as usize
    }

    /// Moving-average integration length in samples (truncated).
    pub fn integration_window(&self) -> usize {
        (self.detector.integration_window_s * self.fs) as usize
    }

    /// One second of integrated values, the span of the adaptive threshold.
    pub fn threshold_window(&self) -> usize {
        self.fs as usize
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fs.is_finite() && self.fs >= 1.0) {
            return Err(ConfigError::invalid("fs", format!("{} Hz", self.fs)));
        }
        if self.threshold_window() > MAX_BUFFER_LEN {
            return Err(ConfigError::invalid(
                "fs",
                format!("{} Hz exceeds {} samples per second", self.fs, MAX_BUFFER_LEN),
            ));
        }
        if !(self.window_sec.is_finite() && self.window_sec > 0.0) || self.window_size() == 0 {
            return Err(ConfigError::invalid(
                "window_sec",
                format!("{} s holds no samples", self.window_sec),
            ));
        }
        if self.window_size() > MAX_BUFFER_LEN {
            return Err(ConfigError::invalid(
                "window_sec",
                format!(
                    "{} samples per window exceeds {}",
                    self.window_size(),
                    MAX_BUFFER_LEN
                ),
            ));
        }
        if self.beat_history < 2 {
            return Err(ConfigError::invalid(
                "beat_history",
                "at least two beats are needed for a rate",
            ));
        }
        check_len("beat_history", self.beat_history)?;
        let ma_win = self.integration_window();
        if ma_win == 0 || ma_win > self.threshold_window() {
            return Err(ConfigError::invalid(
                "detector.integration_window_s",
                format!(
                    "{} samples must be between 1 and {}",
                    ma_win,
                    self.threshold_window()
                ),
            ));
        }
        let d = &self.detector;
        if !(d.refractory_s.is_finite() && d.refractory_s >= 0.0) {
            return Err(ConfigError::invalid(
                "detector.refractory_s",
                format!("{}", d.refractory_s),
            ));
        }
        if !(d.threshold_scale.is_finite() && d.threshold_scale >= 0.0) {
            return Err(ConfigError::invalid(
                "detector.threshold_scale",
                format!("{}", d.threshold_scale),
            ));
        }
        let r = &self.rhythm;
        if !(0.0..=1.0).contains(&r.exit_threshold)
            || !(0.0..=1.0).contains(&r.enter_threshold)
            || r.exit_threshold >= r.enter_threshold
        {
            return Err(ConfigError::invalid(
                "rhythm",
                format!(
                    "need 0 <= exit ({}) < enter ({}) <= 1",
                    r.exit_threshold, r.enter_threshold
                ),
            ));
        }
        if r.window == 0 {
            return Err(ConfigError::invalid("rhythm.window", "must be positive"));
        }
        check_len("rhythm.window", r.window)?;
        if self.alerts.queue_capacity == 0 {
            return Err(ConfigError::invalid("alerts.queue_capacity", "must be positive"));
        }
        check_len("alerts.queue_capacity", self.alerts.queue_capacity)?;
        if self.archive.queue_capacity == 0 {
            return Err(ConfigError::invalid("archive.queue_capacity", "must be positive"));
        }
        check_len("archive.queue_capacity", self.archive.queue_capacity)?;
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: MonitorConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: "<inline>".into(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: MonitorConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn check_len(field: &'static str, len: usize) -> Result<(), ConfigError> {
    if len > MAX_BUFFER_LEN {
        return Err(ConfigError::invalid(
            field,
            format!("{} exceeds {}", len, MAX_BUFFER_LEN),
        ));
    }
    Ok(())
}
