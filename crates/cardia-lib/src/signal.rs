use crate::error::IngestError;
use serde::{Deserialize, Serialize};

/// Basic typed time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Uniform sampling frequency in Hz
    pub fs: f64,
    /// Samples
    pub data: Vec<f64>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn duration(&self) -> f64 {
        self.data.len() as f64 / self.fs
    }
    /// Timestamp (seconds) of the sample at `index`, derived from arrival order.
    pub fn time_of(&self, index: usize) -> f64 {
        index as f64 / self.fs
    }
}

/// Reject non-finite amplitudes and timestamps before they reach any state.
pub fn validate_sample(amplitude: f64, time: f64) -> Result<(), IngestError> {
    if !amplitude.is_finite() {
        return Err(IngestError::NonFiniteAmplitude(amplitude));
    }
    if !time.is_finite() {
        return Err(IngestError::NonFiniteTimestamp(time));
    }
    Ok(())
}

/// A detected heartbeat (QRS complex).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    /// Occurrence time in seconds
    pub time: f64,
}

/// Rhythm class, used both for the instantaneous classifier label and for the
/// debounced rhythm state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RhythmState {
    #[default]
    Normal,
    Abnormal,
}

impl RhythmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RhythmState::Normal => "normal",
            RhythmState::Abnormal => "abnormal",
        }
    }

    pub fn is_abnormal(&self) -> bool {
        matches!(self, RhythmState::Abnormal)
    }
}

impl std::fmt::Display for RhythmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classifier update. The two probabilities need not sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbability {
    pub p_normal: f64,
    pub p_abnormal: f64,
}

impl ClassProbability {
    /// Build a validated pair; each value must be finite and within [0, 1].
    pub fn new(p_normal: f64, p_abnormal: f64) -> Result<Self, IngestError> {
        check_probability("normal", p_normal)?;
        check_probability("abnormal", p_abnormal)?;
        Ok(Self {
            p_normal,
            p_abnormal,
        })
    }

    pub fn label(&self) -> RhythmState {
        if self.p_abnormal > self.p_normal {
            RhythmState::Abnormal
        } else {
            RhythmState::Normal
        }
    }
}

fn check_probability(field: &'static str, value: f64) -> Result<(), IngestError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(IngestError::ProbabilityOutOfRange { field, value })
    }
}

/// Latest raw classifier opinion, independent of the debounced rhythm state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstantClassification {
    pub p_normal: f64,
    pub p_abnormal: f64,
    pub label: RhythmState,
}

impl From<ClassProbability> for InstantClassification {
    fn from(p: ClassProbability) -> Self {
        Self {
            p_normal: p.p_normal,
            p_abnormal: p.p_abnormal,
            label: p.label(),
        }
    }
}

impl InstantClassification {
    /// Probability of the winning label.
    pub fn confidence(&self) -> f64 {
        match self.label {
            RhythmState::Abnormal => self.p_abnormal,
            RhythmState::Normal => self.p_normal,
        }
    }
}

/// RR intervals (seconds)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RRSeries {
    pub rr: Vec<f64>,
}

impl RRSeries {
    pub fn from_beat_times<'a>(times: impl IntoIterator<Item = &'a f64>) -> Self {
        let times: Vec<f64> = times.into_iter().copied().collect();
        let rr = times.windows(2).map(|w| w[1] - w[0]).collect();
        Self { rr }
    }

    pub fn len(&self) -> usize {
        self.rr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rr.is_empty()
    }
}
