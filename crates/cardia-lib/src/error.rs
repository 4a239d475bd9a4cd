use std::path::PathBuf;
use thiserror::Error;

/// Rejection of a single malformed update. The rejected value never reaches
/// any buffer.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum IngestError {
    #[error("amplitude {0} is not finite")]
    NonFiniteAmplitude(f64),
    #[error("timestamp {0} is not finite")]
    NonFiniteTimestamp(f64),
    #[error("{field} probability {value} is outside [0, 1]")]
    ProbabilityOutOfRange { field: &'static str, value: f64 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("failed to read config {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to spawn {name} worker")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}
