pub mod config;
pub mod detectors;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod rhythm;
pub mod ring;
pub mod signal;
pub mod sinks;

pub use config::MonitorConfig;
pub use error::{ConfigError, IngestError, MonitorError};
pub use monitor::{Monitor, MonitorBuilder, MonitorSnapshot, SampleOutcome};
pub use signal::*;
