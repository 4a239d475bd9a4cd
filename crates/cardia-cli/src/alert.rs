use anyhow::Result;
use cardia_lib::sinks::{AlertKind, AlertSink, Tone};
use log::{debug, info};
use std::io::Write;

/// Logs alerts; with `bell` set it also rings the terminal bell on stderr.
#[derive(Debug, Default)]
pub struct LogAlertSink {
    bell: bool,
    beats: u64,
    onsets: u64,
}

impl LogAlertSink {
    pub fn new(bell: bool) -> Self {
        Self {
            bell,
            ..Self::default()
        }
    }
}

impl AlertSink for LogAlertSink {
    fn alert(&mut self, kind: AlertKind, intensity: Tone) -> Result<()> {
        match kind {
            AlertKind::BeatTick => {
                self.beats += 1;
                debug!(
                    "beat #{} ({} Hz, {} ms)",
                    self.beats, intensity.frequency_hz, intensity.duration_ms
                );
            }
            AlertKind::RhythmOnset => {
                self.onsets += 1;
                info!(
                    "abnormal rhythm onset #{} ({} Hz, {} ms)",
                    self.onsets, intensity.frequency_hz, intensity.duration_ms
                );
            }
        }
        if self.bell {
            let mut err = std::io::stderr().lock();
            err.write_all(b"\x07")?;
            err.flush()?;
        }
        Ok(())
    }
}
