use anyhow::{bail, Context, Result};
use cardia_lib::sinks::{ArchiveRecord, ArchiveSink};
use csv::{ReaderBuilder, WriterBuilder};
use log::{debug, info};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

pub const DEFAULT_ROWS_PER_FILE: usize = 50;

const FILE_PREFIX: &str = "ecg_windows_";

/// Appends archived windows as CSV rows to `ecg_windows_<n>.csv`, starting a
/// new file every `rows_per_file` rows. On open it continues the highest
/// numbered file if that one still has room.
#[derive(Debug)]
pub struct CsvArchiveSink {
    dir: PathBuf,
    window_len: usize,
    rows_per_file: usize,
    file_idx: u64,
    file_rows: usize,
}

impl CsvArchiveSink {
    pub fn open(dir: &Path, window_len: usize, rows_per_file: usize) -> Result<Self> {
        if rows_per_file == 0 {
            bail!("rows per archive file must be at least 1");
        }
        fs::create_dir_all(dir)
            .with_context(|| format!("creating archive directory {}", dir.display()))?;
        let (file_idx, file_rows) = resume_position(dir, rows_per_file)?;
        info!(
            "archiving to {} (file {}, {} rows already)",
            dir.display(),
            file_idx,
            file_rows
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            window_len,
            rows_per_file,
            file_idx,
            file_rows,
        })
    }

    pub fn current_path(&self) -> PathBuf {
        file_path(&self.dir, self.file_idx)
    }

    fn header(&self) -> Vec<String> {
        (0..self.window_len)
            .map(|i| format!("ecg_{i}"))
            .chain(
                ["reference_label", "predicted_label", "p_abnormal", "p_normal"]
                    .into_iter()
                    .map(String::from),
            )
            .collect()
    }
}

impl ArchiveSink for CsvArchiveSink {
    fn archive(&mut self, record: &ArchiveRecord) -> Result<()> {
        if record.window.len() != self.window_len {
            bail!(
                "window {} has {} samples, archive expects {}",
                record.sequence,
                record.window.len(),
                self.window_len
            );
        }
        let path = self.current_path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if needs_header {
            writer.write_record(self.header())?;
        }
        let mut row: Vec<String> = record.window.iter().map(|v| v.to_string()).collect();
        row.push(record.reference_label.clone().unwrap_or_default());
        row.push(
            record
                .predicted_label
                .map(|l| l.as_str().to_string())
                .unwrap_or_default(),
        );
        row.push(optional_cell(record.p_abnormal));
        row.push(optional_cell(record.p_normal));
        writer.write_record(&row)?;
        writer
            .flush()
            .with_context(|| format!("writing {}", path.display()))?;

        self.file_rows += 1;
        debug!(
            "archived window {} to {} (rows={})",
            record.sequence,
            path.display(),
            self.file_rows
        );
        if self.file_rows >= self.rows_per_file {
            self.file_idx += 1;
            self.file_rows = 0;
        }
        Ok(())
    }
}

fn optional_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn file_path(dir: &Path, idx: u64) -> PathBuf {
    dir.join(format!("{FILE_PREFIX}{idx}.csv"))
}

fn file_index(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix(FILE_PREFIX)?
        .strip_suffix(".csv")?
        .parse()
        .ok()
}

/// Index and row count of the file the next window should go to.
fn resume_position(dir: &Path, rows_per_file: usize) -> Result<(u64, usize)> {
    let mut latest = None;
    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        if let Some(idx) = file_index(&path) {
            if latest.map_or(true, |best| idx > best) {
                latest = Some(idx);
            }
        }
    }
    let Some(idx) = latest else {
        return Ok((0, 0));
    };
    let path = file_path(dir, idx);
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let mut rows = 0;
    for record in reader.records() {
        record.with_context(|| format!("reading {}", path.display()))?;
        rows += 1;
    }
    if rows < rows_per_file {
        Ok((idx, rows))
    } else {
        Ok((idx + 1, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardia_lib::RhythmState;
    use tempfile::tempdir;

    fn record(sequence: u64, classified: bool) -> ArchiveRecord {
        ArchiveRecord {
            sequence,
            window: vec![0.5, -1.0, 2.25],
            reference_label: classified.then(|| "sinus".to_string()),
            predicted_label: classified.then_some(RhythmState::Abnormal),
            p_abnormal: classified.then_some(0.75),
            p_normal: classified.then_some(0.25),
        }
    }

    fn read_rows(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
        let mut reader = ReaderBuilder::new().from_path(path).unwrap();
        let header = reader.headers().unwrap().iter().map(String::from).collect();
        let rows = reader
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect();
        (header, rows)
    }

    #[test]
    fn writes_header_once_and_empty_cells_for_missing_values() {
        let dir = tempdir().unwrap();
        let mut sink = CsvArchiveSink::open(dir.path(), 3, 50).unwrap();
        sink.archive(&record(0, false)).unwrap();
        sink.archive(&record(1, true)).unwrap();

        let (header, rows) = read_rows(&dir.path().join("ecg_windows_0.csv"));
        assert_eq!(
            header,
            [
                "ecg_0",
                "ecg_1",
                "ecg_2",
                "reference_label",
                "predicted_label",
                "p_abnormal",
                "p_normal"
            ]
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], ["0.5", "-1", "2.25", "", "", "", ""]);
        assert_eq!(rows[1], ["0.5", "-1", "2.25", "sinus", "abnormal", "0.75", "0.25"]);
    }

    #[test]
    fn rotates_and_resumes() {
        let dir = tempdir().unwrap();
        {
            let mut sink = CsvArchiveSink::open(dir.path(), 3, 2).unwrap();
            for seq in 0..5 {
                sink.archive(&record(seq, true)).unwrap();
            }
            assert_eq!(sink.current_path(), dir.path().join("ecg_windows_2.csv"));
        }
        assert_eq!(read_rows(&dir.path().join("ecg_windows_0.csv")).1.len(), 2);
        assert_eq!(read_rows(&dir.path().join("ecg_windows_1.csv")).1.len(), 2);

        // The last file holds one row, so a restart keeps filling it.
        let mut sink = CsvArchiveSink::open(dir.path(), 3, 2).unwrap();
        assert_eq!(sink.current_path(), dir.path().join("ecg_windows_2.csv"));
        sink.archive(&record(5, true)).unwrap();
        assert_eq!(read_rows(&dir.path().join("ecg_windows_2.csv")).1.len(), 2);

        // Now full, so the next restart moves on.
        let sink = CsvArchiveSink::open(dir.path(), 3, 2).unwrap();
        assert_eq!(sink.current_path(), dir.path().join("ecg_windows_3.csv"));
    }

    #[test]
    fn resume_orders_indices_numerically() {
        let dir = tempdir().unwrap();
        for idx in [2, 10] {
            fs::write(file_path(dir.path(), idx), "ecg_0,reference_label\n1,\n").unwrap();
        }
        fs::write(dir.path().join("notes.csv"), "x\n").unwrap();
        let sink = CsvArchiveSink::open(dir.path(), 1, 50).unwrap();
        assert_eq!(sink.current_path(), dir.path().join("ecg_windows_10.csv"));
    }

    #[test]
    fn rejects_mismatched_window() {
        let dir = tempdir().unwrap();
        let mut sink = CsvArchiveSink::open(dir.path(), 4, 50).unwrap();
        assert!(sink.archive(&record(0, true)).is_err());
        assert!(!sink.current_path().exists());
    }
}
