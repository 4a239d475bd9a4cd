mod alert;
mod archive;
mod synth;
mod wire;

use alert::LogAlertSink;
use anyhow::{Context, Result};
use archive::{CsvArchiveSink, DEFAULT_ROWS_PER_FILE};
use cardia_lib::{
    metrics::hrv::RrFeatures, InstantClassification, Monitor, MonitorConfig, RhythmState,
};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::{bounded, select, tick};
use log::{info, warn};
use serde::Serialize;
use std::{
    fs,
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use synth::SynthConfig;
use wire::{parse_line, WireLine};

#[derive(Parser)]
#[command(
    name = "cardia",
    version,
    about = "Cardia: real-time ECG beat and rhythm monitor"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct MonitorArgs {
    /// TOML file overriding the default monitor configuration
    #[arg(long)]
    config: Option<PathBuf>,
    /// Sampling frequency (Hz), overrides the config file
    #[arg(long)]
    fs: Option<f64>,
    /// Ground-truth label written next to each archived window
    #[arg(long)]
    reference_label: Option<String>,
    /// Directory for CSV window archives; archiving is off without it
    #[arg(long)]
    archive_dir: Option<PathBuf>,
    #[arg(long, default_value_t = DEFAULT_ROWS_PER_FILE)]
    rows_per_file: usize,
    /// Ring the terminal bell on alerts
    #[arg(long)]
    bell: bool,
}

#[derive(Args, Clone)]
struct SynthArgs {
    #[arg(long, default_value_t = 30.0)]
    seconds: f64,
    #[arg(long, default_value_t = 72.0)]
    heart_rate: f64,
    #[arg(long, default_value_t = 0.02)]
    noise_mv: f64,
    /// Abnormal episode start (seconds)
    #[arg(long)]
    episode_start: Option<f64>,
    /// Abnormal episode end (seconds)
    #[arg(long)]
    episode_end: Option<f64>,
    #[arg(long, default_value_t = 1.0)]
    classifier_hz: f64,
    #[arg(long, default_value_t = 7)]
    seed: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a device serial log (file or stdin) through the monitor and print a JSON summary
    Replay {
        #[arg(long)]
        input: Option<PathBuf>,
        #[command(flatten)]
        monitor: MonitorArgs,
    },
    /// Run sample, classifier and display threads against a synthetic recording
    Simulate {
        #[command(flatten)]
        monitor: MonitorArgs,
        #[command(flatten)]
        synth: SynthArgs,
        /// Pace producers at the sampling rate instead of running flat out
        #[arg(long)]
        realtime: bool,
        /// Interval between printed snapshots (ms)
        #[arg(long, default_value_t = 1000)]
        snapshot_ms: u64,
    },
    /// Write a synthetic device serial log
    Synth {
        #[command(flatten)]
        synth: SynthArgs,
        #[arg(long, default_value_t = 256.0)]
        fs: f64,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the effective monitor configuration as TOML
    Config {
        #[command(flatten)]
        monitor: MonitorArgs,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Replay { input, monitor } => cmd_replay(input.as_deref(), &monitor)?,
        Commands::Simulate {
            monitor,
            synth,
            realtime,
            snapshot_ms,
        } => cmd_simulate(&monitor, &synth, realtime, snapshot_ms)?,
        Commands::Synth { synth, fs, out } => cmd_synth(&synth, fs, out.as_deref())?,
        Commands::Config { monitor } => cmd_config(&monitor)?,
    }
    Ok(())
}

impl MonitorArgs {
    fn load_config(&self) -> Result<MonitorConfig> {
        let mut config = match &self.config {
            Some(path) => MonitorConfig::read(path)?,
            None => MonitorConfig::default(),
        };
        if let Some(fs) = self.fs {
            config.fs = fs;
        }
        if self.reference_label.is_some() {
            config.archive.reference_label = self.reference_label.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// `lossless_archive` trades producer latency for keeping every window;
    /// set it when the input is recorded rather than live.
    fn build_monitor(&self, config: MonitorConfig, lossless_archive: bool) -> Result<Monitor> {
        let mut builder = Monitor::builder(config.clone())
            .alert_sink(LogAlertSink::new(self.bell))
            .lossless_archive(lossless_archive);
        if let Some(dir) = &self.archive_dir {
            let sink = CsvArchiveSink::open(dir, config.window_size(), self.rows_per_file)?;
            builder = builder.archive_sink(sink);
        }
        Ok(builder.build()?)
    }
}

impl SynthArgs {
    fn to_config(&self, fs: f64) -> SynthConfig {
        let episode = match (self.episode_start, self.episode_end) {
            (Some(start), Some(end)) => Some((start, end)),
            (Some(start), None) => Some((start, self.seconds)),
            (None, Some(end)) => Some((0.0, end)),
            (None, None) => None,
        };
        SynthConfig {
            fs,
            seconds: self.seconds,
            heart_rate_bpm: self.heart_rate,
            noise_mv: self.noise_mv,
            episode,
            classifier_hz: self.classifier_hz,
            seed: self.seed,
            ..SynthConfig::default()
        }
    }
}

fn open_input(input: Option<&Path>) -> Result<Box<dyn BufRead>> {
    Ok(match input {
        Some(path) => {
            let file =
                fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(io::stdin().lock()),
    })
}

#[derive(Serialize)]
struct ReplaySummary {
    lines: usize,
    samples: u64,
    classifications: usize,
    ignored: usize,
    rejected: u64,
    beats: usize,
    onsets: usize,
    windows: u64,
    heart_rate_bpm: Option<f64>,
    rhythm: RhythmState,
    mean_abnormal: Option<f64>,
    instant: Option<InstantClassification>,
    rr_features: Option<RrFeatures>,
    dominant_frequency_hz: Option<f64>,
    dropped_outbound: u64,
    /// Device clock span covered by stamped sample lines.
    device_span_ms: Option<u64>,
}

fn cmd_replay(input: Option<&Path>, args: &MonitorArgs) -> Result<()> {
    let config = args.load_config()?;
    let fs = config.fs;
    // Replay outruns any sink; wait for the archive rather than lose windows.
    let monitor = args.build_monitor(config, true)?;
    let reader = open_input(input)?;

    let mut index = 0u64;
    let (mut lines, mut classifications, mut ignored, mut beats, mut onsets) = (0, 0, 0, 0, 0);
    let mut device_stamps: Option<(u64, u64)> = None;
    for line in reader.lines() {
        let line = line.with_context(|| match input {
            Some(path) => format!("reading {}", path.display()),
            None => "reading stdin".to_string(),
        })?;
        lines += 1;
        match parse_line(&line) {
            Some(WireLine::Sample {
                device_ms,
                millivolts,
            }) => {
                if let Some(ms) = device_ms {
                    let first = device_stamps.map_or(ms, |(first, _)| first);
                    device_stamps = Some((first, ms));
                }
                let now = index as f64 / fs;
                index += 1;
                if let Ok(outcome) = monitor.ingest_sample(millivolts, now) {
                    beats += usize::from(outcome.beat.is_some());
                }
            }
            Some(WireLine::Classification {
                p_normal,
                p_abnormal,
            }) => {
                classifications += 1;
                if let Ok(update) = monitor.ingest_classification(p_normal, p_abnormal) {
                    onsets += usize::from(update.onset);
                }
            }
            None => ignored += 1,
        }
    }

    let snapshot = monitor.snapshot();
    let summary = ReplaySummary {
        lines,
        samples: snapshot.samples_seen,
        classifications,
        ignored,
        rejected: monitor.rejected_updates(),
        beats,
        onsets,
        windows: monitor.windows_completed(),
        heart_rate_bpm: snapshot.heart_rate_bpm,
        rhythm: snapshot.rhythm,
        mean_abnormal: snapshot.mean_abnormal,
        instant: snapshot.instant,
        rr_features: snapshot.rr_features,
        dominant_frequency_hz: monitor
            .current_spectrum()
            .and_then(|s| s.dominant_frequency()),
        dropped_outbound: monitor.dropped_outbound(),
        device_span_ms: device_stamps.map(|(first, last)| last.saturating_sub(first)),
    };
    // Flush alert and archive workers before reporting.
    drop(monitor);
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

#[derive(Serialize)]
struct SnapshotLine {
    #[serde(rename = "final")]
    is_final: bool,
    elapsed_s: f64,
    samples: u64,
    heart_rate_bpm: Option<f64>,
    rhythm: RhythmState,
    mean_abnormal: Option<f64>,
    instant: Option<InstantClassification>,
    beats_held: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    onsets: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    windows: Option<u64>,
}

impl SnapshotLine {
    fn capture(monitor: &Monitor, started: Instant) -> Self {
        let snap = monitor.snapshot();
        Self {
            is_final: false,
            elapsed_s: started.elapsed().as_secs_f64(),
            samples: snap.samples_seen,
            heart_rate_bpm: snap.heart_rate_bpm,
            rhythm: snap.rhythm,
            mean_abnormal: snap.mean_abnormal,
            instant: snap.instant,
            beats_held: snap.beat_times.len(),
            onsets: None,
            windows: None,
        }
    }
}

fn pace(started: Instant, at_s: f64) {
    let target = Duration::from_secs_f64(at_s);
    if let Some(wait) = target.checked_sub(started.elapsed()) {
        thread::sleep(wait);
    }
}

fn cmd_simulate(
    args: &MonitorArgs,
    synth_args: &SynthArgs,
    realtime: bool,
    snapshot_ms: u64,
) -> Result<()> {
    let config = args.load_config()?;
    let recording = synth::generate(&synth_args.to_config(config.fs));
    let fs = config.fs;
    // Flat-out producers outrun the archive; only a paced run is live.
    let monitor = Arc::new(args.build_monitor(config, !realtime)?);
    info!(
        "simulating {:.1}s ({} samples, {} classifier updates)",
        synth_args.seconds,
        recording.samples.len(),
        recording.classifications.len()
    );

    let started = Instant::now();
    let (done_tx, done_rx) = bounded::<()>(0);
    let display = {
        let monitor = monitor.clone();
        let ticker = tick(Duration::from_millis(snapshot_ms.max(1)));
        thread::Builder::new()
            .name("cardia-display".into())
            .spawn(move || -> Result<()> {
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let line = SnapshotLine::capture(&monitor, started);
                            println!("{}", serde_json::to_string(&line)?);
                        }
                        recv(done_rx) -> _ => return Ok(()),
                    }
                }
            })?
    };

    let samples = recording.samples;
    let sampler = {
        let monitor = monitor.clone();
        thread::Builder::new()
            .name("cardia-samples".into())
            .spawn(move || {
                for (i, v) in samples.into_iter().enumerate() {
                    let result = if realtime {
                        pace(started, i as f64 / fs);
                        monitor.ingest_sample_now(v)
                    } else {
                        monitor.ingest_sample(v, i as f64 / fs)
                    };
                    if let Err(err) = result {
                        warn!("sample {} rejected: {}", i, err);
                    }
                }
            })?
    };
    let trace = recording.classifications;
    let classifier = {
        let monitor = monitor.clone();
        thread::Builder::new()
            .name("cardia-classifier".into())
            .spawn(move || {
                let mut onsets = 0;
                for (at, p_normal, p_abnormal) in trace {
                    if realtime {
                        pace(started, at);
                    }
                    match monitor.ingest_classification(p_normal, p_abnormal) {
                        Ok(update) => onsets += usize::from(update.onset),
                        Err(err) => warn!("classification rejected: {}", err),
                    }
                }
                onsets
            })?
    };

    sampler
        .join()
        .map_err(|_| anyhow::anyhow!("sample producer panicked"))?;
    let onsets = classifier
        .join()
        .map_err(|_| anyhow::anyhow!("classifier producer panicked"))?;
    drop(done_tx);
    display
        .join()
        .map_err(|_| anyhow::anyhow!("display thread panicked"))??;

    let mut last = SnapshotLine::capture(&monitor, started);
    last.is_final = true;
    last.onsets = Some(onsets);
    last.windows = Some(monitor.windows_completed());
    println!("{}", serde_json::to_string(&last)?);
    Ok(())
}

fn cmd_synth(args: &SynthArgs, fs: f64, out: Option<&Path>) -> Result<()> {
    let recording = synth::generate(&args.to_config(fs));
    let log = recording.to_serial_log();
    match out {
        Some(path) => {
            fs::write(path, log).with_context(|| format!("writing {}", path.display()))?;
            info!(
                "wrote {} samples ({} beats) to {}",
                recording.samples.len(),
                recording.beat_times.len(),
                path.display()
            );
        }
        None => print!("{}", log),
    }
    Ok(())
}

fn cmd_config(args: &MonitorArgs) -> Result<()> {
    let config = args.load_config()?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}
