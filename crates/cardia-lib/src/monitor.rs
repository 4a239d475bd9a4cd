use crate::{
    config::MonitorConfig,
    detectors::ecg::BeatDetector,
    error::{IngestError, MonitorError},
    metrics::{
        heart_rate::HeartRateEstimator,
        hrv::RrFeatures,
        spectrum::{magnitude_spectrum, Spectrum},
    },
    rhythm::{RhythmClassifierState, RhythmUpdate},
    ring::SampleRing,
    signal::{validate_sample, BeatEvent, ClassProbability, InstantClassification, RhythmState},
    sinks::{
        alert_outbox, archive_outbox, AlertKind, AlertSink, ArchiveRecord, ArchiveSink, Outbox,
        Tone,
    },
};
use log::{debug, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// What a single accepted sample produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SampleOutcome {
    pub beat: Option<BeatEvent>,
    /// The sample completed a full window, which was offered for archiving.
    pub window_completed: bool,
}

/// Every display value, captured under one lock acquisition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    pub samples_seen: u64,
    /// Current window, oldest first, zero-padded in front until it fills.
    pub window: Vec<f64>,
    pub rhythm: RhythmState,
    pub mean_abnormal: Option<f64>,
    pub instant: Option<InstantClassification>,
    pub heart_rate_bpm: Option<f64>,
    pub beat_times: Vec<f64>,
    pub rr_features: Option<RrFeatures>,
}

struct MonitorState {
    ring: SampleRing,
    detector: BeatDetector,
    heart_rate: HeartRateEstimator,
    rhythm: RhythmClassifierState,
    instant: Option<InstantClassification>,
    since_archive: usize,
    windows_offered: u64,
    reference_label: Option<String>,
}

impl MonitorState {
    fn new(config: &MonitorConfig) -> Self {
        Self {
            ring: SampleRing::new(config.window_size()),
            detector: BeatDetector::new(config.fs, &config.detector),
            heart_rate: HeartRateEstimator::new(config.beat_history),
            rhythm: RhythmClassifierState::new(&config.rhythm),
            instant: None,
            since_archive: 0,
            windows_offered: 0,
            reference_label: config.archive.reference_label.clone(),
        }
    }

    fn archive_record(&mut self) -> ArchiveRecord {
        let record = ArchiveRecord {
            sequence: self.windows_offered,
            window: self.ring.snapshot(),
            reference_label: self.reference_label.clone(),
            predicted_label: self.instant.map(|c| c.label),
            p_abnormal: self.instant.map(|c| c.p_abnormal),
            p_normal: self.instant.map(|c| c.p_normal),
        };
        self.windows_offered += 1;
        record
    }

    fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            samples_seen: self.ring.total_pushed(),
            window: self.ring.snapshot(),
            rhythm: self.rhythm.state(),
            mean_abnormal: self.rhythm.mean_abnormal(),
            instant: self.instant,
            heart_rate_bpm: self.heart_rate.compute_rate(),
            beat_times: self.heart_rate.history().to_vec(),
            rr_features: self.heart_rate.rr_features(),
        }
    }
}

pub struct MonitorBuilder {
    config: MonitorConfig,
    alert_sink: Option<Box<dyn AlertSink>>,
    archive_sink: Option<Box<dyn ArchiveSink>>,
    lossless_archive: bool,
}

impl MonitorBuilder {
    pub fn alert_sink(mut self, sink: impl AlertSink) -> Self {
        self.alert_sink = Some(Box::new(sink));
        self
    }

    pub fn archive_sink(mut self, sink: impl ArchiveSink) -> Self {
        self.archive_sink = Some(Box::new(sink));
        self
    }

    /// When set, a full archive queue makes `ingest_sample` wait for the sink
    /// instead of dropping the window. Meant for recorded input; the wait
    /// happens after the state lock is released.
    pub fn lossless_archive(mut self, lossless: bool) -> Self {
        self.lossless_archive = lossless;
        self
    }

    pub fn build(self) -> Result<Monitor, MonitorError> {
        self.config.validate()?;
        let alerts = match self.alert_sink {
            Some(sink) => Some(alert_outbox(sink, self.config.alerts.queue_capacity)?),
            None => None,
        };
        let archive = match self.archive_sink {
            Some(sink) => {
                let outbox = archive_outbox(sink, self.config.archive.queue_capacity)?;
                Some(if self.lossless_archive {
                    outbox.lossless()
                } else {
                    outbox
                })
            }
            None => None,
        };
        Ok(Monitor {
            state: Mutex::new(MonitorState::new(&self.config)),
            config: self.config,
            alerts,
            archive,
            rejected: AtomicU64::new(0),
            started: Instant::now(),
        })
    }
}

/// Real-time ECG monitor: owns the sample window, beat detector, heart-rate
/// history and rhythm state behind a single lock.
///
/// All entry points take `&self`; share it across producer and consumer
/// threads with an `Arc`. Sink calls happen on worker threads after the lock
/// is released.
pub struct Monitor {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
    alerts: Option<Outbox<(AlertKind, Tone)>>,
    archive: Option<Outbox<ArchiveRecord>>,
    rejected: AtomicU64,
    started: Instant,
}

impl Monitor {
    pub fn builder(config: MonitorConfig) -> MonitorBuilder {
        MonitorBuilder {
            config,
            alert_sink: None,
            archive_sink: None,
            lossless_archive: false,
        }
    }

    /// Monitor without alert or archive sinks.
    pub fn new(config: MonitorConfig) -> Result<Self, MonitorError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reject(&self, err: IngestError) -> IngestError {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        warn!("rejected update: {}", err);
        err
    }

    /// Feed one amplitude sample observed at `now` seconds.
    pub fn ingest_sample(&self, amplitude: f64, now: f64) -> Result<SampleOutcome, IngestError> {
        validate_sample(amplitude, now).map_err(|err| self.reject(err))?;

        let window_size = self.config.window_size();
        let (beat, record, window_completed) = {
            let mut state = self.lock();
            let beat = state.detector.process(amplitude, now)?;
            state.ring.push(amplitude);
            if let Some(beat) = beat {
                state.heart_rate.record(beat);
            }
            state.since_archive += 1;
            let window_completed = state.since_archive >= window_size;
            let mut record = None;
            if window_completed {
                state.since_archive = 0;
                if self.archive.is_some() {
                    record = Some(state.archive_record());
                } else {
                    state.windows_offered += 1;
                }
            }
            (beat, record, window_completed)
        };

        if let Some(beat) = beat {
            debug!("beat at {:.3}s", beat.time);
            if self.config.alerts.beat_ticks {
                self.alert(AlertKind::BeatTick);
            }
        }
        if let (Some(record), Some(archive)) = (record, self.archive.as_ref()) {
            debug!("offering window {} for archiving", record.sequence);
            archive.offer(record);
        }
        Ok(SampleOutcome {
            beat,
            window_completed,
        })
    }

    /// Feed one sample timestamped by the monitor's monotonic clock.
    pub fn ingest_sample_now(&self, amplitude: f64) -> Result<SampleOutcome, IngestError> {
        self.ingest_sample(amplitude, self.started.elapsed().as_secs_f64())
    }

    /// Feed one classifier update and re-evaluate the debounced rhythm.
    pub fn ingest_classification(
        &self,
        p_normal: f64,
        p_abnormal: f64,
    ) -> Result<RhythmUpdate, IngestError> {
        let p = ClassProbability::new(p_normal, p_abnormal).map_err(|err| self.reject(err))?;
        let update = {
            let mut state = self.lock();
            state.instant = Some(p.into());
            state.rhythm.ingest(p);
            state.rhythm.evaluate()
        };
        if update.onset {
            self.alert(AlertKind::RhythmOnset);
        }
        Ok(update)
    }

    fn alert(&self, kind: AlertKind) {
        let Some(alerts) = self.alerts.as_ref() else {
            return;
        };
        let tone = match kind {
            AlertKind::BeatTick => self.config.alerts.beat_tone,
            AlertKind::RhythmOnset => self.config.alerts.onset_tone,
        };
        alerts.offer((kind, tone));
    }

    /// Ground-truth label attached to subsequently archived windows.
    pub fn set_reference_label(&self, label: Option<String>) {
        self.lock().reference_label = label;
    }

    pub fn current_window(&self) -> Vec<f64> {
        self.lock().ring.snapshot()
    }

    pub fn current_rhythm_state(&self) -> RhythmState {
        self.lock().rhythm.state()
    }

    pub fn instant_classification(&self) -> Option<InstantClassification> {
        self.lock().instant
    }

    pub fn current_heart_rate(&self) -> Option<f64> {
        self.lock().heart_rate.compute_rate()
    }

    pub fn rr_features(&self) -> Option<RrFeatures> {
        self.lock().heart_rate.rr_features()
    }

    pub fn beat_times(&self) -> Vec<f64> {
        self.lock().heart_rate.history().to_vec()
    }

    /// Magnitude spectrum of the current window. The FFT runs outside the lock.
    pub fn current_spectrum(&self) -> Option<Spectrum> {
        let window = self.current_window();
        magnitude_spectrum(&window, self.config.fs)
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        self.lock().snapshot()
    }

    pub fn samples_seen(&self) -> u64 {
        self.lock().ring.total_pushed()
    }

    /// Full windows completed so far.
    pub fn windows_completed(&self) -> u64 {
        self.lock().windows_offered
    }

    /// Updates rejected as malformed.
    pub fn rejected_updates(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Alerts and archive records dropped because a sink fell behind.
    pub fn dropped_outbound(&self) -> u64 {
        let alerts = self.alerts.as_ref().map_or(0, |o| o.dropped());
        let archive = self.archive.as_ref().map_or(0, |o| o.dropped());
        alerts + archive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};
    use std::f64::consts::PI;
    use std::sync::Arc;
    use std::thread;

    fn small_config() -> MonitorConfig {
        MonitorConfig {
            fs: 64.0,
            window_sec: 1.0,
            ..MonitorConfig::default()
        }
    }

    fn alert_channel() -> (impl AlertSink, Receiver<AlertKind>) {
        let (tx, rx) = unbounded();
        let sink = move |kind: AlertKind, _tone: Tone| -> anyhow::Result<()> {
            let _ = tx.send(kind);
            Ok(())
        };
        (sink, rx)
    }

    fn archive_channel() -> (impl ArchiveSink, Receiver<ArchiveRecord>) {
        let (tx, rx) = unbounded();
        let sink = move |record: &ArchiveRecord| -> anyhow::Result<()> {
            let _ = tx.send(record.clone());
            Ok(())
        };
        (sink, rx)
    }

    fn hann_pulse(t: f64, centers: &[f64]) -> f64 {
        centers
            .iter()
            .filter(|&&c| (t - c).abs() < 0.04)
            .map(|&c| 0.5 * (1.0 + (PI * (t - c) / 0.04).cos()))
            .sum()
    }

    #[test]
    fn beats_drive_heart_rate_and_tick_alerts() {
        let (sink, alerts) = alert_channel();
        let monitor = Monitor::builder(MonitorConfig::default())
            .alert_sink(sink)
            .build()
            .unwrap();
        assert_eq!(monitor.current_heart_rate(), None);

        let fs = monitor.config().fs;
        let centers: Vec<f64> = (0..12).map(|k| 1.0 + 0.8 * k as f64).collect();
        let mut beats = 0;
        for i in 0..(10.0 * fs) as usize {
            let t = i as f64 / fs;
            if monitor.ingest_sample(hann_pulse(t, &centers), t).unwrap().beat.is_some() {
                beats += 1;
            }
        }
        assert_eq!(beats, 12);
        assert_eq!(monitor.beat_times().len(), 12);
        let bpm = monitor.current_heart_rate().unwrap();
        assert!((bpm - 75.0).abs() < 1.5, "bpm {}", bpm);
        assert!(monitor.rr_features().is_some());

        drop(monitor);
        let ticks: Vec<AlertKind> = alerts.try_iter().collect();
        assert_eq!(ticks.len(), 12);
        assert!(ticks.iter().all(|k| *k == AlertKind::BeatTick));
    }

    #[test]
    fn onset_alert_fires_once() {
        let (sink, alerts) = alert_channel();
        let monitor = Monitor::builder(small_config())
            .alert_sink(sink)
            .build()
            .unwrap();
        for i in 0..9 {
            let update = monitor.ingest_classification(0.1, 0.9).unwrap();
            assert_eq!(update.state, RhythmState::Normal, "update {}", i);
        }
        let update = monitor.ingest_classification(0.1, 0.9).unwrap();
        assert!(update.onset);
        for _ in 0..5 {
            monitor.ingest_classification(0.1, 0.9).unwrap();
        }
        assert_eq!(monitor.current_rhythm_state(), RhythmState::Abnormal);

        drop(monitor);
        let onsets = alerts
            .try_iter()
            .filter(|k| *k == AlertKind::RhythmOnset)
            .count();
        assert_eq!(onsets, 1);
    }

    #[test]
    fn instant_classification_is_independent_of_debounced_state() {
        let monitor = Monitor::new(small_config()).unwrap();
        assert_eq!(monitor.instant_classification(), None);
        monitor.ingest_classification(0.2, 0.7).unwrap();
        let instant = monitor.instant_classification().unwrap();
        assert_eq!(instant.label, RhythmState::Abnormal);
        assert_eq!(instant.p_abnormal, 0.7);
        assert!((instant.confidence() - 0.7).abs() < 1e-12);
        assert_eq!(monitor.current_rhythm_state(), RhythmState::Normal);
    }

    #[test]
    fn archives_every_full_window_with_reference_label() {
        let (sink, records) = archive_channel();
        let monitor = Monitor::builder(small_config())
            .archive_sink(sink)
            .build()
            .unwrap();
        let window = monitor.config().window_size();
        assert_eq!(window, 64);

        for i in 0..window {
            let outcome = monitor.ingest_sample(i as f64, i as f64 / 64.0).unwrap();
            assert_eq!(outcome.window_completed, i + 1 == window);
        }
        monitor.set_reference_label(Some("sinus".into()));
        monitor.ingest_classification(0.35, 0.6).unwrap();
        for i in window..(2 * window + 10) {
            monitor.ingest_sample(i as f64, i as f64 / 64.0).unwrap();
        }
        assert_eq!(monitor.windows_completed(), 2);

        drop(monitor);
        let records: Vec<ArchiveRecord> = records.try_iter().collect();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.sequence, 0);
        assert_eq!(first.window, (0..64).map(|v| v as f64).collect::<Vec<_>>());
        assert_eq!(first.reference_label, None);
        assert_eq!(first.predicted_label, None);
        assert_eq!(first.p_abnormal, None);

        let second = &records[1];
        assert_eq!(second.sequence, 1);
        assert_eq!(second.window, (64..128).map(|v| v as f64).collect::<Vec<_>>());
        assert_eq!(second.reference_label.as_deref(), Some("sinus"));
        assert_eq!(second.predicted_label, Some(RhythmState::Abnormal));
        assert_eq!(second.p_abnormal, Some(0.6));
        assert_eq!(second.p_normal, Some(0.35));
    }

    #[test]
    fn failing_archive_sink_does_not_stall_ingestion() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let sink = move |_record: &ArchiveRecord| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("disk full")
        };
        let monitor = Monitor::builder(small_config())
            .archive_sink(sink)
            .build()
            .unwrap();
        for i in 0..3 * 64 {
            monitor.ingest_sample(0.0, i as f64 / 64.0).unwrap();
        }
        assert_eq!(monitor.windows_completed(), 3);
        assert_eq!(monitor.samples_seen(), 192);

        drop(monitor);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn lossless_archive_keeps_every_window_behind_a_slow_sink() {
        let (tx, records) = unbounded();
        let sink = move |record: &ArchiveRecord| -> anyhow::Result<()> {
            thread::sleep(std::time::Duration::from_millis(5));
            let _ = tx.send(record.sequence);
            Ok(())
        };
        let mut config = small_config();
        config.archive.queue_capacity = 1;
        let monitor = Monitor::builder(config)
            .archive_sink(sink)
            .lossless_archive(true)
            .build()
            .unwrap();
        for i in 0..8 * 64 {
            monitor.ingest_sample(0.0, i as f64 / 64.0).unwrap();
        }
        assert_eq!(monitor.dropped_outbound(), 0);

        drop(monitor);
        assert_eq!(records.try_iter().collect::<Vec<_>>(), (0..8).collect::<Vec<u64>>());
    }

    #[test]
    fn malformed_updates_leave_state_unchanged() {
        let monitor = Monitor::new(MonitorConfig::default()).unwrap();
        let fs = monitor.config().fs;
        let centers = [1.0, 1.8, 2.6];
        for i in 0..(3.0 * fs) as usize {
            let t = i as f64 / fs;
            monitor.ingest_sample(hann_pulse(t, &centers), t).unwrap();
        }
        for _ in 0..10 {
            monitor.ingest_classification(0.5, 0.5).unwrap();
        }
        let before = monitor.snapshot();
        assert_eq!(before.beat_times.len(), 3);

        assert!(matches!(
            monitor.ingest_sample(f64::NAN, 3.0),
            Err(IngestError::NonFiniteAmplitude(_))
        ));
        assert!(monitor.ingest_sample(1.0, f64::INFINITY).is_err());
        assert!(monitor.ingest_classification(f64::NAN, 0.1).is_err());
        assert!(monitor.ingest_classification(0.1, 1.5).is_err());

        assert_eq!(monitor.snapshot(), before);
        assert_eq!(monitor.rejected_updates(), 4);

        // Processing continues after a rejection.
        monitor.ingest_sample(0.0, 3.0).unwrap();
        assert_eq!(monitor.samples_seen(), before.samples_seen + 1);
    }

    #[test]
    fn snapshot_serializes_for_display() {
        let monitor = Monitor::new(small_config()).unwrap();
        monitor.ingest_sample_now(0.5).unwrap();
        monitor.ingest_sample_now(0.25).unwrap();
        monitor.ingest_classification(0.9, 0.1).unwrap();

        let value = serde_json::to_value(monitor.snapshot()).unwrap();
        assert_eq!(value["samples_seen"], 2);
        assert_eq!(value["rhythm"], "normal");
        assert_eq!(value["instant"]["label"], "normal");
        assert!(value["heart_rate_bpm"].is_null());
        let window = value["window"].as_array().unwrap();
        assert_eq!(window.len(), 64);
        assert_eq!(window[63], 0.25);
    }

    #[test]
    fn spectrum_of_current_window() {
        let monitor = Monitor::new(MonitorConfig::default()).unwrap();
        let fs = monitor.config().fs;
        for i in 0..monitor.config().window_size() {
            let t = i as f64 / fs;
            monitor.ingest_sample((2.0 * PI * 5.0 * t).sin(), t).unwrap();
        }
        let spectrum = monitor.current_spectrum().unwrap();
        assert!((spectrum.dominant_frequency().unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn concurrent_producers_and_consumers_see_whole_updates() {
        const SAMPLES: usize = 20_000;
        const UPDATES: usize = 500;
        let monitor = Arc::new(Monitor::new(small_config()).unwrap());
        let capacity = monitor.config().window_size();

        let sampler = {
            let monitor = monitor.clone();
            thread::spawn(move || {
                for i in 0..SAMPLES {
                    monitor.ingest_sample(i as f64, i as f64 / 64.0).unwrap();
                }
            })
        };
        let classifier = {
            let monitor = monitor.clone();
            thread::spawn(move || {
                for k in 0..UPDATES {
                    let p_abnormal = (k % 100) as f64 / 100.0;
                    monitor
                        .ingest_classification(1.0 - p_abnormal, p_abnormal)
                        .unwrap();
                }
            })
        };
        let consumer = {
            let monitor = monitor.clone();
            thread::spawn(move || {
                let mut last_seen = 0;
                for _ in 0..2_000 {
                    let snap = monitor.snapshot();
                    assert!(snap.samples_seen >= last_seen);
                    last_seen = snap.samples_seen;

                    // The window must be exactly the last samples pushed, in order.
                    let seen = snap.samples_seen as usize;
                    let held = seen.min(capacity);
                    let expected: Vec<f64> = std::iter::repeat(0.0)
                        .take(capacity - held)
                        .chain((seen - held..seen).map(|v| v as f64))
                        .collect();
                    assert_eq!(snap.window, expected);

                    if let Some(instant) = snap.instant {
                        assert!((instant.p_normal + instant.p_abnormal - 1.0).abs() < 1e-9);
                    }
                }
            })
        };

        sampler.join().unwrap();
        classifier.join().unwrap();
        consumer.join().unwrap();

        let snap = monitor.snapshot();
        assert_eq!(snap.samples_seen, SAMPLES as u64);
        assert_eq!(monitor.windows_completed(), (SAMPLES / capacity) as u64);
        let last_abnormal = ((UPDATES - 1) % 100) as f64 / 100.0;
        assert_eq!(snap.instant.unwrap().p_abnormal, last_abnormal);
        assert_eq!(
            snap.window.last().copied(),
            Some((SAMPLES - 1) as f64)
        );
    }
}
