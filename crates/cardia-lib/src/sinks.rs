//! Outbound collaborators: alert and archive sinks, and the bounded queue that
//! keeps their latency away from the producer paths.

use crate::error::MonitorError;
use crate::signal::RhythmState;
use anyhow::Result;
use crossbeam_channel::{bounded, Sender, TrySendError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Audible intensity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tone {
    pub frequency_hz: u32,
    pub duration_ms: u32,
}

impl Tone {
    pub const fn new(frequency_hz: u32, duration_ms: u32) -> Self {
        Self {
            frequency_hz,
            duration_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// One detected heartbeat.
    BeatTick,
    /// Transition of the debounced rhythm into the abnormal state.
    RhythmOnset,
}

pub trait AlertSink: Send + 'static {
    fn alert(&mut self, kind: AlertKind, intensity: Tone) -> Result<()>;
}

impl<F> AlertSink for F
where
    F: FnMut(AlertKind, Tone) -> Result<()> + Send + 'static,
{
    fn alert(&mut self, kind: AlertKind, intensity: Tone) -> Result<()> {
        self(kind, intensity)
    }
}

/// One full sample window offered for archiving, with the classifier opinion
/// current at the time the window completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// Zero-based count of windows offered so far.
    pub sequence: u64,
    /// Samples, oldest first.
    pub window: Vec<f64>,
    /// Caller-supplied ground truth, passed through untouched.
    pub reference_label: Option<String>,
    pub predicted_label: Option<RhythmState>,
    pub p_abnormal: Option<f64>,
    pub p_normal: Option<f64>,
}

pub trait ArchiveSink: Send + 'static {
    fn archive(&mut self, record: &ArchiveRecord) -> Result<()>;
}

impl<F> ArchiveSink for F
where
    F: FnMut(&ArchiveRecord) -> Result<()> + Send + 'static,
{
    fn archive(&mut self, record: &ArchiveRecord) -> Result<()> {
        self(record)
    }
}

/// Bounded queue drained by a dedicated worker thread. By default `offer`
/// never blocks; when the queue is full the message is dropped and counted.
/// A [`lossless`](Outbox::lossless) outbox waits for room instead.
pub struct Outbox<M: Send + 'static> {
    name: &'static str,
    lossless: bool,
    tx: Option<Sender<M>>,
    worker: Option<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

impl<M: Send + 'static> Outbox<M> {
    pub fn spawn<F>(
        name: &'static str,
        capacity: usize,
        mut handler: F,
    ) -> Result<Self, MonitorError>
    where
        F: FnMut(M) + Send + 'static,
    {
        let (tx, rx) = bounded::<M>(capacity.max(1));
        let worker = thread::Builder::new()
            .name(format!("cardia-{name}"))
            .spawn(move || {
                while let Ok(message) = rx.recv() {
                    handler(message);
                }
                debug!("{name} outbox drained");
            })
            .map_err(|source| MonitorError::Spawn { name, source })?;
        Ok(Self {
            name,
            lossless: false,
            tx: Some(tx),
            worker: Some(worker),
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Make `offer` wait for queue space instead of dropping. For offline
    /// sources, where the producer can afford to slow down to the sink.
    pub fn lossless(mut self) -> Self {
        self.lossless = true;
        self
    }

    /// Queue a message. Returns false if it was dropped.
    pub fn offer(&self, message: M) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };
        if self.lossless {
            if tx.send(message).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("{} worker is gone, dropped message", self.name);
                return false;
            }
            return true;
        }
        match tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("{} outbox full, dropped message ({} so far)", self.name, total);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("{} worker is gone, dropped message", self.name);
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting messages, let the worker drain what is queued and join it.
    pub fn close(&mut self) {
        self.tx.take();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("{} worker panicked", self.name);
            }
        }
    }
}

impl<M: Send + 'static> Drop for Outbox<M> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Outbox that forwards alerts to a sink, logging sink failures.
pub fn alert_outbox(
    mut sink: Box<dyn AlertSink>,
    capacity: usize,
) -> Result<Outbox<(AlertKind, Tone)>, MonitorError> {
    Outbox::spawn("alert", capacity, move |(kind, tone): (AlertKind, Tone)| {
        if let Err(err) = sink.alert(kind, tone) {
            warn!("alert sink failed for {:?}: {:#}", kind, err);
        }
    })
}

/// Outbox that forwards archive records to a sink, logging sink failures.
pub fn archive_outbox(
    mut sink: Box<dyn ArchiveSink>,
    capacity: usize,
) -> Result<Outbox<ArchiveRecord>, MonitorError> {
    Outbox::spawn("archive", capacity, move |record: ArchiveRecord| {
        if let Err(err) = sink.archive(&record) {
            warn!("archive sink failed for window {}: {:#}", record.sequence, err);
        }
    })
}
