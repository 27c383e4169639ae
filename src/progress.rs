// src/progress.rs

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Events pushed by sessions while a transfer runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Transfer began. `None` means the byte count will not be reported.
    Started { total_bytes: Option<u64> },
    ChunkCompleted { bytes: u64 },
    TransferFailed { reason: String },
    TransferSucceeded,
}

/// What a progress display should show.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressSignal {
    Indeterminate,
    /// Percentage in `0.0..=100.0`, never decreasing within a transfer.
    Determinate(f64),
    Failed,
    Completed,
}

/// Cloneable handle sessions use to publish [`ProgressEvent`]s.
///
/// Sending never fails: events are dropped when nobody listens.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A reporter that discards everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn started(&self, total_bytes: Option<u64>) {
        self.emit(ProgressEvent::Started { total_bytes });
    }

    pub fn chunk_completed(&self, bytes: u64) {
        self.emit(ProgressEvent::ChunkCompleted { bytes });
    }

    pub fn failed(&self, reason: impl Into<String>) {
        self.emit(ProgressEvent::TransferFailed {
            reason: reason.into(),
        });
    }

    pub fn succeeded(&self) {
        self.emit(ProgressEvent::TransferSucceeded);
    }
}

/// Folds [`ProgressEvent`]s into display signals for a single transfer.
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    total: Option<u64>,
    done: u64,
    determinate: bool,
    percent: f64,
    finished: bool,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_determinate(&self) -> bool {
        self.determinate
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }

    /// Applies one event and returns the signals it produces, in order.
    pub fn apply(&mut self, event: ProgressEvent) -> Vec<ProgressSignal> {
        if self.finished {
            return Vec::new();
        }
        match event {
            ProgressEvent::Started { total_bytes: Some(total) } => {
                self.total = Some(total);
                self.determinate = true;
                vec![ProgressSignal::Determinate(self.percent)]
            }
            ProgressEvent::Started { total_bytes: None } => {
                // Determinate mode is never left once entered.
                if self.determinate {
                    Vec::new()
                } else {
                    vec![ProgressSignal::Indeterminate]
                }
            }
            ProgressEvent::ChunkCompleted { bytes } => {
                self.done = self.done.saturating_add(bytes);
                let Some(total) = self.total else {
                    return Vec::new();
                };
                let fraction = if total == 0 {
                    1.0
                } else {
                    self.done as f64 / total as f64
                };
                self.determinate = true;
                self.percent = (fraction * 100.0).clamp(0.0, 100.0).max(self.percent);
                vec![ProgressSignal::Determinate(self.percent)]
            }
            ProgressEvent::TransferFailed { .. } => {
                self.finished = true;
                vec![ProgressSignal::Failed]
            }
            ProgressEvent::TransferSucceeded => {
                self.finished = true;
                self.percent = 100.0;
                vec![ProgressSignal::Determinate(100.0), ProgressSignal::Completed]
            }
        }
    }

    /// Consumes events until the channel closes or the transfer ends.
    pub async fn drive<F>(mut self, mut rx: UnboundedReceiver<ProgressEvent>, mut on_signal: F)
    where
        F: FnMut(ProgressSignal),
    {
        while let Some(event) = rx.recv().await {
            for signal in self.apply(event) {
                on_signal(signal);
            }
            if self.finished {
                break;
            }
        }
    }
}
