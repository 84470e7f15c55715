//! Progress events emitted by the convert engine
//!
//! The engine knows nothing about rendering; it emits these over an mpsc
//! channel and the CLI (or any other front-end) draws them.

use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum ConvertEvent {
    /// Coarse status line, e.g. "Scanning existing downloads".
    Status(String),
    /// Batch composition after dedupe: how many jobs will run out of
    /// how many rows total.
    BatchInit { new: usize, total: usize },
    /// A job was skipped because it already exists.
    JobSkipped { index: usize, title: String },
    /// A job started downloading.
    JobInit { index: usize, title: String },
    /// Parsed downloader progress for a running job.
    Progress {
        index: usize,
        percent: f64,
        speed: Option<String>,
        eta: Option<String>,
    },
    JobDone { index: usize },
    JobFailed { index: usize, message: String },
    /// Coarse batch progress: jobs finished out of jobs dispatched.
    Overall { completed: usize, total: usize },
    /// Cancellation was requested; remaining jobs will not run.
    BatchCancelled,
    /// Terminal event with final counts.
    Complete {
        succeeded: usize,
        skipped: usize,
        failed: usize,
    },
}

/// Cloneable handle the engine emits through. Holding `None` makes the
/// engine silent, which tests use.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<mpsc::UnboundedSender<ConvertEvent>>,
}

impl EventSink {
    pub fn new(sender: mpsc::UnboundedSender<ConvertEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Silent sink.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Emit an event. A closed receiver is fine; rendering going away
    /// must never fail the batch.
    pub fn emit(&self, event: ConvertEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}
