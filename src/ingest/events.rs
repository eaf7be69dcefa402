//! Run lifecycle events
//!
//! The orchestrator pushes typed events into an unbounded channel and never
//! waits on whoever consumes them.

use crate::runs::{RunStatus, RunTotals};
use serde::Serialize;
use tokio::sync::mpsc;

/// Severity of a [`IngestEvent::Log`] line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One event of an ingestion run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum IngestEvent {
    /// `run_id` is `None` when the run ledger is unavailable
    RunStarted { run_id: Option<String> },
    Progress { step: String, percent: u8 },
    Log { level: LogLevel, message: String },
    Queue {
        current: usize,
        total: usize,
        item_id: String,
    },
    Complete {
        status: RunStatus,
        stats: RunTotals,
        run_id: Option<String>,
    },
}

/// Sending half of the event stream. A default sink drops everything.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<IngestEvent>>,
}

impl EventSink {
    /// Create a sink and the receiver its events arrive on
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<IngestEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Push an event; a dropped receiver is ignored
    pub fn send(&self, event: IngestEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn progress(&self, step: impl Into<String>, percent: u8) {
        self.send(IngestEvent::Progress {
            step: step.into(),
            percent: percent.min(100),
        });
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.send(IngestEvent::Log {
            level,
            message: message.into(),
        });
    }

    pub fn queue(&self, current: usize, total: usize, item_id: impl Into<String>) {
        self.send(IngestEvent::Queue {
            current,
            total,
            item_id: item_id.into(),
        });
    }
}
