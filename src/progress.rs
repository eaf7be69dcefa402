//! Shared progress and logging helpers to keep progress bars pinned.

use crate::ingest::{IngestEvent, LogLevel};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::sync::OnceLock;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing_subscriber::fmt::MakeWriter;

static MULTI_PROGRESS: OnceLock<MultiProgress> = OnceLock::new();

fn multi_progress() -> &'static MultiProgress {
    MULTI_PROGRESS.get_or_init(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        mp
    })
}

pub fn add_progress_bar(len: u64) -> ProgressBar {
    multi_progress().add(ProgressBar::new(len))
}

/// Draw a run's event stream as a progress bar until the run completes or
/// the sending side goes away.
pub fn render_events(mut rx: UnboundedReceiver<IngestEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let pb = add_progress_bar(0);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        while let Some(event) = rx.recv().await {
            match event {
                IngestEvent::RunStarted { run_id } => {
                    pb.set_message(run_id.map_or_else(
                        || "run started (no ledger)".to_string(),
                        |id| format!("run {}", id),
                    ));
                }
                IngestEvent::Queue { total, item_id, .. } => {
                    pb.set_length(total as u64);
                    pb.set_message(item_id);
                }
                IngestEvent::Progress { step, percent } => {
                    if step == "ingesting" {
                        pb.inc(1);
                    } else {
                        pb.set_message(format!("{} ({}%)", step, percent));
                    }
                }
                IngestEvent::Log { level, message } => {
                    if level != LogLevel::Info {
                        pb.set_message(message);
                    }
                }
                IngestEvent::Complete { status, .. } => {
                    pb.finish_with_message(status.to_string());
                    break;
                }
            }
        }

        if !pb.is_finished() {
            pb.finish_and_clear();
        }
    })
}

#[derive(Default, Clone)]
pub struct LogWriterFactory;

pub struct LogWriter {
    buffer: String,
}

impl LogWriter {
    fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let line = self.buffer.trim_end_matches('\n').trim_end_matches('\r');
        if line.is_empty() {
            let _ = multi_progress().println(String::new());
        } else {
            let _ = multi_progress().println(line.to_string());
        }
        self.buffer.clear();
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let chunk = String::from_utf8_lossy(buf);
        self.buffer.push_str(&chunk);

        while let Some(idx) = self.buffer.find('\n') {
            let line = self.buffer[..idx].trim_end_matches('\r');
            if line.is_empty() {
                let _ = multi_progress().println(String::new());
            } else {
                let _ = multi_progress().println(line.to_string());
            }
            self.buffer.drain(..idx + 1);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer();
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter::new()
    }
}
