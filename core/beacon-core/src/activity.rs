//! Boundary between host editors and the pipeline.
//!
//! Hosts adapt whatever event model they have (document-saved callbacks,
//! window-activated notifications, a pipe of JSON lines) to [`ActivitySource`]
//! and the engine subscribes to it once.

use crate::error::{BeaconError, Result};
use beacon_protocol::{parse_activity_event, ActivityEvent};
use serde::Serialize;
use std::io::BufRead;
use std::sync::Arc;

/// Receives activity events. May be called from any thread.
pub trait ActivitySink: Send + Sync {
    /// Returns true when the event produced a heartbeat.
    fn on_activity(&self, event: ActivityEvent) -> bool;
}

pub trait ActivitySource {
    /// Connects the source to `sink`. Push-based sources register callbacks
    /// and return; pull-based sources deliver until exhausted.
    fn subscribe(&mut self, sink: Arc<dyn ActivitySink>) -> Result<()>;
}

/// Counters from a [`LineSource`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineStats {
    pub lines: usize,
    pub accepted: usize,
    pub suppressed: usize,
    pub rejected: usize,
}

/// Pull-based source reading one JSON [`ActivityEvent`] per line.
///
/// Malformed lines are logged and skipped; blank lines are ignored.
pub struct LineSource<R> {
    reader: R,
    stats: LineStats,
}

impl<R: BufRead> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            stats: LineStats::default(),
        }
    }

    pub fn stats(&self) -> LineStats {
        self.stats
    }
}

impl<R: BufRead> ActivitySource for LineSource<R> {
    fn subscribe(&mut self, sink: Arc<dyn ActivitySink>) -> Result<()> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|e| BeaconError::io("reading activity stream", e))?;
            if read == 0 {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            self.stats.lines += 1;

            match parse_activity_event(line.trim_end()) {
                Ok(event) => {
                    if sink.on_activity(event) {
                        self.stats.accepted += 1;
                    } else {
                        self.stats.suppressed += 1;
                    }
                }
                Err(err) => {
                    self.stats.rejected += 1;
                    tracing::warn!(code = %err.code, message = %err.message, "Skipping activity line");
                }
            }
        }

        tracing::debug!(stats = ?self.stats, "Activity stream ended");
        Ok(())
    }
}
