//! Periodic dispatch of queued heartbeats to the CLI.
//!
//! A single timer thread drains the queue on every tick. In normal operation
//! the CLI runs on a worker thread and the tick returns immediately; a tick
//! that finds the previous worker still running does nothing, leaving the
//! queue for the next tick. With `debug` on, the CLI runs on the timer thread
//! with captured output; with `disable_threading` on, it runs on the timer
//! thread without capture.

use super::queue::HeartbeatQueue;
use crate::config::SharedSettings;
use crate::dependencies::CliResolver;
use crate::error::{BeaconError, Result};
use crate::process::{render_command_line, CommandRunner, Invocation};
use beacon_protocol::{CliArgs, HeartbeatBatch, PluginMetadata};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(8);

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Queue was empty.
    Idle,
    /// Previous background dispatch still running; queue left untouched.
    Busy,
    /// Batch discarded before reaching the CLI.
    Dropped { heartbeats: usize },
    /// Batch handed to the CLI on this thread.
    Sent { heartbeats: usize },
    /// Batch handed to a background worker.
    Spawned { heartbeats: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Background,
    Inline,
    InlineCaptured,
}

struct Core {
    queue: Arc<HeartbeatQueue>,
    resolver: Arc<dyn CliResolver>,
    runner: Arc<dyn CommandRunner>,
    settings: SharedSettings,
    metadata: PluginMetadata,
    busy: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Timer {
    stop: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

pub struct Dispatcher {
    core: Arc<Core>,
    interval: Duration,
    timer: Mutex<Option<Timer>>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<HeartbeatQueue>,
        resolver: Arc<dyn CliResolver>,
        runner: Arc<dyn CommandRunner>,
        settings: SharedSettings,
        metadata: PluginMetadata,
        interval: Duration,
    ) -> Self {
        Self {
            core: Arc::new(Core {
                queue,
                resolver,
                runner,
                settings,
                metadata,
                busy: Arc::new(AtomicBool::new(false)),
                worker: Mutex::new(None),
            }),
            interval,
            timer: Mutex::new(None),
        }
    }

    /// Starts the timer thread. Calling it again while running is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut timer = self.lock_timer();
        if timer.is_some() {
            return Ok(());
        }

        let (stop, stop_rx) = mpsc::channel::<()>();
        let core = Arc::clone(&self.core);
        let interval = self.interval;

        let thread = thread::Builder::new()
            .name("beacon-dispatch".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        core.tick();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| BeaconError::io("spawning dispatch timer", e))?;

        *timer = Some(Timer { stop, thread });
        tracing::debug!(interval_ms = interval.as_millis() as u64, "Dispatcher started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock_timer().is_some()
    }

    /// Runs one tick on the calling thread.
    pub fn tick(&self) -> TickOutcome {
        self.core.tick()
    }

    /// Drains and sends whatever is queued, synchronously.
    pub fn flush(&self) -> TickOutcome {
        self.core.flush()
    }

    /// Stops the timer, flushes the queue and waits for any in-flight worker.
    pub fn shutdown(&self) {
        if let Some(timer) = self.lock_timer().take() {
            let _ = timer.stop.send(());
            if timer.thread.join().is_err() {
                tracing::warn!("Dispatch timer thread panicked");
            }
        }

        let outcome = self.core.flush();
        tracing::debug!(?outcome, "Final flush");

        self.core.join_worker();
    }

    /// Waits for the current background worker, if any.
    pub fn wait_idle(&self) {
        self.core.join_worker();
    }

    fn lock_timer(&self) -> std::sync::MutexGuard<'_, Option<Timer>> {
        self.timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(timer) = self.lock_timer().take() {
            let _ = timer.stop.send(());
            let _ = timer.thread.join();
        }
    }
}

impl Core {
    fn tick(&self) -> TickOutcome {
        if self.busy.load(Ordering::Acquire) {
            tracing::debug!(queued = self.queue.len(), "Previous dispatch still running; skipping tick");
            return TickOutcome::Busy;
        }

        let settings = self.settings.snapshot();
        let mode = if settings.debug {
            Mode::InlineCaptured
        } else if settings.disable_threading {
            Mode::Inline
        } else {
            Mode::Background
        };

        self.dispatch(mode)
    }

    fn flush(&self) -> TickOutcome {
        let mode = if self.settings.snapshot().debug {
            Mode::InlineCaptured
        } else {
            Mode::Inline
        };
        self.dispatch(mode)
    }

    fn dispatch(&self, mode: Mode) -> TickOutcome {
        let Some(batch) = self.queue.drain_batch() else {
            return TickOutcome::Idle;
        };
        let heartbeats = batch.len();

        let invocation = match self.prepare(&batch) {
            Ok(invocation) => invocation,
            Err(err) => {
                tracing::warn!(error = %err, heartbeats, "Dropping heartbeat batch");
                return TickOutcome::Dropped { heartbeats };
            }
        };

        tracing::debug!(command = %invocation.display, heartbeats, "Sending heartbeats");

        match mode {
            Mode::InlineCaptured => {
                match self.runner.run(&invocation, true) {
                    Ok(output) => {
                        tracing::debug!(
                            code = ?output.exit_code,
                            stdout = %output.stdout,
                            stderr = %output.stderr,
                            "CLI finished"
                        );
                        if let Err(err) = output.check_exit() {
                            tracing::warn!(error = %err, command = %invocation.display, "CLI reported failure");
                        }
                    }
                    Err(err) => log_run_error(&err, &invocation),
                }
                TickOutcome::Sent { heartbeats }
            }
            Mode::Inline => {
                run_discarding(self.runner.as_ref(), &invocation);
                TickOutcome::Sent { heartbeats }
            }
            Mode::Background => self.spawn_worker(invocation, heartbeats),
        }
    }

    fn prepare(&self, batch: &HeartbeatBatch) -> Result<Invocation> {
        let resolved = self.resolver.resolve()?;
        let settings = self.settings.snapshot();

        let args = CliArgs::for_batch(
            resolved.cli.to_string_lossy(),
            settings.api_key,
            &self.metadata,
            batch,
        );
        let payload = batch.extras_payload().map_err(|source| BeaconError::Json {
            context: "serializing extra heartbeats".to_string(),
            source,
        })?;

        let display = render_command_line(&resolved.runtime, &args.obfuscated());
        Ok(Invocation::new(resolved.runtime, args.to_vec())
            .with_stdin(payload)
            .with_display(display))
    }

    fn spawn_worker(&self, invocation: Invocation, heartbeats: usize) -> TickOutcome {
        // The previous worker has finished (busy was false); reap it.
        self.join_worker();

        self.busy.store(true, Ordering::Release);
        let runner = Arc::clone(&self.runner);
        let busy = BusyGuard(Arc::clone(&self.busy));

        let spawned = thread::Builder::new()
            .name("beacon-cli".to_string())
            .spawn(move || {
                let _busy = busy;
                run_discarding(runner.as_ref(), &invocation);
            });

        match spawned {
            Ok(handle) => {
                *self.lock_worker() = Some(handle);
                TickOutcome::Spawned { heartbeats }
            }
            Err(err) => {
                // The closure (and its guard) was dropped, so busy is already clear.
                tracing::warn!(error = %err, heartbeats, "Could not start dispatch worker; dropping batch");
                TickOutcome::Dropped { heartbeats }
            }
        }
    }

    fn join_worker(&self) {
        let handle = self.lock_worker().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("Dispatch worker panicked");
            }
        }
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn run_discarding(runner: &dyn CommandRunner, invocation: &Invocation) {
    match runner.run(invocation, false) {
        Ok(output) => {
            if let Err(err) = output.check_exit() {
                tracing::warn!(error = %err, command = %invocation.display, "CLI reported failure");
            }
        }
        Err(err) => log_run_error(&err, invocation),
    }
}

fn log_run_error(err: &BeaconError, invocation: &Invocation) {
    match err {
        // Display already carries the masked command line.
        BeaconError::ProcessSpawnFailure { .. } | BeaconError::CliTimedOut { .. } => {
            tracing::warn!(error = %err, "Heartbeat batch lost");
        }
        _ => tracing::warn!(error = %err, command = %invocation.display, "Heartbeat batch lost"),
    }
}
