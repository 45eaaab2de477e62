//! External process execution.
//!
//! Arguments are always handed to the OS as discrete elements; nothing here
//! builds a shell string. A non-zero exit status is reported in
//! [`ProcessOutput`] but is not an error at this layer: only failing to create
//! the process, or the process outliving its timeout, is.

use crate::error::{BeaconError, Result};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[cfg(unix)]
const BACKGROUND_NICE: libc::c_int = 10;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;
#[cfg(windows)]
const BELOW_NORMAL_PRIORITY_CLASS: u32 = 0x0000_4000;

/// One process to run: program, argument vector, optional stdin line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    /// Command line used in logs and errors. Callers put masked values here.
    pub display: String,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        let program = program.into();
        let display = render_command_line(&program, &args);
        Self {
            program,
            args,
            stdin: None,
            display,
        }
    }

    pub fn with_stdin(mut self, payload: Option<String>) -> Self {
        self.stdin = payload;
        self
    }

    pub fn with_display(mut self, display: String) -> Self {
        self.display = display;
        self
    }
}

pub fn render_command_line(program: &Path, args: &[String]) -> String {
    let mut parts = vec![quote_for_display(&program.to_string_lossy())];
    parts.extend(args.iter().map(|arg| quote_for_display(arg)));
    parts.join(" ")
}

fn quote_for_display(value: &str) -> String {
    if value.is_empty() || value.contains(char::is_whitespace) {
        format!("\"{}\"", value)
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Converts a non-zero exit into [`BeaconError::CliExited`].
    pub fn check_exit(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(BeaconError::CliExited {
                code: self.exit_code,
                stderr: self.stderr.clone(),
            })
        }
    }
}

/// Seam over process execution so the dispatcher can be driven in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs the invocation to completion. With `capture` false the output
    /// streams are discarded unread.
    fn run(&self, invocation: &Invocation, capture: bool) -> Result<ProcessOutput>;
}

/// Spawns real OS processes at reduced scheduling priority.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn spawn(&self, invocation: &Invocation, capture: bool) -> Result<Child> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(if capture { Stdio::piped() } else { Stdio::null() })
            .stderr(if capture { Stdio::piped() } else { Stdio::null() });

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(CREATE_NO_WINDOW | BELOW_NORMAL_PRIORITY_CLASS);
        }

        let child = command
            .spawn()
            .map_err(|source| BeaconError::ProcessSpawnFailure {
                command: invocation.display.clone(),
                source,
            })?;

        lower_priority(&child);
        Ok(child)
    }

    fn wait_with_timeout(&self, child: &mut Child, invocation: &Invocation) -> Result<Option<i32>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status.code()),
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(BeaconError::CliTimedOut {
                        command: invocation.display.clone(),
                        timeout_secs: self.timeout.as_secs(),
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    let _ = child.kill();
                    return Err(BeaconError::io(
                        format!("waiting for {}", invocation.display),
                        err,
                    ));
                }
            }
        }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation, capture: bool) -> Result<ProcessOutput> {
        let mut child = self.spawn(invocation, capture)?;

        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());
        let stdin_writer = feed(child.stdin.take(), invocation);

        // The deadline covers the stdin write: a child that never reads must
        // still be killed on time. The writer is left to fail with a broken pipe.
        let exit_code = self.wait_with_timeout(&mut child, invocation)?;

        if let Some(handle) = stdin_writer {
            let _ = handle.join();
        }

        Ok(ProcessOutput {
            stdout: join_reader(stdout_reader),
            stderr: join_reader(stderr_reader),
            exit_code,
        })
    }
}

/// Writes the stdin payload as a single line on its own thread. Dropping the
/// handle afterwards closes the pipe so the CLI sees EOF.
fn feed<W: Write + Send + 'static>(
    stdin: Option<W>,
    invocation: &Invocation,
) -> Option<thread::JoinHandle<()>> {
    let payload = invocation.stdin.clone()?;
    let mut stdin = stdin?;
    let command = invocation.display.clone();
    Some(thread::spawn(move || {
        if let Err(err) = writeln!(stdin, "{}", payload) {
            tracing::warn!(error = %err, command = %command, "Failed to write stdin payload");
        }
    }))
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> Option<thread::JoinHandle<String>> {
    reader.map(|mut reader| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).trim_matches(['\r', '\n']).to_string()
        })
    })
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn lower_priority(child: &Child) {
    #[cfg(unix)]
    {
        // SAFETY: setpriority only adjusts the nice value of the given pid and
        // reports failure through its return value; it does not touch memory.
        #[allow(unsafe_code)]
        let rc = unsafe {
            libc::setpriority(libc::PRIO_PROCESS, child.id() as libc::id_t, BACKGROUND_NICE)
        };
        if rc != 0 {
            tracing::debug!(pid = child.id(), "Could not lower CLI process priority");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child;
    }
}
