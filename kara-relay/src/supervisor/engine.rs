//! Engine process handle
//!
//! One [`EngineProcess`] per launched child. The child itself is owned by a
//! waiter task that reports its exit and performs termination on request;
//! two reader tasks forward its stdout and stderr line by line. All reports
//! carry the process generation so the supervisor can discard stale ones.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::session::Session;
use crate::config::EngineConfig;

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Reports from engine processes
#[derive(Debug)]
pub enum EngineEvent {
    Output {
        generation: u64,
        stream: OutputStream,
        line: String,
    },
    Exited {
        generation: u64,
        code: Option<i32>,
        description: String,
    },
}

#[derive(Debug, Clone, Copy)]
enum StopSignal {
    /// SIGTERM; the engine may clean up
    Terminate,
    /// SIGKILL
    Kill,
}

/// Program, arguments and working directory for one launch
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl LaunchSpec {
    /// `<program> <args…> <song dir> <effect flags…> --input-device I --output-device O`
    pub fn for_session(engine: &EngineConfig, session: &Session) -> Self {
        let mut args = engine.args.clone();
        args.push(session.song.directory.clone());
        args.extend(session.effects.launch_args());
        args.extend([
            "--input-device".to_string(),
            session.input_device.clone(),
            "--output-device".to_string(),
            session.output_device.clone(),
        ]);

        Self {
            program: engine.program.clone(),
            args,
            cwd: engine.root.clone(),
        }
    }
}

/// Handle to a launched engine process
#[derive(Debug)]
pub struct EngineProcess {
    pub generation: u64,
    pub pid: Option<u32>,
    pub started_at: Instant,
    /// Engine printed its "started" line
    pub reported_started: bool,
    control: mpsc::UnboundedSender<StopSignal>,
}

impl EngineProcess {
    /// Launch the engine; output and exit are reported on `events`
    pub fn spawn(
        spec: &LaunchSpec,
        generation: u64,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> std::io::Result<Self> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id();
        debug!(generation, ?pid, "Engine spawned: {} {:?}", spec.program, spec.args);

        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, OutputStream::Stdout, generation, events.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, OutputStream::Stderr, generation, events.clone());
        }

        let (control, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(wait_for_exit(child, pid, generation, control_rx, events));

        Ok(Self {
            generation,
            pid,
            started_at: Instant::now(),
            reported_started: false,
            control,
        })
    }

    /// Ask the process to exit
    pub fn terminate(&self) {
        let _ = self.control.send(StopSignal::Terminate);
    }

    /// Kill the process outright
    pub fn kill(&self) {
        let _ = self.control.send(StopSignal::Kill);
    }
}

/// Consecutive read errors before a pipe is abandoned
const MAX_READ_FAILURES: u32 = 16;

fn forward_lines<R>(
    reader: R,
    stream: OutputStream,
    generation: u64,
    events: mpsc::UnboundedSender<EngineEvent>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut failures = 0;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    failures = 0;
                    let event = EngineEvent::Output {
                        generation,
                        stream,
                        line: decode_line(&buf),
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
                // Keep the pipe open; a closed reader would SIGPIPE the engine
                Err(e) => {
                    failures += 1;
                    warn!(generation, "Error reading engine {:?}: {}", stream, e);
                    if failures >= MAX_READ_FAILURES {
                        break;
                    }
                }
            }
        }
    });
}

/// Lossy UTF-8 without the line terminator
fn decode_line(raw: &[u8]) -> String {
    let end = raw
        .iter()
        .rposition(|b| *b != b'\n' && *b != b'\r')
        .map_or(0, |i| i + 1);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

async fn wait_for_exit(
    mut child: Child,
    pid: Option<u32>,
    generation: u64,
    mut control: mpsc::UnboundedReceiver<StopSignal>,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(signal) = control.recv() => deliver(&mut child, pid, signal).await,
        }
    };

    let event = match status {
        Ok(status) => EngineEvent::Exited {
            generation,
            code: status.code(),
            description: status.to_string(),
        },
        Err(e) => EngineEvent::Exited {
            generation,
            code: None,
            description: format!("wait failed: {}", e),
        },
    };
    let _ = events.send(event);
}

async fn deliver(child: &mut Child, pid: Option<u32>, signal: StopSignal) {
    match (signal, pid) {
        #[cfg(unix)]
        (StopSignal::Terminate, Some(pid)) => {
            let result = Command::new("kill")
                .arg("-TERM")
                .arg(pid.to_string())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if let Err(e) = result {
                warn!(pid, "SIGTERM failed, killing instead: {}", e);
                let _ = child.start_kill();
            }
        }
        _ => {
            if let Err(e) = child.start_kill() {
                debug!(?pid, "Kill failed: {}", e);
            }
        }
    }
}
