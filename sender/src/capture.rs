//! External capture process.
//!
//! Spawns a recorder (PulseAudio's `parec` by default) that writes raw
//! interleaved PCM to its stdout. The stdout pipe becomes the byte
//! stream for a [`FrameSource`](crate::source::FrameSource); stderr is
//! forwarded to the log. Killing the process closes the pipe, which the
//! frame source reports as end of stream.

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{info, warn};

use crate::source::{AudioFormat, ByteOrder};

/// Default recorder program
pub const DEFAULT_CAPTURE_PROGRAM: &str = "parec";

/// Command line for the capture process.
#[derive(Debug, Clone)]
pub struct CaptureCommand {
    // ---
    /// Program to run
    pub program: String,

    /// Arguments passed to the program
    pub args: Vec<String>,
}

impl CaptureCommand {
    // ---
    /// Builds a `parec`-style command line for `format`.
    ///
    /// `device` selects the capture source, e.g. a sink monitor such as
    /// `my-sink.monitor`; the recorder's default is used when `None`.
    pub fn recorder(program: &str, format: AudioFormat, device: Option<&str>) -> Self {
        // ---
        let sample_format = match format.byte_order {
            ByteOrder::BigEndian => "s16be",
            ByteOrder::LittleEndian => "s16le",
        };

        let mut args = vec![
            format!("--format={}", sample_format),
            format!("--rate={}", format.sample_rate),
            format!("--channels={}", format.channels),
        ];
        if let Some(device) = device {
            args.push(format!("--device={}", device));
        }

        Self {
            program: program.to_string(),
            args,
        }
    }
}

/// Handle to a running capture process.
pub struct CaptureProcess {
    // ---
    child: Child,
    program: String,
}

impl CaptureProcess {
    // ---
    /// Starts the capture process and returns it with its stdout pipe.
    ///
    /// # Errors
    ///
    /// Returns error if the program cannot be started or its pipes
    /// cannot be taken.
    pub fn spawn(command: &CaptureCommand) -> Result<(Self, ChildStdout)> {
        // ---
        info!(
            "Starting capture: {} {}",
            command.program,
            command.args.join(" ")
        );

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start capture program: {}", command.program))?;

        let stdout = child
            .stdout
            .take()
            .context("capture process has no stdout pipe")?;

        if let Some(stderr) = child.stderr.take() {
            let program = command.program.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("{} stderr: {}", program, line);
                }
            });
        }

        Ok((
            Self {
                child,
                program: command.program.clone(),
            },
            stdout,
        ))
    }

    /// OS process id, if the process is still running.
    pub fn id(&self) -> Option<u32> {
        // ---
        self.child.id()
    }

    /// Terminates the capture process and reaps it.
    ///
    /// Failures are logged; shutdown continues regardless.
    pub async fn kill(&mut self) {
        // ---
        info!("Terminating capture process ({})", self.program);
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill capture process {}: {}", self.program, e);
        }
    }
}
