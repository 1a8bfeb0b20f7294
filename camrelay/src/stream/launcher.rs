//! Transcoder process launching.
//!
//! A [`Launcher`] turns a [`LaunchRequest`] into a running
//! [`TranscoderProcess`] that keeps writing a rolling-window HLS manifest
//! and segments into the stream's output directory. The returned handle
//! owns the child exclusively; whoever holds it is responsible for
//! calling [`TranscoderProcess::terminate`].

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use process_utils::Termination;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::HlsSettings;
use crate::error::StartError;
use crate::utils::fs;

/// File name of the manifest inside a stream's output directory.
pub const MANIFEST_FILE: &str = "index.m3u8";

/// ffmpeg pattern for segment files inside a stream's output directory.
pub const SEGMENT_PATTERN: &str = "segment_%05d.ts";

/// Number of transcoder stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 8;

/// Where a stream's artifacts live inside the output store.
pub fn stream_dir(output_root: &Path, name: &str) -> PathBuf {
    output_root.join(name)
}

/// Path of a stream's manifest inside the output store.
pub fn manifest_path(output_root: &Path, name: &str) -> PathBuf {
    stream_dir(output_root, name).join(MANIFEST_FILE)
}

/// Remove leftovers of a previous run and recreate an empty directory.
pub async fn clear_artifacts(output_root: &Path, name: &str) -> Result<(), StartError> {
    let dir = stream_dir(output_root, name);
    fs::reset_dir("clearing stream output", &dir)
        .await
        .map_err(|e| StartError::Output(e.to_string()))
}

/// Delete a stream's artifacts. Missing directories are fine.
pub async fn remove_artifacts(output_root: &Path, name: &str) {
    let dir = stream_dir(output_root, name);
    if let Err(e) = fs::remove_dir_all_if_exists("removing stream output", &dir).await {
        warn!(stream = %name, error = %e, "Failed to remove stream output");
    }
}

/// Everything a launcher needs to start one transcoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub name: String,
    pub source_url: String,
    /// Root of the output store; the stream writes below `<root>/<name>/`.
    pub output_root: PathBuf,
}

impl LaunchRequest {
    pub fn new(
        name: impl Into<String>,
        source_url: impl Into<String>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            source_url: source_url.into(),
            output_root: output_root.into(),
        }
    }

    pub fn stream_dir(&self) -> PathBuf {
        stream_dir(&self.output_root, &self.name)
    }

    pub fn manifest_path(&self) -> PathBuf {
        manifest_path(&self.output_root, &self.name)
    }
}

/// Recent stderr output of a transcoder.
#[derive(Debug, Clone, Default)]
pub struct StderrTail(Arc<Mutex<VecDeque<String>>>);

impl StderrTail {
    fn push(&self, line: String) {
        let mut lines = self.0.lock();
        if lines.len() == STDERR_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The retained lines joined with `" | "`.
    pub fn joined(&self) -> String {
        self.0
            .lock()
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Exclusive handle to a running transcoder.
#[derive(Debug)]
pub struct TranscoderProcess {
    name: String,
    child: Child,
    stderr: StderrTail,
}

impl TranscoderProcess {
    /// Wrap a spawned child, forwarding its stderr (if piped) to `tracing`.
    pub fn new(name: impl Into<String>, mut child: Child) -> Self {
        let name = name.into();
        let stderr = StderrTail::default();
        if let Some(pipe) = child.stderr.take() {
            tokio::spawn(forward_stderr(name.clone(), pipe, stderr.clone()));
        }
        Self {
            name,
            child,
            stderr,
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Exit status if the child has already exited.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Last lines the transcoder wrote to stderr.
    pub fn stderr_tail(&self) -> String {
        self.stderr.joined()
    }

    /// Kill the child and reap it within `timeout`.
    ///
    /// A child that already exited is not an error.
    pub async fn terminate(mut self, timeout: Duration) {
        let pid = self.child.id();
        match process_utils::terminate(&mut self.child, timeout).await {
            Ok(Termination::Killed(status)) => {
                info!(stream = %self.name, ?pid, %status, "Transcoder terminated");
            }
            Ok(Termination::AlreadyExited(status)) => {
                debug!(stream = %self.name, ?pid, %status, "Transcoder had already exited");
            }
            Ok(Termination::TimedOut) => {
                warn!(stream = %self.name, ?pid, "Transcoder not reaped after kill");
            }
            Err(e) => {
                warn!(stream = %self.name, ?pid, error = %e, "Failed to terminate transcoder");
            }
        }
    }
}

async fn forward_stderr<R>(name: String, pipe: R, tail: StderrTail)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.to_ascii_lowercase().contains("error") {
                    warn!(stream = %name, "transcoder: {}", line);
                } else {
                    debug!(stream = %name, "transcoder: {}", line);
                }
                tail.push(line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!(stream = %name, error = %e, "Stopped reading transcoder stderr");
                break;
            }
        }
    }
}

/// Starts transcoders.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Start a transcoder for `request`.
    ///
    /// Returns once the process is running; readiness of its output is
    /// checked separately.
    async fn launch(&self, request: &LaunchRequest) -> Result<TranscoderProcess, StartError>;
}

/// Launches ffmpeg with a fixed rolling-window HLS argument shape.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    binary_path: String,
    hls: HlsSettings,
}

impl FfmpegLauncher {
    pub fn new(binary_path: impl Into<String>, hls: HlsSettings) -> Self {
        Self {
            binary_path: binary_path.into(),
            hls,
        }
    }

    /// Build ffmpeg command arguments.
    pub fn build_args(&self, request: &LaunchRequest) -> Vec<String> {
        let dir = request.stream_dir();
        let mut args: Vec<String> = ["-hide_banner", "-nostats", "-loglevel", "warning"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        // Input
        args.extend(["-i".to_string(), request.source_url.clone()]);

        // Video only, H.264 with closed GOPs so every segment starts on a keyframe
        args.extend(
            [
                "-an", "-c:v", "libx264", "-profile:v", "high", "-level", "4.1", "-flags",
                "+cgop", "-g", "30",
            ]
            .iter()
            .map(|s| s.to_string()),
        );

        // Rolling-window HLS output
        args.extend([
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            self.hls.segment_secs.to_string(),
            "-hls_list_size".to_string(),
            self.hls.list_size.to_string(),
            "-hls_flags".to_string(),
            "delete_segments".to_string(),
            "-hls_base_url".to_string(),
            format!("{}/", request.name),
            "-hls_segment_filename".to_string(),
            dir.join(SEGMENT_PATTERN).to_string_lossy().to_string(),
        ]);

        args.push(request.manifest_path().to_string_lossy().to_string());
        args
    }
}

#[async_trait]
impl Launcher for FfmpegLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<TranscoderProcess, StartError> {
        let args = self.build_args(request);

        info!(
            stream = %request.name,
            source = %request.source_url,
            "Starting transcoder"
        );
        debug!(stream = %request.name, ?args, "ffmpeg arguments");

        let mut command: Command = process_utils::tokio_command(&self.binary_path);
        let child = command
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                StartError::SourceUnreachable(format!(
                    "failed to spawn {}: {}",
                    self.binary_path, e
                ))
            })?;

        Ok(TranscoderProcess::new(request.name.clone(), child))
    }
}
