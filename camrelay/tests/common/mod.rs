//! Shared fixtures for integration tests.
//!
//! `FakeLauncher` stands in for ffmpeg: it spawns a small `sh` script that
//! writes the manifest after a short delay and then idles, or exits early
//! for names configured to fail.

#![allow(dead_code)]

use std::collections::HashSet;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use camrelay::StartError;
use camrelay::config::StreamConfig;
use camrelay::stream::{LaunchRequest, Launcher, StreamManager, TranscoderProcess};
use tempfile::TempDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Write the manifest after `delay_ms`, then keep running.
    Healthy,
    /// Exit with an error before writing anything.
    Unreachable,
    /// Keep running without ever writing a manifest.
    Silent,
}

pub struct FakeLauncher {
    launches: AtomicUsize,
    delay_ms: u64,
    unreachable: HashSet<String>,
    silent: HashSet<String>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            launches: AtomicUsize::new(0),
            delay_ms: 100,
            unreachable: HashSet::new(),
            silent: HashSet::new(),
        }
    }

    pub fn unreachable(mut self, name: &str) -> Self {
        self.unreachable.insert(name.to_string());
        self
    }

    pub fn silent(mut self, name: &str) -> Self {
        self.silent.insert(name.to_string());
        self
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    fn behavior(&self, name: &str) -> Behavior {
        if self.unreachable.contains(name) {
            Behavior::Unreachable
        } else if self.silent.contains(name) {
            Behavior::Silent
        } else {
            Behavior::Healthy
        }
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<TranscoderProcess, StartError> {
        self.launches.fetch_add(1, Ordering::SeqCst);

        let script = match self.behavior(&request.name) {
            Behavior::Healthy => format!(
                "sleep {}; printf '#EXTM3U\\n#EXT-X-TARGETDURATION:2\\n' > '{}'; exec sleep 300",
                self.delay_ms as f64 / 1000.0,
                request.manifest_path().display()
            ),
            Behavior::Unreachable => {
                "echo 'Connection refused' >&2; exit 1".to_string()
            }
            Behavior::Silent => "exec sleep 300".to_string(),
        };

        let child = process_utils::tokio_command("sh")
            .args(["-c", &script])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| StartError::SourceUnreachable(e.to_string()))?;

        Ok(TranscoderProcess::new(request.name.clone(), child))
    }
}

/// Lifecycle settings scaled down for tests.
pub fn test_config(output_dir: &TempDir) -> StreamConfig {
    StreamConfig {
        output_dir: output_dir.path().to_path_buf(),
        stale_threshold: Duration::from_secs(120),
        sweep_interval: Duration::from_secs(60),
        poll_interval: Duration::from_millis(10),
        ready_timeout: Duration::from_secs(5),
        terminate_timeout: Duration::from_secs(5),
    }
}

/// A manager backed by `launcher`, writing into a fresh temp dir.
pub fn setup(launcher: FakeLauncher) -> (StreamManager, Arc<FakeLauncher>, TempDir) {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let launcher = Arc::new(launcher);
    let manager = StreamManager::new(test_config(&temp), launcher.clone());
    (manager, launcher, temp)
}
