//! Manifest readiness detection.
//!
//! The transcoder never announces that it is ready; the manifest showing
//! up in the output store is the only observable signal. We poll for it
//! with short sleeps, which suspend only the launching task.

use std::path::Path;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::StartError;
use crate::utils::fs;

use super::launcher::TranscoderProcess;

/// Poll cadence and overall bound for [`wait_for_manifest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

/// Wait until `manifest` exists.
///
/// Fails with [`StartError::SourceUnreachable`] when the transcoder exits
/// before producing a manifest (ffmpeg gives up on unreachable inputs),
/// and with [`StartError::ReadinessTimeout`] once `policy.timeout` elapses.
pub async fn wait_for_manifest(
    manifest: &Path,
    process: &mut TranscoderProcess,
    policy: ReadinessPolicy,
) -> Result<(), StartError> {
    let started = Instant::now();
    let deadline = started + policy.timeout;

    loop {
        if fs::file_exists(manifest).await {
            debug!(
                manifest = %manifest.display(),
                waited_ms = started.elapsed().as_millis() as u64,
                "Manifest ready"
            );
            return Ok(());
        }

        match process.try_wait() {
            Ok(Some(status)) => {
                let stderr = process.stderr_tail();
                let reason = if stderr.is_empty() {
                    format!("transcoder exited with {status} before producing a manifest")
                } else {
                    format!("transcoder exited with {status}: {stderr}")
                };
                return Err(StartError::SourceUnreachable(reason));
            }
            Ok(None) => {}
            Err(e) => {
                return Err(StartError::SourceUnreachable(format!(
                    "failed to poll transcoder: {e}"
                )));
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(StartError::ReadinessTimeout(policy.timeout));
        }
        tokio::time::sleep(policy.poll_interval.min(deadline - now)).await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tempfile::TempDir;

    fn spawn_sh(script: &str) -> TranscoderProcess {
        let child = process_utils::tokio_command("sh")
            .args(["-c", script])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        TranscoderProcess::new("test", child)
    }

    fn policy(timeout_ms: u64) -> ReadinessPolicy {
        ReadinessPolicy {
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[tokio::test]
    async fn test_ready_when_manifest_appears() {
        let temp = TempDir::new().unwrap();
        let manifest = temp.path().join("index.m3u8");
        let mut process = spawn_sh(&format!(
            "sleep 0.1; echo '#EXTM3U' > '{}'; sleep 30",
            manifest.display()
        ));

        wait_for_manifest(&manifest, &mut process, policy(5_000))
            .await
            .unwrap();
        assert!(manifest.exists());
        process.terminate(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_times_out_without_manifest() {
        let temp = TempDir::new().unwrap();
        let manifest = temp.path().join("index.m3u8");
        let mut process = spawn_sh("sleep 30");

        let err = wait_for_manifest(&manifest, &mut process, policy(100))
            .await
            .unwrap_err();
        assert_eq!(err, StartError::ReadinessTimeout(Duration::from_millis(100)));
        process.terminate(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_early_exit_is_unreachable_source() {
        let temp = TempDir::new().unwrap();
        let manifest = temp.path().join("index.m3u8");
        let mut process = spawn_sh("echo 'Connection refused' >&2; exit 1");

        let err = wait_for_manifest(&manifest, &mut process, policy(5_000))
            .await
            .unwrap_err();
        assert!(matches!(err, StartError::SourceUnreachable(_)));
    }
}
