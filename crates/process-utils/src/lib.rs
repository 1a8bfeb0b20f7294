//! Process helpers shared across the workspace.
//!
//! Covers two concerns of supervising external tools such as ffmpeg:
//! building commands that never pop up a console window on Windows, and
//! tearing a child down with a bounded wait so callers never hang on a
//! process that refuses to exit.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Suppress the console window of spawned children on Windows.
///
/// No-op elsewhere.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Build a `tokio::process::Command` for `program` with [`NoWindowExt`] applied.
///
/// The child is killed when its handle is dropped, so a handle that is
/// lost on an error path cannot leak a running process.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd.kill_on_drop(true);
    cmd
}

/// How a call to [`terminate`] ended.
#[cfg(feature = "tokio")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The child had already exited before we tried to stop it.
    AlreadyExited(std::process::ExitStatus),
    /// The child was killed and reaped.
    Killed(std::process::ExitStatus),
    /// The kill was sent but the child was not reaped within the timeout.
    TimedOut,
}

/// Kill `child` and wait at most `timeout` for it to be reaped.
///
/// A child that already exited is reported as [`Termination::AlreadyExited`]
/// rather than as an error.
#[cfg(feature = "tokio")]
pub async fn terminate(
    child: &mut tokio::process::Child,
    timeout: std::time::Duration,
) -> std::io::Result<Termination> {
    if let Some(status) = child.try_wait()? {
        return Ok(Termination::AlreadyExited(status));
    }

    if let Err(e) = child.start_kill() {
        // Raced with a natural exit between try_wait and start_kill.
        if let Some(status) = child.try_wait()? {
            return Ok(Termination::AlreadyExited(status));
        }
        return Err(e);
    }

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => Ok(Termination::Killed(status?)),
        Err(_) => {
            tracing::warn!(
                pid = ?child.id(),
                timeout_ms = timeout.as_millis() as u64,
                "Child did not exit after kill"
            );
            Ok(Termination::TimedOut)
        }
    }
}

#[cfg(all(test, unix, feature = "tokio"))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::Duration;

    fn sh(script: &str) -> tokio::process::Child {
        tokio_command("sh")
            .args(["-c", script])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn test_terminate_running_child() {
        let mut child = sh("sleep 30");
        let outcome = terminate(&mut child, Duration::from_secs(5)).await.unwrap();
        assert!(matches!(outcome, Termination::Killed(_)));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_terminate_exited_child_is_benign() {
        let mut child = sh("exit 0");
        child.wait().await.unwrap();
        let outcome = terminate(&mut child, Duration::from_secs(5)).await.unwrap();
        assert!(matches!(outcome, Termination::AlreadyExited(status) if status.success()));
    }
}
