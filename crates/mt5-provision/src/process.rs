//! Lifecycle handles for long-running background processes.
//!
//! The terminal and the auxiliary services are started once and never
//! restarted; the supervisor only needs to poll liveness and, on shutdown,
//! stop them. Termination follows the usual init pattern: SIGTERM, a grace
//! period, then SIGKILL.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::debug;

/// A background process owned by the supervisor.
#[async_trait]
pub trait Supervised: Send {
    /// Stable name used in log lines.
    fn name(&self) -> &str;

    /// OS process id, if the process has not been reaped yet.
    fn id(&self) -> Option<u32>;

    /// Non-blocking liveness check. Reaps the process if it has exited.
    fn is_alive(&mut self) -> bool;

    /// Stop the process and return its exit code.
    ///
    /// Sends SIGTERM, waits up to `grace`, then escalates to SIGKILL.
    /// Returns `None` if the exit code could not be collected.
    async fn terminate(&mut self, grace: Duration) -> Option<i32>;
}

/// Map an exit status to a shell-style exit code (`128 + signal` when killed).
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        code
    } else if let Some(sig) = status.signal() {
        128 + sig
    } else {
        1
    }
}

/// [`Supervised`] implementation backed by a Tokio child process.
pub struct SupervisedChild {
    name: String,
    child: tokio::process::Child,
}

impl SupervisedChild {
    pub fn new(name: impl Into<String>, child: tokio::process::Child) -> Self {
        Self {
            name: name.into(),
            child,
        }
    }
}

#[async_trait]
impl Supervised for SupervisedChild {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn terminate(&mut self, grace: Duration) -> Option<i32> {
        if let Some(pid) = self.child.id().and_then(|p| i32::try_from(p).ok())
            && let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM)
        {
            debug!(name = %self.name, pid, "SIGTERM failed: {e}");
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => return Some(exit_code(status)),
            Ok(Err(e)) => {
                debug!(name = %self.name, "wait failed: {e}");
                return None;
            }
            Err(_) => {
                debug!(name = %self.name, "did not exit after SIGTERM, sending SIGKILL");
            }
        }

        // Child::kill sends SIGKILL and waits for the process to be reaped.
        if let Err(e) = self.child.kill().await {
            debug!(name = %self.name, "SIGKILL failed: {e}");
        }
        match self.child.try_wait() {
            Ok(Some(status)) => Some(exit_code(status)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;

    fn spawn_sh(script: &str) -> SupervisedChild {
        let child = tokio::process::Command::new("sh")
            .args(["-c", script])
            .stdin(Stdio::null())
            .spawn()
            .unwrap();
        SupervisedChild::new("test", child)
    }

    #[tokio::test]
    async fn running_child_is_alive_until_terminated() {
        let mut handle = spawn_sh("exec sleep 30");
        assert!(handle.id().is_some());
        assert!(handle.is_alive());

        let code = handle.terminate(Duration::from_secs(5)).await;
        assert_eq!(code, Some(128 + Signal::SIGTERM as i32));
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn exited_child_is_not_alive() {
        let mut handle = spawn_sh("exit 0");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn sigterm_ignoring_child_is_killed_after_grace() {
        // The shell traps TERM and keeps sleeping in short slices.
        let mut handle = spawn_sh("trap '' TERM; while true; do sleep 0.1; done");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let code = handle.terminate(Duration::from_millis(300)).await;
        assert_eq!(code, Some(128 + Signal::SIGKILL as i32));
    }

    #[test]
    fn exit_code_prefers_code_over_signal() {
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(ExitStatus::from_raw(9)), 128 + 9);
    }
}
