use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::trace;

use crate::config::Owner;
use crate::process::{Supervised, SupervisedChild};

/// Placeholder in command arguments replaced by the cached installer path.
pub const ARTIFACT_PLACEHOLDER: &str = "{artifact}";

/// Error from a command that could not be started.
#[derive(Debug, thiserror::Error)]
#[error("command failed: {command}\n{detail}")]
pub struct CommandError {
    pub command: String,
    pub detail: String,
}

/// An external program with a fixed argument list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Substitute [`ARTIFACT_PLACEHOLDER`] in every argument.
    ///
    /// Without an artifact the placeholder is left untouched.
    pub fn render(&self, artifact: Option<&Path>) -> CommandSpec {
        let Some(artifact) = artifact else {
            return self.clone();
        };
        let artifact = artifact.to_string_lossy();
        CommandSpec {
            program: self.program.replace(ARTIFACT_PLACEHOLDER, &artifact),
            args: self
                .args
                .iter()
                .map(|a| a.replace(ARTIFACT_PLACEHOLDER, &artifact))
                .collect(),
            env: self.env.clone(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Process boundary: every external program goes through this seam.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and return its exit code.
    ///
    /// The code is informational only; callers decide success from
    /// filesystem side effects.
    async fn run(&self, cmd: &CommandSpec) -> Result<Option<i32>, CommandError>;

    /// Start a command in the background.
    fn spawn(&self, name: &str, cmd: &CommandSpec) -> Result<Box<dyn Supervised>, CommandError>;
}

/// Runs commands on the host with a shared base environment
/// (`WINEPREFIX` and friends). Output is inherited so it reaches the
/// container log.
pub struct SystemRunner {
    env: BTreeMap<String, String>,
    identity: Option<Owner>,
}

impl SystemRunner {
    pub fn new(env: BTreeMap<String, String>) -> Self {
        Self {
            env,
            identity: None,
        }
    }

    /// Run every child as `owner` instead of the supervisor's own identity.
    ///
    /// Wine only accepts a prefix owned by the calling user, so the
    /// installers, the terminal and the services must all run as the
    /// volume owner.
    pub fn run_as(mut self, owner: Owner) -> Self {
        self.identity = Some(owner);
        self
    }

    fn command(&self, spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&self.env)
            .envs(&spec.env)
            .stdin(Stdio::null());
        if let Some(owner) = self.identity {
            cmd.gid(owner.gid).uid(owner.uid);
        }
        cmd
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<Option<i32>, CommandError> {
        trace!(cmd = %spec, identity = ?self.identity, "run");

        let status = self
            .command(spec)
            .status()
            .await
            .map_err(|e| CommandError {
                command: spec.to_string(),
                detail: e.to_string(),
            })?;

        Ok(status.code())
    }

    fn spawn(&self, name: &str, spec: &CommandSpec) -> Result<Box<dyn Supervised>, CommandError> {
        trace!(name, cmd = %spec, identity = ?self.identity, "spawn");

        let child = self.command(spec).spawn().map_err(|e| CommandError {
            command: spec.to_string(),
            detail: e.to_string(),
        })?;

        Ok(Box::new(SupervisedChild::new(name, child)))
    }
}
