//! External command execution.
//!
//! Operator tasks drive docker-compose, pg_dump, gpg, aws, git and
//! cookiecutter. They all go through [`CommandRunner`] so the tasks can be
//! tested with a scripted runner.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run with captured output.
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Run attached to the terminal (editors, prompts). Returns the exit status.
    async fn interactive(&self, program: &str, args: &[&str]) -> Result<i32> {
        Ok(self.run(program, args).await?.status)
    }
}

/// Run and fail on a non-zero exit status.
pub async fn run_checked(runner: &dyn CommandRunner, program: &str, args: &[&str]) -> Result<CommandOutput> {
    let output = runner.run(program, args).await?;
    if !output.success() {
        anyhow::bail!(
            "`{program} {}` exited with status {}: {}",
            args.join(" "),
            output.status,
            output.stderr.trim()
        );
    }
    Ok(output)
}

/// Runs real processes through `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemShell {
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl SystemShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn command(&self, program: &str, args: &[&str]) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

#[async_trait]
impl CommandRunner for SystemShell {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        log::debug!("running {program} {}", args.join(" "));
        let output = self
            .command(program, args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to start {program}"))?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn interactive(&self, program: &str, args: &[&str]) -> Result<i32> {
        log::debug!("running {program} {} (interactive)", args.join(" "));
        let status = self
            .command(program, args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .with_context(|| format!("Failed to start {program}"))?;
        Ok(status.code().unwrap_or(-1))
    }
}
