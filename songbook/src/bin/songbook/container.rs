use anyhow::{Context, Result};
use std::time::Duration;

use crate::shell::{CommandRunner, run_checked};

const COMPOSE: &str = "docker-compose";
const POSTGRES_PORT: &str = "5432";

pub const READY_ATTEMPTS: u32 = 3;
pub const READY_DELAY: Duration = Duration::from_millis(300);

/// Guard over the local database container.
///
/// If the container was not running, [`DbContainer::ensure_up`] starts it
/// and the guard stops it again on [`DbContainer::release`] (or on drop as
/// a last resort).
pub struct DbContainer<'r> {
    runner: &'r dyn CommandRunner,
    service: String,
    started_here: bool,
    released: bool,
}

impl<'r> DbContainer<'r> {
    pub async fn ensure_up(runner: &'r dyn CommandRunner, service: &str) -> Result<Self> {
        let already_up = runner
            .run(COMPOSE, &["port", service, POSTGRES_PORT])
            .await?
            .success();

        if !already_up {
            log::info!("starting {service} container");
            run_checked(runner, COMPOSE, &["up", "-d", service]).await?;
            wait_until_ready(runner, service, READY_ATTEMPTS, READY_DELAY).await?;
        }

        Ok(Self {
            runner,
            service: service.to_string(),
            started_here: !already_up,
            released: false,
        })
    }

    pub fn started_here(&self) -> bool {
        self.started_here
    }

    /// Host port published for PostgreSQL.
    pub async fn port(&self) -> Result<u16> {
        let output = run_checked(self.runner, COMPOSE, &["port", self.service.as_str(), POSTGRES_PORT]).await?;
        parse_port(&output.stdout)
    }

    /// Stop the container if this guard started it.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        if self.started_here {
            log::info!("stopping {} container", self.service);
            run_checked(self.runner, COMPOSE, &["stop", self.service.as_str()]).await?;
        }
        Ok(())
    }
}

impl Drop for DbContainer<'_> {
    fn drop(&mut self) {
        if self.started_here && !self.released {
            log::warn!("{} container left running by an aborted task, stopping it", self.service);
            let _ = std::process::Command::new(COMPOSE)
                .args(["stop", self.service.as_str()])
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status();
        }
    }
}

/// Poll `docker-compose port` until the service answers. After `attempts`
/// failures the last error is returned.
pub async fn wait_until_ready(
    runner: &dyn CommandRunner,
    service: &str,
    attempts: u32,
    delay: Duration,
) -> Result<()> {
    let mut failures = 0;
    loop {
        let output = runner.run(COMPOSE, &["port", service, POSTGRES_PORT]).await?;
        if output.success() {
            return Ok(());
        }
        failures += 1;
        if failures >= attempts {
            anyhow::bail!(
                "{service} container is not reachable after {attempts} attempts: {}",
                output.stderr.trim()
            );
        }
        println!("Waiting for DB container to start");
        tokio::time::sleep(delay).await;
    }
}

/// Parse `0.0.0.0:32768` into the port number.
pub fn parse_port(stdout: &str) -> Result<u16> {
    let raw = stdout.trim().rsplit(':').next().unwrap_or_default().trim();
    raw.parse::<u16>()
        .with_context(|| format!("Unexpected docker-compose port output: {stdout:?}"))
}
