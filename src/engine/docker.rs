use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::cmd;
use crate::compose::{self, PROXY_SERVICE};
use crate::config::StackConfig;
use crate::engine::Orchestrator;
use crate::error::{ProvisionError, ProvisionResult};

/// `docker compose` against the files emitted into the target.
pub struct DockerCompose {
    stack: StackConfig,
    attempts: u32,
    interval: Duration,
}

impl DockerCompose {
    #[must_use]
    pub fn new(stack: &StackConfig) -> Self {
        Self {
            stack: stack.clone(),
            attempts: 30,
            interval: Duration::from_secs(5),
        }
    }

    /// Health polling schedule.
    #[must_use]
    pub const fn polling(mut self, attempts: u32, interval: Duration) -> Self {
        self.attempts = attempts;
        self.interval = interval;
        self
    }

    fn compose(root: &Path, args: &[&str]) -> ProvisionResult<()> {
        let mut full = vec!["compose"];
        full.extend_from_slice(args);
        cmd::run_interactive(Some(root), "docker", &full)
    }
}

impl Orchestrator for DockerCompose {
    fn check_prerequisites(&self) -> ProvisionResult<()> {
        if !cmd::command_exists("docker") {
            return Err(ProvisionError::PrerequisiteMissing(
                "docker not found. Install Docker Engine first".into(),
            ));
        }
        cmd::run("docker", &["compose", "version"]).map_err(|_| {
            ProvisionError::PrerequisiteMissing("the docker compose plugin is not installed".into())
        })?;
        cmd::run("docker", &["info", "--format", "{{.ServerVersion}}"]).map_err(|_| {
            ProvisionError::PrerequisiteMissing(
                "cannot reach the docker daemon. Is it running, and may this user use it?".into(),
            )
        })?;
        Ok(())
    }

    fn start(&self, root: &Path) -> ProvisionResult<()> {
        eprintln!("Starting containers...");
        Self::compose(root, &["up", "-d"])
    }

    /// Poll `docker inspect` until the container's healthcheck passes.
    fn wait_healthy(&self, root: &Path, service: &str) -> ProvisionResult<()> {
        let container = compose::container_name(&self.stack, service);
        eprintln!("Waiting for {service} to be healthy...");

        for attempt in 1..=self.attempts {
            let status = cmd::run_in(
                Some(root),
                "docker",
                &["inspect", "--format", "{{.State.Health.Status}}", &container],
            );

            match status {
                Ok(status) if status == "healthy" => {
                    eprintln!("  Health check ({attempt}/{}): healthy", self.attempts);
                    return Ok(());
                }
                Ok(status) => {
                    eprintln!(
                        "  Health check ({attempt}/{}): {status} - retrying...",
                        self.attempts
                    );
                }
                Err(e) => {
                    debug!(error = %e, "inspect failed");
                    eprintln!(
                        "  Health check ({attempt}/{}): waiting for container...",
                        self.attempts
                    );
                }
            }

            thread::sleep(self.interval);
        }

        Err(ProvisionError::HealthcheckTimeout {
            service: service.to_string(),
            attempts: self.attempts,
        })
    }

    fn reload_proxy(&self, root: &Path) -> ProvisionResult<()> {
        eprintln!("Reloading nginx...");
        cmd::run_in(
            Some(root),
            "docker",
            &["compose", "exec", "-T", PROXY_SERVICE, "nginx", "-s", "reload"],
        )?;
        Ok(())
    }

    fn status(&self, root: &Path) -> ProvisionResult<()> {
        Self::compose(root, &["ps"])
    }
}
