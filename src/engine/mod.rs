pub mod docker;

use std::path::Path;

use crate::error::ProvisionResult;

/// Container engine driving the compose stack in a target directory.
pub trait Orchestrator {
    /// Check that the engine and its compose plugin are installed.
    fn check_prerequisites(&self) -> ProvisionResult<()>;

    /// Start every service in the background.
    fn start(&self, root: &Path) -> ProvisionResult<()>;

    /// Block until `service` reports healthy.
    fn wait_healthy(&self, root: &Path, service: &str) -> ProvisionResult<()>;

    /// Make the reverse proxy re-read its configuration.
    fn reload_proxy(&self, root: &Path) -> ProvisionResult<()>;

    /// Print service status to the terminal.
    fn status(&self, root: &Path) -> ProvisionResult<()>;
}
