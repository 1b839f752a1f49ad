use std::path::PathBuf;
use std::process::ExitStatus;

use crate::state::Phase;

pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error(
        "insufficient resources: {total_memory_mb} MB of memory, \
         at least {required_mb} MB required"
    )]
    InsufficientResources { total_memory_mb: u64, required_mb: u64 },

    #[error("resource probe failed: {0}")]
    Probe(String),

    #[error("command failed: {command}\n{stderr}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("prerequisite missing: {0}")]
    PrerequisiteMissing(String),

    #[error("{service} did not become healthy after {attempts} checks")]
    HealthcheckTimeout { service: String, attempts: u32 },

    #[error("certificate for {domain} could not be obtained: {reason}")]
    Certificate { domain: String, reason: String },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Dotenv(#[from] dotenvy::Error),

    #[error("prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),
}

impl ProvisionError {
    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}
