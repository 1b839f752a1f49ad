//! Optional `stackwright.toml` configuration.
//!
//! Every table is optional; missing values fall back to the defaults
//! below and command-line flags override whatever the file says.
//!
//! ```toml
//! [identity]
//! domain = "example.com"
//! email = "ops@example.com"
//!
//! [policy]
//! cache_percent = 50
//!
//! [logging]
//! level = "debug"
//! format = "json"
//!
//! [stack]
//! project = "shop"
//! ```

use std::path::Path;

use serde::Deserialize;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::{ProvisionError, ProvisionResult};
use crate::identity::LOCALHOST;
use crate::tier::TierPolicy;

/// Name of the config file looked up in the target directory.
pub const CONFIG_FILE: &str = "stackwright.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub identity: IdentityConfig,
    pub policy: TierPolicy,
    pub logging: LoggingConfig,
    pub stack: StackConfig,
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> ProvisionResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProvisionError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> ProvisionResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> ProvisionResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ProvisionResult<()> {
        self.policy.validate()?;
        if self.stack.project.is_empty() {
            return Err(ProvisionError::Config("stack.project cannot be empty".into()));
        }
        Ok(())
    }
}

/// Defaults for identity values the operator is asked for.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityConfig {
    pub domain: Option<String>,
    pub email: Option<String>,
    pub db_user: String,
    pub db_name: String,
}

impl IdentityConfig {
    /// Domain to offer when the operator gives none.
    #[must_use]
    pub fn domain_or_default(&self) -> &str {
        self.domain
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(LOCALHOST)
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            domain: None,
            email: None,
            db_user: "app".into(),
            db_name: "app".into(),
        }
    }
}

/// Container images and compose project naming.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StackConfig {
    pub project: String,
    pub nginx_image: String,
    pub php_image: String,
    pub mysql_image: String,
    pub phpmyadmin_image: String,
    pub certbot_image: String,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            project: "stackwright".into(),
            nginx_image: "nginx:stable-alpine".into(),
            php_image: "php:8.3-fpm-alpine".into(),
            mysql_image: "mysql:8.0".into(),
            phpmyadmin_image: "phpmyadmin:5".into(),
            certbot_image: "certbot/certbot:latest".into(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl LoggingConfig {
    /// Initialize the tracing subscriber. `RUST_LOG` takes precedence
    /// over the configured level. Logs go to stderr so they never mix
    /// with rendered artifacts on stdout.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => {
                fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
            _ => {
                fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: "pretty".into(),
        }
    }
}
