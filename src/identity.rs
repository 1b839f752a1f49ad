//! Operator-supplied and generated identity values for a run.

use std::fmt;

use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;

use crate::error::{ProvisionError, ProvisionResult};

/// Domain sentinel that disables DNS checks and certificate issuance.
pub const LOCALHOST: &str = "localhost";

/// Length of generated secrets.
pub const SECRET_LEN: usize = 32;

/// Shortest secret accepted when reusing an existing value.
pub const MIN_SECRET_LEN: usize = 24;

/// A credential whose `Debug` and `Display` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    #[must_use]
    pub const fn new(value: String) -> Self {
        Self(value)
    }

    /// Draw a fresh alphanumeric secret from the OS random source.
    #[must_use]
    pub fn generate() -> Self {
        Self(generate_secret(SECRET_LEN))
    }

    /// The cleartext value. Only artifact renderers and the one-time
    /// operator echo should call this.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Identity values collected once per run and never persisted except
/// through the emitted artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningIdentity {
    pub domain: String,
    pub admin_email: String,
    pub db_user: String,
    pub db_name: String,
    pub db_root_secret: Secret,
    pub db_app_secret: Secret,
}

impl ProvisioningIdentity {
    /// Build an identity with freshly generated secrets, validating every
    /// operator-supplied field.
    pub fn new(domain: &str, admin_email: &str, db_user: &str, db_name: &str) -> ProvisionResult<Self> {
        Ok(Self {
            domain: validate_domain(domain)?,
            admin_email: validate_email(admin_email)?,
            db_user: validate_db_identifier("db_user", db_user)?,
            db_name: validate_db_identifier("db_name", db_name)?,
            db_root_secret: Secret::generate(),
            db_app_secret: Secret::generate(),
        })
    }

    /// Replace the generated secrets with previously issued ones.
    #[must_use]
    pub fn with_secrets(mut self, root: Secret, app: Secret) -> Self {
        self.db_root_secret = root;
        self.db_app_secret = app;
        self
    }

    #[must_use]
    pub fn is_localhost(&self) -> bool {
        self.domain == LOCALHOST
    }
}

/// Generate a secret of `len` characters from `[A-Za-z0-9]`.
#[must_use]
pub fn generate_secret(len: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Validate and normalize a domain name.
///
/// Accepts [`LOCALHOST`] and multi-label hostnames such as
/// `example.com` or `sub.example.co`. Returns the lowercased name.
pub fn validate_domain(domain: &str) -> ProvisionResult<String> {
    let domain = domain.trim().to_ascii_lowercase();
    if domain == LOCALHOST {
        return Ok(domain);
    }

    let invalid = |reason: &str| ProvisionError::Validation {
        field: "domain",
        reason: format!("{domain:?} {reason}"),
    };

    if domain.is_empty() {
        return Err(invalid("is empty"));
    }
    if domain.len() > 253 {
        return Err(invalid("is longer than 253 characters"));
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(invalid("needs at least two labels"));
    }
    if let Some(label) = labels.iter().find(|l| !is_valid_label(l)) {
        return Err(invalid(&format!("has an invalid label {label:?}")));
    }

    let tld = labels[labels.len() - 1];
    if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(invalid("has an invalid top-level label"));
    }

    Ok(domain)
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Validate an email address of the form `local@domain`.
pub fn validate_email(email: &str) -> ProvisionResult<String> {
    let email = email.trim();
    let invalid = |reason: &str| ProvisionError::Validation {
        field: "email",
        reason: format!("{email:?} {reason}"),
    };

    let (local, domain) = email.split_once('@').ok_or_else(|| invalid("has no '@'"))?;
    if local.is_empty() || local.len() > 64 {
        return Err(invalid("has an invalid local part"));
    }
    if !local
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c))
    {
        return Err(invalid("has unsupported characters"));
    }
    let domain = validate_domain(domain).map_err(|_| invalid("has an invalid domain"))?;

    Ok(format!("{local}@{domain}"))
}

/// Default contact address for a domain.
#[must_use]
pub fn default_email(domain: &str) -> String {
    format!("admin@{domain}")
}

/// Validate a database user or schema name.
pub fn validate_db_identifier(field: &'static str, value: &str) -> ProvisionResult<String> {
    let value = value.trim();
    if value.is_empty() || value.len() > 32 {
        return Err(ProvisionError::Validation {
            field,
            reason: format!("{value:?} must be 1 to 32 characters"),
        });
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ProvisionError::Validation {
            field,
            reason: format!("{value:?} may only contain letters, digits and '_'"),
        });
    }
    Ok(value.to_string())
}
