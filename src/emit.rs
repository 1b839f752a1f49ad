//! Config Emitter: turns a resolved profile and identity into the set of
//! artifacts every downstream service reads.
//!
//! [`emit`] is pure and deterministic; only the header line carrying
//! `generated_at` differs between runs with identical inputs. Writing is
//! a separate step, [`write_artifacts`], which replaces each file through
//! a temporary sibling and a rename so a reader never observes a
//! half-written artifact. There is no rollback across files: a failure
//! part-way leaves earlier artifacts in their new state.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use crate::compose::{self, ADMIN_SERVICE, DATABASE_SERVICE, RUNTIME_SERVICE};
use crate::config::StackConfig;
use crate::env_file::EnvFile;
use crate::error::{ProvisionError, ProvisionResult};
use crate::identity::ProvisioningIdentity;
use crate::ini::IniDocument;
use crate::nginx;
use crate::probe::ResourceSnapshot;
use crate::proxy::{ReverseProxy, Route, TlsCertificate};
use crate::tier::TierProfile;

/// Artifact and directory locations, relative to the target directory.
pub mod paths {
    pub const ENV_FILE: &str = ".env";
    pub const COMPOSE_FILE: &str = "docker-compose.yml";
    pub const NGINX_MAIN: &str = "nginx/nginx.conf";
    pub const NGINX_SITE: &str = "nginx/conf.d/default.conf";
    pub const DB_TUNING: &str = "mysql/conf.d/tuning.cnf";
    pub const PHP_POOL: &str = "php/www.conf";
    pub const PHP_INI: &str = "php/php.ini";
    pub const DB_DATA: &str = "mysql/data";
    pub const DOCUMENT_ROOT: &str = "www";
    pub const CHALLENGE_WEBROOT: &str = "certbot/www";
    pub const LETSENCRYPT: &str = "certbot/conf";

    /// Every directory the stack mounts.
    pub const DIRECTORIES: &[&str] = &[
        "nginx/conf.d",
        "mysql/conf.d",
        DB_DATA,
        "php",
        DOCUMENT_ROOT,
        CHALLENGE_WEBROOT,
        LETSENCRYPT,
        "logs/nginx",
    ];
}

/// Mode for files holding credentials.
pub const SECRET_MODE: u32 = 0o600;
/// Mode for everything else.
pub const PUBLIC_MODE: u32 = 0o644;

const HEADER_PREFIX: &str = "Generated by stackwright at";
const MIB: u64 = 1024 * 1024;

/// One generated file: where it goes, what it holds, who may read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigArtifact {
    /// Path relative to the target directory.
    pub path: PathBuf,
    pub content: String,
    pub mode: u32,
}

impl ConfigArtifact {
    fn new(path: &str, content: String, mode: u32) -> Self {
        Self {
            path: PathBuf::from(path),
            content,
            mode,
        }
    }
}

/// Inputs to [`emit`] beyond the profile and identity.
#[derive(Debug, Clone)]
pub struct EmitOptions {
    pub generated_at: DateTime<Utc>,
    /// Emit the TLS variant of the site descriptor.
    pub tls: bool,
    pub stack: StackConfig,
}

impl EmitOptions {
    #[must_use]
    pub fn new(generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            tls: false,
            stack: StackConfig::default(),
        }
    }

    #[must_use]
    pub const fn tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    #[must_use]
    pub fn stack(mut self, stack: StackConfig) -> Self {
        self.stack = stack;
        self
    }

    fn header(&self) -> String {
        format!(
            "{HEADER_PREFIX} {}. Re-run `stackwright configure` instead of editing.",
            self.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// True for the one line of each artifact that embeds the timestamp.
#[must_use]
pub fn is_timestamp_line(line: &str) -> bool {
    line.contains(HEADER_PREFIX)
}

/// Render every artifact for a run.
pub fn emit(
    profile: &TierProfile,
    identity: &ProvisioningIdentity,
    snapshot: &ResourceSnapshot,
    options: &EmitOptions,
) -> ProvisionResult<Vec<ConfigArtifact>> {
    let header = options.header();
    let proxy = reverse_proxy(profile, identity, options.tls);

    let compose = format!("# {header}\n{}", compose::render(&options.stack)?);

    Ok(vec![
        env_artifact(profile, identity, snapshot, options, &header),
        ConfigArtifact::new(
            paths::NGINX_MAIN,
            nginx::format(&nginx::main_conf(&proxy).comment(&header)),
            PUBLIC_MODE,
        ),
        site_artifact(&proxy, &header),
        ConfigArtifact::new(
            paths::DB_TUNING,
            database_tuning(profile).comment(&header).render(),
            PUBLIC_MODE,
        ),
        ConfigArtifact::new(
            paths::PHP_POOL,
            runtime_pool(profile).comment(&header).render(),
            PUBLIC_MODE,
        ),
        ConfigArtifact::new(
            paths::PHP_INI,
            runtime_ini(profile).comment(&header).render(),
            PUBLIC_MODE,
        ),
        ConfigArtifact::new(paths::COMPOSE_FILE, compose, PUBLIC_MODE),
    ])
}

/// Render only the site descriptor, for regeneration after a
/// certificate has been issued.
#[must_use]
pub fn emit_site(
    profile: &TierProfile,
    identity: &ProvisioningIdentity,
    options: &EmitOptions,
) -> ConfigArtifact {
    let proxy = reverse_proxy(profile, identity, options.tls);
    site_artifact(&proxy, &options.header())
}

/// Render only the `.env` descriptor. Its `SITE_URL` follows
/// `options.tls`, so it is rewritten together with the site.
#[must_use]
pub fn emit_env(
    profile: &TierProfile,
    identity: &ProvisioningIdentity,
    snapshot: &ResourceSnapshot,
    options: &EmitOptions,
) -> ConfigArtifact {
    env_artifact(profile, identity, snapshot, options, &options.header())
}

fn env_artifact(
    profile: &TierProfile,
    identity: &ProvisioningIdentity,
    snapshot: &ResourceSnapshot,
    options: &EmitOptions,
    header: &str,
) -> ConfigArtifact {
    ConfigArtifact::new(
        paths::ENV_FILE,
        env_descriptor(profile, identity, snapshot, options)
            .comment(header)
            .render(),
        SECRET_MODE,
    )
}

fn site_artifact(proxy: &ReverseProxy, header: &str) -> ConfigArtifact {
    ConfigArtifact::new(
        paths::NGINX_SITE,
        nginx::format(&nginx::site_conf(proxy).comment(header)),
        PUBLIC_MODE,
    )
}

/// The flat key/value descriptor of every resolved parameter.
#[must_use]
pub fn env_descriptor(
    profile: &TierProfile,
    identity: &ProvisioningIdentity,
    snapshot: &ResourceSnapshot,
    options: &EmitOptions,
) -> EnvFile {
    let scheme = if options.tls && !identity.is_localhost() {
        "https"
    } else {
        "http"
    };
    EnvFile::new()
        .set("COMPOSE_PROJECT_NAME", &options.stack.project)
        .set("DOMAIN", &identity.domain)
        .set("SITE_URL", format!("{scheme}://{}", identity.domain))
        .set("ADMIN_EMAIL", &identity.admin_email)
        .set("TIER", profile.tier)
        .set("CPU_CORES", snapshot.cpu_cores)
        .set("TOTAL_MEMORY_MB", snapshot.total_memory_mb)
        .set("DB_HOST", DATABASE_SERVICE)
        .set("DB_NAME", &identity.db_name)
        .set("DB_USER", &identity.db_user)
        .set("DB_PASSWORD", identity.db_app_secret.expose())
        .set("DB_ROOT_PASSWORD", identity.db_root_secret.expose())
        .set("DB_MAX_CONNECTIONS", profile.db_max_connections)
        .set("DB_BUFFER_POOL_MB", profile.cache_memory_mb)
        .set("DB_TMP_TABLE_MB", profile.tmp_table_size_mb)
        .set("PHP_MEMORY_LIMIT_MB", profile.runtime_memory_mb)
        .set("PHP_OPCACHE_MB", profile.opcache_memory_mb)
        .set("PHP_PM_MAX_CHILDREN", profile.worker_max_children)
        .set("PHP_PM_START_SERVERS", profile.worker_start_count)
        .set("PHP_PM_MIN_SPARE_SERVERS", profile.worker_min_idle)
        .set("PHP_PM_MAX_SPARE_SERVERS", profile.worker_max_idle)
        .set("NGINX_WORKER_PROCESSES", profile.worker_process_count)
        .set("NGINX_WORKER_CONNECTIONS", profile.worker_connections)
        .set("UPLOAD_MAX_BYTES", profile.max_upload_size_bytes)
}

/// The reverse proxy for the stack: static files and the front
/// controller, FastCGI to the runtime, the admin UI under
/// `/phpmyadmin/`, and the ACME challenge exception.
#[must_use]
pub fn reverse_proxy(
    profile: &TierProfile,
    identity: &ProvisioningIdentity,
    tls: bool,
) -> ReverseProxy {
    let proxy = ReverseProxy::new(&identity.domain)
        .worker_processes(profile.worker_process_count)
        .worker_connections(profile.worker_connections)
        .max_body_size(profile.max_upload_size_bytes)
        .gzip()
        .security_headers()
        .route(Route::AcmeChallenge {
            webroot: "/var/www/certbot".into(),
        })
        .route(Route::Deny {
            pattern: "/\\.(?!well-known)".into(),
        })
        .route(Route::Proxy {
            prefix: format!("/{ADMIN_SERVICE}/"),
            upstream: format!("http://{ADMIN_SERVICE}:80/"),
        })
        .route(Route::Assets {
            extensions: ["css", "js", "png", "jpg", "jpeg", "gif", "svg", "ico", "woff2"]
                .iter()
                .map(|e| (*e).to_string())
                .collect(),
            max_age: "30d".into(),
        })
        .route(Route::FastCgi {
            pattern: "\\.php$".into(),
            upstream: format!("{RUNTIME_SERVICE}:9000"),
        })
        .route(Route::Static {
            prefix: "/".into(),
            fallback: "/index.php?$query_string".into(),
        });

    if tls && !identity.is_localhost() {
        proxy.tls(TlsCertificate::letsencrypt(&identity.domain))
    } else {
        proxy
    }
}

/// MySQL tuning: buffer pool, connection ceiling, temp tables, and a
/// Unicode-aware charset and collation.
#[must_use]
pub fn database_tuning(profile: &TierProfile) -> IniDocument {
    let tmp = format!("{}M", profile.tmp_table_size_mb);
    IniDocument::new()
        .section("mysqld")
        .entry(
            "innodb_buffer_pool_size",
            format!("{}M", profile.cache_memory_mb),
        )
        .entry("max_connections", profile.db_max_connections)
        .entry("tmp_table_size", &tmp)
        .entry("max_heap_table_size", &tmp)
        .entry("skip-name-resolve", "ON")
        .entry("character-set-server", "utf8mb4")
        .entry("collation-server", "utf8mb4_unicode_ci")
        .section("client")
        .entry("default-character-set", "utf8mb4")
}

/// PHP-FPM pool sizing.
#[must_use]
pub fn runtime_pool(profile: &TierProfile) -> IniDocument {
    IniDocument::new()
        .section("www")
        .entry("user", "www-data")
        .entry("group", "www-data")
        .entry("listen", "9000")
        .entry("pm", "dynamic")
        .entry("pm.max_children", profile.worker_max_children)
        .entry("pm.start_servers", profile.worker_start_count)
        .entry("pm.min_spare_servers", profile.worker_min_idle)
        .entry("pm.max_spare_servers", profile.worker_max_idle)
        .entry("pm.max_requests", 500)
        .entry("clear_env", "no")
}

/// PHP runtime limits and opcache sizing.
#[must_use]
pub fn runtime_ini(profile: &TierProfile) -> IniDocument {
    let upload = php_size(profile.max_upload_size_bytes);
    IniDocument::new()
        .section("PHP")
        .entry("memory_limit", format!("{}M", profile.runtime_memory_mb))
        .entry("upload_max_filesize", &upload)
        .entry("post_max_size", &upload)
        .entry("max_execution_time", 300)
        .entry("expose_php", "Off")
        .section("opcache")
        .entry("zend_extension", "opcache")
        .entry("opcache.enable", 1)
        .entry("opcache.memory_consumption", profile.opcache_memory_mb)
        .entry("opcache.interned_strings_buffer", 16)
        .entry("opcache.max_accelerated_files", 20000)
        .entry("opcache.validate_timestamps", 1)
}

fn php_size(bytes: u64) -> String {
    if bytes % MIB == 0 {
        format!("{}M", bytes / MIB)
    } else {
        bytes.to_string()
    }
}

/// Create every directory the stack mounts under `root`.
pub fn ensure_directories(root: &Path) -> ProvisionResult<()> {
    for dir in paths::DIRECTORIES {
        let path = root.join(dir);
        fs::create_dir_all(&path).map_err(|e| ProvisionError::write(&path, e))?;
    }
    Ok(())
}

/// Whether certbot has already issued a certificate for `domain`.
#[must_use]
pub fn certificate_exists(root: &Path, domain: &str) -> bool {
    root.join(paths::LETSENCRYPT)
        .join("live")
        .join(domain)
        .join("fullchain.pem")
        .exists()
}

/// Write artifacts under `root`, each via a temporary file that is
/// synced, given its final mode, and renamed into place.
///
/// Stops at the first failure.
pub fn write_artifacts(root: &Path, artifacts: &[ConfigArtifact]) -> ProvisionResult<()> {
    for artifact in artifacts {
        let path = root.join(&artifact.path);
        write_atomic(&path, artifact.content.as_bytes(), artifact.mode)
            .map_err(|e| ProvisionError::write(&path, e))?;
        debug!(path = %path.display(), mode = %format!("{:o}", artifact.mode), "artifact written");
    }
    Ok(())
}

fn write_atomic(path: &Path, content: &[u8], mode: u32) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    let result = (|| {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&tmp)?;
        // A stale temp file keeps its old mode; reset it explicitly.
        file.set_permissions(fs::Permissions::from_mode(mode))?;
        file.write_all(content)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
