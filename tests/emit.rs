use std::fs;
use std::os::unix::fs::PermissionsExt;

use chrono::{TimeZone, Utc};
use stackwright::emit::{self, EmitOptions, PUBLIC_MODE, SECRET_MODE, paths};
use stackwright::identity::{ProvisioningIdentity, Secret};
use stackwright::probe::ResourceSnapshot;
use stackwright::tier::{TierProfile, select_tier};

fn basic_host() -> (ResourceSnapshot, TierProfile) {
    let snapshot = ResourceSnapshot::new(2, 2048, 1536, 40);
    let (_, profile) = select_tier(&snapshot);
    (snapshot, profile)
}

fn identity(domain: &str) -> ProvisioningIdentity {
    ProvisioningIdentity::new(domain, &format!("admin@{domain}"), "app", "shop")
        .unwrap()
        .with_secrets(
            Secret::new("RootSecretRootSecretRootSecret01".into()),
            Secret::new("AppSecretAppSecretAppSecretApp01".into()),
        )
}

fn options_at(hour: u32) -> EmitOptions {
    EmitOptions::new(Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap())
}

fn content<'a>(artifacts: &'a [emit::ConfigArtifact], path: &str) -> &'a str {
    &artifacts
        .iter()
        .find(|a| a.path.to_str() == Some(path))
        .unwrap_or_else(|| panic!("no artifact {path}"))
        .content
}

#[test]
fn emits_every_artifact_with_its_mode() {
    let (snapshot, profile) = basic_host();
    let artifacts = emit::emit(&profile, &identity("localhost"), &snapshot, &options_at(0)).unwrap();

    let listed: Vec<(&str, u32)> = artifacts
        .iter()
        .map(|a| (a.path.to_str().unwrap(), a.mode))
        .collect();
    assert_eq!(
        listed,
        vec![
            (paths::ENV_FILE, SECRET_MODE),
            (paths::NGINX_MAIN, PUBLIC_MODE),
            (paths::NGINX_SITE, PUBLIC_MODE),
            (paths::DB_TUNING, PUBLIC_MODE),
            (paths::PHP_POOL, PUBLIC_MODE),
            (paths::PHP_INI, PUBLIC_MODE),
            (paths::COMPOSE_FILE, PUBLIC_MODE),
        ]
    );
}

#[test]
fn emission_is_idempotent_apart_from_timestamp() {
    let (snapshot, profile) = basic_host();
    let id = identity("example.com");

    let first = emit::emit(&profile, &id, &snapshot, &options_at(1)).unwrap();
    let second = emit::emit(&profile, &id, &snapshot, &options_at(2)).unwrap();

    for (a, b) in first.iter().zip(&second) {
        assert_ne!(a.content, b.content, "{} has no timestamp", a.path.display());
        let strip = |s: &str| {
            s.lines()
                .filter(|l| !emit::is_timestamp_line(l))
                .map(str::to_string)
                .collect::<Vec<_>>()
        };
        assert_eq!(strip(&a.content), strip(&b.content), "{}", a.path.display());
    }
}

#[test]
fn env_descriptor_holds_resolved_parameters() {
    let (snapshot, profile) = basic_host();
    let artifacts = emit::emit(&profile, &identity("example.com"), &snapshot, &options_at(0)).unwrap();
    let env = content(&artifacts, paths::ENV_FILE);

    for line in [
        "DOMAIN=example.com",
        "SITE_URL=http://example.com",
        "ADMIN_EMAIL=admin@example.com",
        "TIER=basic",
        "DB_HOST=db",
        "DB_NAME=shop",
        "DB_USER=app",
        "DB_PASSWORD=AppSecretAppSecretAppSecretApp01",
        "DB_ROOT_PASSWORD=RootSecretRootSecretRootSecret01",
        "DB_MAX_CONNECTIONS=50",
        "DB_BUFFER_POOL_MB=768",
        "PHP_MEMORY_LIMIT_MB=256",
        "PHP_OPCACHE_MB=128",
        "PHP_PM_MAX_CHILDREN=10",
        "PHP_PM_START_SERVERS=3",
        "PHP_PM_MIN_SPARE_SERVERS=2",
        "PHP_PM_MAX_SPARE_SERVERS=4",
        "NGINX_WORKER_PROCESSES=2",
        "NGINX_WORKER_CONNECTIONS=1024",
        "UPLOAD_MAX_BYTES=33554432",
    ] {
        assert!(env.lines().any(|l| l == line), "missing {line}\n{env}");
    }
}

#[test]
fn secrets_appear_only_in_env_descriptor() {
    let (snapshot, profile) = basic_host();
    let id = identity("example.com");
    let artifacts = emit::emit(&profile, &id, &snapshot, &options_at(0)).unwrap();

    for artifact in &artifacts {
        let leaks = artifact.content.contains(id.db_root_secret.expose())
            || artifact.content.contains(id.db_app_secret.expose());
        assert_eq!(leaks, artifact.mode == SECRET_MODE, "{}", artifact.path.display());
    }
}

#[test]
fn database_and_runtime_tuning() {
    let (snapshot, profile) = basic_host();
    let artifacts = emit::emit(&profile, &identity("localhost"), &snapshot, &options_at(0)).unwrap();

    let db = content(&artifacts, paths::DB_TUNING);
    assert!(db.contains("[mysqld]"));
    assert!(db.contains("innodb_buffer_pool_size = 768M"));
    assert!(db.contains("max_connections = 50"));
    assert!(db.contains("tmp_table_size = 48M"));
    assert!(db.contains("max_heap_table_size = 48M"));
    assert!(db.contains("character-set-server = utf8mb4"));
    assert!(db.contains("collation-server = utf8mb4_unicode_ci"));

    let pool = content(&artifacts, paths::PHP_POOL);
    assert!(pool.contains("pm = dynamic"));
    assert!(pool.contains("pm.max_children = 10"));
    assert!(pool.contains("pm.start_servers = 3"));

    let ini = content(&artifacts, paths::PHP_INI);
    assert!(ini.contains("memory_limit = 256M"));
    assert!(ini.contains("upload_max_filesize = 32M"));
    assert!(ini.contains("opcache.memory_consumption = 128"));
    let extension = ini.find("zend_extension = opcache").unwrap();
    assert!(extension < ini.find("opcache.enable").unwrap());
}

#[test]
fn site_url_follows_tls() {
    let (snapshot, profile) = basic_host();

    let secure = emit::emit_env(&profile, &identity("example.com"), &snapshot, &options_at(0).tls(true));
    assert_eq!(secure.path, std::path::Path::new(paths::ENV_FILE));
    assert_eq!(secure.mode, SECRET_MODE);
    assert!(secure.content.lines().any(|l| l == "SITE_URL=https://example.com"));

    let local = emit::emit_env(&profile, &identity("localhost"), &snapshot, &options_at(0).tls(true));
    assert!(local.content.lines().any(|l| l == "SITE_URL=http://localhost"));
}

#[test]
fn tls_regeneration_adds_https_server_and_redirect() {
    let (_, profile) = basic_host();
    let id = identity("example.com");

    let plain = emit::emit_site(&profile, &id, &options_at(0));
    assert!(plain.content.contains("listen 80;"));
    assert!(!plain.content.contains("listen 443 ssl;"));
    assert!(!plain.content.contains("return 301"));

    let secure = emit::emit_site(&profile, &id, &options_at(0).tls(true));
    assert_eq!(secure.path.to_str(), Some(paths::NGINX_SITE));
    assert!(secure.content.contains("listen 443 ssl;"));
    assert!(secure.content.contains("return 301 https://$host$request_uri;"));
    assert!(
        secure
            .content
            .contains("ssl_certificate /etc/letsencrypt/live/example.com/fullchain.pem;")
    );
    assert!(
        secure
            .content
            .contains("ssl_certificate_key /etc/letsencrypt/live/example.com/privkey.pem;")
    );
    // The challenge stays reachable over plain HTTP for renewals.
    let http_server = secure.content.split("listen 443").next().unwrap();
    assert!(http_server.contains("/.well-known/acme-challenge/"));
}

#[test]
fn localhost_never_gets_tls() {
    let (_, profile) = basic_host();
    let site = emit::emit_site(&profile, &identity("localhost"), &options_at(0).tls(true));
    assert!(!site.content.contains("443"));
}

#[test]
fn written_env_file_is_private() {
    let dir = tempfile::tempdir().unwrap();
    let (snapshot, profile) = basic_host();
    let artifacts = emit::emit(&profile, &identity("localhost"), &snapshot, &options_at(0)).unwrap();

    emit::ensure_directories(dir.path()).unwrap();
    emit::write_artifacts(dir.path(), &artifacts).unwrap();

    for artifact in &artifacts {
        let path = dir.path().join(&artifact.path);
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, artifact.mode, "{}", path.display());
        assert_eq!(fs::read_to_string(&path).unwrap(), artifact.content);
    }
    let env_mode = fs::metadata(dir.path().join(paths::ENV_FILE))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(env_mode & 0o777, 0o600);

    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn rewrite_tightens_existing_env_file() {
    let dir = tempfile::tempdir().unwrap();
    let env = dir.path().join(paths::ENV_FILE);
    fs::write(&env, "OLD=1\n").unwrap();
    fs::set_permissions(&env, fs::Permissions::from_mode(0o644)).unwrap();

    let (snapshot, profile) = basic_host();
    let artifacts = emit::emit(&profile, &identity("localhost"), &snapshot, &options_at(0)).unwrap();
    emit::write_artifacts(dir.path(), &artifacts[..1]).unwrap();

    let mode = fs::metadata(&env).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn directories_created() {
    let dir = tempfile::tempdir().unwrap();
    emit::ensure_directories(dir.path()).unwrap();
    for sub in paths::DIRECTORIES {
        assert!(dir.path().join(sub).is_dir(), "{sub}");
    }
}

#[test]
fn certificate_detection() {
    let dir = tempfile::tempdir().unwrap();
    assert!(!emit::certificate_exists(dir.path(), "example.com"));

    let live = dir.path().join(paths::LETSENCRYPT).join("live/example.com");
    fs::create_dir_all(&live).unwrap();
    fs::write(live.join("fullchain.pem"), "cert").unwrap();
    assert!(emit::certificate_exists(dir.path(), "example.com"));
}
