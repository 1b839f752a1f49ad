use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::certs::certbot::Certbot;
use crate::certs::{self, CertificateClient};
use crate::compose::DATABASE_SERVICE;
use crate::config::{CONFIG_FILE, Config};
use crate::emit::{self, EmitOptions, paths};
use crate::engine::Orchestrator;
use crate::engine::docker::DockerCompose;
use crate::env_file;
use crate::error::{ProvisionError, ProvisionResult};
use crate::identity::{self, MIN_SECRET_LEN, ProvisioningIdentity, Secret};
use crate::probe::{self, HostProbe, ResourceProbe};
use crate::prompt::{Prompt, Unattended};
use crate::state::{Phase, RunState, Sequencer};

/// File placed in the challenge webroot to check that it is served.
const PROBE_TOKEN: &str = "stackwright-probe";

/// Provisioning pipeline: walks the [`Sequencer`] through each command
/// against one target directory.
pub struct Pipeline {
    target: PathBuf,
    config: Config,
    probe: Box<dyn ResourceProbe>,
    engine: Box<dyn Orchestrator>,
    certs: Box<dyn CertificateClient>,
    prompt: Box<dyn Prompt>,
    assume_yes: bool,
}

impl Pipeline {
    /// A pipeline using the host probe, docker compose, certbot and
    /// unattended prompts.
    #[must_use]
    pub fn new(target: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            target: target.into(),
            probe: Box::new(HostProbe::new()),
            engine: Box::new(DockerCompose::new(&config.stack)),
            certs: Box::new(Certbot::new(&config.stack)),
            prompt: Box::new(Unattended::new(false)),
            assume_yes: false,
            config,
        }
    }

    #[must_use]
    pub fn probe(mut self, probe: impl ResourceProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    #[must_use]
    pub fn engine(mut self, engine: impl Orchestrator + 'static) -> Self {
        self.engine = Box::new(engine);
        self
    }

    #[must_use]
    pub fn certs(mut self, client: impl CertificateClient + 'static) -> Self {
        self.certs = Box::new(client);
        self
    }

    #[must_use]
    pub fn prompt(mut self, prompt: impl Prompt + 'static) -> Self {
        self.prompt = Box::new(prompt);
        self
    }

    /// Accept advisory warnings without asking.
    #[must_use]
    pub const fn assume_yes(mut self, yes: bool) -> Self {
        self.assume_yes = yes;
        self
    }

    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Dispatch a parsed CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatched command fails.
    pub fn run(&self, command: &Command) -> ProvisionResult<()> {
        match command {
            Command::Configure(opts) => self.configure(opts).map(drop),
            Command::Provision => self.provision().map(drop),
            Command::Secure => self.secure().map(drop),
            Command::Up(opts) => self.up(opts).map(drop),
            Command::Status => self.status(),
        }
    }

    /// Probe, collect identity, select a tier and emit every artifact.
    /// Returns the phase the run ended in: `ConfigEmitted`, `Declined`,
    /// or `TierSelected` for a dry run.
    pub fn configure(&self, opts: &ConfigureOptions) -> ProvisionResult<Phase> {
        let mut seq = Sequencer::new();
        let result = self.configure_steps(&mut seq, opts);
        self.settle(&mut seq, result, !opts.dry_run)
    }

    /// Start the stack and wait for the database healthcheck.
    pub fn provision(&self) -> ProvisionResult<Phase> {
        let mut state = RunState::require(&self.target, Phase::ConfigEmitted, "provision")?;
        let mut seq = Sequencer::resume(Phase::ConfigEmitted);
        let result = self.provision_steps(&mut seq);
        if result.is_ok() {
            state.record(state.completed.max(seq.phase()));
            state.save(&self.target)?;
        }
        self.settle(&mut seq, result, true)
    }

    /// Obtain a certificate and switch the site to HTTPS. A no-op that
    /// still reaches `Ready` for `localhost`.
    pub fn secure(&self) -> ProvisionResult<Phase> {
        let mut state = RunState::require(&self.target, Phase::ServicesStarted, "secure")?;
        let identity = self.stored_identity(&state)?;
        let mut seq =
            Sequencer::resume(Phase::ServicesStarted).skip_certificate(identity.is_localhost());
        let result = self.secure_steps(&mut seq, &state, &identity);
        if result.is_ok() {
            state.record(seq.phase());
            state.save(&self.target)?;
        }
        self.settle(&mut seq, result, true)
    }

    /// `configure`, `provision` and `secure` in one run.
    pub fn up(&self, opts: &ConfigureOptions) -> ProvisionResult<Phase> {
        let phase = self.configure(opts)?;
        if phase != Phase::ConfigEmitted {
            return Ok(phase);
        }
        self.provision()?;
        self.secure()
    }

    /// Print the persisted run state and the container status.
    pub fn status(&self) -> ProvisionResult<()> {
        let Some(state) = RunState::load(&self.target)? else {
            eprintln!(
                "{} is not configured. Run `stackwright configure` first.",
                self.target.display()
            );
            return Ok(());
        };

        eprintln!("Domain:    {}", state.domain);
        eprintln!("Tier:      {}", state.tier);
        eprintln!("Completed: {}", state.completed);
        eprintln!("Updated:   {}", state.updated_at.to_rfc3339());
        if let Some(failure) = &state.failure {
            eprintln!("Last failure in {}: {}", failure.phase, failure.message);
        }

        if state.completed.reached(Phase::ServicesStarted) {
            eprintln!();
            self.engine.status(&self.target)?;
        }
        Ok(())
    }

    fn configure_steps(&self, seq: &mut Sequencer, opts: &ConfigureOptions) -> ProvisionResult<()> {
        let report = probe::probe(self.probe.as_ref(), &self.target)?;
        seq.advance(Phase::ResourcesProbed)?;

        let snapshot = report.snapshot;
        eprintln!(
            "Host: {} cores, {} MB memory ({} MB available), {} GB disk free",
            snapshot.cpu_cores,
            snapshot.total_memory_mb,
            snapshot.available_memory_mb,
            snapshot.available_disk_gb
        );
        for warning in &report.warnings {
            eprintln!("WARNING: {warning}");
        }
        if !report.warnings.is_empty() && !self.accept_warnings()? {
            seq.advance(Phase::Declined)?;
            eprintln!("Aborted. Nothing was written.");
            return Ok(());
        }

        let (identity, fresh_secrets) = self.collect_identity(opts)?;
        seq.advance(Phase::IdentityCollected)?;

        let (tier, profile) = self.config.policy.select(&snapshot);
        info!(
            tier = %tier,
            cache_mb = profile.cache_memory_mb,
            runtime_mb = profile.runtime_memory_mb,
            workers = profile.worker_process_count,
            "tier selected"
        );
        eprintln!("Selected tier: {tier}");
        seq.advance(Phase::TierSelected)?;

        let tls = !identity.is_localhost() && emit::certificate_exists(&self.target, &identity.domain);
        let options = EmitOptions::new(Utc::now())
            .tls(tls)
            .stack(self.config.stack.clone());
        let artifacts = emit::emit(&profile, &identity, &snapshot, &options)?;

        if opts.dry_run {
            eprintln!("=== Dry run: no changes will be made ===");
            for artifact in &artifacts {
                eprintln!();
                eprintln!("--- {} ({:o}) ---", artifact.path.display(), artifact.mode);
                println!("{}", redact(&artifact.content, &identity));
            }
            return Ok(());
        }

        emit::ensure_directories(&self.target)?;
        seq.advance(Phase::DirectoriesReady)?;

        emit::write_artifacts(&self.target, &artifacts)?;
        RunState::new(Phase::ConfigEmitted, &identity.domain, tier, snapshot).save(&self.target)?;
        seq.advance(Phase::ConfigEmitted)?;

        eprintln!(
            "Wrote {} files to {}",
            artifacts.len(),
            self.target.display()
        );
        if fresh_secrets {
            eprintln!();
            eprintln!(
                "Database credentials (shown once, stored in {}):",
                paths::ENV_FILE
            );
            eprintln!("  root password: {}", identity.db_root_secret.expose());
            eprintln!(
                "  {} password: {}",
                identity.db_user,
                identity.db_app_secret.expose()
            );
        }
        eprintln!();
        eprintln!("Next: stackwright provision");
        Ok(())
    }

    fn provision_steps(&self, seq: &mut Sequencer) -> ProvisionResult<()> {
        self.engine.check_prerequisites()?;
        self.engine.start(&self.target)?;
        self.engine.wait_healthy(&self.target, DATABASE_SERVICE)?;
        seq.advance(Phase::ServicesStarted)?;

        eprintln!("Services are running.");
        eprintln!("Next: stackwright secure");
        Ok(())
    }

    fn secure_steps(
        &self,
        seq: &mut Sequencer,
        state: &RunState,
        identity: &ProvisioningIdentity,
    ) -> ProvisionResult<()> {
        if identity.is_localhost() {
            eprintln!("Domain is localhost; skipping certificate issuance.");
            seq.advance(Phase::Ready)?;
            eprintln!("Site available at http://localhost/");
            return Ok(());
        }

        let domain = identity.domain.as_str();
        self.certs.check_prerequisites()?;

        if !self.certs.domain_resolves(domain) {
            return Err(certificate_failure(
                domain,
                "the domain does not resolve".to_string(),
            ));
        }
        self.check_challenge_path(domain)?;
        seq.advance(Phase::CertificateRequested)?;

        if let Err(e) = self
            .certs
            .obtain(domain, &identity.admin_email, &self.target)
        {
            let reason = match e {
                ProvisionError::Certificate { reason, .. } => reason,
                other => other.to_string(),
            };
            return Err(certificate_failure(domain, reason));
        }

        let (_, profile) = self.config.policy.select(&state.snapshot);
        let options = EmitOptions::new(Utc::now())
            .tls(true)
            .stack(self.config.stack.clone());
        emit::write_artifacts(
            &self.target,
            &[
                emit::emit_site(&profile, identity, &options),
                emit::emit_env(&profile, identity, &state.snapshot, &options),
            ],
        )?;
        // Recreates services whose environment changed with SITE_URL.
        self.engine.start(&self.target)?;
        self.engine.reload_proxy(&self.target)?;
        seq.advance(Phase::Ready)?;

        eprintln!("HTTPS enabled: https://{domain}/");
        Ok(())
    }

    /// Place a token in the challenge webroot and fetch it over plain
    /// HTTP. Anything but 2xx is reported and otherwise ignored.
    fn check_challenge_path(&self, domain: &str) -> ProvisionResult<()> {
        let dir = self
            .target
            .join(paths::CHALLENGE_WEBROOT)
            .join(".well-known/acme-challenge");
        fs::create_dir_all(&dir).map_err(|e| ProvisionError::write(&dir, e))?;
        let token = dir.join(PROBE_TOKEN);
        fs::write(&token, "ok").map_err(|e| ProvisionError::write(&token, e))?;

        let url = format!("http://{domain}/.well-known/acme-challenge/{PROBE_TOKEN}");
        let outcome = self.certs.probe_challenge(&url);
        let _ = fs::remove_file(&token);

        match outcome {
            Ok(code) if (200..300).contains(&code) => {
                debug!(status = code, "challenge path reachable");
            }
            Ok(404) => {
                warn!(status = 404, "challenge token not served");
                eprintln!(
                    "WARNING: {url} returned HTTP 404; the proxy is not serving {}.",
                    paths::CHALLENGE_WEBROOT
                );
            }
            Ok(code) => {
                warn!(status = code, "unexpected challenge probe status");
                eprintln!("WARNING: {url} returned HTTP {code}; issuance may fail.");
            }
            Err(e) => {
                warn!(error = %e, "challenge probe failed");
                eprintln!("WARNING: could not fetch {url}: {e}");
            }
        }
        Ok(())
    }

    fn accept_warnings(&self) -> ProvisionResult<bool> {
        if self.assume_yes {
            eprintln!("Continuing anyway (--yes).");
            return Ok(true);
        }
        self.prompt.confirm("Continue anyway?", false)
    }

    /// Resolve the identity from flags, prompts and config defaults.
    /// The flag is true when the secrets were newly generated.
    fn collect_identity(
        &self,
        opts: &ConfigureOptions,
    ) -> ProvisionResult<(ProvisioningIdentity, bool)> {
        let defaults = &self.config.identity;

        let domain = match &opts.domain {
            Some(domain) => identity::validate_domain(domain)?,
            None => self.prompt.input(
                "Domain",
                defaults.domain_or_default(),
                &identity::validate_domain,
            )?,
        };

        let email = match &opts.email {
            Some(email) => identity::validate_email(email)?,
            None => {
                let default = defaults
                    .email
                    .clone()
                    .unwrap_or_else(|| identity::default_email(&domain));
                self.prompt
                    .input("Admin email", &default, &identity::validate_email)?
            }
        };

        let identity =
            ProvisioningIdentity::new(&domain, &email, &defaults.db_user, &defaults.db_name)?;

        match self.existing_secrets()? {
            Some((root, app)) => {
                info!("reusing database secrets from existing .env");
                Ok((identity.with_secrets(root, app), false))
            }
            None => Ok((identity, true)),
        }
    }

    /// Secrets from a previous run. The database keeps the credentials
    /// it was initialized with, so they must not change on re-runs.
    fn existing_secrets(&self) -> ProvisionResult<Option<(Secret, Secret)>> {
        let Some(env) = env_file::load(&self.target.join(paths::ENV_FILE))? else {
            return Ok(None);
        };
        let usable = |key: &str| {
            env.get(key)
                .filter(|v| v.len() >= MIN_SECRET_LEN)
                .map(|v| Secret::new(v.clone()))
        };
        match (usable("DB_ROOT_PASSWORD"), usable("DB_PASSWORD")) {
            (Some(root), Some(app)) => Ok(Some((root, app))),
            _ => {
                warn!("existing .env has no usable database secrets; generating new ones");
                Ok(None)
            }
        }
    }

    /// Rebuild the identity written by `configure`.
    fn stored_identity(&self, state: &RunState) -> ProvisionResult<ProvisioningIdentity> {
        let env = env_file::load(&self.target.join(paths::ENV_FILE))?.ok_or_else(|| {
            ProvisionError::NotReady(format!(
                "{} is missing; run `stackwright configure` again",
                paths::ENV_FILE
            ))
        })?;

        let identity = ProvisioningIdentity::new(
            &state.domain,
            env_value(&env, "ADMIN_EMAIL")?,
            env_value(&env, "DB_USER")?,
            env_value(&env, "DB_NAME")?,
        )?;
        Ok(identity.with_secrets(
            Secret::new(env_value(&env, "DB_ROOT_PASSWORD")?.to_string()),
            Secret::new(env_value(&env, "DB_PASSWORD")?.to_string()),
        ))
    }

    /// Pass `result` through, moving the sequencer to `Failed` and
    /// recording the failure in the run state when it is an error.
    fn settle(
        &self,
        seq: &mut Sequencer,
        result: ProvisionResult<()>,
        persist: bool,
    ) -> ProvisionResult<Phase> {
        match result {
            Ok(()) => Ok(seq.phase()),
            Err(e) => {
                let at = seq.fail();
                if persist {
                    self.record_failure(at, &e);
                }
                Err(e)
            }
        }
    }

    fn record_failure(&self, phase: Phase, error: &ProvisionError) {
        match RunState::load(&self.target) {
            Ok(Some(mut state)) => {
                state.record_failure(phase, error.to_string());
                if let Err(e) = state.save(&self.target) {
                    warn!(error = %e, "could not record failure");
                }
            }
            Ok(None) => debug!("no run state to record the failure in"),
            Err(e) => warn!(error = %e, "could not read run state"),
        }
    }
}

fn env_value<'a>(env: &'a IndexMap<String, String>, key: &str) -> ProvisionResult<&'a str> {
    env.get(key).map(String::as_str).ok_or_else(|| {
        ProvisionError::NotReady(format!(
            "{key} missing from {}; run `stackwright configure` again",
            paths::ENV_FILE
        ))
    })
}

fn certificate_failure(domain: &str, reason: String) -> ProvisionError {
    eprintln!("Certificate issuance for {domain} failed: {reason}");
    for hint in certs::diagnostics(domain) {
        eprintln!("  - {hint}");
    }
    ProvisionError::Certificate {
        domain: domain.to_string(),
        reason,
    }
}

fn redact(content: &str, identity: &ProvisioningIdentity) -> String {
    content
        .replace(identity.db_root_secret.expose(), "***")
        .replace(identity.db_app_secret.expose(), "***")
}

#[derive(Debug, Parser)]
#[command(name = "stackwright", version)]
#[command(about = "Provision a resource-tuned nginx, PHP-FPM and MySQL stack")]
pub struct Cli {
    /// Directory the stack is generated in
    #[arg(long, global = true, default_value = ".")]
    pub target: PathBuf,

    /// Config file [default: <target>/stackwright.toml]
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Never prompt; take defaults and flags as given
    #[arg(long, global = true)]
    pub non_interactive: bool,

    /// Continue past low-disk warnings without asking
    #[arg(long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Load the explicit config file, or the one in the target if present.
    pub fn load_config(&self) -> ProvisionResult<Config> {
        match &self.config {
            Some(path) => Config::load(path),
            None => Config::load_or_default(&self.target.join(CONFIG_FILE)),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Probe the host and generate the stack configuration
    Configure(ConfigureOptions),

    /// Start the stack and wait for the database
    Provision,

    /// Obtain a TLS certificate and switch the site to HTTPS
    Secure,

    /// Configure, provision and secure in one run
    Up(ConfigureOptions),

    /// Show run state and container status
    Status,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ConfigureOptions {
    /// Domain to serve; localhost skips certificates
    #[arg(long)]
    pub domain: Option<String>,

    /// Contact address for the certificate authority
    #[arg(long)]
    pub email: Option<String>,

    /// Print the artifacts with secrets redacted and write nothing
    #[arg(long)]
    pub dry_run: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "stackwright",
            "configure",
            "--domain",
            "example.com",
            "--target",
            "/srv/site",
            "--yes",
        ])
        .unwrap();

        assert_eq!(cli.target, PathBuf::from("/srv/site"));
        assert!(cli.yes);
        match cli.command {
            Command::Configure(opts) => {
                assert_eq!(opts.domain.as_deref(), Some("example.com"));
                assert!(!opts.dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn redact_hides_both_secrets() {
        let identity = ProvisioningIdentity::new("localhost", "admin@localhost", "app", "app")
            .unwrap()
            .with_secrets(
                Secret::new("r".repeat(32)),
                Secret::new("a".repeat(32)),
            );
        let text = format!("ROOT={}\nAPP={}\n", "r".repeat(32), "a".repeat(32));
        assert_eq!(redact(&text, &identity), "ROOT=***\nAPP=***\n");
    }
}
