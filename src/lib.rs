//! Resource-aware provisioning for a containerized web stack.
//!
//! Stackwright inspects the host it runs on, picks a performance tier
//! from its memory and CPU, and generates a tuned nginx + PHP-FPM +
//! MySQL + phpMyAdmin stack for `docker compose`, then starts it and
//! obtains a Let's Encrypt certificate through certbot.
//!
//! # Overview
//!
//! A run is driven by a [`Pipeline`] that wires together:
//!
//! - A [`ResourceProbe`](probe::ResourceProbe) reading host capacity
//!   (e.g. [`HostProbe`])
//! - A [`TierPolicy`] mapping capacity to a [`TierProfile`]
//! - The emitter ([`emit`]) rendering every artifact from the profile
//!   and a [`ProvisioningIdentity`]
//! - An [`Orchestrator`](engine::Orchestrator) for the containers
//!   (e.g. [`DockerCompose`])
//! - A [`CertificateClient`](certs::CertificateClient) (e.g.
//!   [`Certbot`])
//! - A [`Prompt`](prompt::Prompt) for operator answers
//!
//! # Architecture
//!
//! Every command walks a checked [`Sequencer`]:
//!
//! 1. **configure** - probe, collect identity, select tier, create
//!    directories, write `.env`, nginx, MySQL, PHP and compose files
//! 2. **provision** - `docker compose up -d` and wait for the database
//!    healthcheck
//! 3. **secure** - check DNS and the challenge path, run certbot,
//!    switch the site to HTTPS and reload nginx
//!
//! Progress is persisted in `.stackwright-state.json` so each command
//! can check that its predecessor completed.
//!
//! # Examples
//!
//! Render the artifacts for a 2-core, 2 GB host without touching disk:
//!
//! ```rust
//! use chrono::Utc;
//! use stackwright::emit::{self, EmitOptions};
//! use stackwright::{PerformanceTier, ProvisioningIdentity, ResourceSnapshot, select_tier};
//!
//! let snapshot = ResourceSnapshot::new(2, 2048, 1536, 40);
//! let (tier, profile) = select_tier(&snapshot);
//! assert_eq!(tier, PerformanceTier::Basic);
//!
//! let identity = ProvisioningIdentity::new("localhost", "admin@localhost", "app", "app")?;
//! let artifacts = emit::emit(&profile, &identity, &snapshot, &EmitOptions::new(Utc::now()))?;
//! assert!(artifacts.iter().any(|a| a.path.ends_with("docker-compose.yml")));
//! # Ok::<(), stackwright::ProvisionError>(())
//! ```

// Allow noisy pedantic lints that don't add value for a
// provisioning tool crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod certs;
pub mod cmd;
pub mod compose;
pub mod config;
pub mod emit;
pub mod engine;
pub mod env_file;
pub mod error;
pub mod identity;
pub mod ini;
pub mod nginx;
pub mod pipeline;
pub mod probe;
pub mod prompt;
pub mod proxy;
pub mod state;
pub mod tier;

pub use certs::certbot::Certbot;
pub use config::Config;
pub use emit::{ConfigArtifact, EmitOptions};
pub use engine::docker::DockerCompose;
pub use error::{ProvisionError, ProvisionResult};
pub use identity::{ProvisioningIdentity, Secret};
pub use pipeline::{Cli, Command, ConfigureOptions, Pipeline};
pub use probe::{HostProbe, ResourceSnapshot};
pub use prompt::{Interactive, Unattended};
pub use proxy::ReverseProxy;
pub use state::{Phase, RunState, Sequencer};
pub use tier::{PerformanceTier, TierPolicy, TierProfile, select_tier};
