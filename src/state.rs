//! Provisioning state machine and its persisted marker.
//!
//! ```text
//! Init -> ResourcesProbed -> IdentityCollected -> TierSelected
//!      -> DirectoriesReady -> ConfigEmitted -> ServicesStarted
//!      -> CertificateRequested -> Ready
//! ```
//!
//! `Failed` is reachable from every non-terminal phase. `Declined` is
//! reachable only from `ResourcesProbed`, when the operator refuses the
//! low-disk gate. `ServicesStarted -> Ready` is allowed only when the
//! certificate phase is skipped for `localhost`.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::emit::{self, ConfigArtifact, PUBLIC_MODE};
use crate::error::{ProvisionError, ProvisionResult};
use crate::probe::ResourceSnapshot;
use crate::tier::PerformanceTier;

/// Name of the run-state file in the target directory.
pub const STATE_FILE: &str = ".stackwright-state.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Init,
    ResourcesProbed,
    IdentityCollected,
    TierSelected,
    DirectoriesReady,
    ConfigEmitted,
    ServicesStarted,
    CertificateRequested,
    Ready,
    Declined,
    Failed,
}

impl Phase {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::ResourcesProbed => "resources-probed",
            Self::IdentityCollected => "identity-collected",
            Self::TierSelected => "tier-selected",
            Self::DirectoriesReady => "directories-ready",
            Self::ConfigEmitted => "config-emitted",
            Self::ServicesStarted => "services-started",
            Self::CertificateRequested => "certificate-requested",
            Self::Ready => "ready",
            Self::Declined => "declined",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Declined | Self::Failed)
    }

    /// The next phase on the main path, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::ResourcesProbed),
            Self::ResourcesProbed => Some(Self::IdentityCollected),
            Self::IdentityCollected => Some(Self::TierSelected),
            Self::TierSelected => Some(Self::DirectoriesReady),
            Self::DirectoriesReady => Some(Self::ConfigEmitted),
            Self::ConfigEmitted => Some(Self::ServicesStarted),
            Self::ServicesStarted => Some(Self::CertificateRequested),
            Self::CertificateRequested => Some(Self::Ready),
            Self::Ready | Self::Declined | Self::Failed => None,
        }
    }

    /// Whether this main-path phase is at or beyond `other`.
    #[must_use]
    pub fn reached(self, other: Self) -> bool {
        !matches!(self, Self::Declined | Self::Failed) && self >= other
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Checked, strictly sequential walk through [`Phase`]s.
#[derive(Debug, Clone)]
pub struct Sequencer {
    phase: Phase,
    history: Vec<Phase>,
    skip_certificate: bool,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sequencer {
    #[must_use]
    pub fn new() -> Self {
        Self::resume(Phase::Init)
    }

    /// Continue a run that previously completed `phase`.
    #[must_use]
    pub fn resume(phase: Phase) -> Self {
        Self {
            phase,
            history: vec![phase],
            skip_certificate: false,
        }
    }

    /// Permit `ServicesStarted -> Ready` without a certificate.
    #[must_use]
    pub const fn skip_certificate(mut self, skip: bool) -> Self {
        self.skip_certificate = skip;
        self
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Every phase visited, starting with the initial one.
    #[must_use]
    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    #[must_use]
    pub fn can_transition(&self, to: Phase) -> bool {
        let from = self.phase;
        if from.is_terminal() {
            return false;
        }
        match to {
            Phase::Failed => true,
            Phase::Declined => from == Phase::ResourcesProbed,
            Phase::Ready if from == Phase::ServicesStarted => self.skip_certificate,
            _ => from.next() == Some(to),
        }
    }

    pub fn advance(&mut self, to: Phase) -> ProvisionResult<()> {
        if !self.can_transition(to) {
            return Err(ProvisionError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        info!(from = %self.phase, to = %to, "phase transition");
        self.phase = to;
        self.history.push(to);
        Ok(())
    }

    /// Move to `Failed`, returning the phase the failure happened in.
    /// Failing from a terminal phase leaves it unchanged.
    pub fn fail(&mut self) -> Phase {
        let at = self.phase;
        if !at.is_terminal() {
            warn!(phase = %at, "run failed");
            self.phase = Phase::Failed;
            self.history.push(Phase::Failed);
        }
        at
    }
}

/// Where a failed run stopped and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub phase: Phase,
    pub message: String,
}

/// Persisted progress marker, read by later commands to check their
/// prerequisites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// Furthest main-path phase completed.
    pub completed: Phase,
    pub domain: String,
    pub tier: PerformanceTier,
    /// Host capacity the emitted artifacts were sized for.
    pub snapshot: ResourceSnapshot,
    pub failure: Option<Failure>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    #[must_use]
    pub fn new(
        completed: Phase,
        domain: &str,
        tier: PerformanceTier,
        snapshot: ResourceSnapshot,
    ) -> Self {
        Self {
            completed,
            domain: domain.to_string(),
            tier,
            snapshot,
            failure: None,
            updated_at: Utc::now(),
        }
    }

    /// Read the state file under `root`, if present.
    pub fn load(root: &Path) -> ProvisionResult<Option<Self>> {
        let path = root.join(STATE_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save(&self, root: &Path) -> ProvisionResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        emit::write_artifacts(
            root,
            &[ConfigArtifact {
                path: STATE_FILE.into(),
                content,
                mode: PUBLIC_MODE,
            }],
        )
    }

    /// Load the state and require that `phase` has been completed before
    /// `command` may run.
    pub fn require(root: &Path, phase: Phase, command: &str) -> ProvisionResult<Self> {
        let state = Self::load(root)?.ok_or_else(|| {
            ProvisionError::NotReady(format!(
                "no run state in {}; run `stackwright configure` first",
                root.display()
            ))
        })?;
        if !state.completed.reached(phase) {
            return Err(ProvisionError::NotReady(format!(
                "`{command}` needs phase {phase}, last completed phase is {}",
                state.completed
            )));
        }
        Ok(state)
    }

    /// Record progress, clearing any earlier failure.
    pub fn record(&mut self, completed: Phase) {
        self.completed = completed;
        self.failure = None;
        self.updated_at = Utc::now();
    }

    pub fn record_failure(&mut self, phase: Phase, message: String) {
        self.failure = Some(Failure { phase, message });
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reached_ignores_terminal_non_progress() {
        assert!(Phase::ServicesStarted.reached(Phase::ConfigEmitted));
        assert!(!Phase::ConfigEmitted.reached(Phase::ServicesStarted));
        assert!(!Phase::Failed.reached(Phase::Init));
        assert!(!Phase::Declined.reached(Phase::Init));
    }

    #[test]
    fn next_chain_ends_at_ready() {
        let mut phase = Phase::Init;
        let mut steps = 0;
        while let Some(next) = phase.next() {
            phase = next;
            steps += 1;
        }
        assert_eq!(phase, Phase::Ready);
        assert_eq!(steps, 8);
    }

    #[test]
    fn display_is_kebab_case() {
        assert_eq!(Phase::CertificateRequested.to_string(), "certificate-requested");
    }
}
