//! Per-agent execution environments.
//!
//! The [`SandboxManager`] owns the registry of live sandboxes. Two kinds exist:
//!
//! - **Isolated** sandboxes are containers created through a [`ContainerRuntime`]. They get a CPU
//!   quota and a memory hard limit from [`ResourceLimits`], drop every capability, forbid privilege
//!   escalation and run on a read-only root filesystem. Agent secrets are bind-mounted as
//!   short-lived files (see [`secrets`]).
//! - **Local** sandboxes are bookkeeping only, for development. They have no container or network
//!   side effects.
//!
//! Creating an isolated sandbox never returns an error: a failed creation yields a [`Sandbox`]
//! whose status is [`SandboxStatus::Error`], and callers must check it.

use std::{collections::HashMap, fmt, sync::Arc, sync::Mutex};

use anyhow::{bail, Context};
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    agent::{AgentConfig, AgentId},
    configuration::SandboxSettings,
    constraints::{LimitOverrides, ResourceLimits},
};

pub mod docker_cli;
pub mod runtime;
pub mod secrets;

use runtime::{ContainerRuntime, ContainerSpec, HostConfig, NetworkSpec, RuntimeError};
use secrets::SecretsProvider;

/// Label put on every container the manager creates.
pub const MANAGED_LABEL: &str = "arena.managed";
/// Label holding the owning agent id.
pub const AGENT_LABEL: &str = "arena.agent";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SandboxId(String);

impl SandboxId {
    pub fn generate() -> Self {
        SandboxId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SandboxId {
    fn from(value: &str) -> Self {
        SandboxId(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SandboxStatus {
    Creating,
    Ready,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl SandboxStatus {
    fn order(self) -> u8 {
        match self {
            SandboxStatus::Creating => 0,
            SandboxStatus::Ready => 1,
            SandboxStatus::Running => 2,
            SandboxStatus::Stopping => 3,
            SandboxStatus::Stopped => 4,
            SandboxStatus::Error => 5,
        }
    }

    /// Statuses only move forward. `Error` is reachable from any live status, and an explicit stop
    /// (`Stopping`) from any status but `Stopped`.
    pub fn can_advance_to(self, next: SandboxStatus) -> bool {
        match next {
            SandboxStatus::Error => !matches!(self, SandboxStatus::Stopped | SandboxStatus::Error),
            SandboxStatus::Stopping => self != SandboxStatus::Stopped && self != SandboxStatus::Stopping,
            _ => self != SandboxStatus::Error && next.order() > self.order(),
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, SandboxStatus::Ready | SandboxStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxKind {
    Local,
    Isolated,
}

/// One agent's execution environment.
#[derive(Debug, Clone)]
pub struct Sandbox {
    pub id: SandboxId,
    pub agent_id: AgentId,
    pub kind: SandboxKind,
    pub status: SandboxStatus,
    pub limits: ResourceLimits,
    /// Browser/control endpoint of the sandbox, `None` for local sandboxes.
    pub endpoint: Option<String>,
    pub container_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub error: Option<String>,
}

impl Sandbox {
    fn new(agent_id: AgentId, kind: SandboxKind, limits: ResourceLimits) -> Sandbox {
        Sandbox {
            id: SandboxId::generate(),
            agent_id,
            kind,
            status: SandboxStatus::Creating,
            limits,
            endpoint: None,
            container_id: None,
            created_at: OffsetDateTime::now_utc(),
            error: None,
        }
    }

    fn advance(&mut self, next: SandboxStatus) -> anyhow::Result<()> {
        if !self.status.can_advance_to(next) {
            bail!(
                "sandbox {} cannot go from {:?} to {:?}",
                self.id,
                self.status,
                next
            );
        }
        self.status = next;
        Ok(())
    }
}

/// Creates, tracks and destroys sandboxes.
pub struct SandboxManager {
    runtime: Arc<dyn ContainerRuntime>,
    secrets: Arc<dyn SecretsProvider>,
    settings: SandboxSettings,
    default_limits: ResourceLimits,
    sandboxes: Mutex<HashMap<SandboxId, Sandbox>>,
}

impl SandboxManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        secrets: Arc<dyn SecretsProvider>,
        settings: SandboxSettings,
        default_limits: ResourceLimits,
    ) -> SandboxManager {
        SandboxManager {
            runtime,
            secrets,
            settings,
            default_limits,
            sandboxes: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    pub fn default_limits(&self) -> ResourceLimits {
        self.default_limits
    }

    /// Makes sure the shared bridge network exists and probes the base image.
    ///
    /// Safe to call more than once. A missing image is only a warning.
    ///
    /// # Errors
    /// Fails when the container engine cannot list or create networks.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> anyhow::Result<()> {
        let networks = self
            .runtime
            .list_networks()
            .await
            .context("could not list container networks")?;

        if networks.iter().any(|n| n == &self.settings.network) {
            debug!(network = %self.settings.network, "sandbox network already exists");
        } else {
            let spec = NetworkSpec {
                name: self.settings.network.clone(),
                driver: "bridge".to_string(),
                labels: HashMap::from([(MANAGED_LABEL.to_string(), "true".to_string())]),
            };
            match self.runtime.create_network(&spec).await {
                Ok(()) => info!(network = %spec.name, "sandbox network created"),
                // created concurrently by someone else
                Err(RuntimeError::Conflict(_)) => {
                    debug!(network = %spec.name, "sandbox network appeared concurrently")
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("could not create network {}", spec.name))
                }
            }
        }

        match self.runtime.inspect_image(&self.settings.image).await {
            Ok(image) => debug!(image = %self.settings.image, id = %image.id, "sandbox image found"),
            Err(e) => warn!(
                image = %self.settings.image,
                error = %e,
                "sandbox image not available, container creation will fail until it is pulled"
            ),
        }
        Ok(())
    }

    /// Creates a non-isolated sandbox for development. Always ready.
    pub fn create_local_sandbox(&self, agent: &AgentConfig) -> Sandbox {
        let mut sandbox = Sandbox::new(agent.id.clone(), SandboxKind::Local, self.default_limits);
        sandbox.status = SandboxStatus::Ready;
        self.track(sandbox.clone());
        debug!(sandbox = %sandbox.id, agent_id = %agent.id, "local sandbox ready");
        sandbox
    }

    /// Creates and starts an isolated sandbox for `agent`.
    ///
    /// On failure, everything created so far is rolled back and the returned sandbox has status
    /// [`SandboxStatus::Error`] with the error message. Failed sandboxes are not tracked.
    #[instrument(skip_all, fields(agent_id = %agent.id))]
    pub async fn create_sandbox(
        &self,
        agent: &AgentConfig,
        overrides: Option<&LimitOverrides>,
    ) -> Sandbox {
        let limits = match overrides {
            Some(overrides) => self.default_limits.merged(overrides),
            None => self.default_limits,
        };
        let mut sandbox = Sandbox::new(agent.id.clone(), SandboxKind::Isolated, limits);

        match self.launch(&mut sandbox, agent).await {
            Ok(()) => {
                info!(sandbox = %sandbox.id, endpoint = ?sandbox.endpoint, "sandbox ready");
                self.track(sandbox.clone());
            }
            Err(e) => {
                error!(sandbox = %sandbox.id, error = %format!("{e:#}"), "sandbox creation failed");
                self.rollback(&sandbox).await;
                sandbox.status = SandboxStatus::Error;
                sandbox.error = Some(format!("{e:#}"));
            }
        }
        sandbox
    }

    async fn launch(&self, sandbox: &mut Sandbox, agent: &AgentConfig) -> anyhow::Result<()> {
        let binds = self
            .secrets
            .provision(&sandbox.id, agent)
            .await
            .context("could not provision secrets")?;
        let spec = self.container_spec(sandbox, agent, binds);

        let container_id = self
            .runtime
            .create_container(&spec)
            .await
            .with_context(|| format!("could not create container {}", spec.name))?;
        sandbox.container_id = Some(container_id.clone());

        self.runtime
            .start_container(&container_id)
            .await
            .context("could not start container")?;

        let info = self
            .runtime
            .inspect_container(&container_id)
            .await
            .context("could not inspect container")?;
        let ip = info
            .networks
            .iter()
            .find(|n| n.network == self.settings.network && !n.ip_address.is_empty())
            .or_else(|| info.networks.iter().find(|n| !n.ip_address.is_empty()))
            .map(|n| n.ip_address.clone())
            .context("container has no network address")?;

        sandbox.endpoint = Some(format!("http://{ip}:{}", self.settings.control_port));
        sandbox.advance(SandboxStatus::Ready)
    }

    fn container_spec(
        &self,
        sandbox: &Sandbox,
        agent: &AgentConfig,
        binds: Vec<runtime::BindMount>,
    ) -> ContainerSpec {
        let agent_part = agent
            .id
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect::<String>();
        let name = format!(
            "{}-{}-{}",
            self.settings.container_prefix,
            agent_part,
            sandbox.id.short()
        );

        ContainerSpec {
            name,
            image: self.settings.image.clone(),
            env: vec![
                ("AGENT_ID".to_string(), agent.id.to_string()),
                ("AGENT_NAME".to_string(), agent.name.clone()),
                ("AGENT_PROVIDER".to_string(), agent.provider.clone()),
                ("AGENT_MODEL".to_string(), agent.model.clone()),
                ("SANDBOX_ID".to_string(), sandbox.id.to_string()),
                (
                    "SECRETS_DIR".to_string(),
                    secrets::CONTAINER_SECRETS_DIR.to_string(),
                ),
            ],
            labels: HashMap::from([
                (MANAGED_LABEL.to_string(), "true".to_string()),
                (AGENT_LABEL.to_string(), agent.id.to_string()),
            ]),
            exposed_port: Some(self.settings.control_port),
            host: HostConfig {
                nano_cpus: sandbox.limits.nano_cpus(),
                memory_bytes: sandbox.limits.memory_bytes(),
                network: self.settings.network.clone(),
                cap_drop: vec!["ALL".to_string()],
                security_opt: vec!["no-new-privileges".to_string()],
                read_only_rootfs: true,
                binds,
                tmpfs: HashMap::from([("/tmp".to_string(), "rw,size=64m".to_string())]),
            },
        }
    }

    /// Best-effort removal of whatever a failed launch left behind.
    async fn rollback(&self, sandbox: &Sandbox) {
        if let Some(container_id) = &sandbox.container_id {
            if let Err(e) = self.runtime.remove_container(container_id).await {
                if !e.is_already_gone() {
                    warn!(sandbox = %sandbox.id, error = %e, "could not remove failed container");
                }
            }
        }
        if let Err(e) = self.secrets.revoke(&sandbox.id).await {
            warn!(sandbox = %sandbox.id, error = %format!("{e:#}"), "could not revoke secrets");
        }
    }

    fn track(&self, sandbox: Sandbox) {
        self.sandboxes
            .lock()
            .expect("poisoned")
            .insert(sandbox.id.clone(), sandbox);
    }

    /// Moves a ready sandbox to running.
    pub fn mark_running(&self, id: &SandboxId) -> anyhow::Result<()> {
        let mut guard = self.sandboxes.lock().expect("poisoned");
        let sandbox = guard
            .get_mut(id)
            .with_context(|| format!("unknown sandbox {id}"))?;
        sandbox.advance(SandboxStatus::Running)
    }

    /// Stops and forgets a sandbox.
    ///
    /// The sandbox leaves the registry and its secrets are deleted whatever the engine answers.
    /// "Already stopped" and "already removed" engine errors are ignored. Unknown ids are a no-op.
    #[instrument(skip(self))]
    pub async fn stop(&self, id: &SandboxId) -> anyhow::Result<()> {
        let removed = self.sandboxes.lock().expect("poisoned").remove(id);
        let Some(mut sandbox) = removed else {
            debug!(sandbox = %id, "stop requested for unknown sandbox");
            return Ok(());
        };
        sandbox.status = SandboxStatus::Stopping;

        let mut failure = None;
        if let (SandboxKind::Isolated, Some(container_id)) = (sandbox.kind, &sandbox.container_id) {
            if let Err(e) = self.runtime.stop_container(container_id).await {
                if !e.is_already_gone() {
                    failure = Some(anyhow::Error::new(e).context("could not stop container"));
                }
            }
            if let Err(e) = self.runtime.remove_container(container_id).await {
                if !e.is_already_gone() && failure.is_none() {
                    failure = Some(anyhow::Error::new(e).context("could not remove container"));
                }
            }
        }

        if let Err(e) = self.secrets.revoke(id).await {
            failure.get_or_insert(e);
        }

        match failure {
            None => {
                sandbox.status = SandboxStatus::Stopped;
                debug!(sandbox = %id, "sandbox stopped");
                Ok(())
            }
            Some(e) => Err(e),
        }
    }

    /// Stops every tracked sandbox. Individual failures are logged and skipped.
    pub async fn stop_all_sandboxes(&self) {
        let ids = self
            .sandboxes
            .lock()
            .expect("poisoned")
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        for id in ids {
            if let Err(e) = self.stop(&id).await {
                warn!(sandbox = %id, error = %format!("{e:#}"), "could not stop sandbox");
            }
        }
    }

    /// Stops every tracked sandbox, then force-removes orphaned containers left by a previous
    /// process. Never fails.
    pub async fn cleanup(&self) {
        self.stop_all_sandboxes().await;

        let orphans = match self
            .runtime
            .list_containers(&self.settings.container_prefix)
            .await
        {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "could not list containers for orphan cleanup");
                return;
            }
        };

        let tracked = self
            .sandboxes
            .lock()
            .expect("poisoned")
            .values()
            .filter_map(|s| s.container_id.clone())
            .collect::<Vec<_>>();

        for orphan in orphans.into_iter().filter(|c| !tracked.contains(&c.id)) {
            info!(container = %orphan.name, "removing orphaned sandbox container");
            if let Err(e) = self.runtime.stop_container(&orphan.id).await {
                debug!(container = %orphan.name, error = %e, "orphan stop failed");
            }
            if let Err(e) = self.runtime.remove_container(&orphan.id).await {
                debug!(container = %orphan.name, error = %e, "orphan removal failed");
            }
        }
    }

    /// Ready or running sandboxes.
    pub fn get_active_sandboxes(&self) -> Vec<Sandbox> {
        let mut active = self
            .sandboxes
            .lock()
            .expect("poisoned")
            .values()
            .filter(|s| s.status.is_active())
            .cloned()
            .collect::<Vec<_>>();
        active.sort_by_key(|s| s.created_at);
        active
    }

    /// State of a ready or running sandbox, `None` otherwise.
    pub fn get_sandbox_state(&self, id: &SandboxId) -> Option<Sandbox> {
        self.sandboxes
            .lock()
            .expect("poisoned")
            .get(id)
            .filter(|s| s.status.is_active())
            .cloned()
    }
}
