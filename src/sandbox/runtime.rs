//! Capability set the sandbox manager needs from a container engine.

use std::collections::HashMap;

use async_trait::async_trait;

/// Errors reported by a container engine.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested state change already happened (e.g. stopping a stopped container).
    #[error("not modified: {0}")]
    NotModified(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The engine itself cannot be reached.
    #[error("container engine unavailable: {0}")]
    Unavailable(String),

    #[error("engine command failed: {0}")]
    Command(String),
}

impl RuntimeError {
    /// True for errors meaning the container is already stopped or gone.
    pub fn is_already_gone(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_) | RuntimeError::NotModified(_))
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    pub name: String,
    pub driver: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub id: String,
}

/// A read-only file bound from the host into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

/// Host-side limits and hardening of a container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostConfig {
    /// CPU quota in units of 1e-9 CPUs.
    pub nano_cpus: i64,
    /// Memory hard limit in bytes.
    pub memory_bytes: i64,
    pub network: String,
    pub cap_drop: Vec<String>,
    pub security_opt: Vec<String>,
    pub read_only_rootfs: bool,
    pub binds: Vec<BindMount>,
    /// Writable tmpfs mounts, path to mount options.
    pub tmpfs: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    pub labels: HashMap<String, String>,
    pub exposed_port: Option<u16>,
    pub host: HostConfig,
}

/// Network attachment of a running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub network: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub running: bool,
    pub networks: Vec<NetworkAttachment>,
}

/// Summary returned when listing containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
}

/// Container engine operations used by [`SandboxManager`](super::SandboxManager).
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list_networks(&self) -> RuntimeResult<Vec<String>>;

    async fn create_network(&self, spec: &NetworkSpec) -> RuntimeResult<()>;

    async fn inspect_image(&self, name: &str) -> RuntimeResult<ImageInfo>;

    /// Creates a container and returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String>;

    async fn start_container(&self, id: &str) -> RuntimeResult<()>;

    async fn stop_container(&self, id: &str) -> RuntimeResult<()>;

    async fn remove_container(&self, id: &str) -> RuntimeResult<()>;

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInfo>;

    /// Lists all containers, running or not, whose name starts with `name_prefix`.
    async fn list_containers(&self, name_prefix: &str) -> RuntimeResult<Vec<ContainerSummary>>;
}
