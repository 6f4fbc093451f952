//! Short-lived secret files bound into sandboxes.
//!
//! Credentials never reach a container through its environment or command line: each secret is
//! written to its own host file right before the container is created, bind-mounted read-only, and
//! deleted when the sandbox stops.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::{
    fs::{DirBuilder, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};

use super::{runtime::BindMount, SandboxId};
use crate::agent::AgentConfig;

/// Directory where secrets appear inside a sandbox.
pub const CONTAINER_SECRETS_DIR: &str = "/run/secrets";

#[async_trait]
pub trait SecretsProvider: Send + Sync {
    /// Materializes the secrets of `agent` for `sandbox` and returns the mounts to apply.
    async fn provision(&self, sandbox: &SandboxId, agent: &AgentConfig)
        -> anyhow::Result<Vec<BindMount>>;

    /// Deletes every secret of `sandbox`. Must succeed when nothing was provisioned.
    async fn revoke(&self, sandbox: &SandboxId) -> anyhow::Result<()>;
}

/// Writes secrets as `0600` files under `<root>/<sandbox id>/`.
#[derive(Debug, Clone)]
pub struct FileSecrets {
    root: PathBuf,
}

impl FileSecrets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileSecrets { root: root.into() }
    }

    fn sandbox_dir(&self, sandbox: &SandboxId) -> PathBuf {
        self.root.join(sandbox.as_str())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl SecretsProvider for FileSecrets {
    async fn provision(
        &self,
        sandbox: &SandboxId,
        agent: &AgentConfig,
    ) -> anyhow::Result<Vec<BindMount>> {
        let files = agent.credentials.secret_files();
        if files.is_empty() {
            return Ok(vec![]);
        }

        let dir = self.sandbox_dir(sandbox);
        let mut dir_builder = DirBuilder::new();
        dir_builder.recursive(true);
        #[cfg(unix)]
        dir_builder.mode(0o700);
        dir_builder
            .create(&dir)
            .await
            .with_context(|| format!("could not create secrets directory {}", dir.display()))?;

        let mut mounts = Vec::with_capacity(files.len());
        for (name, secret) in files {
            let path = dir.join(name);
            write_private(&path, secret.expose().as_bytes())
                .await
                .with_context(|| format!("could not write secret file {}", path.display()))?;
            mounts.push(BindMount {
                host_path: path.display().to_string(),
                container_path: format!("{CONTAINER_SECRETS_DIR}/{name}"),
                read_only: true,
            });
        }
        debug!(sandbox = %sandbox, agent_id = %agent.id, count = mounts.len(), "secrets provisioned");
        Ok(mounts)
    }

    async fn revoke(&self, sandbox: &SandboxId) -> anyhow::Result<()> {
        let dir = self.sandbox_dir(sandbox);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(sandbox = %sandbox, error = %e, "could not delete secrets");
                Err(e).with_context(|| format!("could not delete {}", dir.display()))
            }
        }
    }
}

/// Creates `path` readable by the owner only and writes `contents`. The file never exists with
/// wider permissions.
async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await?;
    file.write_all(contents).await?;
    file.flush().await
}
