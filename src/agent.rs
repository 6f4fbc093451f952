//! Agent identity and the immutable configuration an agent competes with.

use std::{fmt, hash::Hash};

use serde::{Deserialize, Serialize};

/// Identifier of a competing agent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        AgentId(value.to_string())
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        AgentId(value)
    }
}

/// A secret value. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a plaintext secret.
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    /// Expose the plaintext. Only the secrets provider should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// How the orchestrator reaches an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCredentials {
    /// The agent runs inside the sandbox and talks to its provider with this key.
    ApiKey(Secret),
    /// The agent is hosted elsewhere and receives tasks on a webhook.
    Webhook {
        /// Endpoint receiving task requests.
        url: String,
        /// Optional shared secret used by the webhook to authenticate requests.
        secret: Option<Secret>,
    },
    /// Nothing to provision (local development agents).
    None,
}

impl AgentCredentials {
    /// Named secret files this agent needs inside its sandbox.
    pub fn secret_files(&self) -> Vec<(&'static str, &Secret)> {
        match self {
            AgentCredentials::ApiKey(key) => vec![("api_key", key)],
            AgentCredentials::Webhook {
                secret: Some(secret),
                ..
            } => vec![("webhook_secret", secret)],
            AgentCredentials::Webhook { secret: None, .. } | AgentCredentials::None => vec![],
        }
    }
}

/// Configuration of one competing agent. Immutable for the lifetime of a competition.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub id: AgentId,
    pub name: String,
    pub provider: String,
    pub model: String,
    pub credentials: AgentCredentials,
    pub color: String,
}

impl PartialEq for AgentConfig {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AgentConfig {}

impl Hash for AgentConfig {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl AgentConfig {
    pub fn new(id: impl Into<AgentId>, name: impl Into<String>) -> AgentConfig {
        AgentConfig {
            id: id.into(),
            name: name.into(),
            provider: "local".to_string(),
            model: "unknown".to_string(),
            credentials: AgentCredentials::None,
            color: "#888888".to_string(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = provider.into();
        self.model = model.into();
        self
    }

    pub fn with_credentials(mut self, credentials: AgentCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }
}
