//! # Agent Olympics
//!
//! An orchestration engine where AI agents compete on timed tasks inside isolated sandboxes.
//!
//! It provides:
//! - Sandbox lifecycle management with resource limits and security hardening
//!   ([`SandboxManager`](crate::sandbox::SandboxManager))
//! - Competitions: every agent plays an ordered sequence of scored events, concurrently within an
//!   event ([`CompetitionController`](crate::competition::CompetitionController))
//! - Pure bracket generation: single elimination, round robin and Swiss ([`bracket`])
//! - Tournaments driving one competition per match, with persistence and cancellation
//!   ([`TournamentManager`](crate::tournament::TournamentManager))
//!
//! Every external collaborator sits behind a trait: the container engine
//! ([`ContainerRuntime`](crate::sandbox::runtime::ContainerRuntime)), the agent runner
//! ([`TaskExecutor`](crate::executor::TaskExecutor)), persistence
//! ([`TournamentStore`](crate::persistence::TournamentStore)), notifications
//! ([`EventSink`](crate::notify::EventSink)) and time ([`Clock`](crate::clock::Clock)).
//!
//! # Documentation Overview
//!
//! - For scoring rules and leaderboard ordering, see [`competition::scoring`] and
//!   [`competition::leaderboard`].
//! - For orchestration knobs and sandbox limits, see
//!   [`Configuration`](crate::configuration::Configuration) and [`constraints`].
//! - For the lifecycle events published along the way, see [`notify`].
//!
//! # Usage Example
//!
//! Running one competition between two agents on local sandboxes:
//!
//! ```no_run
//! # use async_trait::async_trait;
//! # struct MyExecutor;
//! # #[async_trait]
//! # impl agent_olympics::executor::TaskExecutor for MyExecutor {
//! #     async fn prepare(&self, _: &AgentConfig, _: &agent_olympics::sandbox::Sandbox, _: &agent_olympics::executor::CompetitionContext) -> anyhow::Result<()> { Ok(()) }
//! #     async fn execute(&self, _: &AgentConfig, _: &TaskDefinition) -> anyhow::Result<TaskOutcome> { Ok(TaskOutcome::success(1_000)) }
//! #     async fn release(&self, _: &agent_olympics::agent::AgentId) -> anyhow::Result<()> { Ok(()) }
//! # }
//! use std::sync::Arc;
//! use agent_olympics::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Configuration::new().with_local_sandboxes(true);
//!     let limits = ResourceLimitsBuilder::from_env().build()?;
//!
//!     let sandboxes = SandboxManager::new(
//!         Arc::new(DockerCli::new()),
//!         Arc::new(FileSecrets::new(config.sandbox().secrets_dir.clone())),
//!         config.sandbox().clone(),
//!         limits,
//!     );
//!     let services = Services {
//!         sandboxes: Arc::new(sandboxes),
//!         executor: Arc::new(MyExecutor),
//!         sink: Arc::new(LogSink),
//!         clock: Arc::new(TokioClock),
//!     };
//!
//!     let agents = vec![AgentConfig::new("a", "Alpha"), AgentConfig::new("b", "Beta")];
//!     let tasks = StaticCatalog::with_builtin_tasks().default_pool();
//!     let competition =
//!         CompetitionController::create_competition("Demo", "", agents, tasks, config, services);
//!     competition.start_competition().await?;
//!     competition.cleanup().await;
//!
//!     for entry in competition.leaderboard() {
//!         println!("#{} {}: {:.0}", entry.rank, entry.agent_name, entry.total_score);
//!     }
//!     Ok(())
//! }
//! ```

pub use anyhow;
pub mod agent;
pub mod bracket;
pub mod clock;
pub mod competition;
pub mod configuration;
pub mod constraints;
pub mod executor;
mod logger;
pub mod notify;
pub mod persistence;
pub mod sandbox;
pub mod tasks;
pub mod tournament;

/// Commonly used types and traits for quick access.
///
/// ```rust
/// use agent_olympics::prelude::*;
/// ```
pub mod prelude {
    pub use crate::agent::{AgentConfig, AgentCredentials, AgentId, Secret};
    pub use crate::bracket::{Bracket, BracketType, Entrant};
    pub use crate::clock::{Clock, TokioClock};
    pub use crate::competition::{CompetitionController, CompetitionStatus, Services};
    pub use crate::configuration::{Configuration, SandboxSettings};
    pub use crate::constraints::{LimitOverrides, ResourceLimits, ResourceLimitsBuilder};
    pub use crate::executor::{TaskExecutor, TaskOutcome};
    pub use crate::notify::{EventSink, LogSink};
    pub use crate::persistence::{TournamentStatus, TournamentStore};
    pub use crate::sandbox::{docker_cli::DockerCli, secrets::FileSecrets, SandboxManager};
    pub use crate::tasks::{ScoringMethod, StaticCatalog, TaskCatalog, TaskDefinition};
    pub use crate::tournament::{TournamentController, TournamentManager};
}
