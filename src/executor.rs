//! The agent task executor collaborator.
//!
//! The orchestrator does not know how an agent solves a task: it hands the agent configuration,
//! its sandbox and the task to a [`TaskExecutor`] and scores whatever comes back.

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    agent::{AgentConfig, AgentId},
    sandbox::Sandbox,
    tasks::TaskDefinition,
};

/// What the agent runner is told about the competition it joins.
#[derive(Debug, Clone)]
pub struct CompetitionContext {
    pub competition_id: String,
    pub name: String,
    pub description: String,
    pub tasks: Vec<TaskDefinition>,
}

/// Raw outcome of one task execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutcome {
    pub success: bool,
    /// Time the agent needed, in milliseconds.
    pub completion_time_ms: Option<u64>,
    pub actions: Vec<Value>,
    pub output: Option<Value>,
}

impl TaskOutcome {
    pub fn success(completion_time_ms: u64) -> Self {
        TaskOutcome {
            success: true,
            completion_time_ms: Some(completion_time_ms),
            ..Default::default()
        }
    }

    pub fn failure() -> Self {
        TaskOutcome::default()
    }
}

/// Runs agents on tasks.
///
/// Implementations are expected to bound each `execute` call with the task's time limit. The
/// controller adds its own timeout on top as a safety net.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Builds and initializes the runner of `agent` inside `sandbox`.
    async fn prepare(
        &self,
        agent: &AgentConfig,
        sandbox: &Sandbox,
        context: &CompetitionContext,
    ) -> anyhow::Result<()>;

    /// Runs one task. An `Err` scores zero for this agent only.
    async fn execute(&self, agent: &AgentConfig, task: &TaskDefinition)
        -> anyhow::Result<TaskOutcome>;

    /// Releases the runner of `agent`. Called for every agent `prepare` was invoked on, even when
    /// `prepare` failed.
    async fn release(&self, agent: &AgentId) -> anyhow::Result<()>;
}
