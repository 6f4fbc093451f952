//! Running one competition: a fixed set of agents playing an ordered sequence of events.
//!
//! [`CompetitionController::start_competition`] drives three phases:
//!
//! 1. **Warmup**: every agent gets a sandbox and an initialized runner, one after the other with
//!    a configurable stagger delay. Any failure aborts the whole start.
//! 2. **Running**: events run strictly one after the other. Inside an event all agents run
//!    concurrently and the event only ends once every agent settled (join-all barrier). An agent
//!    that fails or times out gets a zero-score result; it never affects the others.
//! 3. **Completed**: the competition timer stops and `competition:end` is published.
//!
//! Pause, resume and cancel are cooperative: they take effect between events and never interrupt
//! an agent call in flight.

use std::{
    fmt, mem,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{bail, Context};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    agent::{AgentConfig, AgentId},
    clock::{Clock, Stopwatch},
    configuration::Configuration,
    executor::{CompetitionContext, TaskExecutor},
    notify::{EventKind, EventSink},
    sandbox::{SandboxId, SandboxManager, SandboxStatus},
    tasks::TaskDefinition,
};

pub mod leaderboard;
pub mod scoring;

use leaderboard::{Leaderboard, LeaderboardEntry};
use scoring::compute_score;

/// Shared collaborators of competitions and tournaments.
#[derive(Clone)]
pub struct Services {
    pub sandboxes: Arc<SandboxManager>,
    pub executor: Arc<dyn TaskExecutor>,
    pub sink: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompetitionStatus {
    Scheduled,
    Warmup,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl CompetitionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CompetitionStatus::Completed | CompetitionStatus::Cancelled)
    }
}

impl fmt::Display for CompetitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
    Timeout,
    Disqualified,
}

/// Scored result of one agent on one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    pub agent_id: AgentId,
    pub task_id: String,
    pub status: TaskStatus,
    pub score: f64,
    pub completion_time_ms: Option<u64>,
    pub actions: Vec<Value>,
    pub output: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Running,
    Completed,
}

/// One scored task of a competition.
#[derive(Debug, Clone)]
pub struct CompetitionEvent {
    pub id: String,
    pub task: TaskDefinition,
    pub status: EventStatus,
    /// One result per agent once completed.
    pub results: Vec<TaskResult>,
    pub started_at: Option<OffsetDateTime>,
    pub ended_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct Competition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: CompetitionStatus,
    pub agents: Vec<AgentConfig>,
    pub events: Vec<CompetitionEvent>,
    pub current_event: usize,
    pub leaderboard: Leaderboard,
    pub started_at: Option<OffsetDateTime>,
    pub ended_at: Option<OffsetDateTime>,
}

/// An event marked running, ready to be played.
struct EventRun {
    competition_id: String,
    event_id: String,
    task: TaskDefinition,
    agents: Vec<AgentConfig>,
}

/// Checks that event `index` may start and marks it running.
fn begin_event(state: &mut Competition, index: usize) -> anyhow::Result<EventRun> {
    if state.status != CompetitionStatus::Running {
        bail!("cannot run an event while {}", state.status);
    }
    if index >= state.events.len() {
        bail!("no event at index {index}");
    }
    if index > 0 && state.events[index - 1].status != EventStatus::Completed {
        bail!("event {index} cannot start before event {} completed", index - 1);
    }
    if state.events[index].status != EventStatus::Pending {
        bail!("event {index} already ran");
    }
    state.current_event = index;
    let event = &mut state.events[index];
    event.status = EventStatus::Running;
    event.started_at = Some(OffsetDateTime::now_utc());
    let (event_id, task) = (event.id.clone(), event.task.clone());
    Ok(EventRun {
        competition_id: state.id.clone(),
        event_id,
        task,
        agents: state.agents.clone(),
    })
}

/// Resources handed out during warmup, released on cancel or cleanup.
#[derive(Default)]
struct Allocations {
    prepared: Vec<AgentId>,
    sandboxes: Vec<SandboxId>,
}

/// Drives one [`Competition`].
pub struct CompetitionController {
    config: Configuration,
    services: Services,
    state: Mutex<Competition>,
    timer: Mutex<Stopwatch>,
    allocations: Mutex<Allocations>,
    resumed: Notify,
}

impl CompetitionController {
    /// Builds a scheduled competition. Leaderboard entries start at zero, ranked in the order
    /// agents were given.
    pub fn create_competition(
        name: impl Into<String>,
        description: impl Into<String>,
        agents: Vec<AgentConfig>,
        tasks: Vec<TaskDefinition>,
        config: Configuration,
        services: Services,
    ) -> CompetitionController {
        let events = tasks
            .into_iter()
            .map(|task| CompetitionEvent {
                id: Uuid::new_v4().to_string(),
                task,
                status: EventStatus::Pending,
                results: vec![],
                started_at: None,
                ended_at: None,
            })
            .collect();
        let competition = Competition {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            status: CompetitionStatus::Scheduled,
            leaderboard: Leaderboard::new(&agents),
            agents,
            events,
            current_event: 0,
            started_at: None,
            ended_at: None,
        };

        CompetitionController {
            config,
            services,
            state: Mutex::new(competition),
            timer: Mutex::new(Stopwatch::default()),
            allocations: Mutex::new(Allocations::default()),
            resumed: Notify::new(),
        }
    }

    pub fn id(&self) -> String {
        self.state.lock().expect("poisoned").id.clone()
    }

    pub fn status(&self) -> CompetitionStatus {
        self.state.lock().expect("poisoned").status
    }

    pub fn snapshot(&self) -> Competition {
        self.state.lock().expect("poisoned").clone()
    }

    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        self.state
            .lock()
            .expect("poisoned")
            .leaderboard
            .entries()
            .to_vec()
    }

    /// Competition time so far, paused intervals excluded.
    pub fn elapsed(&self) -> Duration {
        self.timer
            .lock()
            .expect("poisoned")
            .elapsed(self.services.clock.now())
    }

    /// Runs the competition to its end.
    ///
    /// Returns `Ok` when the competition completed or was cancelled, including a cancel that lands
    /// during warmup.
    ///
    /// # Errors
    /// Fails if the competition was already started, or if any agent fails to initialize. In the
    /// latter case the competition is cancelled and everything set up so far is released.
    #[instrument(skip(self), fields(competition = %self.id()))]
    pub async fn start_competition(&self) -> anyhow::Result<()> {
        let id = {
            let mut state = self.state.lock().expect("poisoned");
            if state.status != CompetitionStatus::Scheduled {
                bail!("competition {} cannot start from {}", state.id, state.status);
            }
            state.status = CompetitionStatus::Warmup;
            state.id.clone()
        };
        let agent_names = self
            .snapshot()
            .agents
            .iter()
            .map(|a| a.name.clone())
            .collect::<Vec<_>>();
        self.services
            .sink
            .publish(EventKind::CompetitionStart, &id, json!({ "agents": agent_names }));

        if let Err(e) = self.warmup().await {
            if self.status() == CompetitionStatus::Cancelled {
                info!("competition cancelled during warmup");
                self.release_all().await;
                return Ok(());
            }
            warn!(error = %format!("{e:#}"), "warmup failed, cancelling competition");
            self.abort(format!("{e:#}")).await;
            return Err(e);
        }

        let num_events = {
            let mut state = self.state.lock().expect("poisoned");
            if state.status == CompetitionStatus::Cancelled {
                None
            } else {
                state.status = CompetitionStatus::Running;
                state.started_at = Some(OffsetDateTime::now_utc());
                Some(state.events.len())
            }
        };
        let Some(num_events) = num_events else {
            // cancelled while the last agent was starting
            self.release_all().await;
            return Ok(());
        };
        self.timer
            .lock()
            .expect("poisoned")
            .start(self.services.clock.now());
        self.mark_sandboxes_running();
        info!(num_events, "competition running");

        for index in 0..num_events {
            let Some(run) = self.next_event(index).await? else {
                info!("competition cancelled, not starting event {index}");
                return Ok(());
            };
            self.play_event(index, run).await;
        }

        self.complete(&id)
    }

    async fn warmup(&self) -> anyhow::Result<()> {
        let snapshot = self.snapshot();
        let context = CompetitionContext {
            competition_id: snapshot.id.clone(),
            name: snapshot.name.clone(),
            description: snapshot.description.clone(),
            tasks: snapshot.events.iter().map(|e| e.task.clone()).collect(),
        };
        let stagger = self.config.launch_stagger;

        for (i, agent) in snapshot.agents.iter().enumerate() {
            if i > 0 && !stagger.is_zero() {
                self.services.clock.sleep(stagger).await;
            }
            if self.status() == CompetitionStatus::Cancelled {
                bail!("competition cancelled during warmup");
            }

            let sandbox = if self.config.use_local_sandboxes {
                self.services.sandboxes.create_local_sandbox(agent)
            } else {
                self.services.sandboxes.create_sandbox(agent, None).await
            };
            if sandbox.status == SandboxStatus::Error {
                bail!(
                    "sandbox for agent {} failed: {}",
                    agent.name,
                    sandbox.error.as_deref().unwrap_or("unknown error")
                );
            }

            {
                let mut allocations = self.allocations.lock().expect("poisoned");
                allocations.sandboxes.push(sandbox.id.clone());
                allocations.prepared.push(agent.id.clone());
            }
            self.services
                .executor
                .prepare(agent, &sandbox, &context)
                .await
                .with_context(|| format!("could not initialize agent {}", agent.name))?;
            debug!(agent_id = %agent.id, sandbox = %sandbox.id, "agent ready");
        }
        Ok(())
    }

    fn mark_sandboxes_running(&self) {
        let sandboxes = self.allocations.lock().expect("poisoned").sandboxes.clone();
        for id in sandboxes {
            if let Err(e) = self.services.sandboxes.mark_running(&id) {
                warn!(sandbox = %id, error = %format!("{e:#}"), "could not mark sandbox running");
            }
        }
    }

    /// Waits out pauses, then starts event `index` under the same lock that observed the
    /// competition running. `None` once cancelled.
    async fn next_event(&self, index: usize) -> anyhow::Result<Option<EventRun>> {
        loop {
            let resumed = self.resumed.notified();
            {
                let mut state = self.state.lock().expect("poisoned");
                match state.status {
                    CompetitionStatus::Paused => {}
                    CompetitionStatus::Cancelled => return Ok(None),
                    _ => return begin_event(&mut state, index).map(Some),
                }
            }
            resumed.await;
        }
    }

    /// Runs event `index`: every agent concurrently, then scoring and the leaderboard update.
    ///
    /// # Errors
    /// Fails if the competition is not running or the previous event has not completed. Agent
    /// failures are never errors.
    pub async fn run_event(&self, index: usize) -> anyhow::Result<()> {
        let run = begin_event(&mut self.state.lock().expect("poisoned"), index)?;
        self.play_event(index, run).await;
        Ok(())
    }

    async fn play_event(&self, index: usize, run: EventRun) {
        let EventRun {
            competition_id,
            event_id,
            task,
            agents,
        } = run;

        info!(event = index, task = %task.id, "event started");
        self.services.sink.publish(
            EventKind::EventStart,
            &competition_id,
            json!({ "event_id": event_id, "index": index, "task_id": task.id }),
        );

        let results = join_all(agents.iter().map(|agent| self.execute_agent(agent, &task))).await;

        let (winner, entries) = {
            let mut state = self.state.lock().expect("poisoned");
            let winner = state.leaderboard.apply_event(&results);
            let event = &mut state.events[index];
            event.results = results.clone();
            event.status = EventStatus::Completed;
            event.ended_at = Some(OffsetDateTime::now_utc());
            (winner, state.leaderboard.entries().to_vec())
        };

        if self.config.verbose {
            print_event_summary(&task, &results, &entries);
        }
        self.services.sink.publish(
            EventKind::LeaderboardUpdate,
            &competition_id,
            json!({ "leaderboard": entries }),
        );
        self.services.sink.publish(
            EventKind::EventEnd,
            &competition_id,
            json!({ "event_id": event_id, "index": index, "winner": winner, "results": results }),
        );
    }

    async fn execute_agent(&self, agent: &AgentConfig, task: &TaskDefinition) -> TaskResult {
        let limit = task.time_limit + self.config.task_grace;
        let execution = tokio::time::timeout(limit, self.services.executor.execute(agent, task));

        let (status, completion_time_ms, actions, output) = match execution.await {
            Ok(Ok(outcome)) => {
                let status = if outcome.success {
                    TaskStatus::Completed
                } else {
                    TaskStatus::Failed
                };
                (status, outcome.completion_time_ms, outcome.actions, outcome.output)
            }
            Ok(Err(e)) => {
                warn!(agent_id = %agent.id, task = %task.id, error = %format!("{e:#}"), "task execution failed");
                let output = json!({ "error": format!("{e:#}") });
                (TaskStatus::Failed, None, vec![], Some(output))
            }
            Err(_) => {
                warn!(agent_id = %agent.id, task = %task.id, ?limit, "task execution timed out");
                (TaskStatus::Timeout, None, vec![], None)
            }
        };

        TaskResult {
            agent_id: agent.id.clone(),
            task_id: task.id.clone(),
            score: compute_score(task, status, completion_time_ms),
            status,
            completion_time_ms,
            actions,
            output,
        }
    }

    fn complete(&self, id: &str) -> anyhow::Result<()> {
        let now = self.services.clock.now();
        let elapsed = {
            let mut timer = self.timer.lock().expect("poisoned");
            timer.stop(now);
            timer.elapsed(now)
        };
        let entries = {
            let mut state = self.state.lock().expect("poisoned");
            if state.status == CompetitionStatus::Cancelled {
                return Ok(());
            }
            state.status = CompetitionStatus::Completed;
            state.ended_at = Some(OffsetDateTime::now_utc());
            state.leaderboard.entries().to_vec()
        };
        info!(elapsed_ms = elapsed.as_millis() as u64, "competition completed");
        self.services.sink.publish(
            EventKind::CompetitionEnd,
            id,
            json!({ "elapsed_ms": elapsed.as_millis() as u64, "leaderboard": entries }),
        );
        Ok(())
    }

    /// Pauses a running competition. The event in progress finishes; the next one waits.
    pub fn pause(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().expect("poisoned");
        if state.status != CompetitionStatus::Running {
            bail!("cannot pause a competition that is {}", state.status);
        }
        state.status = CompetitionStatus::Paused;
        self.timer
            .lock()
            .expect("poisoned")
            .stop(self.services.clock.now());
        info!(competition = %state.id, "competition paused");
        Ok(())
    }

    pub fn resume(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().expect("poisoned");
        if state.status != CompetitionStatus::Paused {
            bail!("cannot resume a competition that is {}", state.status);
        }
        state.status = CompetitionStatus::Running;
        self.timer
            .lock()
            .expect("poisoned")
            .start(self.services.clock.now());
        drop(state);
        self.resumed.notify_one();
        Ok(())
    }

    /// Cancels the competition and releases every agent and sandbox.
    ///
    /// No new event starts afterwards; an event in flight is left to finish on its own. Cancelling
    /// a terminal competition does nothing.
    pub async fn cancel_competition(&self) {
        let id = {
            let mut state = self.state.lock().expect("poisoned");
            if state.status.is_terminal() {
                debug!(competition = %state.id, status = %state.status, "cancel ignored");
                return;
            }
            state.status = CompetitionStatus::Cancelled;
            state.ended_at = Some(OffsetDateTime::now_utc());
            state.id.clone()
        };
        self.timer
            .lock()
            .expect("poisoned")
            .stop(self.services.clock.now());
        self.resumed.notify_one();
        self.release_all().await;
        info!(competition = %id, "competition cancelled");
        self.services
            .sink
            .publish(EventKind::CompetitionCancelled, &id, json!({}));
    }

    /// Cancels after a warmup failure. A competition already cancelled is only released.
    async fn abort(&self, reason: String) {
        let id = {
            let mut state = self.state.lock().expect("poisoned");
            if state.status == CompetitionStatus::Cancelled {
                None
            } else {
                state.status = CompetitionStatus::Cancelled;
                state.ended_at = Some(OffsetDateTime::now_utc());
                Some(state.id.clone())
            }
        };
        self.release_all().await;
        if let Some(id) = id {
            self.services.sink.publish(
                EventKind::CompetitionCancelled,
                &id,
                json!({ "reason": reason }),
            );
        }
    }

    /// Releases every agent runner and sandbox. Never fails; safe after any terminal state.
    pub async fn cleanup(&self) {
        self.release_all().await;
    }

    async fn release_all(&self) {
        let allocations = mem::take(&mut *self.allocations.lock().expect("poisoned"));
        for agent in &allocations.prepared {
            if let Err(e) = self.services.executor.release(agent).await {
                warn!(agent_id = %agent, error = %format!("{e:#}"), "could not release agent");
            }
        }
        for sandbox in &allocations.sandboxes {
            if let Err(e) = self.services.sandboxes.stop(sandbox).await {
                warn!(sandbox = %sandbox, error = %format!("{e:#}"), "could not stop sandbox");
            }
        }
    }
}

fn print_event_summary(task: &TaskDefinition, results: &[TaskResult], board: &[LeaderboardEntry]) {
    let scores = results
        .iter()
        .map(|r| format!("{}: {:.0} ({:?})", r.agent_id, r.score, r.status))
        .collect::<Vec<_>>()
        .join(", ");
    // green task, default results
    println!("\x1b[32m{}:\x1b[39m {scores}", task.name);
    for entry in board {
        println!("  #{} {} {:.0}", entry.rank, entry.agent_name, entry.total_score);
    }
}
