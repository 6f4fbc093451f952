#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use agent_olympics::{
    agent::{AgentConfig, AgentId},
    clock::ManualClock,
    competition::Services,
    configuration::Configuration,
    constraints::ResourceLimits,
    executor::{CompetitionContext, TaskExecutor, TaskOutcome},
    notify::RecordingSink,
    sandbox::{
        runtime::{
            ContainerInfo, ContainerRuntime, ContainerSpec, ContainerSummary, ImageInfo,
            NetworkAttachment, NetworkSpec, RuntimeError, RuntimeResult,
        },
        secrets::FileSecrets,
        Sandbox, SandboxManager,
    },
    tasks::TaskDefinition,
};
use anyhow::bail;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub fn init_test_logger() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

struct FakeContainer {
    spec: ContainerSpec,
    running: bool,
    ip: String,
}

/// Container engine keeping containers in memory.
#[derive(Default)]
pub struct FakeRuntime {
    networks: Mutex<Vec<String>>,
    images: Mutex<Vec<String>>,
    containers: Mutex<HashMap<String, FakeContainer>>,
    created: Mutex<Vec<ContainerSpec>>,
    next_id: AtomicUsize,
    pub fail_create: AtomicBool,
    pub unavailable: AtomicBool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(self, image: &str) -> Self {
        self.images.lock().unwrap().push(image.to_string());
        self
    }

    pub fn with_network(self, network: &str) -> Self {
        self.networks.lock().unwrap().push(network.to_string());
        self
    }

    pub fn networks(&self) -> Vec<String> {
        self.networks.lock().unwrap().clone()
    }

    /// Every spec passed to `create_container`, in call order.
    pub fn created(&self) -> Vec<ContainerSpec> {
        self.created.lock().unwrap().clone()
    }

    pub fn container_names(&self) -> Vec<String> {
        let mut names = self
            .containers
            .lock()
            .unwrap()
            .values()
            .map(|c| c.spec.name.clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    /// A running container nobody tracks, as left by a crashed process.
    pub fn add_orphan(&self, name: &str) -> String {
        let spec = ContainerSpec {
            name: name.to_string(),
            image: "orphan".to_string(),
            env: vec![],
            labels: HashMap::new(),
            exposed_port: None,
            host: Default::default(),
        };
        self.insert(spec, true)
    }

    /// Removes a container behind the manager's back.
    pub fn vanish(&self, id: &str) {
        self.containers.lock().unwrap().remove(id);
    }

    fn insert(&self, spec: ContainerSpec, running: bool) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("c{n}");
        let container = FakeContainer {
            spec,
            running,
            ip: format!("10.0.0.{n}"),
        };
        self.containers.lock().unwrap().insert(id.clone(), container);
        id
    }

    fn check_available(&self) -> RuntimeResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable("engine down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_networks(&self) -> RuntimeResult<Vec<String>> {
        self.check_available()?;
        Ok(self.networks())
    }

    async fn create_network(&self, spec: &NetworkSpec) -> RuntimeResult<()> {
        self.check_available()?;
        let mut networks = self.networks.lock().unwrap();
        if networks.contains(&spec.name) {
            return Err(RuntimeError::Conflict(spec.name.clone()));
        }
        networks.push(spec.name.clone());
        Ok(())
    }

    async fn inspect_image(&self, name: &str) -> RuntimeResult<ImageInfo> {
        self.check_available()?;
        if self.images.lock().unwrap().iter().any(|i| i == name) {
            Ok(ImageInfo {
                id: format!("sha256:{name}"),
            })
        } else {
            Err(RuntimeError::NotFound(name.to_string()))
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        self.check_available()?;
        self.created.lock().unwrap().push(spec.clone());
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(RuntimeError::Command("no space left on device".to_string()));
        }
        Ok(self.insert(spec.clone(), false))
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.running = true;
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> RuntimeResult<()> {
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        if !container.running {
            return Err(RuntimeError::NotModified(id.to_string()));
        }
        container.running = false;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> RuntimeResult<()> {
        self.containers
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInfo> {
        let containers = self.containers.lock().unwrap();
        let container = containers
            .get(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        Ok(ContainerInfo {
            id: id.to_string(),
            running: container.running,
            networks: vec![NetworkAttachment {
                network: container.spec.host.network.clone(),
                ip_address: container.ip.clone(),
            }],
        })
    }

    async fn list_containers(&self, name_prefix: &str) -> RuntimeResult<Vec<ContainerSummary>> {
        self.check_available()?;
        Ok(self
            .containers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| c.spec.name.starts_with(name_prefix))
            .map(|(id, c)| ContainerSummary {
                id: id.clone(),
                name: c.spec.name.clone(),
            })
            .collect())
    }
}

/// What an agent does when asked to execute a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Succeeds, reporting this completion time in ms.
    Complete(u64),
    /// Reports an unsuccessful attempt.
    Fail,
    /// The execution call itself errors.
    Crash,
    /// Never answers.
    Hang,
    /// Waits for a permit of the gate, then succeeds with this time.
    Gated(u64),
}

/// Executor whose agents follow a fixed script.
pub struct ScriptedExecutor {
    default: Behavior,
    behaviors: HashMap<AgentId, Behavior>,
    failing_prepare: HashSet<AgentId>,
    gated_prepare: HashSet<AgentId>,
    gate: Arc<Semaphore>,
    prepare_gate: Arc<Semaphore>,
    prepared: Mutex<Vec<AgentId>>,
    released: Mutex<Vec<AgentId>>,
    executions: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(default: Behavior) -> Self {
        ScriptedExecutor {
            default,
            behaviors: HashMap::new(),
            failing_prepare: HashSet::new(),
            gated_prepare: HashSet::new(),
            gate: Arc::new(Semaphore::new(0)),
            prepare_gate: Arc::new(Semaphore::new(0)),
            prepared: Mutex::new(vec![]),
            released: Mutex::new(vec![]),
            executions: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, agent: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(AgentId::from(agent), behavior);
        self
    }

    pub fn failing_prepare(mut self, agent: &str) -> Self {
        self.failing_prepare.insert(AgentId::from(agent));
        self
    }

    /// `prepare` of this agent waits for a permit of the prepare gate.
    pub fn gated_prepare(mut self, agent: &str) -> Self {
        self.gated_prepare.insert(AgentId::from(agent));
        self
    }

    pub fn gate(&self) -> Arc<Semaphore> {
        self.gate.clone()
    }

    pub fn prepare_gate(&self) -> Arc<Semaphore> {
        self.prepare_gate.clone()
    }

    pub fn prepared(&self) -> Vec<AgentId> {
        self.prepared.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<AgentId> {
        self.released.lock().unwrap().clone()
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn prepare(
        &self,
        agent: &AgentConfig,
        _sandbox: &Sandbox,
        _context: &CompetitionContext,
    ) -> anyhow::Result<()> {
        self.prepared.lock().unwrap().push(agent.id.clone());
        if self.failing_prepare.contains(&agent.id) {
            bail!("runner of {} did not boot", agent.id);
        }
        if self.gated_prepare.contains(&agent.id) {
            let _permit = self.prepare_gate.acquire().await?;
        }
        Ok(())
    }

    async fn execute(
        &self,
        agent: &AgentConfig,
        _task: &TaskDefinition,
    ) -> anyhow::Result<TaskOutcome> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behaviors.get(&agent.id).copied().unwrap_or(self.default);
        match behavior {
            Behavior::Complete(ms) => Ok(TaskOutcome::success(ms)),
            Behavior::Fail => Ok(TaskOutcome::failure()),
            Behavior::Crash => bail!("agent {} crashed", agent.id),
            Behavior::Hang => std::future::pending().await,
            Behavior::Gated(ms) => {
                let _permit = self.gate.acquire().await?;
                Ok(TaskOutcome::success(ms))
            }
        }
    }

    async fn release(&self, agent: &AgentId) -> anyhow::Result<()> {
        self.released.lock().unwrap().push(agent.clone());
        Ok(())
    }
}

pub const IMAGE: &str = "agent-olympics/sandbox:latest";

/// Services wired to fakes, plus handles to inspect them.
pub struct Harness {
    pub runtime: Arc<FakeRuntime>,
    pub sandboxes: Arc<SandboxManager>,
    pub executor: Arc<ScriptedExecutor>,
    pub sink: Arc<RecordingSink>,
    pub clock: Arc<ManualClock>,
    pub secrets_dir: TempDir,
}

impl Harness {
    pub fn new(executor: ScriptedExecutor) -> Harness {
        let runtime = Arc::new(FakeRuntime::new().with_image(IMAGE));
        let secrets_dir = tempfile::tempdir().unwrap();
        let mut settings = Configuration::new().sandbox().clone();
        settings.secrets_dir = secrets_dir.path().to_path_buf();
        let sandboxes = SandboxManager::new(
            runtime.clone(),
            Arc::new(FileSecrets::new(secrets_dir.path())),
            settings,
            ResourceLimits::default(),
        );
        Harness {
            runtime,
            sandboxes: Arc::new(sandboxes),
            executor: Arc::new(executor),
            sink: Arc::new(RecordingSink::new()),
            clock: Arc::new(ManualClock::new()),
            secrets_dir,
        }
    }

    pub fn services(&self) -> Services {
        Services {
            sandboxes: self.sandboxes.clone(),
            executor: self.executor.clone(),
            sink: self.sink.clone(),
            clock: self.clock.clone(),
        }
    }
}

/// Local sandboxes, no stagger.
pub fn local_config() -> Configuration {
    Configuration::new()
        .with_local_sandboxes(true)
        .with_launch_stagger(Duration::ZERO)
}

pub fn agents(ids: &[&str]) -> Vec<AgentConfig> {
    ids.iter()
        .map(|id| AgentConfig::new(*id, id.to_uppercase()))
        .collect()
}

/// Polls `condition` every few milliseconds, for at most two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
