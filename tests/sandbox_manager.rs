mod common;

use std::sync::atomic::Ordering;

use agent_olympics::{
    agent::{AgentConfig, AgentCredentials, Secret},
    constraints::LimitOverrides,
    sandbox::{SandboxKind, SandboxStatus, AGENT_LABEL, MANAGED_LABEL},
};
use common::{Behavior, Harness, ScriptedExecutor};

fn harness() -> Harness {
    Harness::new(ScriptedExecutor::new(Behavior::Complete(1)))
}

#[tokio::test]
async fn initialize_creates_the_network_once() {
    let harness = harness();
    let network = harness.sandboxes.settings().network.clone();

    harness.sandboxes.initialize().await.unwrap();
    assert_eq!(harness.runtime.networks(), [network.clone()]);

    harness.sandboxes.initialize().await.unwrap();
    assert_eq!(harness.runtime.networks(), [network]);
}

#[tokio::test]
async fn initialize_fails_without_engine() {
    let harness = harness();
    harness.runtime.unavailable.store(true, Ordering::SeqCst);
    assert!(harness.sandboxes.initialize().await.is_err());
}

#[tokio::test]
async fn isolated_sandbox_is_hardened_and_limited() {
    let harness = harness();
    let agent = AgentConfig::new("agent/1", "Alpha").with_provider("openai", "gpt");
    let overrides = LimitOverrides {
        cpu_cores: Some(0.5),
        memory_mb: Some(256),
        ..Default::default()
    };

    let sandbox = harness.sandboxes.create_sandbox(&agent, Some(&overrides)).await;
    assert_eq!(sandbox.status, SandboxStatus::Ready);
    assert_eq!(sandbox.kind, SandboxKind::Isolated);
    assert_eq!(sandbox.limits.cpu_cores, 0.5);

    let spec = harness.runtime.created().pop().unwrap();
    let settings = harness.sandboxes.settings();
    assert!(spec.name.starts_with(&format!("{}-agent_1-", settings.container_prefix)));
    assert_eq!(spec.image, settings.image);
    assert_eq!(spec.host.nano_cpus, 500_000_000);
    assert_eq!(spec.host.memory_bytes, 256 * 1024 * 1024);
    assert_eq!(spec.host.cap_drop, ["ALL"]);
    assert_eq!(spec.host.security_opt, ["no-new-privileges"]);
    assert!(spec.host.read_only_rootfs);
    assert_eq!(spec.host.network, settings.network);
    assert!(spec.host.tmpfs.contains_key("/tmp"));
    assert_eq!(spec.labels[MANAGED_LABEL], "true");
    assert_eq!(spec.labels[AGENT_LABEL], "agent/1");
    assert!(spec
        .env
        .contains(&("SANDBOX_ID".to_string(), sandbox.id.to_string())));
    assert!(spec
        .env
        .contains(&("AGENT_PROVIDER".to_string(), "openai".to_string())));

    // fake engine hands out 10.0.0.<n>
    assert_eq!(
        sandbox.endpoint.as_deref(),
        Some(format!("http://10.0.0.1:{}", settings.control_port).as_str())
    );
}

#[tokio::test]
async fn secrets_are_mounted_never_in_env() {
    let harness = harness();
    let agent = AgentConfig::new("a", "Alpha")
        .with_credentials(AgentCredentials::ApiKey(Secret::new("sk-live-123")));

    let sandbox = harness.sandboxes.create_sandbox(&agent, None).await;
    assert_eq!(sandbox.status, SandboxStatus::Ready);

    let spec = harness.runtime.created().pop().unwrap();
    assert!(spec.env.iter().all(|(_, v)| !v.contains("sk-live-123")));
    assert_eq!(spec.host.binds.len(), 1);
    let bind = &spec.host.binds[0];
    assert!(bind.read_only);
    assert_eq!(bind.container_path, "/run/secrets/api_key");
    assert_eq!(std::fs::read_to_string(&bind.host_path).unwrap(), "sk-live-123");

    harness.sandboxes.stop(&sandbox.id).await.unwrap();
    assert!(!std::path::Path::new(&bind.host_path).exists());
}

#[tokio::test]
async fn failed_creation_is_reported_not_tracked() {
    let harness = harness();
    harness.runtime.fail_create.store(true, Ordering::SeqCst);
    let agent = AgentConfig::new("a", "Alpha")
        .with_credentials(AgentCredentials::ApiKey(Secret::new("sk")));

    let sandbox = harness.sandboxes.create_sandbox(&agent, None).await;
    assert_eq!(sandbox.status, SandboxStatus::Error);
    assert!(sandbox.error.unwrap().contains("no space left"));
    assert!(harness.sandboxes.get_sandbox_state(&sandbox.id).is_none());
    assert!(harness.sandboxes.get_active_sandboxes().is_empty());
    // provisioned secrets were rolled back
    assert_eq!(std::fs::read_dir(harness.secrets_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn lifecycle_and_stop_tolerance() {
    let harness = harness();
    let sandbox = harness
        .sandboxes
        .create_sandbox(&AgentConfig::new("a", "Alpha"), None)
        .await;
    harness.sandboxes.mark_running(&sandbox.id).unwrap();
    assert_eq!(
        harness.sandboxes.get_sandbox_state(&sandbox.id).unwrap().status,
        SandboxStatus::Running
    );
    // running never goes back to ready
    assert!(harness.sandboxes.mark_running(&sandbox.id).is_err());

    // someone removed the container already
    harness.runtime.vanish(sandbox.container_id.as_deref().unwrap());
    harness.sandboxes.stop(&sandbox.id).await.unwrap();
    assert!(harness.sandboxes.get_sandbox_state(&sandbox.id).is_none());

    // unknown ids are a no-op
    harness.sandboxes.stop(&sandbox.id).await.unwrap();
}

#[tokio::test]
async fn cleanup_removes_orphans_with_our_prefix_only() {
    let harness = harness();
    let prefix = harness.sandboxes.settings().container_prefix.clone();
    harness
        .sandboxes
        .create_sandbox(&AgentConfig::new("a", "Alpha"), None)
        .await;
    harness.runtime.add_orphan(&format!("{prefix}-ghost-1234"));
    harness.runtime.add_orphan("postgres");

    harness.sandboxes.cleanup().await;
    assert_eq!(harness.runtime.container_names(), ["postgres"]);
    assert!(harness.sandboxes.get_active_sandboxes().is_empty());
}

#[tokio::test]
async fn local_sandboxes_never_touch_the_engine() {
    let harness = harness();
    harness.runtime.unavailable.store(true, Ordering::SeqCst);
    let sandbox = harness
        .sandboxes
        .create_local_sandbox(&AgentConfig::new("a", "Alpha"));
    assert_eq!(sandbox.kind, SandboxKind::Local);
    assert_eq!(sandbox.status, SandboxStatus::Ready);
    assert!(sandbox.endpoint.is_none());
    assert_eq!(harness.sandboxes.get_active_sandboxes().len(), 1);

    harness.sandboxes.stop_all_sandboxes().await;
    assert!(harness.sandboxes.get_active_sandboxes().is_empty());
    assert!(harness.runtime.created().is_empty());
}
