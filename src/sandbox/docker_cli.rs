//! [`ContainerRuntime`] implementation driving the `docker` command line client.

use std::{collections::HashMap, process::Output};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace};

use super::runtime::{
    BindMount, ContainerInfo, ContainerRuntime, ContainerSpec, ContainerSummary, ImageInfo,
    NetworkAttachment, NetworkSpec, RuntimeError, RuntimeResult,
};

/// Talks to the container engine through the `docker` (or compatible) binary.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use another docker-compatible binary, e.g. `podman`.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        DockerCli {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[String]) -> RuntimeResult<String> {
        trace!(binary = %self.binary, ?args, "running engine command");
        let output = tokio::process::Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("could not run '{}': {e}", self.binary)))?;
        check_output(output)
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

fn check_output(output: Output) -> RuntimeResult<String> {
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(classify_error(stderr))
}

fn classify_error(stderr: String) -> RuntimeError {
    let lower = stderr.to_lowercase();
    if lower.contains("no such") || lower.contains("not found") {
        RuntimeError::NotFound(stderr)
    } else if lower.contains("is not running") || lower.contains("already in progress") {
        RuntimeError::NotModified(stderr)
    } else if lower.contains("conflict") || lower.contains("already exists") {
        RuntimeError::Conflict(stderr)
    } else if lower.contains("cannot connect to the docker daemon")
        || lower.contains("is the docker daemon running")
    {
        RuntimeError::Unavailable(stderr)
    } else {
        RuntimeError::Command(stderr)
    }
}

fn format_bind(bind: &BindMount) -> String {
    if bind.read_only {
        format!("{}:{}:ro", bind.host_path, bind.container_path)
    } else {
        format!("{}:{}", bind.host_path, bind.container_path)
    }
}

/// Builds the `docker network create` arguments for `spec`, labels sorted by key.
pub(crate) fn network_args(spec: &NetworkSpec) -> Vec<String> {
    let mut args = vec![
        "network".to_string(),
        "create".to_string(),
        "--driver".to_string(),
        spec.driver.clone(),
    ];
    let mut labels = spec.labels.iter().collect::<Vec<_>>();
    labels.sort();
    for (key, value) in labels {
        args.push("--label".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(spec.name.clone());
    args
}

/// Builds the `docker create` arguments for `spec`.
pub(crate) fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let host = &spec.host;
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--network".to_string(),
        host.network.clone(),
    ];
    if host.nano_cpus > 0 {
        args.push("--cpus".to_string());
        args.push(format!("{:.3}", host.nano_cpus as f64 / 1e9));
    }
    if host.memory_bytes > 0 {
        args.push("--memory".to_string());
        args.push(format!("{}b", host.memory_bytes));
    }
    for cap in &host.cap_drop {
        args.push("--cap-drop".to_string());
        args.push(cap.clone());
    }
    for opt in &host.security_opt {
        args.push("--security-opt".to_string());
        args.push(opt.clone());
    }
    if host.read_only_rootfs {
        args.push("--read-only".to_string());
    }
    let mut tmpfs = host.tmpfs.iter().collect::<Vec<_>>();
    tmpfs.sort();
    for (path, options) in tmpfs {
        args.push("--tmpfs".to_string());
        args.push(format!("{path}:{options}"));
    }
    for bind in &host.binds {
        args.push("--volume".to_string());
        args.push(format_bind(bind));
    }
    for (key, value) in &spec.env {
        args.push("--env".to_string());
        args.push(format!("{key}={value}"));
    }
    let mut labels = spec.labels.iter().collect::<Vec<_>>();
    labels.sort();
    for (key, value) in labels {
        args.push("--label".to_string());
        args.push(format!("{key}={value}"));
    }
    if let Some(port) = spec.exposed_port {
        args.push("--expose".to_string());
        args.push(port.to_string());
    }
    args.push(spec.image.clone());
    args
}

#[derive(Debug, Deserialize)]
struct EndpointSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Running", default)]
    running: bool,
}

#[derive(Debug, Deserialize)]
struct InspectNetworkSettings {
    #[serde(rename = "Networks", default)]
    networks: HashMap<String, EndpointSettings>,
}

#[derive(Debug, Deserialize)]
struct InspectOutput {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "State")]
    state: InspectState,
    #[serde(rename = "NetworkSettings")]
    network_settings: InspectNetworkSettings,
}

pub(crate) fn parse_inspect(json: &str) -> RuntimeResult<ContainerInfo> {
    let mut parsed: Vec<InspectOutput> = serde_json::from_str(json)
        .map_err(|e| RuntimeError::Command(format!("unexpected inspect output: {e}")))?;
    let Some(container) = parsed.pop() else {
        return Err(RuntimeError::NotFound("inspect returned no container".to_string()));
    };
    let mut networks = container
        .network_settings
        .networks
        .into_iter()
        .map(|(network, settings)| NetworkAttachment {
            network,
            ip_address: settings.ip_address,
        })
        .collect::<Vec<_>>();
    networks.sort_by(|a, b| a.network.cmp(&b.network));
    Ok(ContainerInfo {
        id: container.id,
        running: container.state.running,
        networks,
    })
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn list_networks(&self) -> RuntimeResult<Vec<String>> {
        let out = self
            .run(&["network".into(), "ls".into(), "--format".into(), "{{.Name}}".into()])
            .await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    async fn create_network(&self, spec: &NetworkSpec) -> RuntimeResult<()> {
        self.run(&network_args(spec)).await.map(|_| ())
    }

    async fn inspect_image(&self, name: &str) -> RuntimeResult<ImageInfo> {
        let id = self
            .run(&[
                "image".into(),
                "inspect".into(),
                "--format".into(),
                "{{.Id}}".into(),
                name.into(),
            ])
            .await?;
        Ok(ImageInfo { id })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let id = self.run(&create_args(spec)).await?;
        debug!(name = %spec.name, %id, "container created");
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.run(&["start".into(), id.into()]).await.map(|_| ())
    }

    async fn stop_container(&self, id: &str) -> RuntimeResult<()> {
        self.run(&["stop".into(), "--time".into(), "10".into(), id.into()])
            .await
            .map(|_| ())
    }

    async fn remove_container(&self, id: &str) -> RuntimeResult<()> {
        self.run(&["rm".into(), "--force".into(), id.into()])
            .await
            .map(|_| ())
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInfo> {
        let out = self.run(&["inspect".into(), id.into()]).await?;
        parse_inspect(&out)
    }

    async fn list_containers(&self, name_prefix: &str) -> RuntimeResult<Vec<ContainerSummary>> {
        let out = self
            .run(&[
                "ps".into(),
                "--all".into(),
                "--filter".into(),
                format!("name={name_prefix}"),
                "--format".into(),
                "{{.ID}} {{.Names}}".into(),
            ])
            .await?;
        Ok(out
            .lines()
            .filter_map(|line| {
                let (id, name) = line.split_once(' ')?;
                // the engine filter matches substrings, keep real prefixes only
                name.starts_with(name_prefix).then(|| ContainerSummary {
                    id: id.to_string(),
                    name: name.to_string(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::runtime::HostConfig;

    #[test]
    fn create_args_carry_limits_and_hardening() {
        let spec = ContainerSpec {
            name: "olympics-sandbox-a1-1234".to_string(),
            image: "img:latest".to_string(),
            env: vec![("AGENT_ID".to_string(), "a1".to_string())],
            labels: HashMap::new(),
            exposed_port: Some(9222),
            host: HostConfig {
                nano_cpus: 2_000_000_000,
                memory_bytes: 1024,
                network: "net".to_string(),
                cap_drop: vec!["ALL".to_string()],
                security_opt: vec!["no-new-privileges".to_string()],
                read_only_rootfs: true,
                binds: vec![BindMount {
                    host_path: "/tmp/s/api_key".to_string(),
                    container_path: "/run/secrets/api_key".to_string(),
                    read_only: true,
                }],
                tmpfs: HashMap::new(),
            },
        };
        let args = create_args(&spec).join(" ");
        assert!(args.contains("--cpus 2.000"));
        assert!(args.contains("--memory 1024b"));
        assert!(args.contains("--cap-drop ALL"));
        assert!(args.contains("--security-opt no-new-privileges"));
        assert!(args.contains("--read-only"));
        assert!(args.contains("--volume /tmp/s/api_key:/run/secrets/api_key:ro"));
        assert!(args.ends_with("img:latest"));
    }

    #[test]
    fn network_labels_are_ordered() {
        let spec = NetworkSpec {
            name: "arena".to_string(),
            driver: "bridge".to_string(),
            labels: HashMap::from([
                ("zone".to_string(), "eu".to_string()),
                ("arena.managed".to_string(), "true".to_string()),
                ("owner".to_string(), "ops".to_string()),
            ]),
        };
        assert_eq!(
            network_args(&spec).join(" "),
            "network create --driver bridge --label arena.managed=true --label owner=ops \
             --label zone=eu arena"
        );
    }

    #[test]
    fn parses_inspect_networks() {
        let json = r#"[{"Id":"abc","State":{"Running":true},
            "NetworkSettings":{"Networks":{"arena":{"IPAddress":"172.18.0.5"}}}}]"#;
        let info = parse_inspect(json).unwrap();
        assert_eq!(info.id, "abc");
        assert!(info.running);
        assert_eq!(info.networks[0].ip_address, "172.18.0.5");
    }

    #[test]
    fn classifies_engine_errors() {
        assert!(classify_error("Error: No such container: x".into()).is_already_gone());
        assert!(classify_error("Container x is not running".into()).is_already_gone());
        assert!(matches!(
            classify_error("Cannot connect to the Docker daemon at unix:///var/run/docker.sock".into()),
            RuntimeError::Unavailable(_)
        ));
    }
}
