//! Config for the orchestrator behaviors
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! All values are optional. Flags are case-insensitive; set them to `"true"` to enable.
//!
//! - `ARENA_VERBOSE` — Print competition progress to stdout (default: `false`)
//! - `ARENA_LOG` — Enable logging to a file (default: `false`)
//! - `ARENA_LOCAL_SANDBOXES` — Use non-isolated local sandboxes instead of containers (default: `false`)
//! - `ARENA_LAUNCH_STAGGER_MS` — Delay between two agent launches at warmup (default: `500`)
//! - `ARENA_TASK_GRACE_MS` — Extra time past a task's limit before an agent is timed out (default: `5000`)
//! - `ARENA_MAX_CONCURRENT_MATCHES` — Tournament matches run at the same time in one round (default: `1`)
//! - `ARENA_SWISS_ROUNDS` — Number of Swiss rounds, `0` meaning `ceil(log2(n))` (default: `0`)
//! - `ARENA_SANDBOX_IMAGE` — Base image of isolated sandboxes
//! - `ARENA_SANDBOX_NETWORK` — Bridge network shared by sandboxes
//! - `ARENA_SANDBOX_PREFIX` — Container name prefix, also used to find orphans
//! - `ARENA_SECRETS_DIR` — Host directory holding short-lived secret files

use std::{path::PathBuf, time::Duration};

/// Settings of the isolated sandbox environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSettings {
    pub image: String,
    pub network: String,
    pub container_prefix: String,
    /// Port of the browser/control endpoint exposed by the sandbox image.
    pub control_port: u16,
    pub secrets_dir: PathBuf,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        SandboxSettings {
            image: "agent-olympics/sandbox:latest".to_string(),
            network: "agent-olympics-net".to_string(),
            container_prefix: "olympics-sandbox".to_string(),
            control_port: 9222,
            secrets_dir: std::env::temp_dir().join("agent-olympics-secrets"),
        }
    }
}

/// Configuration for orchestrator behaviors.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) use_local_sandboxes: bool,
    pub(crate) launch_stagger: Duration,
    pub(crate) task_grace: Duration,
    pub(crate) max_concurrent_matches: usize,
    pub(crate) swiss_rounds: usize,
    pub(crate) sandbox: SandboxSettings,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Progress is not printed and logging to file is disabled.
    /// - Sandboxes are isolated containers.
    /// - Agents are launched 500ms apart at warmup.
    /// - Agents get 5s past a task's time limit before being timed out.
    /// - Tournament matches run one at a time.
    /// - Swiss tournaments play `ceil(log2(n))` rounds.
    pub fn new() -> Self {
        Self {
            verbose: false,
            log: false,
            use_local_sandboxes: false,
            launch_stagger: Duration::from_millis(500),
            task_grace: Duration::from_secs(5),
            max_concurrent_matches: 1,
            swiss_rounds: 0,
            sandbox: SandboxSettings::default(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Unset or unparsable variables keep their default value.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn get_env_number<T: std::str::FromStr>(var: &str) -> Option<T> {
            std::env::var(var).ok()?.parse().ok()
        }

        let defaults = Self::new();
        let mut sandbox = SandboxSettings::default();
        if let Ok(image) = std::env::var("ARENA_SANDBOX_IMAGE") {
            sandbox.image = image;
        }
        if let Ok(network) = std::env::var("ARENA_SANDBOX_NETWORK") {
            sandbox.network = network;
        }
        if let Ok(prefix) = std::env::var("ARENA_SANDBOX_PREFIX") {
            sandbox.container_prefix = prefix;
        }
        if let Ok(dir) = std::env::var("ARENA_SECRETS_DIR") {
            sandbox.secrets_dir = PathBuf::from(dir);
        }

        Self {
            verbose: get_env_flag("ARENA_VERBOSE", defaults.verbose),
            log: get_env_flag("ARENA_LOG", defaults.log),
            use_local_sandboxes: get_env_flag("ARENA_LOCAL_SANDBOXES", defaults.use_local_sandboxes),
            launch_stagger: get_env_number("ARENA_LAUNCH_STAGGER_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.launch_stagger),
            task_grace: get_env_number("ARENA_TASK_GRACE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.task_grace),
            max_concurrent_matches: get_env_number("ARENA_MAX_CONCURRENT_MATCHES")
                .unwrap_or(defaults.max_concurrent_matches),
            swiss_rounds: get_env_number("ARENA_SWISS_ROUNDS").unwrap_or(defaults.swiss_rounds),
            sandbox,
        }
    }

    /// Enable or disable progress output.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Use local, non-isolated sandboxes (development only).
    pub fn with_local_sandboxes(mut self, value: bool) -> Self {
        self.use_local_sandboxes = value;
        self
    }

    /// Delay inserted between two consecutive agent launches at warmup.
    pub fn with_launch_stagger(mut self, value: Duration) -> Self {
        self.launch_stagger = value;
        self
    }

    pub fn with_task_grace(mut self, value: Duration) -> Self {
        self.task_grace = value;
        self
    }

    /// Maximum number of matches of one tournament round running at the same time. At least one.
    pub fn with_max_concurrent_matches(mut self, value: usize) -> Self {
        self.max_concurrent_matches = value.max(1);
        self
    }

    /// Number of Swiss rounds. `0` means `ceil(log2(n))`.
    pub fn with_swiss_rounds(mut self, value: usize) -> Self {
        self.swiss_rounds = value;
        self
    }

    pub fn with_sandbox_settings(mut self, value: SandboxSettings) -> Self {
        self.sandbox = value;
        self
    }

    pub fn sandbox(&self) -> &SandboxSettings {
        &self.sandbox
    }

    pub fn launch_stagger(&self) -> Duration {
        self.launch_stagger
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = Configuration::new()
            .with_local_sandboxes(true)
            .with_launch_stagger(Duration::ZERO)
            .with_max_concurrent_matches(0);
        assert!(config.use_local_sandboxes);
        assert_eq!(config.launch_stagger(), Duration::ZERO);
        assert_eq!(config.max_concurrent_matches, 1);
    }

    #[test]
    fn env_values_are_read() {
        std::env::set_var("ARENA_LAUNCH_STAGGER_MS", "25");
        std::env::set_var("ARENA_SANDBOX_PREFIX", "test-prefix");
        let config = Configuration::from_env();
        std::env::remove_var("ARENA_LAUNCH_STAGGER_MS");
        std::env::remove_var("ARENA_SANDBOX_PREFIX");
        assert_eq!(config.launch_stagger(), Duration::from_millis(25));
        assert_eq!(config.sandbox().container_prefix, "test-prefix");
    }
}
