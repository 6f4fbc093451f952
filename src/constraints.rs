//! Per-agent resource limits applied to every sandbox.
//!
//! The main entry point is [`ResourceLimitsBuilder`], which configures:
//!
//! - **CPU**: number of cores (may be fractional), enforced as a CPU quota of
//!   `cores × 1e9` nanoseconds
//! - **Memory**: megabytes, enforced as a hard limit of `MB × 1024²` bytes
//! - **Time**: wall-clock limit for one task
//!
//! Once built, [`ResourceLimits`] are the defaults of the sandbox manager. Individual sandboxes
//! may override any field with [`LimitOverrides`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use agent_olympics::constraints::ResourceLimitsBuilder;
//!
//! let limits = ResourceLimitsBuilder::new()
//!     .with_cpu_cores(1.0)
//!     .with_memory_mb(512)
//!     .with_time_limit(Duration::from_secs(60))
//!     .build()
//!     .unwrap();
//! assert_eq!(limits.memory_bytes(), 512 * 1024 * 1024);
//! ```

use std::{env, time::Duration};

use anyhow::bail;
use tracing::warn;

const DEFAULT_CPU_CORES: f64 = 1.0;
const DEFAULT_MEMORY_MB: u64 = 2048;
const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(300);

/// Builder for [`ResourceLimits`].
///
/// Unset fields fall back to one core, 2048 MB and five minutes.
#[derive(Debug, Default, Clone)]
pub struct ResourceLimitsBuilder {
    cpu_cores: Option<f64>,
    memory_mb: Option<u64>,
    time_limit: Option<Duration>,
}

impl ResourceLimitsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder configured from environment variables.
    ///
    /// Read environment variables are:
    /// - `CPU_CORES_PER_AGENT` (f64)
    /// - `RAM_PER_AGENT` (u64): megabytes
    /// - `TIME_LIMIT_SECS` (u64)
    #[must_use]
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(var: &str) -> Option<T> {
            env::var(var).ok()?.parse().ok()
        }

        ResourceLimitsBuilder {
            cpu_cores: parse("CPU_CORES_PER_AGENT"),
            memory_mb: parse("RAM_PER_AGENT"),
            time_limit: parse::<u64>("TIME_LIMIT_SECS").map(Duration::from_secs),
        }
    }

    #[must_use]
    pub fn with_cpu_cores(self, cores: f64) -> Self {
        Self {
            cpu_cores: Some(cores),
            ..self
        }
    }

    /// Sets the memory limit per sandbox (in MB).
    #[must_use]
    pub fn with_memory_mb(self, mb: u64) -> Self {
        Self {
            memory_mb: Some(mb),
            ..self
        }
    }

    #[must_use]
    pub fn with_time_limit(self, limit: Duration) -> Self {
        Self {
            time_limit: Some(limit),
            ..self
        }
    }

    /// Consumes the builder and validates the limits against the host.
    ///
    /// # Errors
    ///
    /// Returns an error when a limit is not positive, or when a single sandbox would need more
    /// cores or memory than the host has.
    pub fn build(self) -> anyhow::Result<ResourceLimits> {
        let cpu_cores = self.cpu_cores.unwrap_or(DEFAULT_CPU_CORES);
        let memory_mb = self.memory_mb.unwrap_or(DEFAULT_MEMORY_MB);
        let time_limit = self.time_limit.unwrap_or(DEFAULT_TIME_LIMIT);

        if cpu_cores.is_nan() || cpu_cores <= 0.0 {
            bail!("CPU cores per sandbox must be positive, got {cpu_cores}");
        }
        if memory_mb == 0 {
            bail!("memory per sandbox must be positive");
        }
        if time_limit.is_zero() {
            bail!("time limit must be positive");
        }

        let host_cpus = num_cpus::get() as f64;
        if cpu_cores > host_cpus {
            bail!("CPU cores per sandbox ({cpu_cores}) is greater than host CPU count ({host_cpus})");
        }

        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        let host_mb = sys.total_memory() / (1024 * 1024);
        if host_mb == 0 {
            warn!("could not read host memory, skipping memory limit validation");
        } else if memory_mb > host_mb {
            bail!("memory per sandbox ({memory_mb}MB) is greater than host memory ({host_mb}MB)");
        }

        Ok(ResourceLimits {
            cpu_cores,
            memory_mb,
            time_limit,
        })
    }
}

/// Resource limits of one sandbox. Obtained using [`ResourceLimitsBuilder`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    pub cpu_cores: f64,
    pub memory_mb: u64,
    pub time_limit: Duration,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        ResourceLimits {
            cpu_cores: DEFAULT_CPU_CORES,
            memory_mb: DEFAULT_MEMORY_MB,
            time_limit: DEFAULT_TIME_LIMIT,
        }
    }
}

impl ResourceLimits {
    pub fn builder() -> ResourceLimitsBuilder {
        ResourceLimitsBuilder::new()
    }

    /// CPU quota in nanoseconds of CPU time per second.
    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_cores * 1e9).round() as i64
    }

    pub fn memory_bytes(&self) -> i64 {
        (self.memory_mb * 1024 * 1024) as i64
    }

    /// Returns these limits with every `Some` field of `overrides` applied.
    pub fn merged(&self, overrides: &LimitOverrides) -> ResourceLimits {
        ResourceLimits {
            cpu_cores: overrides.cpu_cores.unwrap_or(self.cpu_cores),
            memory_mb: overrides.memory_mb.unwrap_or(self.memory_mb),
            time_limit: overrides.time_limit.unwrap_or(self.time_limit),
        }
    }
}

/// Per-sandbox overrides of the default [`ResourceLimits`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LimitOverrides {
    pub cpu_cores: Option<f64>,
    pub memory_mb: Option<u64>,
    pub time_limit: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_conversions() {
        let limits = ResourceLimits {
            cpu_cores: 1.5,
            memory_mb: 256,
            time_limit: Duration::from_secs(10),
        };
        assert_eq!(limits.nano_cpus(), 1_500_000_000);
        assert_eq!(limits.memory_bytes(), 268_435_456);
    }

    #[test]
    fn overrides_replace_only_set_fields() {
        let base = ResourceLimits::default();
        let merged = base.merged(&LimitOverrides {
            memory_mb: Some(512),
            ..Default::default()
        });
        assert_eq!(merged.memory_mb, 512);
        assert_eq!(merged.cpu_cores, base.cpu_cores);
        assert_eq!(merged.time_limit, base.time_limit);
    }

    #[test]
    fn rejects_non_positive_limits() {
        assert!(ResourceLimitsBuilder::new().with_cpu_cores(0.0).build().is_err());
        assert!(ResourceLimitsBuilder::new().with_memory_mb(0).build().is_err());
        assert!(ResourceLimitsBuilder::new()
            .with_time_limit(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn rejects_more_cores_than_host() {
        let too_many = (num_cpus::get() + 1) as f64;
        assert!(ResourceLimitsBuilder::new()
            .with_cpu_cores(too_many)
            .build()
            .is_err());
    }

    #[test]
    fn small_limits_build() {
        let limits = ResourceLimitsBuilder::new()
            .with_cpu_cores(0.5)
            .with_memory_mb(64)
            .build()
            .unwrap();
        assert_eq!(limits.nano_cpus(), 500_000_000);
    }
}
