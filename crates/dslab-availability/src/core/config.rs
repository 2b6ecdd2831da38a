//! Simulation configuration.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Recovery policy applied to host and VM failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Failed VMs are destroyed, work in flight is abandoned.
    NoRecovery,
    /// Failed VMs are restarted on their host once it recovers.
    ColdRestart,
    /// Failed VMs are replaced by pre-placed backup VMs.
    WarmStandby,
}

impl PolicyKind {
    /// Settling delay applied by the policy when no explicit value is configured.
    pub fn default_recovery_delay(&self) -> f64 {
        match self {
            PolicyKind::NoRecovery => 0.,
            PolicyKind::ColdRestart => 0.2,
            PolicyKind::WarmStandby => 1.43,
        }
    }
}

impl FromStr for PolicyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "no_recovery" | "best" => Ok(PolicyKind::NoRecovery),
            "cold_restart" | "worst" => Ok(PolicyKind::ColdRestart),
            "warm_standby" | "rnc" => Ok(PolicyKind::WarmStandby),
            _ => Err(ConfigError::UnknownPolicy(s.to_string())),
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PolicyKind::NoRecovery => write!(f, "no_recovery"),
            PolicyKind::ColdRestart => write!(f, "cold_restart"),
            PolicyKind::WarmStandby => write!(f, "warm_standby"),
        }
    }
}

/// Holds raw simulation config parsed from YAML file.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
struct RawSimulationConfig {
    pub policy: Option<String>,
    pub simulation_length: Option<f64>,
    pub vm_recovery_delay: Option<f64>,
    pub placements: Option<String>,
    pub host_trace: Option<String>,
    pub vm_trace: Option<String>,
    pub workload: Option<String>,
    pub trace_time_offset: Option<f64>,
    pub trace_compression: Option<f64>,
    pub filter_host_trace: Option<bool>,
    pub vm_mips: Option<f64>,
    pub vm_pes: Option<u32>,
    pub solver_poll_interval: Option<f64>,
    pub solver_threads: Option<usize>,
    pub backup_solver: Option<Vec<String>>,
    pub predictor: Option<RawPredictorConfig>,
    pub hosts: Option<Vec<HostConfig>>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
struct RawPredictorConfig {
    pub command: Vec<String>,
    pub batch_size: Option<usize>,
    pub prediction_interval: Option<f64>,
    pub batch_interval: Option<f64>,
}

/// Holds configuration of a single physical host or a set of identical hosts.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct HostConfig {
    /// Host name.
    /// Should be set if count = 1.
    pub name: Option<String>,
    /// Host name prefix.
    /// Full name is produced by appending host instance number to the prefix.
    /// Should be set if count > 1.
    pub name_prefix: Option<String>,
    /// Host CPU capacity.
    pub cpus: u32,
    /// Host memory capacity.
    pub memory: u64,
    /// Number of such hosts.
    pub count: Option<u32>,
}

impl HostConfig {
    /// Expands the entry into `(name, cpus, memory)` triples.
    pub fn expand(&self) -> Vec<(String, u32, u64)> {
        let count = self.count.unwrap_or(1);
        match (&self.name, &self.name_prefix) {
            (Some(name), _) if count == 1 => vec![(name.clone(), self.cpus, self.memory)],
            (_, Some(prefix)) => (0..count)
                .map(|i| (format!("{}{}", prefix, i), self.cpus, self.memory))
                .collect(),
            (Some(name), None) => (0..count)
                .map(|i| (format!("{}{}", name, i), self.cpus, self.memory))
                .collect(),
            (None, None) => Vec::new(),
        }
    }
}

/// Configuration of the external host failure predictor.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct PredictorConfig {
    /// Command line of the predictor, the feature file path is appended as the last argument.
    pub command: Vec<String>,
    /// Number of hosts predicted in one call.
    pub batch_size: usize,
    /// Period in seconds between full passes over all hosts.
    pub prediction_interval: f64,
    /// Delay in seconds between consecutive batches of one pass.
    pub batch_interval: f64,
}

/// Represents simulation configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct SimulationConfig {
    /// Recovery policy.
    pub policy: PolicyKind,
    /// Simulation horizon in seconds, used as the denominator of availability.
    pub simulation_length: f64,
    /// Settling delay in seconds before a recovered or promoted VM serves again.
    pub vm_recovery_delay: f64,
    /// Path to VM placements file.
    pub placements: Option<String>,
    /// Path to host failure/recovery trace.
    pub host_trace: Option<String>,
    /// Path to VM failure trace.
    pub vm_trace: Option<String>,
    /// Path to workload file.
    pub workload: Option<String>,
    /// Offset in seconds subtracted from raw trace timestamps.
    pub trace_time_offset: f64,
    /// Factor compressing the trace horizon into the simulation horizon.
    pub trace_compression: f64,
    /// Whether to drop host trace events for hosts without placed VMs.
    pub filter_host_trace: bool,
    /// Processing speed of each VM processing element in MI/s.
    pub vm_mips: f64,
    /// Number of processing elements per VM.
    pub vm_pes: u32,
    /// Period in seconds for polling replies of external processes.
    pub solver_poll_interval: f64,
    /// Number of worker threads running external processes.
    pub solver_threads: usize,
    /// Command line of the backup placement solver, the primary VM name is appended as the last argument.
    pub backup_solver: Option<Vec<String>>,
    /// Host failure predictor.
    pub predictor: Option<PredictorConfig>,
    /// Configurations of physical hosts.
    pub hosts: Vec<HostConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self::from_raw(RawSimulationConfig::default(), PolicyKind::WarmStandby)
    }
}

impl SimulationConfig {
    /// Creates simulation config by reading parameter values from YAML file
    /// (uses default values if some parameters are absent).
    pub fn from_file<P: AsRef<Path>>(file_name: P) -> Result<Self, ConfigError> {
        let path = file_name.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Creates simulation config from YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let raw: RawSimulationConfig = serde_yaml::from_str(content)?;
        let policy = match &raw.policy {
            Some(name) => name.parse()?,
            None => PolicyKind::WarmStandby,
        };
        Ok(Self::from_raw(raw, policy))
    }

    fn from_raw(raw: RawSimulationConfig, policy: PolicyKind) -> Self {
        Self {
            policy,
            simulation_length: raw.simulation_length.unwrap_or(100.),
            vm_recovery_delay: raw.vm_recovery_delay.unwrap_or(policy.default_recovery_delay()),
            placements: raw.placements,
            host_trace: raw.host_trace,
            vm_trace: raw.vm_trace,
            workload: raw.workload,
            trace_time_offset: raw.trace_time_offset.unwrap_or(600.),
            trace_compression: raw.trace_compression.unwrap_or(0.001),
            filter_host_trace: raw.filter_host_trace.unwrap_or(true),
            vm_mips: raw.vm_mips.unwrap_or(1000.),
            vm_pes: raw.vm_pes.unwrap_or(1),
            solver_poll_interval: raw.solver_poll_interval.unwrap_or(0.1),
            solver_threads: raw.solver_threads.unwrap_or(1).max(1),
            backup_solver: raw.backup_solver,
            predictor: raw.predictor.map(|p| PredictorConfig {
                command: p.command,
                batch_size: p.batch_size.unwrap_or(100).max(1),
                prediction_interval: p.prediction_interval.unwrap_or(10.),
                batch_interval: p.batch_interval.unwrap_or(0.5),
            }),
            hosts: raw.hosts.unwrap_or_default(),
        }
    }

    /// Returns config with another policy, resetting the recovery delay to the policy default.
    pub fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.policy = policy;
        self.vm_recovery_delay = policy.default_recovery_delay();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimulationConfig::from_yaml("policy: cold_restart").unwrap();
        assert_eq!(config.policy, PolicyKind::ColdRestart);
        assert_eq!(config.vm_recovery_delay, 0.2);
        assert_eq!(config.trace_time_offset, 600.);
        assert_eq!(config.trace_compression, 0.001);
        assert!(config.filter_host_trace);
        assert!(config.predictor.is_none());
        assert!(config.hosts.is_empty());
    }

    #[test]
    fn test_explicit_delay_overrides_policy_default() {
        let config = SimulationConfig::from_yaml("policy: warm-standby\nvm_recovery_delay: 3.5").unwrap();
        assert_eq!(config.policy, PolicyKind::WarmStandby);
        assert_eq!(config.vm_recovery_delay, 3.5);
    }

    #[test]
    fn test_unknown_policy() {
        let err = SimulationConfig::from_yaml("policy: pray").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPolicy(name) if name == "pray"));
    }

    #[test]
    fn test_predictor_defaults() {
        let config = SimulationConfig::from_yaml("predictor:\n  command: [python, predict.py]\n").unwrap();
        let predictor = config.predictor.unwrap();
        assert_eq!(predictor.command, vec!["python", "predict.py"]);
        assert_eq!(predictor.batch_size, 100);
        assert_eq!(predictor.prediction_interval, 10.);
        assert_eq!(predictor.batch_interval, 0.5);
    }

    #[test]
    fn test_host_expansion() {
        let single = HostConfig {
            name: Some("h".to_string()),
            name_prefix: None,
            cpus: 8,
            memory: 16,
            count: None,
        };
        assert_eq!(single.expand(), vec![("h".to_string(), 8, 16)]);

        let group = HostConfig {
            name: None,
            name_prefix: Some("rack-".to_string()),
            cpus: 4,
            memory: 8,
            count: Some(3),
        };
        let names: Vec<String> = group.expand().into_iter().map(|(n, _, _)| n).collect();
        assert_eq!(names, vec!["rack-0", "rack-1", "rack-2"]);
    }
}
