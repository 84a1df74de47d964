use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CoreError, Result};

/// Rebalancing strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    LoadBalancing,
    ResourceOptimization,
    NodeMaintenance,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Strategy::LoadBalancing => "LoadBalancing",
            Strategy::ResourceOptimization => "ResourceOptimization",
            Strategy::NodeMaintenance => "NodeMaintenance",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Strategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LoadBalancing" => Ok(Strategy::LoadBalancing),
            "ResourceOptimization" => Ok(Strategy::ResourceOptimization),
            "NodeMaintenance" => Ok(Strategy::NodeMaintenance),
            other => Err(CoreError::invalid_config(
                "enabledStrategies",
                format!("unknown strategy {}", other),
                "Valid strategies: LoadBalancing, ResourceOptimization, NodeMaintenance",
            )),
        }
    }
}

/// Configuration for one plugin instance. Immutable after validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RebalancerConfig {
    /// CPU overload threshold in percent (0, 100]
    pub cpu_threshold: f64,
    /// Memory overload threshold in percent (0, 100]
    pub memory_threshold: f64,
    /// Spread between hottest and coldest node that triggers load balancing, in percent (0, 100]
    pub imbalance_threshold: f64,
    /// Seconds between rebalancer ticks, >= 1
    pub rebalancing_interval_seconds: u64,
    /// Upper bound on migration decisions per tick, > 0
    pub max_rebalance_pods: usize,
    /// Strategies evaluated each tick, in order
    pub enabled_strategies: Vec<Strategy>,
    /// Weight of free CPU in the composite node score, [0, 1]
    pub cpu_score_weight: f64,
    /// Weight of free memory in the composite node score, [0, 1]
    pub memory_score_weight: f64,
    /// Bonus added to the score of nodes below 30% usage in both dimensions, [0, 50]
    pub load_balance_bonus: f64,
    /// Namespaces whose pods are never rebalanced
    pub excluded_namespaces: BTreeSet<String>,
    /// Enable the Filter/Score placement hooks
    pub enable_placement_optimization: bool,
    /// Enable preventive rebalancing of nodes approaching the thresholds
    pub enable_preventive_rebalancing: bool,
    /// Enable the embedded rebalancer control loop
    pub enable_rebalancer_controller: bool,
}

impl Default for RebalancerConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: 80.0,
            memory_threshold: 80.0,
            imbalance_threshold: 20.0,
            rebalancing_interval_seconds: 30,
            max_rebalance_pods: 10,
            enabled_strategies: vec![
                Strategy::LoadBalancing,
                Strategy::ResourceOptimization,
                Strategy::NodeMaintenance,
            ],
            cpu_score_weight: 0.5,
            memory_score_weight: 0.5,
            load_balance_bonus: 10.0,
            excluded_namespaces: BTreeSet::from(["kube-system".to_string()]),
            enable_placement_optimization: true,
            enable_preventive_rebalancing: false,
            enable_rebalancer_controller: true,
        }
    }
}

impl RebalancerConfig {
    /// Parse a configuration blob. Tries JSON first, then YAML, then a
    /// YAML document converted through a JSON value. The result is
    /// validated before it is returned.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let config: Self = match serde_json::from_slice(data) {
            Ok(c) => c,
            Err(json_err) => match serde_yaml::from_slice(data) {
                Ok(c) => c,
                Err(yaml_err) => {
                    let value: serde_yaml::Value = serde_yaml::from_slice(data).map_err(|e| {
                        CoreError::serialization_error(
                            format!(
                                "Config is neither JSON ({}) nor YAML ({}): {}",
                                json_err, yaml_err, e
                            ),
                            Some(Box::new(e)),
                        )
                    })?;
                    let json = serde_json::to_value(value).map_err(|e| {
                        CoreError::serialization_error(
                            format!("Failed to convert YAML config to JSON: {}", e),
                            Some(Box::new(e)),
                        )
                    })?;
                    serde_json::from_value(json).map_err(|e| {
                        CoreError::serialization_error(
                            format!("Failed to deserialize config: {}", e),
                            Some(Box::new(e)),
                        )
                    })?
                }
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate every recognized option. Invalid values fail initialization.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("cpuThreshold", self.cpu_threshold),
            ("memoryThreshold", self.memory_threshold),
            ("imbalanceThreshold", self.imbalance_threshold),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(CoreError::invalid_config(
                    name,
                    format!("{} is outside (0, 100]", value),
                    "Thresholds are percentages; use a value like 80",
                ));
            }
        }

        if self.rebalancing_interval_seconds < 1 {
            return Err(CoreError::invalid_config(
                "rebalancingIntervalSeconds",
                "interval must be at least 1 second",
                "Use a value like 30",
            ));
        }

        if self.max_rebalance_pods == 0 {
            return Err(CoreError::invalid_config(
                "maxRebalancePods",
                "must be greater than zero",
                "Use a value like 10",
            ));
        }

        for (name, weight) in [
            ("cpuScoreWeight", self.cpu_score_weight),
            ("memoryScoreWeight", self.memory_score_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(CoreError::invalid_config(
                    name,
                    format!("{} is outside [0, 1]", weight),
                    "Score weights are fractions; use a value like 0.5",
                ));
            }
        }

        if self.cpu_score_weight + self.memory_score_weight > 1.0 {
            warn!(
                cpu_score_weight = self.cpu_score_weight,
                memory_score_weight = self.memory_score_weight,
                "Score weights sum to more than 1.0; scores may exceed 100 before clamping"
            );
        }

        if !(0.0..=50.0).contains(&self.load_balance_bonus) {
            return Err(CoreError::invalid_config(
                "loadBalanceBonus",
                format!("{} is outside [0, 50]", self.load_balance_bonus),
                "Use a bonus between 0 and 50 score points",
            ));
        }

        debug!(config = ?self, "Rebalancer configuration validated");
        Ok(())
    }

    pub fn rebalancing_interval(&self) -> Duration {
        Duration::from_secs(self.rebalancing_interval_seconds)
    }

    /// Reservations older than this are swept from the ledger.
    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.rebalancing_interval_seconds * 10)
    }

    pub fn strategy_enabled(&self, strategy: Strategy) -> bool {
        self.enabled_strategies.contains(&strategy)
    }
}
