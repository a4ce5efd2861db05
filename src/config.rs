//! Runtime configuration for communication.
//!
//! Defaults describe a single node with message aggregation enabled. The
//! environment variables `DISTMAT_PPN` (processes per node) and
//! `DISTMAT_TAP_AGGREGATE` (`1`/`0`, `true`/`false`) override them.

use serde::{Deserialize, Serialize};

use crate::error::{DistMatError, Result};

pub const PPN_ENV: &str = "DISTMAT_PPN";
pub const AGGREGATE_ENV: &str = "DISTMAT_TAP_AGGREGATE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommConfig {
    /// Consecutive ranks per physical node. `None` puts every rank on one node.
    pub procs_per_node: Option<usize>,
    /// Whether topology-aware communication aggregates inter-node messages
    /// through one partner per node pair, or sends them directly.
    pub aggregate: bool,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            procs_per_node: None,
            aggregate: true,
        }
    }
}

impl CommConfig {
    pub fn with_procs_per_node(mut self, ppn: usize) -> Self {
        self.procs_per_node = Some(ppn);
        self
    }

    pub fn with_aggregate(mut self, aggregate: bool) -> Self {
        self.aggregate = aggregate;
        self
    }

    /// Defaults overridden by whatever the environment sets.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup(PPN_ENV) {
            let ppn: usize = raw
                .trim()
                .parse()
                .map_err(|_| DistMatError::Config(format!("{PPN_ENV}={raw:?} is not a count")))?;
            config.procs_per_node = Some(ppn);
        }
        if let Some(raw) = lookup(AGGREGATE_ENV) {
            config.aggregate = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(DistMatError::Config(format!(
                        "{AGGREGATE_ENV}={raw:?} is not a boolean"
                    )))
                }
            };
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.procs_per_node == Some(0) {
            return Err(DistMatError::Config("procs_per_node must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = CommConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CommConfig::default());
        assert!(config.aggregate);
    }

    #[test]
    fn environment_overrides() {
        let config = CommConfig::from_lookup(lookup(&[(PPN_ENV, "4"), (AGGREGATE_ENV, "off")])).unwrap();
        assert_eq!(config.procs_per_node, Some(4));
        assert!(!config.aggregate);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(CommConfig::from_lookup(lookup(&[(PPN_ENV, "four")])).is_err());
        assert!(CommConfig::from_lookup(lookup(&[(PPN_ENV, "0")])).is_err());
        assert!(CommConfig::from_lookup(lookup(&[(AGGREGATE_ENV, "maybe")])).is_err());
    }
}
