//! Optimizer configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::util::{Error, Result};

/// Smallest and largest supported treelet sizes.
pub const TREELET_SIZE_RANGE: (usize, usize) = (3, 15);

/// Tunables for [`TreeletOptimizer`](crate::optimizer::TreeletOptimizer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    // Treelet selection
    pub treelet_size: usize,
    pub max_treelet_depth: usize,
    pub max_treelets: usize,

    // Acceptance
    pub min_improvement: f32,

    // Budgets
    pub time_budget_ms: u64,
    pub treelet_time_budget_ms: u64,

    // SAH constants
    pub traversal_cost: f32,
    pub intersection_cost: f32,

    // Progress callback period, in treelets
    pub progress_interval: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            treelet_size: 5,
            max_treelet_depth: 10,
            max_treelets: 50,
            min_improvement: 0.01,
            time_budget_ms: 30_000,
            treelet_time_budget_ms: 100,
            traversal_cost: 1.0,
            intersection_cost: 1.0,
            progress_interval: 50,
        }
    }
}

impl OptimizerConfig {
    /// Copy with the treelet size clamped and a non-zero progress interval.
    pub fn sanitized(&self) -> Self {
        let (lo, hi) = TREELET_SIZE_RANGE;
        Self {
            treelet_size: self.treelet_size.clamp(lo, hi),
            progress_interval: self.progress_interval.max(1),
            ..self.clone()
        }
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }

    pub fn treelet_time_budget(&self) -> Duration {
        Duration::from_millis(self.treelet_time_budget_ms)
    }

    /// Reject values no clamp can repair.
    pub fn validate(&self) -> Result<()> {
        if !self.min_improvement.is_finite() || self.min_improvement < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "min_improvement must be a non-negative number, got {}",
                self.min_improvement
            )));
        }
        for (name, v) in [
            ("traversal_cost", self.traversal_cost),
            ("intersection_cost", self.intersection_cost),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(Error::InvalidConfig(format!("{name} must be a non-negative number, got {v}")));
            }
        }
        Ok(())
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("treelet-bvh");
            p.push("config.json");
            p
        })
    }

    /// Load from a JSON file; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the per-user config file, falling back to defaults
    pub fn load_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("ignoring {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Save as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitized_clamps_treelet_size() {
        let cfg = OptimizerConfig {
            treelet_size: 40,
            progress_interval: 0,
            ..Default::default()
        };
        let s = cfg.sanitized();
        assert_eq!(s.treelet_size, 15);
        assert_eq!(s.progress_interval, 1);

        let cfg = OptimizerConfig {
            treelet_size: 1,
            ..Default::default()
        };
        assert_eq!(cfg.sanitized().treelet_size, 3);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: OptimizerConfig = serde_json::from_str(r#"{ "treelet_size": 7 }"#).unwrap();
        assert_eq!(cfg.treelet_size, 7);
        assert_eq!(cfg.max_treelets, 50);
        assert_eq!(cfg.time_budget(), Duration::from_secs(30));
    }

    #[test]
    fn test_negative_cost_rejected() {
        let cfg = OptimizerConfig {
            traversal_cost: -1.0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("nested").join("config.json");
        let cfg = OptimizerConfig {
            min_improvement: 0.5,
            treelet_time_budget_ms: 20,
            ..Default::default()
        };
        cfg.save(&path).unwrap();
        assert_eq!(OptimizerConfig::load(&path).unwrap(), cfg);
    }
}
