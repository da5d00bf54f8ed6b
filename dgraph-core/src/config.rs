//! Graph configuration.
//!
//! All fields have defaults, so a partial JSON document is a valid
//! configuration:
//!
//! ```rust
//! use dgraph_core::config::GraphConfig;
//!
//! let config = GraphConfig::from_json_str(r#"{ "num_threads": 2 }"#).unwrap();
//! assert_eq!(config.num_threads, 2);
//! assert!(config.transitive_reduction);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which flavor of the scene is evaluated.
///
/// Selects the base enable flags, modifier toggles and hide properties read
/// while building and evaluating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    #[default]
    Viewport,
    Render,
}

/// Extra logging switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugFlags {
    /// Log node and relation counts after each build.
    pub build: bool,
    /// Log every tag request.
    pub tag: bool,
    /// Log every evaluated operation.
    pub eval: bool,
    /// Log timings of build and evaluation passes.
    pub time: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Worker threads for the threaded stage. Zero uses the available
    /// parallelism.
    pub num_threads: usize,
    /// Remove redundant relations after building.
    pub transitive_reduction: bool,
    /// Remove no-ops nothing depends on after building.
    pub remove_unused_noops: bool,
    /// Time every evaluated operation.
    pub record_stats: bool,
    pub debug: DebugFlags,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            transitive_reduction: true,
            remove_unused_noops: true,
            record_stats: false,
            debug: DebugFlags::default(),
        }
    }
}

impl GraphConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Number of worker threads to spawn.
    pub fn worker_count(&self) -> usize {
        if self.num_threads > 0 {
            return self.num_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = GraphConfig::default();
        assert!(config.transitive_reduction);
        assert!(config.remove_unused_noops);
        assert!(!config.record_stats);
        assert!(config.worker_count() >= 1);
    }

    #[test]
    fn partial_json() {
        let config = GraphConfig::from_json_str(
            r#"{ "transitive_reduction": false, "debug": { "eval": true } }"#,
        )
        .unwrap();
        assert!(!config.transitive_reduction);
        assert!(config.debug.eval);
        assert!(!config.debug.build);
        assert_eq!(config.num_threads, 0);
    }

    #[test]
    fn invalid_json() {
        assert!(GraphConfig::from_json_str("{ \"num_threads\": -1 }").is_err());
    }

    #[test]
    fn mode_names() {
        let mode: EvaluationMode = serde_json::from_str("\"render\"").unwrap();
        assert_eq!(mode, EvaluationMode::Render);
    }
}
