//! Run configuration.
//!
//! The embedding command owns argument parsing and configuration-file
//! loading; this type is the contract it hands to the pipeline.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// Analyzer Strategy
// ============================================================================

/// The concrete reference-finding backends available to the hybrid analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Low latency; covers most static imports and calls.
    FastSymbol,
    /// Accurate across dynamic patterns and inheritance; higher cost.
    DeepSemantic,
    /// Matches call/import syntactic shapes via patterns.
    StructuralPattern,
    /// Very fast first-pass filtering only; low recall.
    LintDriven,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            BackendKind::FastSymbol => "fast-symbol",
            BackendKind::DeepSemantic => "deep-semantic",
            BackendKind::StructuralPattern => "structural-pattern",
            BackendKind::LintDriven => "lint-driven",
        };
        write!(f, "{}", label)
    }
}

/// One tier of the tiered strategy: a backend plus its sufficient-result
/// threshold. A threshold of 0 means the tier never short-circuits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSpec {
    pub backend: BackendKind,
    #[serde(default)]
    pub sufficient: usize,
}

impl TierSpec {
    pub fn new(backend: BackendKind, sufficient: usize) -> Self {
        TierSpec { backend, sufficient }
    }
}

/// How the hybrid analyzer combines backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerStrategy {
    /// Invoke tiers in order; a tier returning at least its threshold wins.
    /// Otherwise the deduplicated union of all tiers is returned.
    Tiered(Vec<TierSpec>),
    /// Invoke two backends eagerly and merge by agreement.
    Consensus {
        first: BackendKind,
        second: BackendKind,
    },
}

impl Default for AnalyzerStrategy {
    fn default() -> Self {
        AnalyzerStrategy::Tiered(vec![
            TierSpec::new(BackendKind::FastSymbol, 8),
            TierSpec::new(BackendKind::StructuralPattern, 4),
            TierSpec::new(BackendKind::DeepSemantic, 0),
        ])
    }
}

// ============================================================================
// Config
// ============================================================================

/// Configuration for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Backend combination strategy.
    #[serde(default)]
    pub strategy: AnalyzerStrategy,

    /// Concurrent analysis tasks. 0 means hardware concurrency.
    #[serde(default)]
    pub worker_count: usize,

    /// Per-construct analysis timeout in seconds.
    #[serde(default = "default_task_timeout_secs")]
    pub per_task_timeout_secs: u64,

    /// Wall-clock budget for the whole run; exceeding it behaves like
    /// cancellation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_timeout_secs: Option<u64>,

    /// Analyze and report without writing any file.
    #[serde(default)]
    pub dry_run: bool,

    /// Write a `.bak` sibling before modifying a file.
    #[serde(default)]
    pub safe_mode: bool,

    /// Root directory for the on-disk caches. `None` disables caching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Render `(Line: N)` suffixes in usage bullets.
    #[serde(default)]
    pub include_line_numbers: bool,

    /// Whether module docstrings are updated at all.
    #[serde(default = "default_true")]
    pub update_module_docstrings: bool,
}

fn default_task_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Config {
            strategy: AnalyzerStrategy::default(),
            worker_count: 0,
            per_task_timeout_secs: default_task_timeout_secs(),
            pipeline_timeout_secs: None,
            dry_run: false,
            safe_mode: false,
            cache_dir: None,
            include_line_numbers: false,
            update_module_docstrings: true,
        }
    }
}

impl Config {
    /// Effective worker count: configured value or hardware concurrency.
    pub fn effective_workers(&self) -> usize {
        if self.worker_count > 0 {
            self.worker_count
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }

    /// Per-task timeout as a duration.
    pub fn per_task_timeout(&self) -> Duration {
        Duration::from_secs(self.per_task_timeout_secs)
    }

    /// Pipeline wall-clock timeout as a duration, if set.
    pub fn pipeline_timeout(&self) -> Option<Duration> {
        self.pipeline_timeout_secs.map(Duration::from_secs)
    }
}

// ============================================================================
// Tests
// ============================================================================
