//! Parallel analysis dispatch.
//!
//! Fans the per-construct analysis out over a bounded pool of blocking
//! tasks. The contract:
//!
//! - at most `workers` analyses in flight at once
//! - a construct whose analysis exceeds the timeout yields an empty set
//! - a panicking task is isolated and reported as an empty set
//! - cancellation drops pending tasks, lets in-flight tasks finish, and
//!   returns partial results flagged as truncated

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use docuse_core::error::ErrorKind;
use docuse_core::types::{Construct, ReferenceSet};

/// Bounds for one dispatch run.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    /// Maximum concurrent analyses.
    pub workers: usize,
    /// Per-construct wall-clock budget.
    pub task_timeout: Duration,
}

/// The collected analysis results.
#[derive(Debug, Default)]
pub struct AnalysisOutcome {
    /// Per-construct reference sets. Insertion order is immaterial; stable
    /// ordering is applied downstream.
    pub usages: HashMap<Construct, ReferenceSet>,
    /// Whether cancellation dropped pending work.
    pub truncated: bool,
}

/// Analyze every construct with bounded concurrency.
///
/// `analyze` runs on blocking threads; it is expected to be the cached
/// hybrid analyzer, but anything construct-to-references shaped works.
pub async fn analyze_constructs<F>(
    constructs: Vec<Construct>,
    analyze: Arc<F>,
    cancel: CancellationToken,
    options: ExecutorOptions,
) -> AnalysisOutcome
where
    F: Fn(&Construct) -> ReferenceSet + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(options.workers.max(1)));
    let mut tasks = JoinSet::new();

    for construct in constructs {
        let semaphore = Arc::clone(&semaphore);
        let analyze = Arc::clone(&analyze);
        let cancel = cancel.clone();
        let timeout = options.task_timeout;

        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return None;
            };
            // Pending tasks are dropped on cancellation; in-flight blocking
            // work below is allowed to finish.
            if cancel.is_cancelled() {
                return None;
            }

            let fqn = construct.fully_qualified_name.clone();
            let blocking = {
                let construct = construct.clone();
                tokio::task::spawn_blocking(move || analyze(&construct))
            };
            match tokio::time::timeout(timeout, blocking).await {
                Ok(Ok(references)) => Some((construct, references)),
                Ok(Err(join_error)) => {
                    warn!(
                        kind = %ErrorKind::BackendFailure,
                        "analysis of {} failed: {}",
                        fqn,
                        join_error
                    );
                    Some((construct, ReferenceSet::new()))
                }
                Err(_) => {
                    warn!(
                        kind = %ErrorKind::AnalysisTimeout,
                        "analysis of {} exceeded {:?}; treating as empty",
                        fqn,
                        timeout
                    );
                    Some((construct, ReferenceSet::new()))
                }
            }
        });
    }

    let mut usages = HashMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some((construct, references))) => {
                usages.insert(construct, references);
            }
            Ok(None) => {}
            Err(join_error) => {
                warn!(
                    kind = %ErrorKind::BackendFailure,
                    "analysis task aborted: {}",
                    join_error
                );
            }
        }
    }

    AnalysisOutcome {
        usages,
        truncated: cancel.is_cancelled(),
    }
}

// ============================================================================
// Tests
// ============================================================================
