//! Pipeline orchestration.
//!
//! Composes the source store, parse cache, hybrid analyzer, analysis cache,
//! executor, and rewriter into the end-to-end run: parse the edit files,
//! find references for every construct across the reference corpus, strip
//! self-references, and rewrite each edit file in a single pass.
//!
//! Partial failure is the normal mode: any step failing for a single
//! construct or file is recovered locally, and only rewrite rollbacks and
//! cancellation surface in the exit status.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use docuse_core::config::Config;
use docuse_core::error::ErrorKind;
use docuse_core::source::{self, ContentHash, Corpus};
use docuse_core::store::KvStore;
use docuse_core::types::{Construct, ConstructKind, ReferenceSet};

use crate::cache::{AnalysisCache, ParseCache, ParsedFile};
use crate::executor::{analyze_constructs, AnalysisOutcome, ExecutorOptions};
use crate::hybrid::HybridAnalyzer;
use crate::rewriter::{self, Rewrite, RewriteOptions};

// ============================================================================
// Summary Types
// ============================================================================

/// Per-file result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOutcome {
    /// New bytes were produced (and written unless dry-run).
    Modified,
    /// Output equalled input; nothing written.
    Unchanged,
    /// The rewrite failed the safety gate; the original bytes stand.
    RolledBack,
    /// The file could not be processed (IO, encoding, cancellation).
    Skipped,
}

impl std::fmt::Display for FileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FileOutcome::Modified => "modified",
            FileOutcome::Unchanged => "unchanged",
            FileOutcome::RolledBack => "rolled-back",
            FileOutcome::Skipped => "skipped",
        };
        write!(f, "{}", label)
    }
}

/// What a run did, per file and per construct.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Outcome per edit file, sorted by path for determinism.
    pub files: BTreeMap<PathBuf, FileOutcome>,
    /// The full construct-to-references mapping, self-references removed.
    pub usages: HashMap<Construct, ReferenceSet>,
    /// Whether cancellation (or the wall-clock budget) truncated the run.
    pub truncated: bool,
}

impl RunSummary {
    /// Count files with the given outcome.
    pub fn count(&self, outcome: FileOutcome) -> usize {
        self.files.values().filter(|o| **o == outcome).count()
    }

    /// Process exit code: zero iff every file is clean and the run was not
    /// cancelled.
    pub fn exit_code(&self) -> i32 {
        if self.truncated || self.count(FileOutcome::RolledBack) > 0 {
            1
        } else {
            0
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// The composed pipeline. Stateless across runs apart from the on-disk
/// caches; `run` is the re-analyze entry point.
pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config) -> Pipeline {
        Pipeline { config }
    }

    fn open_store(&self) -> Option<Arc<KvStore>> {
        let dir = self.config.cache_dir.as_ref()?;
        match KvStore::open(dir) {
            Ok(store) => Some(Arc::new(store)),
            Err(err) => {
                warn!("cache store unavailable, running uncached: {}", err);
                None
            }
        }
    }

    /// Unique edit files in path order, which makes every downstream step
    /// independent of input iteration order.
    fn normalized_files(paths: &[PathBuf]) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = paths.to_vec();
        files.sort();
        files.dedup();
        files
    }

    async fn parse_edit_files(
        &self,
        files: &[PathBuf],
        store: Option<Arc<KvStore>>,
        summary: &mut RunSummary,
    ) -> Vec<ParsedFile> {
        let cache = Arc::new(ParseCache::new(store));
        let semaphore = Arc::new(Semaphore::new(self.config.effective_workers()));
        let mut tasks = JoinSet::new();
        for path in files {
            let cache = Arc::clone(&cache);
            let semaphore = Arc::clone(&semaphore);
            let path = path.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (path.clone(), Err(None));
                };
                let result = tokio::task::spawn_blocking({
                    let path = path.clone();
                    move || cache.get_or_parse(&path)
                })
                .await;
                match result {
                    Ok(Ok(parsed)) => (path, Ok(parsed)),
                    Ok(Err(err)) => (path, Err(Some(err))),
                    Err(_) => (path, Err(None)),
                }
            });
        }

        let mut parsed_files = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok((path, result)) = joined else {
                continue;
            };
            match result {
                Ok(parsed) => parsed_files.push(parsed),
                Err(err) => {
                    if let Some(err) = err {
                        warn!(kind = %err.kind(), "skipping edit file: {}", err);
                    }
                    summary.files.insert(path, FileOutcome::Skipped);
                }
            }
        }
        // Deterministic downstream iteration.
        parsed_files.sort_by(|a, b| a.source.path.cmp(&b.source.path));
        parsed_files
    }

    /// Run the full pipeline over the given edit and reference files.
    pub async fn run(
        &self,
        edit_files: &[PathBuf],
        reference_files: &[PathBuf],
        project_root: &Path,
        cancel: CancellationToken,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        let cancel = cancel.child_token();
        if let Some(budget) = self.config.pipeline_timeout() {
            let watchdog = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(budget).await;
                watchdog.cancel();
            });
        }

        let store = self.open_store();
        let corpus = Arc::new(Corpus::load(reference_files));
        info!(
            "analyzing {} edit files against {} reference files",
            edit_files.len(),
            corpus.files().len()
        );

        let files = Self::normalized_files(edit_files);
        let parsed_files = self
            .parse_edit_files(&files, store.clone(), &mut summary)
            .await;

        let mut hashes: HashMap<PathBuf, ContentHash> = HashMap::new();
        let mut bytes: HashMap<PathBuf, Vec<u8>> = HashMap::new();
        let mut constructs: Vec<Construct> = Vec::new();
        for parsed in &parsed_files {
            hashes.insert(parsed.source.path.clone(), parsed.source.content_hash.clone());
            bytes.insert(parsed.source.path.clone(), parsed.source.bytes.clone());
            for construct in &parsed.constructs {
                if construct.kind == ConstructKind::Module && !self.config.update_module_docstrings
                {
                    continue;
                }
                constructs.push(construct.clone());
            }
        }
        debug!("{} constructs to analyze", constructs.len());

        let analysis = Arc::new(AnalysisCache::new(
            HybridAnalyzer::new(&self.config.strategy),
            store,
        ));
        let analyze = {
            let corpus = Arc::clone(&corpus);
            let hashes = hashes.clone();
            Arc::new(move |construct: &Construct| {
                let Some(hash) = hashes.get(&construct.file) else {
                    return ReferenceSet::new();
                };
                analysis.find_references(construct, hash, &corpus)
            })
        };

        let AnalysisOutcome { usages, truncated } = analyze_constructs(
            constructs,
            analyze,
            cancel.clone(),
            ExecutorOptions {
                workers: self.config.effective_workers(),
                task_timeout: self.config.per_task_timeout(),
            },
        )
        .await;
        summary.truncated = truncated;

        // Self-reference removal, then grouping by defining file.
        let mut grouped: BTreeMap<PathBuf, Vec<(Construct, ReferenceSet)>> = BTreeMap::new();
        for (construct, references) in usages {
            let references = references.without_file(&construct.file);
            grouped
                .entry(construct.file.clone())
                .or_default()
                .push((construct.clone(), references.clone()));
            summary.usages.insert(construct, references);
        }

        if summary.truncated {
            warn!(kind = %ErrorKind::Cancelled, "run cancelled; no files will be written");
            for parsed in &parsed_files {
                summary
                    .files
                    .insert(parsed.source.path.clone(), FileOutcome::Skipped);
            }
            return summary;
        }

        // Rewriting parallelizes at the file level only; each file's bytes
        // are exclusively owned by its task.
        let commit = CommitPolicy {
            dry_run: self.config.dry_run,
            safe_mode: self.config.safe_mode,
        };
        let semaphore = Arc::new(Semaphore::new(self.config.effective_workers()));
        let mut tasks = JoinSet::new();
        for parsed in parsed_files {
            let path = parsed.source.path.clone();
            let original = bytes.remove(&path).unwrap_or_default();
            let mut updates = grouped.remove(&path).unwrap_or_default();
            updates.sort_by_key(|(construct, _)| construct.line);

            let semaphore = Arc::clone(&semaphore);
            let root = project_root.to_path_buf();
            let include_line_numbers = self.config.include_line_numbers;
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (path, FileOutcome::Skipped);
                };
                tokio::task::spawn_blocking(move || {
                    let outcome =
                        rewrite_and_commit(&path, &original, &updates, &root, include_line_numbers, commit);
                    (path, outcome)
                })
                .await
                .unwrap_or_else(|join_error| {
                    warn!(kind = %ErrorKind::RewriteUnsafe, "rewrite task aborted: {}", join_error);
                    (PathBuf::new(), FileOutcome::Skipped)
                })
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Ok((path, outcome)) = joined {
                if path.as_os_str().is_empty() {
                    continue;
                }
                summary.files.insert(path, outcome);
            }
        }

        info!(
            "run complete: {} modified, {} unchanged, {} rolled back, {} skipped",
            summary.count(FileOutcome::Modified),
            summary.count(FileOutcome::Unchanged),
            summary.count(FileOutcome::RolledBack),
            summary.count(FileOutcome::Skipped),
        );
        summary
    }

    /// Remove `Used in:` blocks from the edit files.
    pub async fn clean(&self, edit_files: &[PathBuf], project_root: &Path) -> RunSummary {
        let mut summary = RunSummary::default();
        let opts = RewriteOptions {
            project_root,
            include_line_numbers: self.config.include_line_numbers,
        };
        let policy = CommitPolicy {
            dry_run: self.config.dry_run,
            safe_mode: self.config.safe_mode,
        };

        for path in Self::normalized_files(edit_files) {
            let original = match source::read(&path) {
                Ok(source) => source.bytes,
                Err(err) => {
                    warn!(kind = %err.kind(), "skipping edit file: {}", err);
                    summary.files.insert(path, FileOutcome::Skipped);
                    continue;
                }
            };
            let outcome = match rewriter::clean_file(&path, &original, &opts) {
                Ok(Rewrite::Unchanged) => FileOutcome::Unchanged,
                Ok(Rewrite::Modified(new_bytes)) => {
                    commit_bytes(&path, &original, &new_bytes, policy)
                }
                Err(err) => {
                    warn!(kind = %err.kind(), "{}", err);
                    match err.kind() {
                        ErrorKind::RewriteUnsafe => FileOutcome::RolledBack,
                        _ => FileOutcome::Skipped,
                    }
                }
            };
            summary.files.insert(path, outcome);
        }
        summary
    }

    /// Blocking wrapper around [`Pipeline::run`] for synchronous embedders.
    pub fn run_blocking(
        &self,
        edit_files: &[PathBuf],
        reference_files: &[PathBuf],
        project_root: &Path,
    ) -> RunSummary {
        runtime(self.config.effective_workers()).block_on(self.run(
            edit_files,
            reference_files,
            project_root,
            CancellationToken::new(),
        ))
    }

    /// Blocking wrapper around [`Pipeline::clean`].
    pub fn clean_blocking(&self, edit_files: &[PathBuf], project_root: &Path) -> RunSummary {
        runtime(self.config.effective_workers()).block_on(self.clean(edit_files, project_root))
    }
}

// ============================================================================
// Commit Helpers
// ============================================================================

/// How modified bytes reach disk.
#[derive(Debug, Clone, Copy)]
struct CommitPolicy {
    dry_run: bool,
    safe_mode: bool,
}

fn commit_bytes(path: &Path, original: &[u8], new_bytes: &[u8], policy: CommitPolicy) -> FileOutcome {
    if policy.dry_run {
        info!("dry run: would modify {}", path.display());
        return FileOutcome::Modified;
    }
    if policy.safe_mode {
        if let Err(err) = source::write_backup(path, original) {
            warn!(kind = %err.kind(), "backup failed, skipping {}: {}", path.display(), err);
            return FileOutcome::Skipped;
        }
    }
    match source::write_atomic(path, new_bytes) {
        Ok(()) => {
            info!("updated {}", path.display());
            FileOutcome::Modified
        }
        Err(err) => {
            warn!(kind = %err.kind(), "write failed, skipping {}: {}", path.display(), err);
            FileOutcome::Skipped
        }
    }
}

fn rewrite_and_commit(
    path: &Path,
    original: &[u8],
    updates: &[(Construct, ReferenceSet)],
    project_root: &Path,
    include_line_numbers: bool,
    policy: CommitPolicy,
) -> FileOutcome {
    let opts = RewriteOptions {
        project_root,
        include_line_numbers,
    };
    let update_refs: Vec<(&Construct, &ReferenceSet)> =
        updates.iter().map(|(construct, refs)| (construct, refs)).collect();
    match rewriter::rewrite_file(path, original, &update_refs, &opts) {
        Ok(Rewrite::Unchanged) => FileOutcome::Unchanged,
        Ok(Rewrite::Modified(new_bytes)) => commit_bytes(path, original, &new_bytes, policy),
        Err(err) => {
            warn!(kind = %err.kind(), "{}", err);
            match err.kind() {
                ErrorKind::RewriteUnsafe => FileOutcome::RolledBack,
                _ => FileOutcome::Skipped,
            }
        }
    }
}

fn runtime(workers: usize) -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers.clamp(1, 8))
        .enable_all()
        .build()
        .expect("tokio runtime")
}

// ============================================================================
// Tests
// ============================================================================
