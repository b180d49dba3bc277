//! Hybrid analyzer: merge multiple backends into one `find_references`.
//!
//! Two strategies:
//!
//! - **Tiered**: invoke backends in configured order; the first tier that
//!   returns at least its sufficient-result threshold wins outright. When no
//!   tier short-circuits, the deduplicated union of all tiers is returned in
//!   first-appearance order.
//! - **Consensus**: two backends run eagerly. When they substantially agree
//!   (intersection covers at least 70% of the union by `(file, line)`), the
//!   intersection is returned for confidence; otherwise the union, for
//!   coverage.
//!
//! Backend failures are non-fatal by the backend contract (an erroring
//! backend yields an empty list), so the remaining tiers govern the result.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::debug;

use docuse_core::config::AnalyzerStrategy;
use docuse_core::source::Corpus;
use docuse_core::types::{Construct, ReferenceSet};

use crate::backends::Backend;

enum Strategy {
    Tiered(Vec<(Backend, usize)>),
    Consensus(Backend, Backend),
}

/// The configured combination of backends.
pub struct HybridAnalyzer {
    strategy: Strategy,
}

impl HybridAnalyzer {
    /// Build the backends named by the configuration.
    pub fn new(strategy: &AnalyzerStrategy) -> HybridAnalyzer {
        let strategy = match strategy {
            AnalyzerStrategy::Tiered(tiers) => Strategy::Tiered(
                tiers
                    .iter()
                    .map(|tier| (Backend::from_kind(tier.backend), tier.sufficient))
                    .collect(),
            ),
            AnalyzerStrategy::Consensus { first, second } => {
                Strategy::Consensus(Backend::from_kind(*first), Backend::from_kind(*second))
            }
        };
        HybridAnalyzer { strategy }
    }

    /// Find references for one construct. The result is duplicate-free, in
    /// order of first appearance across the merge.
    pub fn find_references(&self, construct: &Construct, corpus: &Corpus) -> ReferenceSet {
        match &self.strategy {
            Strategy::Tiered(tiers) => self.run_tiered(tiers, construct, corpus),
            Strategy::Consensus(first, second) => {
                self.run_consensus(first, second, construct, corpus)
            }
        }
    }

    fn run_tiered(
        &self,
        tiers: &[(Backend, usize)],
        construct: &Construct,
        corpus: &Corpus,
    ) -> ReferenceSet {
        let mut union = ReferenceSet::new();
        for (backend, sufficient) in tiers {
            let found: ReferenceSet = backend.find_references(construct, corpus).into_iter().collect();
            debug!(
                backend = %backend.kind(),
                "{} candidate references for {}",
                found.len(),
                construct.fully_qualified_name
            );
            if *sufficient > 0 && found.len() >= *sufficient {
                debug!(
                    backend = %backend.kind(),
                    "short-circuiting tiers for {}",
                    construct.fully_qualified_name
                );
                return found;
            }
            union.extend(found.iter().cloned());
        }
        union
    }

    fn run_consensus(
        &self,
        first: &Backend,
        second: &Backend,
        construct: &Construct,
        corpus: &Corpus,
    ) -> ReferenceSet {
        let a: ReferenceSet = first.find_references(construct, corpus).into_iter().collect();
        let b: ReferenceSet = second.find_references(construct, corpus).into_iter().collect();

        let b_keys: HashSet<(PathBuf, u32)> =
            b.iter().map(|r| (r.file.clone(), r.line)).collect();
        let intersection = a.iter().filter(|r| b_keys.contains(&(r.file.clone(), r.line))).count();
        let union = a.len() + b.len() - intersection;

        // |A ∩ B| >= 0.7 * |A ∪ B| without leaving integer arithmetic.
        if union > 0 && 10 * intersection >= 7 * union {
            debug!(
                "consensus intersection for {} ({} of {})",
                construct.fully_qualified_name, intersection, union
            );
            a.iter()
                .filter(|r| b_keys.contains(&(r.file.clone(), r.line)))
                .cloned()
                .collect()
        } else {
            debug!(
                "consensus union for {} ({} of {})",
                construct.fully_qualified_name, intersection, union
            );
            let mut merged = a;
            merged.extend(b.iter().cloned());
            merged
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::testutil::{construct, corpus};
    use docuse_core::config::{BackendKind, TierSpec};
    use docuse_core::types::ConstructKind;
    use std::path::Path;

    fn helper_construct(dir: &Path) -> Construct {
        construct(ConstructKind::Function, &dir.join("util.py"), "helper", 1)
    }

    mod tiered {
        use super::*;

        #[test]
        fn short_circuits_when_threshold_met() {
            let dir = tempfile::tempdir().unwrap();
            let corpus = corpus(
                dir.path(),
                &[("uses.py", "from util import helper\nhelper()\n")],
            );
            let analyzer = HybridAnalyzer::new(&AnalyzerStrategy::Tiered(vec![
                TierSpec::new(BackendKind::FastSymbol, 1),
                // A later lint tier would add a coarse line-1 duplicate; the
                // short circuit must keep it out.
                TierSpec::new(BackendKind::LintDriven, 0),
            ]));
            let refs = analyzer.find_references(&helper_construct(dir.path()), &corpus);
            assert_eq!(refs.len(), 2);
            assert!(refs.iter().all(|r| r.column.is_some()));
        }

        #[test]
        fn union_when_no_tier_is_sufficient() {
            let dir = tempfile::tempdir().unwrap();
            let corpus = corpus(
                dir.path(),
                &[("uses.py", "from util import helper\nhelper()\n")],
            );
            let analyzer = HybridAnalyzer::new(&AnalyzerStrategy::Tiered(vec![
                TierSpec::new(BackendKind::LintDriven, 0),
                TierSpec::new(BackendKind::FastSymbol, 0),
            ]));
            let refs = analyzer.find_references(&helper_construct(dir.path()), &corpus);
            // Lint's coarse line-1 entry arrives first; fast-symbol adds
            // line 2 and its line-1 duplicate is dropped.
            assert_eq!(refs.len(), 2);
            let first = refs.iter().next().unwrap();
            assert_eq!(first.line, 1);
            assert!(first.column.is_none());
        }

        #[test]
        fn zero_threshold_never_short_circuits() {
            let dir = tempfile::tempdir().unwrap();
            let corpus = corpus(dir.path(), &[("uses.py", "helper()\n")]);
            let analyzer = HybridAnalyzer::new(&AnalyzerStrategy::Tiered(vec![TierSpec::new(
                BackendKind::FastSymbol,
                0,
            )]));
            let refs = analyzer.find_references(&helper_construct(dir.path()), &corpus);
            assert_eq!(refs.len(), 1);
        }
    }

    mod consensus {
        use super::*;

        #[test]
        fn agreement_returns_intersection() {
            let dir = tempfile::tempdir().unwrap();
            let corpus = corpus(
                dir.path(),
                &[("uses.py", "from util import helper\nhelper()\n")],
            );
            let analyzer = HybridAnalyzer::new(&AnalyzerStrategy::Consensus {
                first: BackendKind::FastSymbol,
                second: BackendKind::DeepSemantic,
            });
            let refs = analyzer.find_references(&helper_construct(dir.path()), &corpus);
            assert_eq!(refs.len(), 2);
        }

        #[test]
        fn disagreement_returns_union() {
            let dir = tempfile::tempdir().unwrap();
            // No import link: deep-semantic finds nothing, fast-symbol finds
            // the call. Intersection is empty, so the union wins.
            let corpus = corpus(dir.path(), &[("uses.py", "helper()\n")]);
            let analyzer = HybridAnalyzer::new(&AnalyzerStrategy::Consensus {
                first: BackendKind::FastSymbol,
                second: BackendKind::DeepSemantic,
            });
            let refs = analyzer.find_references(&helper_construct(dir.path()), &corpus);
            assert_eq!(refs.len(), 1);
        }

        #[test]
        fn empty_results_stay_empty() {
            let dir = tempfile::tempdir().unwrap();
            let corpus = corpus(dir.path(), &[("uses.py", "nothing()\n")]);
            let analyzer = HybridAnalyzer::new(&AnalyzerStrategy::Consensus {
                first: BackendKind::FastSymbol,
                second: BackendKind::DeepSemantic,
            });
            let refs = analyzer.find_references(&helper_construct(dir.path()), &corpus);
            assert!(refs.is_empty());
        }
    }
}
