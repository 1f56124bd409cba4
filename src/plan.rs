//! Stage planning: decide which pipeline stages must run.
//!
//! The planner is a pure function from prior state, the freshly observed
//! commit hash, and the force flags to an explicit [`IndexPlan`]. It performs
//! no I/O, which keeps every branch unit-testable without collaborators; the
//! executor in [`crate::pipeline`] turns the plan into effects.

use crate::models::RepositoryState;

/// Caller-supplied overrides. `refresh` subsumes the other three.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForceFlags {
    pub refresh: bool,
    pub download: bool,
    pub chunk: bool,
    pub embed: bool,
}

impl ForceFlags {
    pub fn refresh() -> Self {
        Self {
            refresh: true,
            ..Self::default()
        }
    }

    fn expanded(self) -> Self {
        if self.refresh {
            Self {
                refresh: true,
                download: true,
                chunk: true,
                embed: true,
            }
        } else {
            self
        }
    }
}

/// Scope of a required chunk stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkScope {
    /// Stage does not run.
    Skip,
    /// Re-chunk the entire file set, ignoring any diff.
    Full,
    /// Chunk only files that differ from the persisted `file_hashes`,
    /// deleting chunks for files that disappeared. The actual diff is
    /// computed by the executor once the fresh download's hashes exist.
    Changed,
}

/// What the executor must do for one indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexPlan {
    pub download: bool,
    pub chunk: ChunkScope,
    pub embed: bool,
}

impl IndexPlan {
    fn full() -> Self {
        Self {
            download: true,
            chunk: ChunkScope::Full,
            embed: true,
        }
    }

    /// All three stages resolved to skipped: return prior state unchanged.
    pub fn is_noop(&self) -> bool {
        !self.download && self.chunk == ChunkScope::Skip && !self.embed
    }
}

/// Compute the plan for one run.
///
/// Evaluated top to bottom, first matching terminal case wins:
///
/// 1. No prior state, a different commit hash, or `force_refresh` — full
///    re-index: there is either no basis for comparison or the content
///    identity changed wholesale.
/// 2. Commit hash unchanged: download runs if forced or previously failed.
///    A rerun download always invalidates downstream stages, but chunking is
///    scoped to the content diff against the persisted hashes (recovering
///    from a partial failure) unless a full chunk was separately forced.
///    Chunk is considered only if download is skipped; embed only if chunk
///    is skipped.
/// 3. Everything skipped — no-op.
pub fn plan(
    prior: Option<&RepositoryState>,
    current_commit: &str,
    force: ForceFlags,
) -> IndexPlan {
    let force = force.expanded();

    let prior = match prior {
        Some(p) if !force.refresh && p.commit_hash.as_deref() == Some(current_commit) => p,
        _ => return IndexPlan::full(),
    };

    let download = force.download || !prior.download_ok;
    if download {
        let chunk = if force.chunk {
            ChunkScope::Full
        } else {
            ChunkScope::Changed
        };
        return IndexPlan {
            download: true,
            chunk,
            embed: true,
        };
    }

    // No diff basis survives a skipped download, so a required chunk stage is
    // always full here.
    let chunk = if force.chunk || !prior.chunk_ok {
        ChunkScope::Full
    } else {
        ChunkScope::Skip
    };
    if chunk != ChunkScope::Skip {
        return IndexPlan {
            download: false,
            chunk,
            embed: true,
        };
    }

    let embed = force.embed || !prior.embed_ok;
    IndexPlan {
        download: false,
        chunk: ChunkScope::Skip,
        embed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RepoId, RepositoryState};

    const COMMIT: &str = "c0ffee";

    fn state(download_ok: bool, chunk_ok: bool, embed_ok: bool) -> RepositoryState {
        let repo = RepoId::parse("a/b").unwrap();
        let mut s = RepositoryState::new(&repo, "https://github.com/a/b");
        s.commit_hash = Some(COMMIT.to_string());
        s.download_ok = download_ok;
        s.chunk_ok = chunk_ok;
        s.embed_ok = embed_ok;
        s
    }

    #[test]
    fn test_no_prior_state_plans_full() {
        let p = plan(None, COMMIT, ForceFlags::default());
        assert_eq!(p, IndexPlan::full());
    }

    #[test]
    fn test_commit_change_plans_full() {
        let prior = state(true, true, true);
        let p = plan(Some(&prior), "other-commit", ForceFlags::default());
        assert_eq!(p, IndexPlan::full());
    }

    #[test]
    fn test_force_refresh_plans_full() {
        let prior = state(true, true, true);
        let p = plan(Some(&prior), COMMIT, ForceFlags::refresh());
        assert_eq!(p, IndexPlan::full());
    }

    #[test]
    fn test_fully_indexed_unchanged_is_noop() {
        let prior = state(true, true, true);
        let p = plan(Some(&prior), COMMIT, ForceFlags::default());
        assert!(p.is_noop());
    }

    #[test]
    fn test_failed_download_retries_with_diff_scope() {
        let prior = state(false, false, false);
        let p = plan(Some(&prior), COMMIT, ForceFlags::default());
        assert!(p.download);
        assert_eq!(p.chunk, ChunkScope::Changed);
        assert!(p.embed);
    }

    #[test]
    fn test_forced_download_cascades() {
        let prior = state(true, true, true);
        let force = ForceFlags {
            download: true,
            ..ForceFlags::default()
        };
        let p = plan(Some(&prior), COMMIT, force);
        assert!(p.download);
        assert_eq!(p.chunk, ChunkScope::Changed);
        assert!(p.embed);
    }

    #[test]
    fn test_forced_download_with_forced_chunk_is_full() {
        let prior = state(true, true, true);
        let force = ForceFlags {
            download: true,
            chunk: true,
            ..ForceFlags::default()
        };
        let p = plan(Some(&prior), COMMIT, force);
        assert!(p.download);
        assert_eq!(p.chunk, ChunkScope::Full);
    }

    #[test]
    fn test_failed_chunk_retries_chunk_only() {
        // Download succeeded earlier, chunking did not: skip download, chunk
        // the full set (no diff basis), embed follows.
        let prior = state(true, false, false);
        let p = plan(Some(&prior), COMMIT, ForceFlags::default());
        assert!(!p.download);
        assert_eq!(p.chunk, ChunkScope::Full);
        assert!(p.embed);
    }

    #[test]
    fn test_forced_chunk_without_download() {
        let prior = state(true, true, true);
        let force = ForceFlags {
            chunk: true,
            ..ForceFlags::default()
        };
        let p = plan(Some(&prior), COMMIT, force);
        assert!(!p.download);
        assert_eq!(p.chunk, ChunkScope::Full);
        assert!(p.embed);
    }

    #[test]
    fn test_failed_embed_retries_embed_only() {
        let prior = state(true, true, false);
        let p = plan(Some(&prior), COMMIT, ForceFlags::default());
        assert!(!p.download);
        assert_eq!(p.chunk, ChunkScope::Skip);
        assert!(p.embed);
    }

    #[test]
    fn test_forced_embed_only() {
        let prior = state(true, true, true);
        let force = ForceFlags {
            embed: true,
            ..ForceFlags::default()
        };
        let p = plan(Some(&prior), COMMIT, force);
        assert!(!p.download);
        assert_eq!(p.chunk, ChunkScope::Skip);
        assert!(p.embed);
    }

    #[test]
    fn test_prior_without_commit_hash_plans_full() {
        let repo = RepoId::parse("a/b").unwrap();
        let prior = RepositoryState::new(&repo, "");
        let p = plan(Some(&prior), COMMIT, ForceFlags::default());
        assert_eq!(p, IndexPlan::full());
    }
}
