//! Retention policy: which generations survive a pruning pass.
//!
//! Selection is pure and works on ids alone; it relies on ids of one folder
//! sorting chronologically.

use crate::generation::naming::GenerationId;
use crate::generation::{Generation, GenerationForm};
use crate::utils::errors::{BackupError, Result};
use std::collections::BTreeMap;

/// Return the ids that fall outside a window of the `max_copies` newest.
///
/// Duplicates collapse to one id. The result is oldest first. A window of zero
/// is a configuration error rather than "delete everything".
pub fn select_for_deletion<S: AsRef<str>>(
    all_ids: &[S],
    max_copies: usize,
) -> Result<Vec<String>> {
    if max_copies == 0 {
        return Err(BackupError::Config(
            "max_copies must be at least 1".to_string(),
        ));
    }

    Ok(beyond_window(all_ids, max_copies))
}

fn beyond_window<S: AsRef<str>>(all_ids: &[S], max_copies: usize) -> Vec<String> {
    let mut ids: Vec<&str> = all_ids.iter().map(AsRef::as_ref).collect();
    ids.sort_unstable_by(|a, b| b.cmp(a));
    ids.dedup();

    if ids.len() <= max_copies {
        return Vec::new();
    }

    let mut stale: Vec<String> = ids[max_copies..].iter().map(|s| s.to_string()).collect();
    stale.reverse();
    stale
}

/// Retention window for one folder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    max_copies: usize,
}

/// Outcome of applying a policy to a generation listing
#[derive(Debug, Default)]
pub struct RetentionPlan {
    /// Surviving generations, oldest first
    pub keep: Vec<Generation>,
    /// Physical entries to remove, oldest first
    pub delete: Vec<Generation>,
}

impl RetentionPlan {
    /// Whether an archived generation is evicted while some newer survivor
    /// exists only as a raw directory.
    ///
    /// Raw survivors are usually failed transfers or archivals. When they fill
    /// the window, good archives are the ones that get evicted.
    pub fn evicts_archive_for_raw(&self) -> bool {
        let evicts_archive = self
            .delete
            .iter()
            .any(|g| g.form == GenerationForm::Archived);
        let archived = |id: &GenerationId| {
            self.keep
                .iter()
                .any(|g| &g.id == id && g.form == GenerationForm::Archived)
        };
        evicts_archive
            && self
                .keep
                .iter()
                .any(|g| g.form == GenerationForm::Raw && !archived(&g.id))
    }
}

impl RetentionPolicy {
    pub fn new(max_copies: usize) -> Result<Self> {
        if max_copies == 0 {
            return Err(BackupError::Config(
                "max_copies must be at least 1".to_string(),
            ));
        }
        Ok(Self { max_copies })
    }

    pub fn max_copies(&self) -> usize {
        self.max_copies
    }

    /// Split a folder's generations into survivors and entries to delete.
    ///
    /// A raw directory and an archive sharing an id count as one generation;
    /// when it is evicted both entries land in `delete`.
    pub fn plan(&self, generations: Vec<Generation>) -> RetentionPlan {
        let mut by_id: BTreeMap<GenerationId, Vec<Generation>> = BTreeMap::new();
        for generation in generations {
            by_id.entry(generation.id.clone()).or_default().push(generation);
        }

        let ids: Vec<String> = by_id.keys().map(ToString::to_string).collect();
        let stale = beyond_window(&ids, self.max_copies);

        let mut plan = RetentionPlan::default();
        for (id, entries) in by_id {
            if stale.binary_search(&id.to_string()).is_ok() {
                plan.delete.extend(entries);
            } else {
                plan.keep.extend(entries);
            }
        }
        plan
    }
}
