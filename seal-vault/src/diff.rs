//! Structural diff between two vault versions.

use seal_common::vaults::VaultSeq;

use crate::codec::Vault;

/// Set-based diff over mapping keys plus value-change detection.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VaultDiff {
    pub from_seq: VaultSeq,
    pub to_seq: VaultSeq,
    /// Keys present in `to` but not `from`.
    pub added: Vec<String>,
    /// Keys present in `from` but not `to`.
    pub removed: Vec<String>,
    /// Keys present in both with differing values.
    pub modified: Vec<String>,
}

impl VaultDiff {
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty()
            || !self.removed.is_empty()
            || !self.modified.is_empty()
    }
}

/// Compute the diff from `from` to `to`. Output key lists are sorted.
pub fn compute_diff(from: &Vault, to: &Vault) -> VaultDiff {
    let mut diff = VaultDiff {
        from_seq: from.seq,
        to_seq: to.seq,
        ..VaultDiff::default()
    };

    for (key, to_value) in &to.entries {
        match from.entries.get(key) {
            None => diff.added.push(key.clone()),
            Some(from_value) if from_value != to_value =>
                diff.modified.push(key.clone()),
            Some(_) => {}
        }
    }
    for key in from.entries.keys() {
        if !to.entries.contains_key(key) {
            diff.removed.push(key.clone());
        }
    }

    // BTreeMap iteration is already sorted; keep the invariant explicit.
    debug_assert!(diff.added.is_sorted());
    debug_assert!(diff.removed.is_sorted());
    debug_assert!(diff.modified.is_sorted());

    diff
}
