//! The `SystemControl` singleton: global counters and per-vault maxima.
//!
//! Updates go through the small set of methods below, each of which is a
//! single read-modify-write over one counter. Ordering is provided by the
//! enclosing [`Tx`](crate::db::Tx), which serializes all transactions.

use seal_common::{
    sha256,
    vaults::{PerPg, PerVault, ProcessGroup, VaultSeq, VaultType},
};
use serde::{Deserialize, Serialize};

/// Per-vault-type sequence counters.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct VaultCounters {
    /// The seq the API should record for the next config mutation. At rest
    /// this is `vault_seq + 1`; while a generation is in flight it is
    /// `vault_seq + 2` so interleaved mutations record a seq distinct from
    /// the file being generated.
    pub next_vault_seq: VaultSeq,
    /// Global maximum over all services' pending change seqs. The O(1)
    /// pending check: changes are outstanding iff this exceeds `vault_seq`.
    pub max_config_change_seq: VaultSeq,
    /// Seq of the last vault file actually written.
    pub vault_seq: VaultSeq,
    pub vault_content_hash: Option<sha256::Hash>,
    pub vault_entries: u64,
}

/// The singleton control row (id = 1 in the original schema).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SystemControl {
    /// Next derivation index per process group; strictly monotonic.
    pub next_derivation_index: PerPg<u64>,
    pub vaults: PerVault<VaultCounters>,
}

impl Default for SystemControl {
    fn default() -> Self {
        let counters = VaultCounters {
            next_vault_seq: VaultSeq(1),
            max_config_change_seq: VaultSeq::ZERO,
            vault_seq: VaultSeq::ZERO,
            vault_content_hash: None,
            vault_entries: 0,
        };
        Self {
            next_derivation_index: PerPg::default(),
            vaults: PerVault {
                sma: counters.clone(),
                sta: counters,
            },
        }
    }
}

impl SystemControl {
    /// Atomically allocate the next derivation index for `pg`, returning the
    /// old value. Strictly monotonic; never recycled.
    pub fn alloc_derivation_index(&mut self, pg: ProcessGroup) -> u64 {
        let counter = self.next_derivation_index.get_mut(pg);
        let allocated = *counter;
        *counter += 1;
        allocated
    }

    /// Record that a gateway-config mutation is pending for `vault_type`.
    /// Returns the seq the caller should stamp onto the mutated service.
    pub fn mark_config_changed(&mut self, vault_type: VaultType) -> VaultSeq {
        let counters = self.vaults.get_mut(vault_type);
        let expected_seq = counters.next_vault_seq;
        counters.max_config_change_seq =
            counters.max_config_change_seq.max(expected_seq);
        expected_seq
    }

    /// Whether any recorded config change is not yet covered by a written
    /// vault. O(1).
    pub fn has_pending_changes(&self, vault_type: VaultType) -> bool {
        let counters = self.vaults.get(vault_type);
        counters.max_config_change_seq > counters.vault_seq
    }

    /// Begin generating a vault: advance `next_vault_seq` past the seq about
    /// to be written so interleaving mutations land on a later seq. Returns
    /// the seq to write the file at.
    pub fn begin_vault_generation(
        &mut self,
        vault_type: VaultType,
    ) -> VaultSeq {
        let counters = self.vaults.get_mut(vault_type);
        let write_seq = counters.vault_seq.plus(1);
        counters.next_vault_seq = counters.vault_seq.plus(2);
        write_seq
    }

    /// Record a successful vault write and reset `next_vault_seq` to the
    /// at-rest value.
    pub fn finish_vault_generation(
        &mut self,
        vault_type: VaultType,
        written_seq: VaultSeq,
        content_hash: sha256::Hash,
        entries: u64,
    ) {
        let counters = self.vaults.get_mut(vault_type);
        counters.vault_seq = written_seq;
        counters.next_vault_seq = written_seq.plus(1);
        counters.vault_content_hash = Some(content_hash);
        counters.vault_entries = entries;
    }

    /// Adopt an on-disk vault newer than our record (startup reconciliation
    /// after a database reset).
    pub fn adopt_disk_vault(
        &mut self,
        vault_type: VaultType,
        disk_seq: VaultSeq,
        content_hash: sha256::Hash,
        entries: u64,
    ) {
        let counters = self.vaults.get_mut(vault_type);
        counters.vault_seq = disk_seq;
        counters.next_vault_seq = disk_seq.plus(1);
        counters.vault_content_hash = Some(content_hash);
        counters.vault_entries = entries;
        counters.max_config_change_seq =
            counters.max_config_change_seq.max(disk_seq);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn derivation_indices_are_monotonic_and_pg_isolated() {
        let mut sc = SystemControl::default();
        assert_eq!(sc.alloc_derivation_index(ProcessGroup::Pg1), 0);
        assert_eq!(sc.alloc_derivation_index(ProcessGroup::Pg1), 1);
        assert_eq!(sc.alloc_derivation_index(ProcessGroup::Pg1), 2);

        // PG2 has its own counter; the same integer appears in both
        // namespaces.
        assert_eq!(sc.alloc_derivation_index(ProcessGroup::Pg2), 0);
        assert_eq!(sc.next_derivation_index.pg1, 3);
        assert_eq!(sc.next_derivation_index.pg2, 1);
    }

    #[test]
    fn seq_discipline_around_generation() {
        let mut sc = SystemControl::default();
        let vt = VaultType::Sma;

        // A mutation records seq 1 and flags pending work.
        assert_eq!(sc.mark_config_changed(vt), VaultSeq(1));
        assert!(sc.has_pending_changes(vt));

        // Generation writes at seq 1; interleaved mutations record seq 2.
        let write_seq = sc.begin_vault_generation(vt);
        assert_eq!(write_seq, VaultSeq(1));
        assert_eq!(sc.mark_config_changed(vt), VaultSeq(2));

        let hash = seal_common::sha256::digest(b"mapping");
        sc.finish_vault_generation(vt, write_seq, hash, 4);
        let counters = sc.vaults.get(vt);
        assert_eq!(counters.vault_seq, VaultSeq(1));
        assert_eq!(counters.next_vault_seq, VaultSeq(2));

        // The interleaved mutation is still pending.
        assert!(sc.has_pending_changes(vt));
    }

    #[test]
    fn adopt_disk_vault_never_regresses_pending_indicator() {
        let mut sc = SystemControl::default();
        let vt = VaultType::Sta;
        let hash = seal_common::sha256::digest(b"disk");

        sc.adopt_disk_vault(vt, VaultSeq(9), hash, 2);
        let counters = sc.vaults.get(vt);
        assert_eq!(counters.vault_seq, VaultSeq(9));
        assert_eq!(counters.next_vault_seq, VaultSeq(10));
        assert!(!sc.has_pending_changes(vt));
    }
}
