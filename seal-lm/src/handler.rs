//! Per-vault-type apply state.
//!
//! One [`VaultAgent`] exists per vault type in the edge's install list. It
//! holds the current active vault in memory, polls the receive directory
//! for newer versions, and promotes them through an apply hook. A failed
//! apply retains the active version, clears the processing marker, and
//! records the error for the next health report.

use std::sync::Mutex;

use seal_api::models::{LmAppliedInfo, LmProcessingInfo, LmVaultHealth};
use seal_common::{
    time::{Clock, TimestampMs},
    vaults::{VaultSeq, VaultType},
};
use seal_vault::{compute_diff, Vault, VaultDiff, VaultStore};
use tracing::{info, instrument, warn};

/// Downstream apply hook (haproxy reload, key install, etc.). External to
/// this crate; the default accepts everything.
pub type ApplyHook = Box<dyn Fn(&Vault) -> anyhow::Result<()> + Send + Sync>;

struct AgentState {
    /// The currently applied vault, if any version has ever applied.
    active: Option<Vault>,
    /// The previously applied vault, kept for diff computation.
    previous: Option<Vault>,
    applied_at: Option<TimestampMs>,
    processing: Option<(VaultSeq, TimestampMs)>,
    last_error: Option<String>,
}

pub struct VaultAgent {
    vault_type: VaultType,
    store: VaultStore,
    clock: Clock,
    apply_hook: Option<ApplyHook>,
    state: Mutex<AgentState>,
}

impl VaultAgent {
    pub fn new(vault_type: VaultType, store: VaultStore, clock: Clock) -> Self {
        Self {
            vault_type,
            store,
            clock,
            apply_hook: None,
            state: Mutex::new(AgentState {
                active: None,
                previous: None,
                applied_at: None,
                processing: None,
                last_error: None,
            }),
        }
    }

    pub fn with_apply_hook(mut self, hook: ApplyHook) -> Self {
        self.apply_hook = Some(hook);
        self
    }

    pub fn vault_type(&self) -> VaultType {
        self.vault_type
    }

    /// Load the newest valid vault from the receive directory and apply it
    /// if it is newer than the active version. Returns the diff against the
    /// previously active vault when a promotion happened.
    #[instrument(skip(self), name = "(check-for-update)", fields(vault_type = %self.vault_type))]
    pub fn check_for_update(&self) -> Option<VaultDiff> {
        let latest = match self.store.load_latest_valid(self.vault_type) {
            Ok(Some(latest)) => latest,
            Ok(None) => return None,
            Err(e) => {
                warn!("receive directory scan failed: {e}");
                return None;
            }
        };

        let active_seq = {
            let state = self.state.lock().expect("agent state poisoned");
            state.active.as_ref().map(|v| v.seq)
        };
        // A reader encountering a file with seq <= active ignores it.
        if let Some(active_seq) = active_seq {
            if latest.seq <= active_seq {
                return None;
            }
        }

        let now = self.clock.now();
        {
            let mut state = self.state.lock().expect("agent state poisoned");
            state.processing = Some((latest.seq, now));
        }

        // Notify downstream apply hooks.
        let apply_result = match &self.apply_hook {
            Some(hook) => hook(&latest),
            None => Ok(()),
        };

        let mut state = self.state.lock().expect("agent state poisoned");
        match apply_result {
            Ok(()) => {
                let diff = state
                    .active
                    .as_ref()
                    .map(|active| compute_diff(active, &latest));
                info!(seq = %latest.seq, "vault applied");
                state.previous = state.active.take();
                state.active = Some(latest);
                state.applied_at = Some(now);
                state.processing = None;
                state.last_error = None;
                diff.or(Some(VaultDiff::default()))
            }
            Err(e) => {
                warn!(seq = %latest.seq, "vault apply failed: {e:#}");
                state.processing = None;
                state.last_error = Some(format!("{e:#}"));
                None
            }
        }
    }

    /// The diff between the active vault and its predecessor, if both
    /// exist.
    pub fn last_diff(&self) -> Option<VaultDiff> {
        let state = self.state.lock().expect("agent state poisoned");
        match (&state.previous, &state.active) {
            (Some(previous), Some(active)) =>
                Some(compute_diff(previous, active)),
            _ => None,
        }
    }

    /// The health snapshot the GM polls.
    pub fn health(&self) -> LmVaultHealth {
        let state = self.state.lock().expect("agent state poisoned");
        LmVaultHealth {
            vault_type: self.vault_type,
            entries: state
                .active
                .as_ref()
                .map(|v| v.entries.len() as u64)
                .unwrap_or(0),
            applied: state.active.as_ref().map(|v| LmAppliedInfo {
                seq: v.seq,
                at: state.applied_at.unwrap_or(TimestampMs::UNIX_EPOCH),
            }),
            processing: state.processing.map(|(seq, started_at)| {
                LmProcessingInfo {
                    seq,
                    started_at,
                    error: state.last_error.clone(),
                }
            }),
            last_error: state.last_error.clone(),
        }
    }

    /// The last apply error, if the most recent attempt failed.
    pub fn last_error(&self) -> Option<String> {
        let state = self.state.lock().expect("agent state poisoned");
        state.last_error.clone()
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use seal_common::{
        aes::{FieldCipher, KEY_LEN},
        rng::SmallRng,
        vaults::PerVault,
    };

    use super::*;

    fn test_store(dir: &std::path::Path) -> VaultStore {
        VaultStore::new(
            dir,
            PerVault {
                sma: FieldCipher::new(&[0x21; KEY_LEN]).unwrap(),
                sta: FieldCipher::new(&[0x22; KEY_LEN]).unwrap(),
            },
        )
    }

    fn vault(seq: u64, value: &str) -> Vault {
        let mut entries = BTreeMap::new();
        entries.insert("customer:1".to_owned(), value.to_owned());
        Vault::new(VaultType::Sma, VaultSeq(seq), "gm", entries)
    }

    #[test]
    fn applies_newer_versions_and_ignores_older() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let mut rng = SmallRng::from_u64(1);
        let (clock, _mock) =
            Clock::mock_at(TimestampMs::from_i64(1_700_000_000_000).unwrap());

        let agent =
            VaultAgent::new(VaultType::Sma, store.clone(), clock);

        // Nothing to apply yet.
        assert!(agent.check_for_update().is_none());
        assert!(agent.health().applied.is_none());

        store.write(&mut rng, &vault(3, "v3")).unwrap();
        let diff = agent.check_for_update().unwrap();
        assert!(!diff.has_changes()); // first apply has no predecessor

        let health = agent.health();
        assert_eq!(health.applied.unwrap().seq, VaultSeq(3));
        assert_eq!(health.entries, 1);
        assert!(health.processing.is_none());

        // An older file appearing later is ignored.
        store.write(&mut rng, &vault(2, "v2")).unwrap();
        assert!(agent.check_for_update().is_none());
        assert_eq!(agent.health().applied.unwrap().seq, VaultSeq(3));

        // A newer file promotes, and the previous vault backs the diff.
        store.write(&mut rng, &vault(4, "v4")).unwrap();
        let diff = agent.check_for_update().unwrap();
        assert_eq!(diff.modified, vec!["customer:1"]);
        assert_eq!(agent.last_diff().unwrap().to_seq, VaultSeq(4));
    }

    #[test]
    fn failed_apply_retains_active_and_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let mut rng = SmallRng::from_u64(2);
        let (clock, _mock) =
            Clock::mock_at(TimestampMs::from_i64(1_700_000_000_000).unwrap());

        let fail = Arc::new(AtomicBool::new(false));
        let hook_fail = fail.clone();
        let agent = VaultAgent::new(VaultType::Sma, store.clone(), clock)
            .with_apply_hook(Box::new(move |_| {
                if hook_fail.load(Ordering::SeqCst) {
                    anyhow::bail!("downstream reload failed")
                }
                Ok(())
            }));

        store.write(&mut rng, &vault(1, "v1")).unwrap();
        assert!(agent.check_for_update().is_some());

        // The next version fails to apply: active stays at 1, the error is
        // recorded, processing is cleared.
        fail.store(true, Ordering::SeqCst);
        store.write(&mut rng, &vault(2, "v2")).unwrap();
        assert!(agent.check_for_update().is_none());

        let health = agent.health();
        assert_eq!(health.applied.unwrap().seq, VaultSeq(1));
        assert!(health.processing.is_none());
        assert!(agent.last_error().unwrap().contains("reload failed"));

        // Once the hook recovers, the same version applies.
        fail.store(false, Ordering::SeqCst);
        assert!(agent.check_for_update().is_some());
        assert_eq!(agent.health().applied.unwrap().seq, VaultSeq(2));
        assert!(agent.last_error().is_none());
    }
}
