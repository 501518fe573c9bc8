//! Vault generation: turn pending config changes into a new vault version.
//!
//! The seq discipline (`next_vault_seq = vault_seq + 2` while a write is in
//! flight) guarantees that any API mutation interleaving with a generation
//! records a seq strictly greater than the file being written, so the O(1)
//! pending indicator never goes falsely quiet.

use seal_common::{
    rng::SysRng,
    vaults::{VaultSeq, VaultType},
};
use seal_store::{rows::ServiceState, Db, DbState};
use seal_vault::{Vault, VaultStore};
use std::collections::BTreeMap;
use strum::VariantArray as _;
use tracing::{debug, info, instrument};

pub struct VaultSyncer {
    db: Db,
    store: VaultStore,
}

impl VaultSyncer {
    pub fn new(db: Db, store: VaultStore) -> Self {
        Self { db, store }
    }

    pub fn store(&self) -> &VaultStore {
        &self.store
    }

    /// Generate a new vault version for every vault type with pending
    /// changes.
    #[instrument(skip(self), name = "(sync-all)")]
    pub async fn sync_all(&self) -> anyhow::Result<()> {
        for vault_type in VaultType::VARIANTS {
            self.sync_vault(*vault_type).await?;
        }
        Ok(())
    }

    async fn sync_vault(&self, vault_type: VaultType) -> anyhow::Result<()> {
        // O(1) pending check; allocate the write seq and advance
        // next_vault_seq past it in the same transaction.
        let write_seq = {
            let mut tx = self.db.begin().await;
            if !tx.system_control.has_pending_changes(vault_type) {
                debug!(%vault_type, "no pending changes");
                return Ok(());
            }
            let write_seq =
                tx.system_control.begin_vault_generation(vault_type);
            tx.commit();
            write_seq
        };

        // Assemble the mapping from per-tenant state.
        let entries = {
            let tx = self.db.begin().await;
            assemble_entries(&tx, vault_type)
        };

        let vault = Vault::new(vault_type, write_seq, "gm", entries);
        let content_hash = vault.content_hash();
        let entry_count = vault.entries.len() as u64;

        let mut rng = SysRng::new();
        let filename = self.store.write(&mut rng, &vault)?;

        // Only after a durable write does the db record the new version.
        let mut tx = self.db.begin().await;
        tx.system_control.finish_vault_generation(
            vault_type,
            write_seq,
            content_hash,
            entry_count,
        );
        tx.commit();

        info!(%vault_type, seq = %write_seq, %filename, entry_count, "vault written");
        Ok(())
    }

    /// The latest written seq per vault type, for status endpoints.
    pub async fn vault_seq(&self, vault_type: VaultType) -> VaultSeq {
        let tx = self.db.begin().await;
        tx.system_control.vaults.get(vault_type).vault_seq
    }
}

/// Build the `customer:<id>` -> payload mapping for one vault type.
///
/// Every provisioned service contributes an entry; the payload carries what
/// the gateway needs to serve (or reject) the tenant on this vault's
/// network.
fn assemble_entries(
    state: &DbState,
    vault_type: VaultType,
) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    for service in state.services.values() {
        if service.state == ServiceState::NotProvisioned {
            continue;
        }
        let keys: Vec<serde_json::Value> = state
            .seal_keys
            .values()
            .filter(|k| {
                k.service_id == service.id && k.deleted_at.is_none()
            })
            .map(|k| {
                serde_json::json!({
                    "publicKey": k.public_key,
                    "index": k.derivation_index,
                    "pg": k.process_group,
                    "enabled": k.is_user_enabled,
                })
            })
            .collect();

        let payload = serde_json::json!({
            "serviceType": service.service_type,
            "tier": service.tier,
            "enabled": service.state == ServiceState::Enabled,
            "ipAllowlist": service.ip_allowlist.get(vault_type),
            "keys": keys,
        });
        entries.insert(
            format!("customer:{}", service.customer_id),
            payload.to_string(),
        );
    }
    entries
}
