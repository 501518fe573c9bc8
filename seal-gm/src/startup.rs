//! Startup file-system reconciliation.
//!
//! The database may have been reset while vault files survived on disk (or
//! vice versa). Before serving, the GM compares the newest valid on-disk
//! header per vault type against the db record: a newer disk seq is
//! adopted; a newer db seq is only logged, never destructive.

use seal_store::Db;
use seal_vault::VaultStore;
use strum::VariantArray as _;
use tracing::{info, warn};

pub async fn reconcile_startup_state(
    db: &Db,
    store: &VaultStore,
) -> anyhow::Result<()> {
    for vault_type in seal_common::vaults::VaultType::VARIANTS {
        let vault_type = *vault_type;
        let header = match store.newest_header(vault_type) {
            Ok(header) => header,
            Err(e) => {
                warn!(%vault_type, "startup scan failed: {e}");
                continue;
            }
        };

        let mut tx = db.begin().await;
        let db_seq = tx.system_control.vaults.get(vault_type).vault_seq;

        match header {
            Some(header) if header.seq > db_seq => {
                info!(
                    %vault_type,
                    disk_seq = %header.seq,
                    %db_seq,
                    "adopting newer on-disk vault"
                );
                tx.system_control.adopt_disk_vault(
                    vault_type,
                    header.seq,
                    header.content_hash,
                    header.entry_count,
                );
                tx.commit();
            }
            Some(header) if header.seq < db_seq => {
                // Disk behind the db record: the transmit dir may have been
                // wiped. The next sync-all regenerates; nothing to destroy.
                warn!(
                    %vault_type,
                    disk_seq = %header.seq,
                    %db_seq,
                    "db is ahead of disk; leaving files untouched"
                );
            }
            Some(_) => {}
            None if db_seq.to_u64() > 0 => {
                warn!(%vault_type, %db_seq, "db records a vault but disk has none");
            }
            None => {}
        }
    }
    Ok(())
}
