//! LM fleet polling.
//!
//! A periodic task polls every configured LM health endpoint in parallel
//! with a 5-second timeout and upserts one LMStatus row per (LM, vault
//! type). Freshness: a row is live if seen within 30 s with no error. The
//! fleet-wide minimum applied seq over live rows is what gates the "is this
//! change live" indicator.

use seal_api::{models::LmHealthResponse, rest::RestClient};
use seal_common::{
    constants::{LM_FRESHNESS_WINDOW, LM_POLL_TIMEOUT},
    ids::LmId,
    time::Clock,
    vaults::VaultType,
};
use seal_store::{rows::LmStatusRow, Db};
use strum::VariantArray as _;
use tracing::{debug, instrument, warn};

/// One configured LM endpoint.
#[derive(Clone, Debug)]
pub struct LmEndpoint {
    pub id: LmId,
    pub name: String,
    /// Base url, e.g. `http://lm-eu-1.internal:4071`.
    pub url: String,
}

pub struct LmPoller {
    db: Db,
    clock: Clock,
    rest: RestClient,
    endpoints: Vec<LmEndpoint>,
}

impl LmPoller {
    pub fn new(
        db: Db,
        clock: Clock,
        endpoints: Vec<LmEndpoint>,
    ) -> anyhow::Result<Self> {
        let rest = RestClient::new(LM_POLL_TIMEOUT)?;
        Ok(Self {
            db,
            clock,
            rest,
            endpoints,
        })
    }

    pub fn endpoints(&self) -> &[LmEndpoint] {
        &self.endpoints
    }

    /// Poll every LM in parallel and upsert the status rows.
    #[instrument(skip(self), name = "(poll-lms)")]
    pub async fn poll_once(&self) {
        let polls = self.endpoints.iter().map(|endpoint| async move {
            let url = format!("{}/api/health", endpoint.url);
            let result = self.rest.get::<LmHealthResponse>(&url).await;
            (endpoint, result)
        });
        let results = futures::future::join_all(polls).await;

        let now = self.clock.now();
        let mut tx = self.db.begin().await;
        for (endpoint, result) in results {
            match result {
                Ok(health) => {
                    debug!(lm = %endpoint.id, "lm healthy");
                    for vault in &health.vaults {
                        tx.upsert_lm_status(LmStatusRow {
                            lm_id: endpoint.id.clone(),
                            vault_type: vault.vault_type,
                            applied_seq: vault.applied.map(|a| a.seq),
                            processing_seq: vault
                                .processing
                                .as_ref()
                                .map(|p| p.seq),
                            entries: vault.entries,
                            last_seen_at: now,
                            last_error: vault.last_error.clone(),
                        });
                    }
                }
                Err(e) => {
                    warn!(lm = %endpoint.id, "lm poll failed: {e}");
                    // Mark every vault row errored; the previous applied
                    // seqs stay visible for operators but the rows no
                    // longer count as live.
                    for vault_type in VaultType::VARIANTS {
                        let key = (endpoint.id.clone(), *vault_type);
                        let previous = tx.lm_status.get(&key).cloned();
                        tx.upsert_lm_status(LmStatusRow {
                            lm_id: endpoint.id.clone(),
                            vault_type: *vault_type,
                            applied_seq: previous
                                .as_ref()
                                .and_then(|row| row.applied_seq),
                            processing_seq: None,
                            entries: previous
                                .as_ref()
                                .map(|row| row.entries)
                                .unwrap_or(0),
                            last_seen_at: now,
                            last_error: Some(format!("{e}")),
                        });
                    }
                }
            }
        }
        tx.commit();
    }

    /// The operator-facing fleet status.
    pub async fn status(&self) -> seal_api::models::LmStatusResponse {
        let now = self.clock.now();
        let tx = self.db.begin().await;

        let managers = self
            .endpoints
            .iter()
            .map(|endpoint| {
                let mut vaults = Vec::new();
                let mut error = None;
                let mut reachable = false;
                for vault_type in VaultType::VARIANTS {
                    let key = (endpoint.id.clone(), *vault_type);
                    if let Some(row) = tx.lm_status.get(&key) {
                        let fresh = now
                            .duration_since(row.last_seen_at)
                            .map(|age| age <= LM_FRESHNESS_WINDOW)
                            .unwrap_or(true);
                        if row.last_error.is_none() && fresh {
                            reachable = true;
                        }
                        error = error.or_else(|| row.last_error.clone());
                        vaults.push(seal_api::models::ManagerVaultStatus {
                            vault_type: *vault_type,
                            applied_seq: row.applied_seq,
                            processing_seq: row.processing_seq,
                        });
                    }
                }
                seal_api::models::ManagerStatus {
                    id: endpoint.id.clone(),
                    name: endpoint.name.clone(),
                    host: endpoint.url.clone(),
                    reachable,
                    vaults,
                    error,
                }
            })
            .collect();

        seal_api::models::LmStatusResponse { managers }
    }
}
