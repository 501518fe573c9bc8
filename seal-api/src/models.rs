//! Wire models for the GM / LM internal HTTP surfaces and the customer ops
//! surface.
//!
//! Field names follow the wire contract (camelCase), so every struct here
//! carries a `rename_all` attribute. Keep these plain: no methods beyond
//! trivial constructors, no business logic.

use seal_common::{
    amount::UsdCents,
    ids::{CustomerId, LmId, Network, ServiceTier, ServiceType, TaskId},
    time::TimestampMs,
    vaults::{VaultSeq, VaultType},
};
use serde::{Deserialize, Serialize};

// --- Health --- //

/// `GET /api/health` on the GM.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmHealthResponse {
    pub service: String,
    pub timestamp: TimestampMs,
}

/// `GET /api/health` on an LM.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LmHealthResponse {
    pub service: String,
    pub timestamp: TimestampMs,
    pub vaults: Vec<LmVaultHealth>,
}

/// Per-vault-type state reported by an LM.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LmVaultHealth {
    #[serde(rename = "type")]
    pub vault_type: VaultType,
    pub entries: u64,
    pub applied: Option<LmAppliedInfo>,
    pub processing: Option<LmProcessingInfo>,
    /// Error from the most recent apply attempt, if it failed. A vault with
    /// a standing apply error does not count as live for the fleet-sync
    /// indicator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LmAppliedInfo {
    pub seq: VaultSeq,
    pub at: TimestampMs,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LmProcessingInfo {
    pub seq: VaultSeq,
    pub started_at: TimestampMs,
    pub error: Option<String>,
}

// --- GM task queue --- //

/// `POST /api/queue/sync-all[?async=true]` and friends.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueTaskResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    /// `"deduplicated"` indicates an identical task is already in flight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Copy, Clone, Debug, Default, Deserialize)]
pub struct QueueQuery {
    /// `?async=true` submits fire-and-forget.
    #[serde(rename = "async", default)]
    pub fire_and_forget: bool,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileQueueQuery {
    pub customer_id: CustomerId,
    #[serde(rename = "async", default)]
    pub fire_and_forget: bool,
}

// --- GM fleet status --- //

/// `GET /api/lm/status`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LmStatusResponse {
    pub managers: Vec<ManagerStatus>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStatus {
    pub id: LmId,
    pub name: String,
    pub host: String,
    pub reachable: bool,
    pub vaults: Vec<ManagerVaultStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerVaultStatus {
    #[serde(rename = "type")]
    pub vault_type: VaultType,
    pub applied_seq: Option<VaultSeq>,
    pub processing_seq: Option<VaultSeq>,
}

// --- Customer ops --- //

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCustomerRequest {
    pub wallet_address: String,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCustomerResponse {
    pub customer_id: CustomerId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub customer_id: CustomerId,
    pub service_type: ServiceType,
    pub tier: ServiceTier,
}

/// Enable / disable / schedule-cancel / undo-cancel target.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceActionRequest {
    pub customer_id: CustomerId,
    pub service_type: ServiceType,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeTierRequest {
    pub customer_id: CustomerId,
    pub service_type: ServiceType,
    pub new_tier: ServiceTier,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetIpAllowlistRequest {
    pub customer_id: CustomerId,
    pub service_type: ServiceType,
    pub network: Network,
    pub entries: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAmountRequest {
    pub customer_id: CustomerId,
    pub amount: UsdCents,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSpendingLimitRequest {
    pub customer_id: CustomerId,
    /// 0 = unlimited.
    pub limit: UsdCents,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerQuery {
    pub customer_id: CustomerId,
}

/// Generic acknowledgement for mutations with no other payload.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub success: bool,
}

impl Ack {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Outcome of a cancellation request.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationResponse {
    /// True when an unpaid service was deleted immediately.
    pub deleted: bool,
    /// When the scheduled transition takes effect, for paid services.
    pub effective_at: Option<TimestampMs>,
}

/// The recorded config-change seq for a gateway mutation.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigChangeResponse {
    #[serde(rename = "type")]
    pub vault_type: VaultType,
    pub seq: VaultSeq,
}

/// On-chain wallet mutation result.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletTxResponse {
    pub digest: String,
}

/// The outcome of a mutation that touched a service.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceView {
    pub customer_id: CustomerId,
    pub service_type: ServiceType,
    pub state: String,
    pub tier: ServiceTier,
    pub scheduled_tier: Option<ServiceTier>,
    pub is_user_enabled: bool,
    pub paid_once: bool,
    pub subscription_charge_pending: bool,
    pub cancellation_scheduled_for: Option<TimestampMs>,
    /// Payment action URL when a charge is awaiting a 3DS interstitial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_action_url: Option<String>,
}

/// `GET /api/billing` — draft invoice + balances + sync status.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingViewResponse {
    pub customer_id: CustomerId,
    pub escrow_balance: UsdCents,
    pub credit_balance: UsdCents,
    pub draft: Option<DraftInvoiceView>,
    pub providers: Vec<ProviderInfoView>,
    pub vault_sync: Vec<VaultSyncView>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftInvoiceView {
    pub billing_period_start: TimestampMs,
    pub due_date: TimestampMs,
    pub amount: UsdCents,
    pub line_items: Vec<LineItemView>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemView {
    pub item_type: String,
    pub quantity: u32,
    pub unit_price: UsdCents,
    /// Negative for the aggregated credit row, in cents.
    pub amount_cents: i64,
    pub service_type: Option<ServiceType>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfoView {
    pub provider: String,
    pub priority: u32,
    pub configured: bool,
    pub display: Option<String>,
}

/// Whether a service's last gateway-config mutation is live fleet-wide.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultSyncView {
    #[serde(rename = "type")]
    pub vault_type: VaultType,
    pub config_change_seq: Option<VaultSeq>,
    pub min_applied_seq: Option<VaultSeq>,
    pub synced: bool,
}

// --- Test endpoints (dev only) --- //

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockAdvanceRequest {
    pub millis: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurePaypalRequest {
    pub customer_id: CustomerId,
    pub email: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFaultsRequest {
    #[serde(default)]
    pub force_fail: bool,
    #[serde(default)]
    pub force_requires_action: bool,
    #[serde(default)]
    pub force_insufficient: bool,
    #[serde(default)]
    pub force_spending_limit: bool,
    #[serde(default)]
    pub latency_ms: u64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn queue_response_wire_shape() {
        let resp = QueueTaskResponse {
            success: true,
            queued: Some(true),
            completed: None,
            task_id: Some(TaskId(7)),
            reason: Some("deduplicated".to_owned()),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["taskId"], 7);
        assert_eq!(json["reason"], "deduplicated");
        assert!(json.get("completed").is_none());
    }

    #[test]
    fn lm_health_wire_shape() {
        let json = serde_json::json!({
            "service": "seal-lm",
            "timestamp": 1_700_000_000_000i64,
            "vaults": [{
                "type": "sma",
                "entries": 3,
                "applied": { "seq": 12, "at": 1_700_000_000_000i64 },
                "processing": null,
            }],
        });
        let resp: LmHealthResponse = serde_json::from_value(json).unwrap();
        assert_eq!(resp.vaults[0].vault_type, VaultType::Sma);
        assert_eq!(resp.vaults[0].applied.unwrap().seq, VaultSeq(12));
        assert!(resp.vaults[0].processing.is_none());
    }
}
