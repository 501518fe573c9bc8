//! The billing engine and payment provider adapters.
//!
//! [`BillingEngine`] orchestrates the subscription state machine, invoice
//! lifecycle, credit application, proration, and reconciliation over the
//! store, dispatching charges through the [`PaymentProvider`] chain.
//! Mutations that affect the gateway record a config-change seq and poke
//! the Global Manager through a [`SyncTrigger`].
//!
//! [`PaymentProvider`]: crate::providers::PaymentProvider

use seal_common::ids::CustomerId;

pub mod catalog;
pub mod engine;
pub mod invoice;
pub mod ops;
pub mod periodic;
pub mod proration;
pub mod providers;
pub mod reconcile;

pub use engine::{
    BillingEngine, CancellationOutcome, SubscribeOutcome, TierChangeOutcome,
};
pub use invoice::SettleOutcome;
pub use reconcile::ReconcileReport;

/// Fire-and-forget pokes from the billing layer to the Global Manager.
///
/// Failures are non-fatal by design: a missed `sync_all` is picked up by the
/// periodic sync because the pending-change indicator
/// (`max_config_change_seq > vault_seq`) survives in the store.
pub trait SyncTrigger: Send + Sync {
    /// Ask the GM to regenerate vaults for any pending changes.
    fn sync_all(&self);

    /// Ask the GM to run a reconciliation pass for one customer.
    fn reconcile(&self, customer_id: CustomerId);
}

/// Trigger that drops every poke. For tests and tools that drive the engine
/// directly.
pub struct NoopSyncTrigger;

impl SyncTrigger for NoopSyncTrigger {
    fn sync_all(&self) {}
    fn reconcile(&self, _customer_id: CustomerId) {}
}
