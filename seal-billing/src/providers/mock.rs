//! Deterministic fault injection shared by all mock provider backends.
//!
//! The mock state is a process-wide singleton configured at startup (and via
//! the GM test endpoints). Construction is gated on the deploy environment:
//! mock mode cannot exist in staging or prod.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use seal_common::env::DeployEnv;

/// Forced-failure flags and artificial latency for mock providers.
#[derive(Debug, Default)]
pub struct MockProviderState {
    /// Every charge hard-fails (card declined / chain abort).
    force_fail: AtomicBool,
    /// Every Stripe charge pauses on a 3DS interstitial.
    force_requires_action: AtomicBool,
    /// Escrow reports insufficient balance regardless of the mirror.
    force_insufficient: AtomicBool,
    /// Escrow reports the spending limit as exceeded.
    force_spending_limit: AtomicBool,
    /// Providers report no instrument on file.
    force_account_missing: AtomicBool,
    /// Artificial latency injected before every provider call.
    latency_ms: AtomicU64,
}

impl MockProviderState {
    /// Errors unless `env` permits mock mode (dev only).
    pub fn new(env: DeployEnv) -> anyhow::Result<Arc<Self>> {
        env.validate_mock_mode(true)?;
        Ok(Arc::new(Self::default()))
    }

    pub fn set_force_fail(&self, on: bool) {
        self.force_fail.store(on, Ordering::SeqCst);
    }

    pub fn set_force_requires_action(&self, on: bool) {
        self.force_requires_action.store(on, Ordering::SeqCst);
    }

    pub fn set_force_insufficient(&self, on: bool) {
        self.force_insufficient.store(on, Ordering::SeqCst);
    }

    pub fn set_force_spending_limit(&self, on: bool) {
        self.force_spending_limit.store(on, Ordering::SeqCst);
    }

    pub fn set_force_account_missing(&self, on: bool) {
        self.force_account_missing.store(on, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Clear every flag and the latency.
    pub fn reset(&self) {
        self.set_force_fail(false);
        self.set_force_requires_action(false);
        self.set_force_insufficient(false);
        self.set_force_spending_limit(false);
        self.set_force_account_missing(false);
        self.set_latency(Duration::ZERO);
    }

    pub fn force_fail(&self) -> bool {
        self.force_fail.load(Ordering::SeqCst)
    }

    pub fn force_requires_action(&self) -> bool {
        self.force_requires_action.load(Ordering::SeqCst)
    }

    pub fn force_insufficient(&self) -> bool {
        self.force_insufficient.load(Ordering::SeqCst)
    }

    pub fn force_spending_limit(&self) -> bool {
        self.force_spending_limit.load(Ordering::SeqCst)
    }

    pub fn force_account_missing(&self) -> bool {
        self.force_account_missing.load(Ordering::SeqCst)
    }

    /// Sleep for the configured artificial latency, if any.
    pub async fn simulate_latency(&self) {
        let millis = self.latency_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }
}
