//! The PayPal payment provider.
//!
//! No production backend is wired up yet; the adapter exists so the
//! provider chain, priority ordering, and attribution rows are already
//! generic over it. Configured customers (a linked `paypal_email`) can be
//! charged in mock mode only.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use seal_common::{
    amount::UsdCents,
    ids::{CustomerId, ProviderKind},
};
use seal_store::Db;
use tracing::info;

use crate::providers::{
    ChargeErrorCode, ChargeRequest, ChargeResult, MockProviderState,
    PaymentProvider,
};

pub struct PaypalProvider {
    db: Db,
    /// Fault injection; present in dev. Without it the adapter reports
    /// unconfigured: there is no production PayPal backend yet.
    mock: Option<Arc<MockProviderState>>,
    next_reference: AtomicU64,
}

impl PaypalProvider {
    pub fn new(db: Db, mock: Option<Arc<MockProviderState>>) -> Self {
        Self {
            db,
            mock,
            next_reference: AtomicU64::new(0),
        }
    }

    fn forced(&self, f: impl Fn(&MockProviderState) -> bool) -> bool {
        self.mock.as_deref().map(f).unwrap_or(false)
    }

    async fn paypal_email(&self, customer_id: CustomerId) -> Option<String> {
        let tx = self.db.begin().await;
        tx.customer(customer_id)?.paypal_email.clone()
    }
}

#[async_trait]
impl PaymentProvider for PaypalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Paypal
    }

    async fn is_configured(&self, customer_id: CustomerId) -> bool {
        if self.mock.is_none() || self.forced(|m| m.force_account_missing()) {
            return false;
        }
        self.paypal_email(customer_id).await.is_some()
    }

    async fn can_pay(
        &self,
        customer_id: CustomerId,
        _amount: UsdCents,
    ) -> bool {
        self.is_configured(customer_id).await
    }

    async fn charge(&self, req: &ChargeRequest) -> ChargeResult {
        let Some(mock) = self.mock.clone() else {
            return ChargeResult::declined(
                ChargeErrorCode::AccountNotConfigured,
                false,
            );
        };
        mock.simulate_latency().await;

        if self.paypal_email(req.customer_id).await.is_none() {
            return ChargeResult::declined(
                ChargeErrorCode::AccountNotConfigured,
                false,
            );
        }
        if self.forced(|m| m.force_fail()) {
            return ChargeResult::declined(
                ChargeErrorCode::CardDeclined,
                false,
            );
        }

        let n = self.next_reference.fetch_add(1, Ordering::SeqCst);
        let reference = format!("paypal_mock_{n}");
        info!(
            customer_id = %req.customer_id,
            amount = %req.amount,
            %reference,
            "paypal charge ok (mock)"
        );
        ChargeResult::success(reference)
    }

    async fn get_info(&self, customer_id: CustomerId) -> Option<String> {
        let email = self.paypal_email(customer_id).await?;
        Some(format!("PayPal ({email})"))
    }
}
