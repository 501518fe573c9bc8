//! The uniform payment provider contract and its implementations.
//!
//! Each provider (escrow, Stripe, PayPal) exposes the same capability
//! surface; the billing engine dispatches a charge down the customer's
//! priority chain without knowing which backend settles it. Charge outcomes
//! are plain data, never `Err`: a decline is a result, not an exception.

use async_trait::async_trait;
use seal_common::{
    amount::UsdCents,
    ids::{CustomerId, InvoiceId, ProviderKind},
};
use serde::{Deserialize, Serialize};

pub mod escrow;
pub mod mock;
pub mod paypal;
pub mod stripe;

pub use escrow::EscrowProvider;
pub use mock::MockProviderState;
pub use paypal::PaypalProvider;
pub use stripe::{
    HttpStripeGateway, MockStripeGateway, StripeGateway, StripeProvider,
};

/// A charge dispatched to one provider.
#[derive(Clone, Debug)]
pub struct ChargeRequest {
    pub customer_id: CustomerId,
    pub amount: UsdCents,
    pub invoice_id: InvoiceId,
    pub description: String,
    /// Stable across retries of the same charge so providers can
    /// deduplicate. Derived from the invoice id and amount.
    pub idempotency_key: String,
}

impl ChargeRequest {
    pub fn new(
        customer_id: CustomerId,
        amount: UsdCents,
        invoice_id: InvoiceId,
        description: impl Into<String>,
    ) -> Self {
        Self {
            customer_id,
            amount,
            invoice_id,
            description: description.into(),
            idempotency_key: format!(
                "inv{}-{}",
                invoice_id.to_i64(),
                amount.cents()
            ),
        }
    }
}

/// Stable provider error codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeErrorCode {
    InsufficientEscrow,
    SpendingLimitExceeded,
    CardDeclined,
    RequiresAction,
    AccountNotConfigured,
    ProviderUnavailable,
}

impl ChargeErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientEscrow => "insufficient_escrow",
            Self::SpendingLimitExceeded => "spending_limit_exceeded",
            Self::CardDeclined => "card_declined",
            Self::RequiresAction => "requires_action",
            Self::AccountNotConfigured => "account_not_configured",
            Self::ProviderUnavailable => "provider_unavailable",
        }
    }
}

/// The outcome of a [`PaymentProvider::charge`] call.
#[derive(Clone, Debug)]
pub struct ChargeResult {
    pub success: bool,
    /// Provider-side reference for the payment attribution row.
    pub reference_id: Option<String>,
    /// On-chain digest (escrow only).
    pub tx_digest: Option<String>,
    pub error_code: Option<ChargeErrorCode>,
    /// Stripe 3DS handoff URL.
    pub hosted_invoice_url: Option<String>,
    /// Whether an identical retry may succeed without user intervention.
    pub retryable: bool,
}

impl ChargeResult {
    pub fn success(reference_id: impl Into<String>) -> Self {
        Self {
            success: true,
            reference_id: Some(reference_id.into()),
            tx_digest: None,
            error_code: None,
            hosted_invoice_url: None,
            retryable: false,
        }
    }

    pub fn success_onchain(
        reference_id: impl Into<String>,
        tx_digest: impl Into<String>,
    ) -> Self {
        Self {
            tx_digest: Some(tx_digest.into()),
            ..Self::success(reference_id)
        }
    }

    pub fn declined(code: ChargeErrorCode, retryable: bool) -> Self {
        Self {
            success: false,
            reference_id: None,
            tx_digest: None,
            error_code: Some(code),
            hosted_invoice_url: None,
            retryable,
        }
    }

    pub fn requires_action(hosted_invoice_url: impl Into<String>) -> Self {
        Self {
            success: false,
            reference_id: None,
            tx_digest: None,
            error_code: Some(ChargeErrorCode::RequiresAction),
            hosted_invoice_url: Some(hosted_invoice_url.into()),
            retryable: false,
        }
    }

    pub fn is_requires_action(&self) -> bool {
        matches!(self.error_code, Some(ChargeErrorCode::RequiresAction))
    }
}

/// The uniform capability interface over payment backends.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Payment instrument on file (card, linked account, escrow object).
    async fn is_configured(&self, customer_id: CustomerId) -> bool;

    /// Configured AND funded (escrow balance sufficient, etc.).
    async fn can_pay(&self, customer_id: CustomerId, amount: UsdCents)
        -> bool;

    async fn charge(&self, req: &ChargeRequest) -> ChargeResult;

    /// Display info for the UI; escrow must be computed live.
    async fn get_info(&self, customer_id: CustomerId) -> Option<String>;
}
