//! The Stripe payment provider.
//!
//! A charge is four staged Stripe API calls (create invoice, create item,
//! finalize, pay), each with an idempotency key derived from
//! `(idempotency_key, stage)`. A retry with the same key therefore replays
//! into Stripe's idempotency cache and never double-charges.
//!
//! The provider talks to a [`StripeGateway`]: [`HttpStripeGateway`] for the
//! sandbox / live API, [`MockStripeGateway`] for dev and tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use seal_common::{
    amount::UsdCents,
    constants::{STRIPE_SANDBOX_KEY_PREFIX, STRIPE_TIMEOUT},
    ids::{CustomerId, ProviderKind},
};
use seal_store::Db;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::providers::{
    ChargeErrorCode, ChargeRequest, ChargeResult, MockProviderState,
    PaymentProvider,
};

#[derive(Clone, Debug, Error)]
pub enum StripeError {
    #[error("card declined")]
    CardDeclined,
    #[error("no payment method on file")]
    NoPaymentMethod,
    #[error("transient stripe error: {0}")]
    Transient(String),
}

/// Outcome of the final `pay` stage.
#[derive(Clone, Debug)]
pub enum StripePayOutcome {
    Paid,
    /// 3DS interstitial; the charge is paused until the user visits the URL.
    RequiresAction { hosted_invoice_url: String },
}

/// The four staged Stripe calls behind one logical charge.
#[async_trait]
pub trait StripeGateway: Send + Sync {
    /// Create a draft Stripe invoice; returns the Stripe invoice id.
    async fn create_invoice(
        &self,
        stripe_customer_id: &str,
        idempotency_key: &str,
    ) -> Result<String, StripeError>;

    async fn create_item(
        &self,
        stripe_invoice_id: &str,
        amount: UsdCents,
        description: &str,
        idempotency_key: &str,
    ) -> Result<(), StripeError>;

    async fn finalize(
        &self,
        stripe_invoice_id: &str,
        idempotency_key: &str,
    ) -> Result<(), StripeError>;

    async fn pay(
        &self,
        stripe_invoice_id: &str,
        idempotency_key: &str,
    ) -> Result<StripePayOutcome, StripeError>;
}

pub struct StripeProvider {
    db: Db,
    gateway: Arc<dyn StripeGateway>,
}

impl StripeProvider {
    pub fn new(db: Db, gateway: Arc<dyn StripeGateway>) -> Self {
        Self { db, gateway }
    }

    async fn stripe_customer_id(
        &self,
        customer_id: CustomerId,
    ) -> Option<String> {
        let tx = self.db.begin().await;
        tx.customer(customer_id)?.stripe_customer_id.clone()
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    async fn is_configured(&self, customer_id: CustomerId) -> bool {
        self.stripe_customer_id(customer_id).await.is_some()
    }

    async fn can_pay(
        &self,
        customer_id: CustomerId,
        _amount: UsdCents,
    ) -> bool {
        // Card validity is only known at charge time.
        self.is_configured(customer_id).await
    }

    async fn charge(&self, req: &ChargeRequest) -> ChargeResult {
        let Some(stripe_customer) =
            self.stripe_customer_id(req.customer_id).await
        else {
            return ChargeResult::declined(
                ChargeErrorCode::AccountNotConfigured,
                false,
            );
        };

        let key = &req.idempotency_key;
        let staged = async {
            let stripe_invoice_id = self
                .gateway
                .create_invoice(&stripe_customer, &format!("{key}:invoice"))
                .await?;
            self.gateway
                .create_item(
                    &stripe_invoice_id,
                    req.amount,
                    &req.description,
                    &format!("{key}:item"),
                )
                .await?;
            self.gateway
                .finalize(&stripe_invoice_id, &format!("{key}:finalize"))
                .await?;
            let outcome = self
                .gateway
                .pay(&stripe_invoice_id, &format!("{key}:pay"))
                .await?;
            Ok::<_, StripeError>((stripe_invoice_id, outcome))
        };

        match staged.await {
            Ok((stripe_invoice_id, StripePayOutcome::Paid)) => {
                info!(
                    customer_id = %req.customer_id,
                    amount = %req.amount,
                    %stripe_invoice_id,
                    "stripe charge ok"
                );
                ChargeResult::success(stripe_invoice_id)
            }
            Ok((_, StripePayOutcome::RequiresAction { hosted_invoice_url })) => {
                info!(
                    customer_id = %req.customer_id,
                    "stripe charge requires action"
                );
                ChargeResult::requires_action(hosted_invoice_url)
            }
            Err(StripeError::CardDeclined) =>
                ChargeResult::declined(ChargeErrorCode::CardDeclined, false),
            Err(StripeError::NoPaymentMethod) => ChargeResult::declined(
                ChargeErrorCode::AccountNotConfigured,
                false,
            ),
            Err(StripeError::Transient(msg)) => {
                warn!(customer_id = %req.customer_id, "stripe transient: {msg}");
                ChargeResult::declined(
                    ChargeErrorCode::ProviderUnavailable,
                    true,
                )
            }
        }
    }

    async fn get_info(&self, customer_id: CustomerId) -> Option<String> {
        let stripe_customer = self.stripe_customer_id(customer_id).await?;
        Some(format!("Card on file ({stripe_customer})"))
    }
}

// --- HTTP gateway (sandbox / live) --- //

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

#[derive(Debug, Deserialize)]
struct StripeInvoiceObject {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    hosted_invoice_url: Option<String>,
}

/// Talks to the real Stripe REST API. Keys with the `sk_test_` prefix run
/// against the sandbox.
pub struct HttpStripeGateway {
    client: reqwest::Client,
    secret_key: String,
}

impl HttpStripeGateway {
    pub fn new(secret_key: impl Into<String>) -> anyhow::Result<Self> {
        let secret_key = secret_key.into();
        anyhow::ensure!(
            secret_key.starts_with("sk_"),
            "Stripe secret key must start with 'sk_'"
        );
        let client = reqwest::Client::builder()
            .timeout(STRIPE_TIMEOUT)
            .build()?;
        Ok(Self { client, secret_key })
    }

    pub fn is_sandbox(&self) -> bool {
        self.secret_key.starts_with(STRIPE_SANDBOX_KEY_PREFIX)
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, String)],
        idempotency_key: &str,
    ) -> Result<StripeInvoiceObject, StripeError> {
        let url = format!("{STRIPE_API_BASE}{path}");
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.secret_key, None::<&str>)
            .header("Idempotency-Key", idempotency_key)
            .form(form)
            .send()
            .await
            .map_err(|e| StripeError::Transient(format!("{e:#}")))?;

        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(StripeError::Transient(format!("HTTP {status}")));
        }
        if status.as_u16() == 402 {
            return Err(StripeError::CardDeclined);
        }
        if !status.is_success() {
            return Err(StripeError::Transient(format!("HTTP {status}")));
        }
        resp.json::<StripeInvoiceObject>()
            .await
            .map_err(|e| StripeError::Transient(format!("{e:#}")))
    }
}

#[async_trait]
impl StripeGateway for HttpStripeGateway {
    async fn create_invoice(
        &self,
        stripe_customer_id: &str,
        idempotency_key: &str,
    ) -> Result<String, StripeError> {
        let obj = self
            .post_form(
                "/invoices",
                &[
                    ("customer", stripe_customer_id.to_owned()),
                    ("auto_advance", "false".to_owned()),
                ],
                idempotency_key,
            )
            .await?;
        Ok(obj.id)
    }

    async fn create_item(
        &self,
        stripe_invoice_id: &str,
        amount: UsdCents,
        description: &str,
        idempotency_key: &str,
    ) -> Result<(), StripeError> {
        self.post_form(
            "/invoiceitems",
            &[
                ("invoice", stripe_invoice_id.to_owned()),
                ("amount", amount.cents().to_string()),
                ("currency", "usd".to_owned()),
                ("description", description.to_owned()),
            ],
            idempotency_key,
        )
        .await?;
        Ok(())
    }

    async fn finalize(
        &self,
        stripe_invoice_id: &str,
        idempotency_key: &str,
    ) -> Result<(), StripeError> {
        self.post_form(
            &format!("/invoices/{stripe_invoice_id}/finalize"),
            &[],
            idempotency_key,
        )
        .await?;
        Ok(())
    }

    async fn pay(
        &self,
        stripe_invoice_id: &str,
        idempotency_key: &str,
    ) -> Result<StripePayOutcome, StripeError> {
        let obj = self
            .post_form(
                &format!("/invoices/{stripe_invoice_id}/pay"),
                &[],
                idempotency_key,
            )
            .await?;
        match (obj.status.as_deref(), obj.hosted_invoice_url) {
            (Some("paid"), _) => Ok(StripePayOutcome::Paid),
            (_, Some(hosted_invoice_url)) =>
                Ok(StripePayOutcome::RequiresAction { hosted_invoice_url }),
            _ => Err(StripeError::Transient(
                "unexpected invoice status".to_owned(),
            )),
        }
    }
}

// --- Mock gateway --- //

#[derive(Debug, Default)]
struct MockStripeInner {
    /// Idempotency cache: key -> result token (invoice id or unit marker).
    idempotency: BTreeMap<String, String>,
    /// Invoices that completed the `pay` stage.
    paid: BTreeSet<String>,
    /// Every *distinct* settled (invoice, amount) pair, i.e. actual charges.
    charges: Vec<(String, i64)>,
    /// Pending item amounts per stripe invoice.
    amounts: BTreeMap<String, i64>,
    next_invoice: u64,
}

/// In-memory Stripe with a faithful idempotency cache. Used by dev mode and
/// the test suite.
#[derive(Clone)]
pub struct MockStripeGateway {
    state: Arc<MockProviderState>,
    inner: Arc<Mutex<MockStripeInner>>,
}

impl MockStripeGateway {
    pub fn new(state: Arc<MockProviderState>) -> Self {
        Self {
            state,
            inner: Arc::new(Mutex::new(MockStripeInner::default())),
        }
    }

    /// Total number of actual charges settled (idempotent retries excluded).
    pub fn charge_count(&self) -> usize {
        self.inner.lock().unwrap().charges.len()
    }

    /// Sum of all settled charge amounts, in cents.
    pub fn total_charged_cents(&self) -> i64 {
        self.inner
            .lock()
            .unwrap()
            .charges
            .iter()
            .map(|(_, cents)| cents)
            .sum()
    }
}

#[async_trait]
impl StripeGateway for MockStripeGateway {
    async fn create_invoice(
        &self,
        _stripe_customer_id: &str,
        idempotency_key: &str,
    ) -> Result<String, StripeError> {
        self.state.simulate_latency().await;
        if self.state.force_account_missing() {
            return Err(StripeError::NoPaymentMethod);
        }
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.idempotency.get(idempotency_key) {
            return Ok(existing.clone());
        }
        inner.next_invoice += 1;
        let id = format!("in_mock_{}", inner.next_invoice);
        inner
            .idempotency
            .insert(idempotency_key.to_owned(), id.clone());
        Ok(id)
    }

    async fn create_item(
        &self,
        stripe_invoice_id: &str,
        amount: UsdCents,
        _description: &str,
        idempotency_key: &str,
    ) -> Result<(), StripeError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.idempotency.contains_key(idempotency_key) {
            return Ok(());
        }
        inner
            .idempotency
            .insert(idempotency_key.to_owned(), stripe_invoice_id.to_owned());
        inner
            .amounts
            .insert(stripe_invoice_id.to_owned(), amount.cents());
        Ok(())
    }

    async fn finalize(
        &self,
        stripe_invoice_id: &str,
        idempotency_key: &str,
    ) -> Result<(), StripeError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .idempotency
            .entry(idempotency_key.to_owned())
            .or_insert_with(|| stripe_invoice_id.to_owned());
        Ok(())
    }

    async fn pay(
        &self,
        stripe_invoice_id: &str,
        idempotency_key: &str,
    ) -> Result<StripePayOutcome, StripeError> {
        self.state.simulate_latency().await;
        if self.state.force_requires_action() {
            return Ok(StripePayOutcome::RequiresAction {
                hosted_invoice_url: format!(
                    "https://pay.stripe.test/{stripe_invoice_id}"
                ),
            });
        }
        if self.state.force_fail() {
            return Err(StripeError::CardDeclined);
        }

        let mut inner = self.inner.lock().unwrap();
        // Idempotent replay: an already-paid invoice is not charged again.
        if inner.paid.contains(stripe_invoice_id)
            || inner.idempotency.contains_key(idempotency_key)
        {
            return Ok(StripePayOutcome::Paid);
        }
        inner
            .idempotency
            .insert(idempotency_key.to_owned(), stripe_invoice_id.to_owned());
        inner.paid.insert(stripe_invoice_id.to_owned());
        let cents =
            inner.amounts.get(stripe_invoice_id).copied().unwrap_or(0);
        inner.charges.push((stripe_invoice_id.to_owned(), cents));
        Ok(StripePayOutcome::Paid)
    }
}

#[cfg(test)]
mod test {
    use seal_common::env::DeployEnv;

    use super::*;

    fn mock_gateway() -> MockStripeGateway {
        let state = MockProviderState::new(DeployEnv::Dev).unwrap();
        MockStripeGateway::new(state)
    }

    async fn run_staged_charge(
        gateway: &MockStripeGateway,
        key: &str,
        cents: u32,
    ) -> StripePayOutcome {
        let invoice = gateway
            .create_invoice("cus_mock_1", &format!("{key}:invoice"))
            .await
            .unwrap();
        gateway
            .create_item(
                &invoice,
                UsdCents::from_cents_u32(cents),
                "subscription",
                &format!("{key}:item"),
            )
            .await
            .unwrap();
        gateway
            .finalize(&invoice, &format!("{key}:finalize"))
            .await
            .unwrap();
        gateway.pay(&invoice, &format!("{key}:pay")).await.unwrap()
    }

    #[tokio::test]
    async fn idempotent_retry_does_not_double_charge() {
        let gateway = mock_gateway();

        let first = run_staged_charge(&gateway, "inv7-2900", 2900).await;
        assert!(matches!(first, StripePayOutcome::Paid));
        assert_eq!(gateway.charge_count(), 1);

        // Same idempotency key: replays into the cache, no second charge.
        let retry = run_staged_charge(&gateway, "inv7-2900", 2900).await;
        assert!(matches!(retry, StripePayOutcome::Paid));
        assert_eq!(gateway.charge_count(), 1);
        assert_eq!(gateway.total_charged_cents(), 2900);

        // A different key is a different charge.
        let other = run_staged_charge(&gateway, "inv8-900", 900).await;
        assert!(matches!(other, StripePayOutcome::Paid));
        assert_eq!(gateway.charge_count(), 2);
        assert_eq!(gateway.total_charged_cents(), 3800);
    }

    #[tokio::test]
    async fn forced_requires_action() {
        let gateway = mock_gateway();
        gateway.state.set_force_requires_action(true);

        let outcome = run_staged_charge(&gateway, "inv9-2900", 2900).await;
        match outcome {
            StripePayOutcome::RequiresAction { hosted_invoice_url } =>
                assert!(hosted_invoice_url.starts_with("https://")),
            other => panic!("expected requires action, got {other:?}"),
        }
        assert_eq!(gateway.charge_count(), 0);
    }

    #[test]
    fn http_gateway_rejects_non_secret_keys() {
        assert!(HttpStripeGateway::new("pk_test_123").is_err());
        let sandbox = HttpStripeGateway::new("sk_test_123").unwrap();
        assert!(sandbox.is_sandbox());
        let live = HttpStripeGateway::new("sk_live_123").unwrap();
        assert!(!live.is_sandbox());
    }
}
