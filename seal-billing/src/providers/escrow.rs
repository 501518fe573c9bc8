//! The escrow payment provider: an on-chain funded balance with a rolling
//! 28-day spending limit.
//!
//! This repo carries the dev-mode chain backend: the customer row mirrors
//! the escrow balance and every intent is appended to the escrow
//! transaction log with a deterministic digest. The production chain SDK is
//! an external collaborator and slots in behind the same
//! [`PaymentProvider`] seam.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use seal_common::{
    amount::UsdCents,
    constants::SPENDING_PERIOD_DAYS,
    ids::{CustomerId, ProviderKind},
    sha256,
    time::{Clock, TimestampMs},
};
use seal_store::{
    rows::{EscrowOp, EscrowTransaction},
    Db,
};
use tracing::{info, warn};

use crate::providers::{
    ChargeErrorCode, ChargeRequest, ChargeResult, MockProviderState,
    PaymentProvider,
};

const SPENDING_PERIOD: Duration =
    Duration::from_secs(SPENDING_PERIOD_DAYS as u64 * 24 * 60 * 60);

pub struct EscrowProvider {
    db: Db,
    clock: Clock,
    /// Fault injection; present in dev, [`None`] in staging/prod.
    mock: Option<Arc<MockProviderState>>,
}

impl EscrowProvider {
    pub fn new(
        db: Db,
        clock: Clock,
        mock: Option<Arc<MockProviderState>>,
    ) -> Self {
        Self { db, clock, mock }
    }

    fn forced(&self, f: impl Fn(&MockProviderState) -> bool) -> bool {
        self.mock.as_deref().map(f).unwrap_or(false)
    }

    async fn mock_latency(&self) {
        if let Some(mock) = &self.mock {
            mock.simulate_latency().await;
        }
    }

    /// Fund the escrow balance. Creates the escrow contract on first
    /// deposit. Returns the on-chain digest.
    pub async fn deposit(
        &self,
        customer_id: CustomerId,
        amount: UsdCents,
    ) -> anyhow::Result<String> {
        self.mock_latency().await;
        let now = self.clock.now();

        let mut tx = self.db.begin().await;
        let customer = tx
            .customer_mut(customer_id)
            .ok_or_else(|| anyhow::anyhow!("No such customer"))?;
        if customer.escrow_contract_id.is_none() {
            customer.escrow_contract_id =
                Some(format!("0xescrow{}", customer_id.to_i64()));
        }
        customer.escrow_balance = customer.escrow_balance.checked_add(amount)?;

        let digest = log_escrow_tx(
            &mut tx,
            customer_id,
            EscrowOp::Deposit,
            amount,
            true,
            now,
        );
        tx.commit();

        info!(%customer_id, %amount, "escrow deposit");
        Ok(digest)
    }

    /// Withdraw from the escrow balance.
    pub async fn withdraw(
        &self,
        customer_id: CustomerId,
        amount: UsdCents,
    ) -> anyhow::Result<String> {
        self.mock_latency().await;
        let now = self.clock.now();

        let mut tx = self.db.begin().await;
        let customer = tx
            .customer_mut(customer_id)
            .ok_or_else(|| anyhow::anyhow!("No such customer"))?;
        customer.escrow_balance = customer
            .escrow_balance
            .checked_sub(amount)
            .map_err(|_| anyhow::anyhow!("Insufficient escrow balance"))?;

        let digest = log_escrow_tx(
            &mut tx,
            customer_id,
            EscrowOp::Withdraw,
            amount,
            true,
            now,
        );
        tx.commit();

        info!(%customer_id, %amount, "escrow withdraw");
        Ok(digest)
    }
}

#[async_trait]
impl PaymentProvider for EscrowProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Escrow
    }

    async fn is_configured(&self, customer_id: CustomerId) -> bool {
        if self.forced(|m| m.force_account_missing()) {
            return false;
        }
        let tx = self.db.begin().await;
        tx.customer(customer_id)
            .map(|c| c.escrow_contract_id.is_some())
            .unwrap_or(false)
    }

    async fn can_pay(
        &self,
        customer_id: CustomerId,
        amount: UsdCents,
    ) -> bool {
        if !self.is_configured(customer_id).await
            || self.forced(|m| m.force_insufficient())
        {
            return false;
        }
        let now = self.clock.now();
        let tx = self.db.begin().await;
        let Some(customer) = tx.customer(customer_id) else {
            return false;
        };
        if customer.escrow_balance < amount {
            return false;
        }
        within_spending_limit(
            customer.spending_limit,
            effective_period_charged(
                customer.current_period_start,
                customer.current_period_charged,
                now,
            ),
            amount,
        )
    }

    async fn charge(&self, req: &ChargeRequest) -> ChargeResult {
        self.mock_latency().await;
        let now = self.clock.now();

        if self.forced(|m| m.force_insufficient()) {
            return ChargeResult::declined(
                ChargeErrorCode::InsufficientEscrow,
                false,
            );
        }
        if self.forced(|m| m.force_spending_limit()) {
            return ChargeResult::declined(
                ChargeErrorCode::SpendingLimitExceeded,
                false,
            );
        }
        if self.forced(|m| m.force_fail()) {
            return ChargeResult::declined(
                ChargeErrorCode::ProviderUnavailable,
                true,
            );
        }

        let mut tx = self.db.begin().await;
        let Some(customer) = tx.customer_mut(req.customer_id) else {
            return ChargeResult::declined(
                ChargeErrorCode::AccountNotConfigured,
                false,
            );
        };
        if customer.escrow_contract_id.is_none() {
            return ChargeResult::declined(
                ChargeErrorCode::AccountNotConfigured,
                false,
            );
        }

        // After 28 days since the period start, the next charge resets the
        // period and zeroes the counter before applying.
        let period_expired = customer
            .current_period_start
            .and_then(|start| now.duration_since(start))
            .map(|age| age >= SPENDING_PERIOD)
            .unwrap_or(false);
        if customer.current_period_start.is_none() || period_expired {
            customer.current_period_start = Some(now);
            customer.current_period_charged = UsdCents::ZERO;
        }

        if !within_spending_limit(
            customer.spending_limit,
            customer.current_period_charged,
            req.amount,
        ) {
            warn!(
                customer_id = %req.customer_id,
                amount = %req.amount,
                "escrow charge exceeds spending limit"
            );
            return ChargeResult::declined(
                ChargeErrorCode::SpendingLimitExceeded,
                false,
            );
        }

        let balance = customer.escrow_balance;
        match balance.checked_sub(req.amount) {
            Ok(remaining) => {
                customer.escrow_balance = remaining;
                customer.current_period_charged = customer
                    .current_period_charged
                    .checked_add(req.amount)
                    .expect("period charge sum cannot overflow");
            }
            Err(_) => {
                let customer_id = req.customer_id;
                let amount = req.amount;
                log_escrow_tx(
                    &mut tx,
                    customer_id,
                    EscrowOp::Charge,
                    amount,
                    false,
                    now,
                );
                tx.commit();
                info!(%customer_id, %amount, %balance, "insufficient escrow");
                return ChargeResult::declined(
                    ChargeErrorCode::InsufficientEscrow,
                    false,
                );
            }
        }

        let digest = log_escrow_tx(
            &mut tx,
            req.customer_id,
            EscrowOp::Charge,
            req.amount,
            true,
            now,
        );
        tx.commit();

        info!(
            customer_id = %req.customer_id,
            amount = %req.amount,
            %digest,
            "escrow charge ok"
        );
        ChargeResult::success_onchain(digest.clone(), digest)
    }

    async fn get_info(&self, customer_id: CustomerId) -> Option<String> {
        // Computed live: the balance mirror, never a cached value.
        let tx = self.db.begin().await;
        let customer = tx.customer(customer_id)?;
        customer.escrow_contract_id.as_ref()?;
        Some(format!("Escrow balance {}", customer.escrow_balance))
    }
}

/// `current + attempted <= limit`, where a zero limit means unlimited.
fn within_spending_limit(
    limit: UsdCents,
    current: UsdCents,
    attempted: UsdCents,
) -> bool {
    if limit.is_zero() {
        return true;
    }
    match current.checked_add(attempted) {
        Ok(total) => total <= limit,
        Err(_) => false,
    }
}

/// The period counter as the spending check should see it: zero if the
/// period would reset before the charge applies.
fn effective_period_charged(
    period_start: Option<TimestampMs>,
    charged: UsdCents,
    now: TimestampMs,
) -> UsdCents {
    let expired = period_start
        .and_then(|start| now.duration_since(start))
        .map(|age| age >= SPENDING_PERIOD)
        .unwrap_or(true);
    if expired {
        UsdCents::ZERO
    } else {
        charged
    }
}

/// Append an escrow intent to the log, returning its deterministic digest.
fn log_escrow_tx(
    tx: &mut seal_store::Tx,
    customer_id: CustomerId,
    op: EscrowOp,
    amount: UsdCents,
    success: bool,
    now: TimestampMs,
) -> String {
    let mut digest = String::new();
    tx.insert_escrow_tx(|id| {
        let hash = sha256::digest_many(&[
            &customer_id.to_i64().to_le_bytes(),
            &id.to_i64().to_le_bytes(),
            &amount.cents().to_le_bytes(),
        ]);
        digest = format!("0x{hash}");
        EscrowTransaction {
            id,
            customer_id,
            op,
            amount,
            digest: digest.clone(),
            success,
            created_at: now,
        }
    });
    digest
}
