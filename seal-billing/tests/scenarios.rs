//! End-to-end billing scenarios driven through the engine with mock
//! providers and a stepped clock.

use std::sync::Arc;
use std::time::Duration;

use seal_billing::{
    providers::{
        ChargeErrorCode, ChargeRequest, EscrowProvider, MockProviderState,
        MockStripeGateway, PaymentProvider, PaypalProvider, StripeProvider,
    },
    BillingEngine, CancellationOutcome, NoopSyncTrigger, SettleOutcome,
    TierChangeOutcome,
};
use seal_common::{
    amount::UsdCents,
    env::DeployEnv,
    ids::{CustomerId, ServiceTier, ServiceType},
    time::{Clock, MockClock, TimestampMs},
};
use seal_store::{
    rows::{CreditReason, InvoiceStatus, PaymentSource, ServiceState},
    Db,
};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

struct Harness {
    db: Db,
    mock_clock: MockClock,
    mock_state: Arc<MockProviderState>,
    stripe_gateway: MockStripeGateway,
    escrow: Arc<EscrowProvider>,
    engine: BillingEngine,
}

/// Engine wired with mock providers, clock pinned to 2024-04-10 UTC.
fn harness() -> Harness {
    seal_common::logger::init_for_testing("seal-billing-tests");
    let db = Db::new();
    let start = TimestampMs::from_date_utc(
        chrono::NaiveDate::from_ymd_opt(2024, 4, 10).unwrap(),
    );
    let (clock, mock_clock) = Clock::mock_at(start);
    let mock_state = MockProviderState::new(DeployEnv::Dev).unwrap();

    let escrow = Arc::new(EscrowProvider::new(
        db.clone(),
        clock.clone(),
        Some(mock_state.clone()),
    ));
    let stripe_gateway = MockStripeGateway::new(mock_state.clone());
    let stripe = Arc::new(StripeProvider::new(
        db.clone(),
        Arc::new(stripe_gateway.clone()),
    ));
    let paypal = Arc::new(PaypalProvider::new(
        db.clone(),
        Some(mock_state.clone()),
    ));

    let providers: Vec<Arc<dyn PaymentProvider>> =
        vec![escrow.clone(), stripe, paypal];
    let engine = BillingEngine::new(
        db.clone(),
        clock,
        providers,
        escrow.clone(),
        Arc::new(NoopSyncTrigger),
    );

    Harness {
        db,
        mock_clock,
        mock_state,
        stripe_gateway,
        escrow,
        engine,
    }
}

async fn escrow_balance(db: &Db, customer_id: CustomerId) -> i64 {
    let tx = db.begin().await;
    tx.customer(customer_id).unwrap().escrow_balance.cents()
}

async fn service_state(
    db: &Db,
    customer_id: CustomerId,
) -> (ServiceState, bool, bool, bool) {
    let tx = db.begin().await;
    let sid = tx.find_service_id(customer_id, ServiceType::Seal).unwrap();
    let svc = &tx.services[&sid];
    (
        svc.state,
        svc.is_user_enabled,
        svc.paid_once,
        svc.subscription_charge_pending,
    )
}

fn dollars(d: u32) -> UsdCents {
    UsdCents::from_cents_u32(d * 100)
}

// --- S1: subscribe + pay --- //

#[tokio::test]
async fn s1_subscribe_and_pay() {
    let h = harness();
    let cid = h.engine.get_or_create_customer("0xalice").await;
    h.engine.deposit(cid, dollars(100)).await.unwrap();

    let outcome = h
        .engine
        .subscribe(cid, ServiceType::Seal, ServiceTier::Pro)
        .await
        .unwrap();
    assert!(matches!(outcome.settle, SettleOutcome::Paid));

    // Service enabled, paidOnce on both service and customer.
    let (state, user_enabled, paid_once, charge_pending) =
        service_state(&h.db, cid).await;
    assert_eq!(state, ServiceState::Enabled);
    assert!(user_enabled);
    assert!(paid_once);
    assert!(!charge_pending);

    let tx = h.db.begin().await;
    assert!(tx.customer(cid).unwrap().paid_once);

    // $100.00 - $29.00 = $71.00.
    assert_eq!(tx.customer(cid).unwrap().escrow_balance.cents(), 71_00);

    // Exactly one API key, enabled, index 0.
    let keys: Vec<_> = tx
        .seal_keys
        .values()
        .filter(|k| k.customer_id == cid && k.deleted_at.is_none())
        .collect();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].is_user_enabled);
    assert_eq!(keys[0].derivation_index, 0);

    // Invoice paid with the escrow digest attached.
    let invoice = tx
        .invoices
        .values()
        .find(|inv| {
            inv.customer_id == cid && inv.status == InvoiceStatus::Paid
        })
        .unwrap();
    assert_eq!(invoice.amount_paid.cents(), 29_00);
    assert!(invoice.tx_digest.is_some());
}

// --- S2: subscribe unfunded, deposit, reconcile --- //

#[tokio::test]
async fn s2_subscribe_unfunded_then_reconcile() {
    let h = harness();
    let cid = h.engine.get_or_create_customer("0xbob").await;

    // Balance 0, no provider configured at all.
    let outcome = h
        .engine
        .subscribe(cid, ServiceType::Seal, ServiceTier::Starter)
        .await
        .unwrap();
    assert!(matches!(outcome.settle, SettleOutcome::Unpaid { .. }));

    let (state, _, paid_once, charge_pending) =
        service_state(&h.db, cid).await;
    assert_eq!(state, ServiceState::Disabled);
    assert!(!paid_once);
    assert!(charge_pending);
    {
        let tx = h.db.begin().await;
        let sid = tx.find_service_id(cid, ServiceType::Seal).unwrap();
        assert!(tx.services[&sid].sub_pending_invoice_id.is_some());
    }

    // Enable fails with a precondition error while the invoice is unpaid.
    let err = h
        .engine
        .enable_service(cid, ServiceType::Seal)
        .await
        .unwrap_err();
    assert_eq!(err.kind, seal_api::error::ApiErrorKind::InvalidInput);

    // Deposit $10.00, then reconcile.
    h.engine.deposit(cid, dollars(10)).await.unwrap();
    let report = h.engine.reconcile_payments(cid).await.unwrap();
    assert_eq!(report.recovered.len(), 1);
    assert!(report.still_pending.is_empty());

    let (state, user_enabled, paid_once, charge_pending) =
        service_state(&h.db, cid).await;
    assert_eq!(state, ServiceState::Enabled);
    assert!(user_enabled);
    assert!(paid_once);
    assert!(!charge_pending);

    // $10.00 - $9.00 = $1.00 left in escrow.
    assert_eq!(escrow_balance(&h.db, cid).await, 1_00);

    // Reconciliation credit: floor(900 * 20 / 30) = 600 on 2024-04-10,
    // never expiring.
    let tx = h.db.begin().await;
    let credits: Vec<_> = tx
        .credits
        .values()
        .filter(|c| c.customer_id == cid)
        .collect();
    assert_eq!(credits.len(), 1);
    assert_eq!(credits[0].remaining.cents(), 600);
    assert_eq!(credits[0].reason, CreditReason::Reconciliation);
    assert!(credits[0].expires_at.is_none());
}

// --- Property 6: reconciliation idempotence --- //

#[tokio::test]
async fn reconcile_twice_is_a_noop() {
    let h = harness();
    let cid = h.engine.get_or_create_customer("0xcarol").await;
    h.engine
        .subscribe(cid, ServiceType::Seal, ServiceTier::Starter)
        .await
        .unwrap();
    h.engine.deposit(cid, dollars(10)).await.unwrap();

    let first = h.engine.reconcile_payments(cid).await.unwrap();
    assert_eq!(first.recovered.len(), 1);

    let balance_after_first = escrow_balance(&h.db, cid).await;
    let credits_after_first = {
        let tx = h.db.begin().await;
        tx.credits.values().filter(|c| c.customer_id == cid).count()
    };

    // No intervening deposit: the second pass must change nothing.
    let second = h.engine.reconcile_payments(cid).await.unwrap();
    assert!(second.recovered.is_empty());
    assert!(second.still_pending.is_empty());
    assert_eq!(escrow_balance(&h.db, cid).await, balance_after_first);
    let credits_after_second = {
        let tx = h.db.begin().await;
        tx.credits.values().filter(|c| c.customer_id == cid).count()
    };
    assert_eq!(credits_after_first, credits_after_second);
}

// --- S3: scheduled downgrade --- //

#[tokio::test]
async fn s3_scheduled_downgrade() {
    let h = harness();
    let cid = h.engine.get_or_create_customer("0xdave").await;
    h.engine.deposit(cid, dollars(100)).await.unwrap();
    h.engine
        .subscribe(cid, ServiceType::Seal, ServiceTier::Pro)
        .await
        .unwrap();

    let outcome = h
        .engine
        .change_tier(cid, ServiceType::Seal, ServiceTier::Starter)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        TierChangeOutcome::DowngradeScheduled {
            to: ServiceTier::Starter
        }
    );

    // Downgrades never charge immediately.
    assert_eq!(escrow_balance(&h.db, cid).await, 71_00);

    // The draft already shows the starter price.
    {
        let tx = h.db.begin().await;
        let draft_id = tx.draft_invoice_id(cid).unwrap();
        let items: Vec<_> = tx
            .line_item_ids_of_invoice(draft_id)
            .into_iter()
            .map(|id| tx.line_items[&id].clone())
            .collect();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_type.wire_name(), "subscription_starter");
        assert_eq!(items[0].amount_cents, 900);
    }

    // Cross the period boundary: the job applies the downgrade and the
    // closed invoice bills the starter price.
    h.mock_clock.advance(21 * DAY); // 2024-05-01
    h.engine.run_periodic_job().await.unwrap();

    let tx = h.db.begin().await;
    let sid = tx.find_service_id(cid, ServiceType::Seal).unwrap();
    assert_eq!(tx.services[&sid].tier, ServiceTier::Starter);
    assert!(tx.services[&sid].scheduled_tier.is_none());

    // $71.00 - $9.00 (May on starter).
    assert_eq!(tx.customer(cid).unwrap().escrow_balance.cents(), 62_00);
}

// --- S4: scheduled cancellation --- //

#[tokio::test]
async fn s4_scheduled_cancellation() {
    let h = harness();
    let cid = h.engine.get_or_create_customer("0xerin").await;
    h.engine.deposit(cid, dollars(200)).await.unwrap();
    h.engine
        .subscribe(cid, ServiceType::Seal, ServiceTier::Enterprise)
        .await
        .unwrap();
    assert_eq!(escrow_balance(&h.db, cid).await, 15_00);

    let outcome = h
        .engine
        .schedule_cancellation(cid, ServiceType::Seal)
        .await
        .unwrap();
    let may_first = TimestampMs::from_date_utc(
        chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
    );
    assert_eq!(
        outcome,
        CancellationOutcome::Scheduled {
            effective_at: may_first
        }
    );

    // Draft shows no subscription line item, credit only.
    {
        let tx = h.db.begin().await;
        let draft_id = tx.draft_invoice_id(cid).unwrap();
        let items: Vec<_> = tx
            .line_item_ids_of_invoice(draft_id)
            .into_iter()
            .map(|id| tx.line_items[&id].clone())
            .collect();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_type.wire_name(), "credit");
        // floor(18500 * 20 / 30) = 12333 unused-month credit.
        assert_eq!(items[0].amount_cents, -12_333);
        assert_eq!(tx.invoices[&draft_id].amount.cents(), 0);
    }

    // On the 1st the periodic job parks the service in the grace state.
    h.mock_clock.advance(21 * DAY); // 2024-05-01
    h.engine.run_periodic_job().await.unwrap();
    let (state, _, _, _) = service_state(&h.db, cid).await;
    assert_eq!(state, ServiceState::CancellationPending);

    // 7 days later the row is reset but retained.
    h.mock_clock.advance(7 * DAY); // 2024-05-08
    h.engine.run_periodic_job().await.unwrap();

    let tx = h.db.begin().await;
    let sid = tx.find_service_id(cid, ServiceType::Seal).unwrap();
    let svc = &tx.services[&sid];
    assert_eq!(svc.state, ServiceState::NotProvisioned);
    assert!(!svc.paid_once);
    assert!(svc.cancellation_scheduled_for.is_none());

    // Keys are soft-deleted, never removed.
    assert!(tx
        .seal_keys
        .values()
        .filter(|k| k.service_id == sid)
        .all(|k| k.deleted_at.is_some()));
}

#[tokio::test]
async fn undo_cancellation_claws_back_the_credit() {
    let h = harness();
    let cid = h.engine.get_or_create_customer("0xfrank").await;
    h.engine.deposit(cid, dollars(200)).await.unwrap();
    h.engine
        .subscribe(cid, ServiceType::Seal, ServiceTier::Enterprise)
        .await
        .unwrap();

    h.engine
        .schedule_cancellation(cid, ServiceType::Seal)
        .await
        .unwrap();
    {
        let tx = h.db.begin().await;
        assert_eq!(
            tx.credits.values().filter(|c| c.customer_id == cid).count(),
            1
        );
    }

    h.engine
        .undo_cancellation(cid, ServiceType::Seal)
        .await
        .unwrap();

    let tx = h.db.begin().await;
    assert_eq!(
        tx.credits.values().filter(|c| c.customer_id == cid).count(),
        0
    );
    let sid = tx.find_service_id(cid, ServiceType::Seal).unwrap();
    assert!(tx.services[&sid].cancellation_scheduled_for.is_none());

    // The draft bills the subscription again.
    let draft_id = tx.draft_invoice_id(cid).unwrap();
    let item_id = tx.line_item_ids_of_invoice(draft_id)[0];
    assert_eq!(
        tx.line_items[&item_id].item_type.wire_name(),
        "subscription_enterprise"
    );
}

// --- Unpaid cancellation: immediate delete + identity reuse --- //

#[tokio::test]
async fn unpaid_cancellation_deletes_and_reuses_identity() {
    let h = harness();
    let cid = h.engine.get_or_create_customer("0xgrace").await;

    // Unfunded subscribe leaves an unpaid service.
    h.engine
        .subscribe(cid, ServiceType::Seal, ServiceTier::Starter)
        .await
        .unwrap();
    let original_sid = {
        let tx = h.db.begin().await;
        tx.find_service_id(cid, ServiceType::Seal).unwrap()
    };

    let outcome = h
        .engine
        .schedule_cancellation(cid, ServiceType::Seal)
        .await
        .unwrap();
    assert_eq!(outcome, CancellationOutcome::Deleted);
    {
        let tx = h.db.begin().await;
        assert!(tx.find_service_id(cid, ServiceType::Seal).is_none());
    }

    // Re-subscription is blocked during the cooldown.
    let err = h
        .engine
        .subscribe(cid, ServiceType::Seal, ServiceTier::Starter)
        .await
        .unwrap_err();
    assert_eq!(err.kind, seal_api::error::ApiErrorKind::InvalidInput);

    // After the 7-day cooldown the original instance id is reused.
    h.mock_clock.advance(8 * DAY);
    h.engine.deposit(cid, dollars(20)).await.unwrap();
    let outcome = h
        .engine
        .subscribe(cid, ServiceType::Seal, ServiceTier::Starter)
        .await
        .unwrap();
    assert!(matches!(outcome.settle, SettleOutcome::Paid));
    assert_eq!(outcome.service_id, original_sid);
}

// --- Property 5: provider chain order --- //

#[tokio::test]
async fn chain_prefers_funded_escrow() {
    let h = harness();
    let cid = h.engine.get_or_create_customer("0xheidi").await;
    h.engine.deposit(cid, dollars(100)).await.unwrap();
    h.engine.configure_stripe_customer(cid).await.unwrap();

    h.engine
        .subscribe(cid, ServiceType::Seal, ServiceTier::Pro)
        .await
        .unwrap();

    // Escrow is priority 1 and funded: it gets charged, Stripe does not.
    let tx = h.db.begin().await;
    let sources: Vec<PaymentSource> = tx
        .payments
        .values()
        .filter(|p| p.customer_id == cid)
        .map(|p| p.source)
        .collect();
    assert_eq!(sources, vec![PaymentSource::Escrow]);
    assert_eq!(h.stripe_gateway.charge_count(), 0);
}

#[tokio::test]
async fn chain_falls_through_to_stripe_when_escrow_underfunded() {
    let h = harness();
    let cid = h.engine.get_or_create_customer("0xivan").await;
    // Escrow configured but underfunded for a $29.00 charge.
    h.engine.deposit(cid, dollars(1)).await.unwrap();
    h.engine.configure_stripe_customer(cid).await.unwrap();

    let outcome = h
        .engine
        .subscribe(cid, ServiceType::Seal, ServiceTier::Pro)
        .await
        .unwrap();
    assert!(matches!(outcome.settle, SettleOutcome::Paid));

    let tx = h.db.begin().await;
    let sources: Vec<PaymentSource> = tx
        .payments
        .values()
        .filter(|p| p.customer_id == cid)
        .map(|p| p.source)
        .collect();
    assert_eq!(sources, vec![PaymentSource::Stripe]);
    assert_eq!(h.stripe_gateway.total_charged_cents(), 29_00);

    // The failed escrow attempt is in the on-chain intent log.
    assert!(tx
        .escrow_txs
        .values()
        .any(|etx| etx.customer_id == cid && !etx.success));

    // Escrow balance untouched.
    assert_eq!(tx.customer(cid).unwrap().escrow_balance.cents(), 1_00);
}

#[tokio::test]
async fn requires_action_stops_the_chain_and_parks_the_invoice() {
    let h = harness();
    let cid = h.engine.get_or_create_customer("0xjudy").await;
    h.engine.configure_stripe_customer(cid).await.unwrap();
    h.engine.configure_paypal_customer(cid, "judy@example.com".into())
        .await
        .unwrap();
    h.mock_state.set_force_requires_action(true);

    let outcome = h
        .engine
        .subscribe(cid, ServiceType::Seal, ServiceTier::Pro)
        .await
        .unwrap();
    let url = match outcome.settle {
        SettleOutcome::RequiresAction { url } => url,
        other => panic!("expected requires action, got {other:?}"),
    };
    assert!(url.starts_with("https://"));

    let tx = h.db.begin().await;
    let invoice = tx
        .invoices
        .values()
        .find(|inv| inv.customer_id == cid)
        .unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Pending);
    assert_eq!(invoice.payment_action_url.as_deref(), Some(url.as_str()));

    // PayPal (priority 3) must not have been tried after the interstitial.
    assert!(tx
        .payments
        .values()
        .all(|p| p.customer_id != cid));
}

// --- Upgrades --- //

#[tokio::test]
async fn upgrade_charges_prorated_delta_immediately() {
    let h = harness();
    let cid = h.engine.get_or_create_customer("0xkaren").await;
    h.engine.deposit(cid, dollars(100)).await.unwrap();
    h.engine
        .subscribe(cid, ServiceType::Seal, ServiceTier::Starter)
        .await
        .unwrap();

    // 2024-04-10: 21 days remaining of 30 (including today).
    // floor((2900 - 900) * 21 / 30) = 1400.
    let outcome = h
        .engine
        .change_tier(cid, ServiceType::Seal, ServiceTier::Pro)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        TierChangeOutcome::Upgraded {
            charged: UsdCents::from_cents_u32(1400)
        }
    );

    let tx = h.db.begin().await;
    let sid = tx.find_service_id(cid, ServiceType::Seal).unwrap();
    assert_eq!(tx.services[&sid].tier, ServiceTier::Pro);
    // $100.00 - $9.00 - $14.00.
    assert_eq!(tx.customer(cid).unwrap().escrow_balance.cents(), 77_00);
}

// --- Property 8: escrow spending-limit period reset --- //

#[tokio::test]
async fn spending_limit_resets_after_28_days() {
    let h = harness();
    let cid = h.engine.get_or_create_customer("0xleo").await;
    h.engine.deposit(cid, dollars(500)).await.unwrap();
    h.engine.set_spending_limit(cid, dollars(30)).await.unwrap();

    let charge = |cents: u32, inv: i64| {
        ChargeRequest::new(
            cid,
            UsdCents::from_cents_u32(cents),
            seal_common::ids::InvoiceId(inv),
            "test charge",
        )
    };

    // First charge starts the period.
    let r1 = h.escrow.charge(&charge(29_00, 101)).await;
    assert!(r1.success);

    // A second charge over the limit in the same period is rejected.
    let r2 = h.escrow.charge(&charge(2_00, 102)).await;
    assert!(!r2.success);
    assert_eq!(r2.error_code, Some(ChargeErrorCode::SpendingLimitExceeded));

    // Under the remaining headroom still works.
    let r3 = h.escrow.charge(&charge(1_00, 103)).await;
    assert!(r3.success);

    // After 28 days the next charge resets the period: the full limit is
    // available again and the counter restarts at that charge.
    h.mock_clock.advance(28 * DAY);
    let r4 = h.escrow.charge(&charge(30_00, 104)).await;
    assert!(r4.success);

    let tx = h.db.begin().await;
    let customer = tx.customer(cid).unwrap();
    assert_eq!(customer.current_period_charged.cents(), 30_00);
    assert_eq!(
        customer.escrow_balance.cents(),
        500_00 - 29_00 - 1_00 - 30_00
    );
}

// --- Draft invoice exclusions --- //

#[tokio::test]
async fn draft_excludes_charge_pending_services() {
    let h = harness();
    let cid = h.engine.get_or_create_customer("0xmallory").await;

    // Unfunded subscribe: subscription charge pending.
    h.engine
        .subscribe(cid, ServiceType::Seal, ServiceTier::Pro)
        .await
        .unwrap();

    let tx = h.db.begin().await;
    let draft_id = tx.draft_invoice_id(cid).unwrap();
    // Charge-pending services will not generate a future monthly charge.
    assert!(tx.line_item_ids_of_invoice(draft_id).is_empty());
    assert_eq!(tx.invoices[&draft_id].amount.cents(), 0);
}

// --- Billing view --- //

#[tokio::test]
async fn billing_view_reports_balances_and_providers() {
    let h = harness();
    let cid = h.engine.get_or_create_customer("0xnancy").await;
    h.engine.deposit(cid, dollars(50)).await.unwrap();
    h.engine
        .subscribe(cid, ServiceType::Seal, ServiceTier::Pro)
        .await
        .unwrap();

    let view = h.engine.billing_view(cid).await.unwrap();
    assert_eq!(view.escrow_balance.cents(), 21_00);
    assert_eq!(view.credit_balance.cents(), 0);

    let draft = view.draft.unwrap();
    assert_eq!(draft.amount.cents(), 29_00);
    assert_eq!(draft.line_items.len(), 1);

    let escrow_info = view
        .providers
        .iter()
        .find(|p| p.provider == "escrow")
        .unwrap();
    assert!(escrow_info.configured);
    assert_eq!(escrow_info.priority, 1);
    // Escrow display info is computed live.
    assert_eq!(
        escrow_info.display.as_deref(),
        Some("Escrow balance $21.00")
    );

    // No LMs polled yet: recorded config changes report unsynced.
    assert!(view.vault_sync.iter().all(|v| {
        v.config_change_seq.is_some() && !v.synced
    }));
}
