//! The GM HTTP surface (internal network only).
//!
//! Three route groups: the queue/fleet endpoints from the wire contract,
//! the customer ops endpoints, and the dev-only test endpoints (clock
//! control, mock wallet, provider faults). The test group is merged in only
//! when the context was built with test endpoints enabled, which is itself
//! impossible outside dev.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use seal_api::{
    error::ApiError,
    models::{
        Ack, BillingViewResponse, CancellationResponse, ChangeTierRequest,
        ClockAdvanceRequest, ConfigChangeResponse, ConfigurePaypalRequest,
        CreateCustomerRequest, CreateCustomerResponse, CustomerQuery,
        GmHealthResponse, LmStatusResponse, ProviderFaultsRequest,
        QueueQuery, QueueTaskResponse, ReconcileQueueQuery, ServiceActionRequest,
        ServiceView, SetIpAllowlistRequest, SetSpendingLimitRequest,
        SubscribeRequest, WalletAmountRequest, WalletTxResponse,
    },
};
use seal_billing::CancellationOutcome;

use crate::{
    context::GmContext,
    queue::{GmTask, SubmitOutcome},
};

type Ctx = State<Arc<GmContext>>;

pub fn router(ctx: Arc<GmContext>) -> Router<()> {
    let mut router = api_router(ctx.clone());
    if ctx.test_endpoints {
        router = router.merge(test_router(ctx));
    }
    router
}

fn api_router(ctx: Arc<GmContext>) -> Router<()> {
    #[rustfmt::skip]
    let router = Router::new()
        .route("/api/health", get(health))
        .route("/api/queue/sync-all", post(queue_sync_all))
        .route("/api/queue/reconcile-payments", post(queue_reconcile))
        .route("/api/lm/status", get(lm_status))
        .route("/api/customer", post(create_customer))
        .route("/api/service/subscribe", post(subscribe))
        .route("/api/service/enable", post(enable_service))
        .route("/api/service/disable", post(disable_service))
        .route("/api/service/cancel", post(schedule_cancellation))
        .route("/api/service/undo-cancel", post(undo_cancellation))
        .route("/api/service/tier", post(change_tier))
        .route("/api/service/allowlist", post(set_ip_allowlist))
        .route("/api/wallet/deposit", post(deposit))
        .route("/api/wallet/withdraw", post(withdraw))
        .route("/api/wallet/spending-limit", post(set_spending_limit))
        .route("/api/billing", get(billing_view))
        .with_state(ctx);
    router
}

/// Test-only endpoints; never served outside dev.
fn test_router(ctx: Arc<GmContext>) -> Router<()> {
    #[rustfmt::skip]
    let router = Router::new()
        .route("/test/clock/advance", post(test_clock_advance))
        .route("/test/provider/faults", post(test_provider_faults))
        .route("/test/provider/configure-stripe", post(test_configure_stripe))
        .route("/test/provider/configure-paypal", post(test_configure_paypal))
        .route("/test/wallet/deposit", post(deposit))
        .route("/test/wallet/withdraw", post(withdraw))
        .route("/test/periodic-job", post(test_periodic_job))
        .route("/test/queue/refresh-lm-status", post(test_refresh_lm_status))
        .with_state(ctx);
    router
}

// --- Health / queue / fleet --- //

async fn health(State(ctx): Ctx) -> Json<GmHealthResponse> {
    Json(GmHealthResponse {
        service: "seal-gm".to_owned(),
        timestamp: ctx.clock.now(),
    })
}

fn queue_response(
    outcome: SubmitOutcome,
    completed: bool,
) -> QueueTaskResponse {
    let (queued, reason) = match outcome {
        SubmitOutcome::Queued(_) => (Some(!completed), None),
        SubmitOutcome::Deduplicated(_) =>
            (None, Some("deduplicated".to_owned())),
    };
    QueueTaskResponse {
        success: true,
        queued,
        completed: completed.then_some(true),
        task_id: Some(outcome.task_id()),
        reason,
    }
}

async fn queue_sync_all(
    State(ctx): Ctx,
    Query(query): Query<QueueQuery>,
) -> Json<QueueTaskResponse> {
    let outcome = if query.fire_and_forget {
        ctx.queue.submit(GmTask::SyncAll)
    } else {
        ctx.queue.submit_and_wait(GmTask::SyncAll).await
    };
    Json(queue_response(outcome, !query.fire_and_forget))
}

async fn queue_reconcile(
    State(ctx): Ctx,
    Query(query): Query<ReconcileQueueQuery>,
) -> Json<QueueTaskResponse> {
    let task = GmTask::ReconcilePayments(query.customer_id);
    let outcome = if query.fire_and_forget {
        ctx.queue.submit(task)
    } else {
        ctx.queue.submit_and_wait(task).await
    };
    Json(queue_response(outcome, !query.fire_and_forget))
}

async fn lm_status(State(ctx): Ctx) -> Json<LmStatusResponse> {
    Json(ctx.poller.status().await)
}

// --- Customer ops --- //

async fn create_customer(
    State(ctx): Ctx,
    Json(req): Json<CreateCustomerRequest>,
) -> Result<Json<CreateCustomerResponse>, ApiError> {
    if req.wallet_address.is_empty() {
        return Err(ApiError::invalid_input("Wallet address is required"));
    }
    let customer_id =
        ctx.engine.get_or_create_customer(&req.wallet_address).await;
    Ok(Json(CreateCustomerResponse { customer_id }))
}

async fn subscribe(
    State(ctx): Ctx,
    Json(req): Json<SubscribeRequest>,
) -> Result<Json<ServiceView>, ApiError> {
    let outcome = ctx
        .engine
        .subscribe(req.customer_id, req.service_type, req.tier)
        .await?;
    if let Some(err) = outcome.settle_error() {
        // The service row was still created (disabled, charge pending) so
        // the user can deposit and retry.
        return Err(err);
    }
    let view = ctx
        .engine
        .service_view(req.customer_id, req.service_type)
        .await?;
    Ok(Json(view))
}

async fn enable_service(
    State(ctx): Ctx,
    Json(req): Json<ServiceActionRequest>,
) -> Result<Json<ServiceView>, ApiError> {
    ctx.engine
        .enable_service(req.customer_id, req.service_type)
        .await?;
    let view = ctx
        .engine
        .service_view(req.customer_id, req.service_type)
        .await?;
    Ok(Json(view))
}

async fn disable_service(
    State(ctx): Ctx,
    Json(req): Json<ServiceActionRequest>,
) -> Result<Json<ServiceView>, ApiError> {
    ctx.engine
        .disable_service(req.customer_id, req.service_type)
        .await?;
    let view = ctx
        .engine
        .service_view(req.customer_id, req.service_type)
        .await?;
    Ok(Json(view))
}

async fn schedule_cancellation(
    State(ctx): Ctx,
    Json(req): Json<ServiceActionRequest>,
) -> Result<Json<CancellationResponse>, ApiError> {
    let outcome = ctx
        .engine
        .schedule_cancellation(req.customer_id, req.service_type)
        .await?;
    let resp = match outcome {
        CancellationOutcome::Deleted => CancellationResponse {
            deleted: true,
            effective_at: None,
        },
        CancellationOutcome::Scheduled { effective_at } =>
            CancellationResponse {
                deleted: false,
                effective_at: Some(effective_at),
            },
    };
    Ok(Json(resp))
}

async fn undo_cancellation(
    State(ctx): Ctx,
    Json(req): Json<ServiceActionRequest>,
) -> Result<Json<ServiceView>, ApiError> {
    ctx.engine
        .undo_cancellation(req.customer_id, req.service_type)
        .await?;
    let view = ctx
        .engine
        .service_view(req.customer_id, req.service_type)
        .await?;
    Ok(Json(view))
}

async fn change_tier(
    State(ctx): Ctx,
    Json(req): Json<ChangeTierRequest>,
) -> Result<Json<ServiceView>, ApiError> {
    ctx.engine
        .change_tier(req.customer_id, req.service_type, req.new_tier)
        .await?;
    let view = ctx
        .engine
        .service_view(req.customer_id, req.service_type)
        .await?;
    Ok(Json(view))
}

async fn set_ip_allowlist(
    State(ctx): Ctx,
    Json(req): Json<SetIpAllowlistRequest>,
) -> Result<Json<ConfigChangeResponse>, ApiError> {
    let vault_type = seal_common::vaults::VaultType::for_mutation(
        req.service_type,
        req.network,
    );
    let seq = ctx
        .engine
        .set_ip_allowlist(
            req.customer_id,
            req.service_type,
            req.network,
            req.entries,
        )
        .await?;
    Ok(Json(ConfigChangeResponse { vault_type, seq }))
}

async fn deposit(
    State(ctx): Ctx,
    Json(req): Json<WalletAmountRequest>,
) -> Result<Json<WalletTxResponse>, ApiError> {
    let digest = ctx.engine.deposit(req.customer_id, req.amount).await?;
    Ok(Json(WalletTxResponse { digest }))
}

async fn withdraw(
    State(ctx): Ctx,
    Json(req): Json<WalletAmountRequest>,
) -> Result<Json<WalletTxResponse>, ApiError> {
    let digest = ctx.engine.withdraw(req.customer_id, req.amount).await?;
    Ok(Json(WalletTxResponse { digest }))
}

async fn set_spending_limit(
    State(ctx): Ctx,
    Json(req): Json<SetSpendingLimitRequest>,
) -> Result<Json<Ack>, ApiError> {
    ctx.engine
        .set_spending_limit(req.customer_id, req.limit)
        .await?;
    Ok(Json(Ack::ok()))
}

async fn billing_view(
    State(ctx): Ctx,
    Query(query): Query<CustomerQuery>,
) -> Result<Json<BillingViewResponse>, ApiError> {
    let view = ctx.engine.billing_view(query.customer_id).await?;
    Ok(Json(view))
}

// --- Test endpoints (dev only) --- //

async fn test_clock_advance(
    State(ctx): Ctx,
    Json(req): Json<ClockAdvanceRequest>,
) -> Result<Json<Ack>, ApiError> {
    let mock_clock = ctx
        .mock_clock
        .as_ref()
        .ok_or_else(|| ApiError::server("Mock clock is not active"))?;
    mock_clock.advance(Duration::from_millis(req.millis));
    Ok(Json(Ack::ok()))
}

async fn test_provider_faults(
    State(ctx): Ctx,
    Json(req): Json<ProviderFaultsRequest>,
) -> Result<Json<Ack>, ApiError> {
    let mock_state = ctx
        .mock_state
        .as_ref()
        .ok_or_else(|| ApiError::server("Mock providers are not active"))?;
    mock_state.set_force_fail(req.force_fail);
    mock_state.set_force_requires_action(req.force_requires_action);
    mock_state.set_force_insufficient(req.force_insufficient);
    mock_state.set_force_spending_limit(req.force_spending_limit);
    mock_state.set_latency(Duration::from_millis(req.latency_ms));
    Ok(Json(Ack::ok()))
}

async fn test_configure_stripe(
    State(ctx): Ctx,
    Json(req): Json<CustomerQuery>,
) -> Result<Json<Ack>, ApiError> {
    ctx.engine.configure_stripe_customer(req.customer_id).await?;
    Ok(Json(Ack::ok()))
}

async fn test_configure_paypal(
    State(ctx): Ctx,
    Json(req): Json<ConfigurePaypalRequest>,
) -> Result<Json<Ack>, ApiError> {
    ctx.engine
        .configure_paypal_customer(req.customer_id, req.email)
        .await?;
    Ok(Json(Ack::ok()))
}

async fn test_periodic_job(State(ctx): Ctx) -> Result<Json<Ack>, ApiError> {
    ctx.engine.run_periodic_job().await?;
    Ok(Json(Ack::ok()))
}

async fn test_refresh_lm_status(
    State(ctx): Ctx,
) -> Json<QueueTaskResponse> {
    let outcome = ctx.queue.submit_and_wait(GmTask::RefreshLmStatus).await;
    Json(queue_response(outcome, true))
}
