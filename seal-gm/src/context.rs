//! GM component wiring.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use seal_billing::{
    providers::{
        EscrowProvider, HttpStripeGateway, MockProviderState,
        MockStripeGateway, PaymentProvider, PaypalProvider, StripeProvider,
    },
    BillingEngine,
};
use seal_common::{
    aes::FieldCipher,
    env::DeployEnv,
    time::{Clock, MockClock, TimestampMs},
    vaults::PerVault,
};
use seal_store::Db;
use seal_vault::VaultStore;

use crate::{
    poller::{LmEndpoint, LmPoller},
    queue::{self, TaskQueue, TaskReceiver},
    syncer::VaultSyncer,
    trigger::QueueSyncTrigger,
};

/// Everything needed to build a GM.
pub struct GmConfig {
    pub deploy_env: DeployEnv,
    /// Transmit directory vault files are written to.
    pub vault_dir: PathBuf,
    /// Per-vault-type field cipher keys.
    pub vault_keys: PerVault<FieldCipher>,
    pub lm_endpoints: Vec<LmEndpoint>,
    /// Serve the dev-only test endpoints (clock control, mock wallet, ...).
    pub test_endpoints: bool,
    /// Stripe secret key; enables the HTTP Stripe gateway outside dev.
    pub stripe_secret_key: Option<String>,
}

/// Shared handle passed to every server route and background task.
pub struct GmContext {
    pub deploy_env: DeployEnv,
    pub db: Db,
    pub clock: Clock,
    /// Present iff test endpoints are enabled (dev only).
    pub mock_clock: Option<MockClock>,
    pub engine: BillingEngine,
    pub queue: TaskQueue,
    pub syncer: Arc<VaultSyncer>,
    pub poller: Arc<LmPoller>,
    /// Present iff mock providers are active (dev only).
    pub mock_state: Option<Arc<MockProviderState>>,
    pub test_endpoints: bool,
}

/// Build the context plus the queue receiver for the worker task.
pub fn build(config: GmConfig) -> anyhow::Result<(Arc<GmContext>, TaskReceiver)> {
    // Test endpoints (and with them the mock clock) must never exist
    // outside dev; callers abort the process on this error.
    config
        .deploy_env
        .validate_test_endpoints(config.test_endpoints)
        .context("Refusing to start")?;

    let db = Db::new();

    let (clock, mock_clock) = if config.test_endpoints {
        let (clock, mock_clock) = Clock::mock_at(TimestampMs::now());
        (clock, Some(mock_clock))
    } else {
        (Clock::system(), None)
    };

    let store = VaultStore::new(config.vault_dir, config.vault_keys);
    let syncer = Arc::new(VaultSyncer::new(db.clone(), store));
    let poller = Arc::new(LmPoller::new(
        db.clone(),
        clock.clone(),
        config.lm_endpoints,
    )?);
    let (queue, receiver) = queue::task_queue();

    // Providers: mock-backed in dev, real gateways elsewhere.
    let mock_state = if config.deploy_env.is_dev() {
        Some(MockProviderState::new(config.deploy_env)?)
    } else {
        None
    };

    let escrow = Arc::new(EscrowProvider::new(
        db.clone(),
        clock.clone(),
        mock_state.clone(),
    ));
    let mut providers: Vec<Arc<dyn PaymentProvider>> = vec![escrow.clone()];

    match (&mock_state, &config.stripe_secret_key) {
        (Some(mock_state), _) => {
            let gateway = Arc::new(MockStripeGateway::new(mock_state.clone()));
            providers.push(Arc::new(StripeProvider::new(db.clone(), gateway)));
        }
        (None, Some(secret_key)) => {
            let gateway = Arc::new(
                HttpStripeGateway::new(secret_key.clone())
                    .context("Invalid Stripe secret key")?,
            );
            providers.push(Arc::new(StripeProvider::new(db.clone(), gateway)));
        }
        (None, None) => {}
    }
    providers.push(Arc::new(PaypalProvider::new(
        db.clone(),
        mock_state.clone(),
    )));

    let engine = BillingEngine::new(
        db.clone(),
        clock.clone(),
        providers,
        escrow,
        QueueSyncTrigger::new(queue.clone()),
    );

    let context = Arc::new(GmContext {
        deploy_env: config.deploy_env,
        db,
        clock,
        mock_clock,
        engine,
        queue,
        syncer,
        poller,
        mock_state,
        test_endpoints: config.test_endpoints,
    });
    Ok((context, receiver))
}
