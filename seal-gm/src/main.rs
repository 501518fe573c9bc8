use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use seal_api::server::{spawn_server_task, LayerConfig};
use seal_common::{
    constants::GM_PERIODIC_INTERVAL,
    logger,
    shutdown::ShutdownSignal,
    task::{self, SealTask},
};
use seal_gm::{
    cli::{Args, EnvConfig},
    context::{self, GmConfig, GmContext},
    queue::{spawn_worker, GmTask, WorkerDeps},
    server, startup,
};
use tracing::{info, info_span, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init("seal-gm");

    let args: Args = argh::from_env();
    let env_config = EnvConfig::from_env()?;

    // Launching with test endpoints against a non-dev environment aborts
    // here, before anything binds.
    env_config
        .deploy_env
        .validate_test_endpoints(args.test_endpoints)
        .context("Refusing to start")?;

    let lm_endpoints = args.lm_endpoints()?;
    info!(
        deploy_env = %env_config.deploy_env,
        port = args.port,
        lms = lm_endpoints.len(),
        "starting seal-gm"
    );

    let (ctx, receiver) = context::build(GmConfig {
        deploy_env: env_config.deploy_env,
        vault_dir: args.vault_dir,
        vault_keys: env_config.vault_keys,
        lm_endpoints,
        test_endpoints: args.test_endpoints,
        stripe_secret_key: env_config.stripe_secret_key,
    })?;

    // Disk may be ahead of a freshly-reset db; reconcile before serving.
    startup::reconcile_startup_state(&ctx.db, ctx.syncer.store()).await?;

    let shutdown = ShutdownSignal::new();

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.port));
    let (server_task, _addr) = spawn_server_task(
        bind_addr,
        server::router(ctx.clone()),
        LayerConfig::default(),
        "seal-gm-api",
        shutdown.clone(),
    )
    .await?;

    let worker_task = spawn_worker(
        receiver,
        WorkerDeps {
            syncer: ctx.syncer.clone(),
            poller: ctx.poller.clone(),
            engine: ctx.engine.clone(),
        },
        shutdown.clone(),
    );

    let periodic_task = spawn_periodic_task(ctx.clone(), shutdown.clone());
    let signal_task = spawn_signal_listener(shutdown.clone());

    task::try_join_tasks_and_shutdown(
        vec![server_task, worker_task, periodic_task, signal_task],
        shutdown,
        SHUTDOWN_TIMEOUT,
    )
    .await
    .map_err(anyhow::Error::from)
}

/// Poll the fleet, enqueue a sync pass, and run the billing periodic job on
/// a fixed interval.
fn spawn_periodic_task(
    ctx: Arc<GmContext>,
    shutdown: ShutdownSignal,
) -> SealTask<()> {
    let span = info_span!(parent: None, "(gm-periodic)");
    SealTask::spawn_with_span("gm-periodic", span, async move {
        let mut interval = tokio::time::interval(GM_PERIODIC_INTERVAL);
        interval
            .set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                reason = shutdown.recv() => {
                    info!("periodic task stopping: shutdown ({reason})");
                    break;
                }
                _ = interval.tick() => {}
            }

            ctx.poller.poll_once().await;
            ctx.queue.submit(GmTask::SyncAll);
            if let Err(e) = ctx.engine.run_periodic_job().await {
                warn!("periodic billing job failed: {e}");
            }
        }
        info!("periodic task stopped");
    })
}

fn spawn_signal_listener(shutdown: ShutdownSignal) -> SealTask<()> {
    SealTask::spawn("signal-listener", async move {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {}
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("received ctrl-c; shutting down"),
                    Err(e) => warn!("ctrl-c listener failed: {e}"),
                }
                shutdown.send("ctrl-c");
            }
        }
    })
}
