use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use seal_api::server::{spawn_server_task, LayerConfig};
use seal_common::{
    constants::LM_POLL_INTERVAL,
    logger,
    shutdown::ShutdownSignal,
    task::{self, SealTask},
    time::Clock,
};
use seal_lm::{
    cli::{Args, EnvConfig},
    handler::VaultAgent,
    server::{self, LmContext},
};
use seal_vault::VaultStore;
use tracing::{info, info_span, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init("seal-lm");

    let args: Args = argh::from_env();
    let env_config = EnvConfig::from_env()?;
    let vault_types = args.vault_types()?;

    info!(
        deploy_env = %env_config.deploy_env,
        port = args.port,
        vaults = ?vault_types,
        "starting seal-lm"
    );

    let clock = Clock::system();
    let store = VaultStore::new(args.receive_dir, env_config.vault_keys);
    let agents: Vec<Arc<VaultAgent>> = vault_types
        .into_iter()
        .map(|vt| {
            Arc::new(VaultAgent::new(vt, store.clone(), clock.clone()))
        })
        .collect();

    // Apply whatever already sits in the receive directory before serving,
    // so the first health report reflects reality.
    for agent in &agents {
        agent.check_for_update();
    }

    let ctx = Arc::new(LmContext {
        clock,
        agents: agents.clone(),
    });

    let shutdown = ShutdownSignal::new();

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.port));
    let (server_task, _addr) = spawn_server_task(
        bind_addr,
        server::router(ctx),
        LayerConfig::default(),
        "seal-lm-api",
        shutdown.clone(),
    )
    .await?;

    let poll_task = spawn_poll_task(agents, shutdown.clone());
    let signal_task = spawn_signal_listener(shutdown.clone());

    task::try_join_tasks_and_shutdown(
        vec![server_task, poll_task, signal_task],
        shutdown,
        SHUTDOWN_TIMEOUT,
    )
    .await
    .map_err(anyhow::Error::from)
}

/// Re-scan the receive directory for every installed vault type on a fixed
/// interval.
fn spawn_poll_task(
    agents: Vec<Arc<VaultAgent>>,
    shutdown: ShutdownSignal,
) -> SealTask<()> {
    let span = info_span!(parent: None, "(lm-poll)");
    SealTask::spawn_with_span("lm-poll", span, async move {
        let mut interval = tokio::time::interval(LM_POLL_INTERVAL);
        interval
            .set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                reason = shutdown.recv() => {
                    info!("poll task stopping: shutdown ({reason})");
                    break;
                }
                _ = interval.tick() => {}
            }
            for agent in &agents {
                if let Some(diff) = agent.check_for_update() {
                    info!(
                        vault_type = %agent.vault_type(),
                        seq = %diff.to_seq,
                        added = diff.added.len(),
                        removed = diff.removed.len(),
                        modified = diff.modified.len(),
                        "vault update applied"
                    );
                }
            }
        }
        info!("poll task stopped");
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
