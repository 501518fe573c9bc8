//! GM <-> LM fleet tests: vault propagation end-to-end over real HTTP, and
//! the fleet-wide sync indicator.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use seal_api::{
    models::QueueTaskResponse,
    rest::RestClient,
    server::{spawn_server_task, LayerConfig},
};
use seal_common::{
    amount::UsdCents,
    env::DeployEnv,
    ids::{LmId, ServiceTier, ServiceType},
    shutdown::ShutdownSignal,
    time::TimestampMs,
    vaults::{VaultSeq, VaultType},
};
use seal_gm::{
    cli::EnvConfig,
    context::{self, GmConfig, GmContext},
    poller::LmEndpoint,
    queue::{spawn_worker, TaskReceiver, WorkerDeps},
    server,
};
use seal_lm::{
    handler::VaultAgent,
    server::{self as lm_server, LmContext},
};
use seal_store::rows::LmStatusRow;
use seal_vault::VaultStore;

struct Fleet {
    ctx: Arc<GmContext>,
    gm_url: String,
    lm_agents: Vec<Arc<VaultAgent>>,
    rest: RestClient,
    _shutdown: ShutdownSignal,
    _vault_dir: tempfile::TempDir,
}

fn any_port() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
}

/// Boot a dev GM (server + worker) and one LM (server) sharing a vault
/// directory, which stands in for the file-sync facility.
async fn boot_fleet() -> Fleet {
    seal_common::logger::init_for_testing("seal-gm-tests");
    let vault_dir = tempfile::tempdir().unwrap();
    let shutdown = ShutdownSignal::new();

    // LM first, so the GM knows its endpoint.
    let lm_store =
        VaultStore::new(vault_dir.path(), EnvConfig::dev_vault_keys());
    let (lm_clock, _) = seal_common::time::Clock::mock_at(TimestampMs::now());
    let lm_agents: Vec<Arc<VaultAgent>> = [VaultType::Sma, VaultType::Sta]
        .into_iter()
        .map(|vt| {
            Arc::new(VaultAgent::new(vt, lm_store.clone(), lm_clock.clone()))
        })
        .collect();
    let lm_ctx = Arc::new(LmContext {
        clock: lm_clock,
        agents: lm_agents.clone(),
    });
    let (lm_task, lm_addr) = spawn_server_task(
        any_port(),
        lm_server::router(lm_ctx),
        LayerConfig::default(),
        "seal-lm-test",
        shutdown.clone(),
    )
    .await
    .unwrap();
    lm_task.detach();

    // GM pointed at the LM.
    let (ctx, receiver) = context::build(GmConfig {
        deploy_env: DeployEnv::Dev,
        vault_dir: vault_dir.path().to_path_buf(),
        vault_keys: EnvConfig::dev_vault_keys(),
        lm_endpoints: vec![LmEndpoint {
            id: LmId("lm-test-1".to_owned()),
            name: "test edge".to_owned(),
            url: format!("http://{lm_addr}"),
        }],
        test_endpoints: true,
        stripe_secret_key: None,
    })
    .unwrap();

    spawn_gm(&ctx, receiver, &shutdown);

    let (gm_task, gm_addr) = spawn_server_task(
        any_port(),
        server::router(ctx.clone()),
        LayerConfig::default(),
        "seal-gm-test",
        shutdown.clone(),
    )
    .await
    .unwrap();
    gm_task.detach();

    Fleet {
        ctx,
        gm_url: format!("http://{gm_addr}"),
        lm_agents,
        rest: RestClient::new(Duration::from_secs(5)).unwrap(),
        _shutdown: shutdown,
        _vault_dir: vault_dir,
    }
}

fn spawn_gm(
    ctx: &Arc<GmContext>,
    receiver: TaskReceiver,
    shutdown: &ShutdownSignal,
) {
    spawn_worker(
        receiver,
        WorkerDeps {
            syncer: ctx.syncer.clone(),
            poller: ctx.poller.clone(),
            engine: ctx.engine.clone(),
        },
        shutdown.clone(),
    )
    .detach();
}

/// S5: mutate the allowlist, sync, let the LM apply, poll, and observe the
/// change reported live.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s5_vault_propagation() {
    let fleet = boot_fleet().await;
    let engine = &fleet.ctx.engine;

    let cid = engine.get_or_create_customer("0xalice").await;
    engine.deposit(cid, UsdCents::from_cents_u32(100_00)).await.unwrap();
    engine
        .subscribe(cid, ServiceType::Seal, ServiceTier::Pro)
        .await
        .unwrap();

    // The gateway mutation records a seq and flags pending work.
    let seq = engine
        .set_ip_allowlist(
            cid,
            ServiceType::Seal,
            seal_common::ids::Network::Mainnet,
            vec!["10.0.0.0/8".to_owned()],
        )
        .await
        .unwrap();
    {
        let tx = fleet.ctx.db.begin().await;
        let counters = tx.system_control.vaults.get(VaultType::Sma);
        assert!(counters.max_config_change_seq >= seq);
    }

    // Not yet live anywhere.
    assert!(!engine.is_change_synced(VaultType::Sma, seq).await);

    // sync-all through the public queue endpoint, wait-for-completion.
    let url = format!("{}/api/queue/sync-all", fleet.gm_url);
    let resp: QueueTaskResponse =
        fleet.rest.post_empty(&url).await.unwrap();
    assert!(resp.success);
    assert_eq!(resp.completed, Some(true));

    // The vault landed at or above the recorded seq.
    let written = fleet.ctx.syncer.vault_seq(VaultType::Sma).await;
    assert!(written >= seq);

    // The LM polls its receive directory and applies.
    let diff = fleet.lm_agents[0].check_for_update().unwrap();
    assert_eq!(diff.to_seq, written);
    let health = fleet.lm_agents[0].health();
    assert!(health.applied.unwrap().seq >= seq);

    // The GM polls the fleet (through the worker) and the API now reports
    // the mutation as live.
    let url = format!("{}/test/queue/refresh-lm-status", fleet.gm_url);
    let resp: QueueTaskResponse =
        fleet.rest.post_empty(&url).await.unwrap();
    assert!(resp.success);

    assert!(engine.is_change_synced(VaultType::Sma, seq).await);

    // A hypothetical later change is not live.
    assert!(
        !engine
            .is_change_synced(VaultType::Sma, written.plus(5))
            .await
    );

    // Fleet status reflects the reachable LM.
    let status = fleet.ctx.poller.status().await;
    assert_eq!(status.managers.len(), 1);
    assert!(status.managers[0].reachable);
}

/// Property 7: synced iff every live LM reports applied >= the change seq;
/// stale and errored rows don't count as live.
#[tokio::test]
async fn fleet_sync_indicator() {
    let vault_dir = tempfile::tempdir().unwrap();
    let (ctx, _receiver) = context::build(GmConfig {
        deploy_env: DeployEnv::Dev,
        vault_dir: vault_dir.path().to_path_buf(),
        vault_keys: EnvConfig::dev_vault_keys(),
        lm_endpoints: Vec::new(),
        test_endpoints: true,
        stripe_secret_key: None,
    })
    .unwrap();

    let now = ctx.clock.now();
    let seq = VaultSeq(10);

    // No live rows at all: undefined, reported unsynced.
    assert!(!ctx.engine.is_change_synced(VaultType::Sma, seq).await);

    let row = |lm: &str, applied: u64, last_seen: TimestampMs, err: Option<&str>| {
        LmStatusRow {
            lm_id: LmId(lm.to_owned()),
            vault_type: VaultType::Sma,
            applied_seq: Some(VaultSeq(applied)),
            processing_seq: None,
            entries: 1,
            last_seen_at: last_seen,
            last_error: err.map(str::to_owned),
        }
    };

    // One live LM at 12, one live LM at 9: min is 9, change 10 not synced.
    {
        let mut tx = ctx.db.begin().await;
        tx.upsert_lm_status(row("lm-a", 12, now, None));
        tx.upsert_lm_status(row("lm-b", 9, now, None));
        tx.commit();
    }
    assert!(!ctx.engine.is_change_synced(VaultType::Sma, seq).await);

    // The laggard catches up: synced.
    {
        let mut tx = ctx.db.begin().await;
        tx.upsert_lm_status(row("lm-b", 10, now, None));
        tx.commit();
    }
    assert!(ctx.engine.is_change_synced(VaultType::Sma, seq).await);

    // A behind-but-stale row does not drag the minimum down.
    let stale = TimestampMs::from_i64(now.as_i64() - 60_000).unwrap();
    {
        let mut tx = ctx.db.begin().await;
        tx.upsert_lm_status(row("lm-c", 2, stale, None));
        tx.commit();
    }
    assert!(ctx.engine.is_change_synced(VaultType::Sma, seq).await);

    // An errored row is not live either, but a *fresh* lagging row is.
    {
        let mut tx = ctx.db.begin().await;
        tx.upsert_lm_status(row("lm-d", 3, now, Some("apply failed")));
        tx.commit();
    }
    assert!(ctx.engine.is_change_synced(VaultType::Sma, seq).await);
    {
        let mut tx = ctx.db.begin().await;
        tx.upsert_lm_status(row("lm-e", 3, now, None));
        tx.commit();
    }
    assert!(!ctx.engine.is_change_synced(VaultType::Sma, seq).await);
}

/// Queue semantics over HTTP: fire-and-forget vs waited, and dedup of an
/// identical queued task.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queue_endpoint_semantics() {
    let fleet = boot_fleet().await;

    // Waited submission completes.
    let url = format!("{}/api/queue/sync-all", fleet.gm_url);
    let resp: QueueTaskResponse = fleet.rest.post_empty(&url).await.unwrap();
    assert!(resp.success);
    assert_eq!(resp.completed, Some(true));
    assert!(resp.task_id.is_some());

    // Fire-and-forget submission is queued.
    let url_async = format!("{}/api/queue/sync-all?async=true", fleet.gm_url);
    let resp: QueueTaskResponse =
        fleet.rest.post_empty(&url_async).await.unwrap();
    assert!(resp.success);
    // Either freshly queued or deduplicated against an in-flight pass;
    // both carry the task id.
    assert!(resp.queued == Some(true) || resp.reason.is_some());
    assert!(resp.task_id.is_some());
}
