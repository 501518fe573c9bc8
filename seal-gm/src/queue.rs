//! The GM task queue: an in-memory FIFO executed serially by one worker.
//!
//! `sync-all` deduplicates: at most one instance is queued or running at a
//! time, and later submitters are handed the in-flight task's id. Submission
//! supports both fire-and-forget and wait-for-completion; the latter is what
//! the test suites use to avoid sleeping.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use seal_common::{
    ids::{CustomerId, TaskId},
    shutdown::ShutdownSignal,
    task::SealTask,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, info_span, warn};

use crate::{poller::LmPoller, syncer::VaultSyncer};

/// The coarse-grained tasks the coordinator executes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GmTask {
    SyncAll,
    ReconcilePayments(CustomerId),
    RefreshLmStatus,
}

impl GmTask {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SyncAll => "sync-all",
            Self::ReconcilePayments(_) => "reconcile-payments",
            Self::RefreshLmStatus => "refresh-lm-status",
        }
    }
}

/// How a submission was handled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SubmitOutcome {
    Queued(TaskId),
    /// An identical task is already queued or running; its id is returned.
    Deduplicated(TaskId),
}

impl SubmitOutcome {
    pub fn task_id(self) -> TaskId {
        match self {
            Self::Queued(id) | Self::Deduplicated(id) => id,
        }
    }
}

struct QueueState {
    next_id: u64,
    /// The queued-or-running `sync-all`, if any.
    inflight_sync_all: Option<TaskId>,
    /// Completion waiters per task id.
    waiters: HashMap<TaskId, Vec<oneshot::Sender<()>>>,
}

struct QueuedTask {
    id: TaskId,
    task: GmTask,
}

/// Cloneable submission handle.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
    state: Arc<Mutex<QueueState>>,
}

/// The worker half; pass to [`spawn_worker`].
pub struct TaskReceiver {
    rx: mpsc::UnboundedReceiver<QueuedTask>,
    state: Arc<Mutex<QueueState>>,
}

/// Create a queue and its (single) receiver.
pub fn task_queue() -> (TaskQueue, TaskReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = Arc::new(Mutex::new(QueueState {
        next_id: 0,
        inflight_sync_all: None,
        waiters: HashMap::new(),
    }));
    (
        TaskQueue {
            tx,
            state: state.clone(),
        },
        TaskReceiver { rx, state },
    )
}

impl TaskQueue {
    /// Fire-and-forget submission.
    pub fn submit(&self, task: GmTask) -> SubmitOutcome {
        let mut state = self.state.lock().expect("queue state poisoned");

        if task == GmTask::SyncAll {
            if let Some(existing) = state.inflight_sync_all {
                return SubmitOutcome::Deduplicated(existing);
            }
        }

        state.next_id += 1;
        let id = TaskId(state.next_id);
        if task == GmTask::SyncAll {
            state.inflight_sync_all = Some(id);
        }
        drop(state);

        // The worker owns the receiving side for the process lifetime; a
        // send failure means we're shutting down.
        if self.tx.send(QueuedTask { id, task }).is_err() {
            warn!("task queue is closed; dropping submission");
        }
        SubmitOutcome::Queued(id)
    }

    /// Submit and wait until the task (or the identical in-flight task)
    /// completes.
    pub async fn submit_and_wait(&self, task: GmTask) -> SubmitOutcome {
        let outcome = self.submit(task);
        let rx = {
            let mut state = self.state.lock().expect("queue state poisoned");
            let (done_tx, done_rx) = oneshot::channel();
            state
                .waiters
                .entry(outcome.task_id())
                .or_default()
                .push(done_tx);
            done_rx
        };
        // An error here means the worker dropped the waiter set mid-task,
        // which only happens at shutdown.
        let _ = rx.await;
        outcome
    }
}

/// Everything the worker needs to execute tasks.
pub struct WorkerDeps {
    pub syncer: Arc<VaultSyncer>,
    pub poller: Arc<LmPoller>,
    pub engine: seal_billing::BillingEngine,
}

/// Spawn the single task worker. Tasks run serially, each to completion; no
/// two reconciliations can race the same customer.
pub fn spawn_worker(
    receiver: TaskReceiver,
    deps: WorkerDeps,
    shutdown: ShutdownSignal,
) -> SealTask<()> {
    let span = info_span!(parent: None, "(gm-worker)");
    SealTask::spawn_with_span("gm-worker", span, async move {
        worker_loop(receiver, deps, shutdown).await
    })
}

async fn worker_loop(
    mut receiver: TaskReceiver,
    deps: WorkerDeps,
    shutdown: ShutdownSignal,
) {
    loop {
        let queued = tokio::select! {
            biased;
            reason = shutdown.recv() => {
                info!("worker stopping: shutdown ({reason})");
                break;
            }
            queued = receiver.rx.recv() => match queued {
                Some(queued) => queued,
                None => break,
            },
        };

        let QueuedTask { id, task } = queued;
        info!(%id, name = task.name(), "executing task");

        let result = match &task {
            GmTask::SyncAll => deps.syncer.sync_all().await,
            GmTask::ReconcilePayments(customer_id) => deps
                .engine
                .reconcile_payments(*customer_id)
                .await
                .map(|_| ())
                .map_err(|e| anyhow::anyhow!("{e}")),
            GmTask::RefreshLmStatus => {
                deps.poller.poll_once().await;
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(%id, name = task.name(), "task failed: {e:#}");
        }

        let waiters = {
            let mut state =
                receiver.state.lock().expect("queue state poisoned");
            if task == GmTask::SyncAll
                && state.inflight_sync_all == Some(id)
            {
                state.inflight_sync_all = None;
            }
            state.waiters.remove(&id).unwrap_or_default()
        };
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }
    info!("gm worker stopped");
}
