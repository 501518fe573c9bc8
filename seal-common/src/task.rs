//! Named task handles and the binaries' standard join-until-shutdown loop.

use std::{
    borrow::Cow,
    fmt::{self, Display},
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::{stream::FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn, Instrument};

use crate::shutdown::ShutdownSignal;

/// Errors that can occur when joining [`SealTask`]s.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Static task finished prematurely: {name}")]
    PrematureFinish { name: Cow<'static, str> },
    #[error("Some tasks failed to finish on time: {hung_tasks:?}")]
    Hung { hung_tasks: Vec<String> },
}

/// A thin wrapper around [`tokio::task::JoinHandle`] that:
///
/// (1) propagates panics instead of catching them
/// (2) adds the `#[must_use]` lint to ensure that all spawned tasks are
///     joined or explictly annotated that no joining is required. Use
///     [`SealTask::detach`] to make it clear that the spawned task should be
///     detached from the handle. Once detached, a task can't be joined.
///
/// [`SealTask`] also includes a task name for improved debuggability; the
/// task logs its name and join status when it finishes.
#[must_use]
pub struct SealTask<T> {
    task: JoinHandle<T>,
    name: Cow<'static, str>,
}

impl<T> SealTask<T> {
    /// Spawns a named task which inherits from the current span.
    /// This is generally what you want to use.
    #[inline]
    pub fn spawn<F>(
        name: impl Into<Cow<'static, str>>,
        future: F,
    ) -> SealTask<F::Output>
    where
        F: Future<Output = T> + Send + 'static,
        F::Output: Send + 'static,
    {
        // Instrument the future so that the current tracing span propagates
        // past spawn boundaries.
        let span = tracing::Span::current();
        Self::spawn_with_span(name, span, future)
    }

    /// Spawns a named task with a custom span. Include `parent: None` in the
    /// `span!` macro call to prevent inheriting from the current span.
    #[inline]
    pub fn spawn_with_span<F>(
        name: impl Into<Cow<'static, str>>,
        span: tracing::Span,
        future: F,
    ) -> SealTask<F::Output>
    where
        F: Future<Output = T> + Send + 'static,
        F::Output: Send + 'static,
    {
        let name = name.into();
        debug!("Spawning task: {name}");
        Self {
            task: tokio::spawn(future.instrument(span)),
            name,
        }
    }

    /// Drop the task handle, detaching it so it continues running in the
    /// background. Use sparingly; a detached task can't be joined, so its
    /// panics are only surfaced via logs.
    #[inline]
    pub fn detach(self) {
        std::mem::drop(self)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    #[inline]
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Instrument this task so that its result is logged when it finishes.
    /// The [`Future::Output`] is also mapped to the task name.
    #[inline]
    pub fn logged(self) -> LoggedSealTask<T> {
        LoggedSealTask(self)
    }
}

impl<T> Future for SealTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        let result = match Pin::new(&mut self.task).poll(cx) {
            Poll::Ready(result) => result,
            Poll::Pending => return Poll::Pending,
        };

        let result = match result {
            Ok(val) => Ok(val),
            Err(join_err) => match join_err.try_into_panic() {
                // If the inner spawned task panicked, then propagate the
                // panic to the `SealTask` poller.
                Ok(panic_reason) => {
                    error!("Task '{name}' panicked!", name = self.name());
                    std::panic::resume_unwind(panic_reason)
                }
                Err(join_err) => Err(join_err),
            },
        };

        Poll::Ready(result)
    }
}

/// A [`Future`] that wraps [`SealTask`] so its result is logged when it
/// finishes. The inner `T` is discarded and the [`Future::Output`] is mapped
/// to its name.
pub struct LoggedSealTask<T>(SealTask<T>);

impl<T> LoggedSealTask<T> {
    #[inline]
    pub fn name(&self) -> &str {
        self.0.name()
    }
}

impl<T> Future for LoggedSealTask<T> {
    type Output = Cow<'static, str>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map(|result| {
            let msg = TaskOutputDisplay {
                name: self.name(),
                result: result.as_ref().map(|_| ()),
            };

            match &result {
                Ok(_) => info!("{msg}"),
                Err(e) if e.is_cancelled() => warn!("{msg}"),
                Err(_) => error!("{msg}"),
            }

            self.0.name.clone()
        })
    }
}

// Provides a [`Display`] impl for the result of a finished task.
struct TaskOutputDisplay<'a> {
    name: &'a str,
    result: Result<(), &'a JoinError>,
}

impl Display for TaskOutputDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join_label = match &self.result {
            Ok(_) => "finished",
            Err(e) if e.is_cancelled() => "cancelled",
            Err(e) if e.is_panic() => "panicked",
            _ => "(unknown join error)",
        };

        // "Task '<name>' <finished|cancelled|panicked>: [<error>]"
        let name = self.name;
        write!(f, "Task '{name}' {join_label}")?;

        if let Err(e) = self.result {
            write!(f, ": {e:#}")?;
        }

        Ok(())
    }
}

/// The binaries' standard way of handling structured task concurrency and
/// shutdown.
///
/// - "static" tasks are intended to run until the end of the program
///   lifetime. To prevent partial failures, this helper triggers a shutdown
///   if any static task finishes prematurely.
/// - All task handles are polled to ensure that any panics are propagated.
/// - After a shutdown signal is received, this helper waits for all remaining
///   tasks to complete, up to a `shutdown_timeout`.
///
/// NOTE: To propagate panics beyond this function, the callsite must still
/// poll the future returned here, and so on up to the top-level future!
pub async fn try_join_tasks_and_shutdown(
    static_tasks: Vec<SealTask<()>>,
    shutdown: ShutdownSignal,
    shutdown_timeout: Duration,
) -> Result<(), Error> {
    if static_tasks.is_empty() {
        let reason = shutdown.recv().await;
        info!("Shutdown ({reason}) with no tasks to join");
        return Ok(());
    }

    let mut static_tasks = static_tasks
        .into_iter()
        .map(SealTask::logged)
        .collect::<FuturesUnordered<_>>();

    let mut result = Ok(());

    // Wait for a shutdown signal and poll all tasks
    loop {
        tokio::select! {
            // Mitigate possible select! race after a shutdown signal is sent
            biased;
            reason = shutdown.recv() => {
                info!("Joining remaining tasks: shutdown ({reason})");
                break;
            }
            Some(name) = static_tasks.next() => {
                // A static task finished prematurely. Set our result to an
                // error, initiate a shutdown, and wait on the remaining
                // tasks.
                result = Err(Error::PrematureFinish { name });
                break shutdown.send("static task finished prematurely");
            }
        }
    }

    let shutdown_timeout_fut = tokio::time::sleep(shutdown_timeout);
    tokio::pin!(shutdown_timeout_fut);

    while !static_tasks.is_empty() {
        tokio::select! {
            Some(_name) = static_tasks.next() => (),
            () = &mut shutdown_timeout_fut => {
                let hung_tasks = static_tasks
                    .iter()
                    .map(|task| task.name().to_owned())
                    .collect::<Vec<_>>();

                return Err(Error::Hung { hung_tasks });
            }
        }
    }

    result
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn join_returns_value() {
        let task = SealTask::spawn("adder", async { 1 + 2 });
        assert_eq!(task.await.unwrap(), 3);
    }

    #[tokio::test]
    #[should_panic(expected = "boom")]
    async fn join_propagates_panics() {
        let task = SealTask::spawn("bomb", async { panic!("boom") });
        let _ = task.await;
    }

    #[tokio::test(start_paused = true)]
    async fn premature_finish_is_an_error() {
        let shutdown = ShutdownSignal::new();
        let tasks = vec![SealTask::spawn("early-bird", async {})];
        let result = try_join_tasks_and_shutdown(
            tasks,
            shutdown,
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(Error::PrematureFinish { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn clean_shutdown() {
        let shutdown = ShutdownSignal::new();
        let task_shutdown = shutdown.clone();
        let tasks = vec![SealTask::spawn("worker", async move {
            let reason = task_shutdown.recv().await;
            assert_eq!(reason, "test teardown");
        })];
        shutdown.send("test teardown");
        let result = try_join_tasks_and_shutdown(
            tasks,
            shutdown,
            Duration::from_secs(1),
        )
        .await;
        assert!(result.is_ok());
    }
}
