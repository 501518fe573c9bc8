//! Graceful-shutdown signalling shared by the binaries' task trees.

use std::{
    borrow::Cow,
    sync::{Arc, OnceLock},
};

use tokio::sync::Semaphore;

/// A one-shot shutdown broadcast, tagged with the cause that fired it.
///
/// - Clone to get another handle; every clone observes the same signal.
/// - A signal sent before a task subscribes is still observed.
/// - Sending twice is safe; the first caller's reason wins and later
///   reasons are dropped.
/// - [`recv`] resolves to the winning reason, so long-lived tasks can log
///   which trigger (ctrl-c, premature task exit, test teardown) brought
///   them down.
///
/// The fanout itself is a zero-permit [`Semaphore`]: closing it fails every
/// pending and future [`acquire`], waking all receivers at once. The reason
/// slot is written before the close, so a receiver never observes a signal
/// without its cause.
///
/// [`recv`]: ShutdownSignal::recv
/// [`acquire`]: Semaphore::acquire
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    semaphore: Semaphore,
    reason: OnceLock<Cow<'static, str>>,
}

impl ShutdownSignal {
    /// Construct a new [`ShutdownSignal`].
    /// This function should only be called once per binary.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                semaphore: Semaphore::new(0),
                reason: OnceLock::new(),
            }),
        }
    }

    /// Fire the signal. The first caller's `reason` is the one every
    /// receiver sees; subsequent sends are no-ops.
    pub fn send(&self, reason: impl Into<Cow<'static, str>>) {
        let _ = self.inner.reason.set(reason.into());
        self.inner.semaphore.close();
    }

    /// Wait for the signal; resolves to the reason it was sent with.
    /// If the signal has already fired, this returns immediately.
    pub async fn recv(&self) -> &str {
        self.inner
            .semaphore
            .acquire()
            .await
            .map_err(|_| ())
            .expect_err("Shouldn't've been able to acquire a permit");
        self.reason().unwrap_or("unspecified")
    }

    /// Waits for the signal, taking ownership of the handle and discarding
    /// the reason. Useful for graceful-shutdown APIs which require
    /// `impl Future<Output = ()> + 'static`.
    pub async fn recv_owned(self) {
        let _reason = self.recv().await;
    }

    /// The reason the signal fired with, or [`None`] if it hasn't fired.
    pub fn reason(&self) -> Option<&str> {
        self.inner.reason.get().map(|reason| reason.as_ref())
    }

    /// Immediately returns whether the signal has been sent.
    pub fn try_recv(&self) -> bool {
        self.inner.semaphore.is_closed()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::time;

    use super::*;

    #[test]
    fn first_reason_wins() {
        let shutdown = ShutdownSignal::new();
        assert_eq!(shutdown.reason(), None);

        shutdown.send("ctrl-c");
        shutdown.send("premature task exit");
        shutdown.send("ctrl-c again");

        assert!(shutdown.try_recv());
        assert_eq!(shutdown.reason(), Some("ctrl-c"));
    }

    #[tokio::test(start_paused = true)]
    async fn receivers_observe_the_reason() {
        let shutdown1 = ShutdownSignal::new();
        let shutdown2 = shutdown1.clone();

        let waiter = tokio::spawn(async move {
            shutdown2.recv().await.to_owned()
        });
        time::sleep(Duration::from_secs(1)).await;
        shutdown1.send("test teardown");

        assert_eq!(waiter.await.unwrap(), "test teardown");
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_after_send_is_ok() {
        let shutdown1 = ShutdownSignal::new();
        shutdown1.send("early");

        // 'Subscribing' after the signal fired should finish immediately,
        // with the reason intact.
        let shutdown2 = shutdown1.clone();
        assert!(shutdown2.try_recv());
        let reason = time::timeout(Duration::from_nanos(1), shutdown2.recv())
            .await
            .expect("Did not finish immediately");
        assert_eq!(reason, "early");
    }
}
