//! Lifetime scope for background subscriptions.
//!
//! Write-through caches follow their backing store by draining its change
//! stream in a background task. Those tasks belong to a [`SubscriptionScope`]
//! supplied by the caller, and they stop when the scope is cancelled, shut
//! down or dropped, so a store that outlives its cache is never left feeding
//! a dead cache.

use parking_lot::Mutex;
use std::future::Future;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Owner of a group of cancellable background tasks.
pub struct SubscriptionScope {
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SubscriptionScope {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Run `task` until it finishes or the scope ends.
    ///
    /// Must be called from within a Tokio runtime. Spawning on a cancelled
    /// scope does nothing.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            tracing::debug!(task = name, "Scope already cancelled, not spawning");
            return;
        }

        let handle = tokio::spawn(async move {
            tracing::info!(task = name, "Subscription started");
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown_rx) => {
                    tracing::info!(task = name, "Subscription cancelled");
                }
                _ = task => {
                    tracing::info!(task = name, "Subscription ended");
                }
            }
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|handle| !handle.is_finished());
        tasks.push(handle);
    }

    /// Stop every task now.
    ///
    /// Tasks are aborted at their next suspension point; use
    /// [`shutdown`](Self::shutdown) to wait until they are gone.
    pub fn cancel(&self) {
        self.shutdown_tx.send_replace(true);
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }

    /// Signal every task to stop and wait for all of them.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::warn!(error = %e, "Subscription task panicked");
                }
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Number of tasks still running.
    pub fn active_tasks(&self) -> usize {
        self.tasks
            .lock()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl Default for SubscriptionScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SubscriptionScope {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_shutdown_stops_pending_tasks() {
        let scope = SubscriptionScope::new();
        scope.spawn("forever", std::future::pending());
        scope.spawn("forever-too", std::future::pending());
        assert_eq!(scope.active_tasks(), 2);

        scope.shutdown().await;
        assert!(scope.is_cancelled());
        assert_eq!(scope.active_tasks(), 0);
    }

    #[tokio::test]
    async fn test_cancel_aborts_and_spawn_after_cancel_is_ignored() {
        let scope = SubscriptionScope::new();
        scope.spawn("waiting", std::future::pending());

        scope.cancel();
        assert!(scope.is_cancelled());
        assert_eq!(scope.active_tasks(), 0);

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        scope.spawn("late", async move {
            flag.store(true, Ordering::SeqCst);
        });
        tokio::task::yield_now().await;
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_finished_tasks_are_not_counted() {
        let scope = SubscriptionScope::new();
        let (tx, rx) = oneshot::channel();
        scope.spawn("short", async move {
            let _ = tx.send(());
        });
        rx.await.unwrap();
        scope.shutdown().await;
        assert_eq!(scope.active_tasks(), 0);
    }

    #[tokio::test]
    async fn test_drop_cancels() {
        let (tx, rx) = oneshot::channel::<()>();
        {
            let scope = SubscriptionScope::new();
            scope.spawn("held", async move {
                std::future::pending::<()>().await;
                drop(tx);
            });
        }
        // Aborting drops the task's future and with it the sender.
        assert!(rx.await.is_err());
    }
}
