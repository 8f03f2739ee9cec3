use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A cancellable one-shot timer.
///
/// Replaces the ad hoc `setTimeout` handle juggling of the original
/// dashboard: restarting always aborts the previously scheduled run, so at
/// most one run is ever pending, and dropping the task cancels it.
pub struct ScheduledTask {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduledTask {
    pub fn new() -> Self {
        Self {
            handle: Mutex::new(None),
        }
    }

    /// Schedule `fut` to run after `delay`, cancelling any pending run.
    pub fn restart<F>(&self, delay: Duration, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut guard = self.handle.lock().unwrap();
        if let Some(old) = guard.take() {
            old.abort();
        }
        *guard = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
        }));
    }

    /// Cancel the pending run, if any. Idempotent.
    pub fn cancel(&self) {
        if let Some(old) = self.handle.lock().unwrap().take() {
            old.abort();
        }
    }

    /// True while a run is scheduled or executing.
    pub fn is_scheduled(&self) -> bool {
        self.handle
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Default for ScheduledTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_restart_replaces_pending_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = ScheduledTask::new();

        for _ in 0..3 {
            let c = counter.clone();
            task.restart(Duration::from_millis(30), async move {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_prevents_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = ScheduledTask::new();

        let c = counter.clone();
        task.restart(Duration::from_millis(20), async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        task.cancel();
        assert!(!task.is_scheduled());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let task = ScheduledTask::new();
        task.cancel();
        task.cancel();
    }
}
