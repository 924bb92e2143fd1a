//! Fixed-period tick task backing each running network.

use crate::errors::LinkError;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Calls `tick` every `period` on the current runtime until stopped or
/// dropped. Delivery tasks spawned from a tick are not cancelled with it.
#[derive(Debug)]
pub struct TickDriver {
    name: String,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl TickDriver {
    pub fn spawn<F>(name: impl Into<String>, period: Duration, tick: F) -> Result<Self, LinkError>
    where
        F: Fn() + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| LinkError::NoExecutor)?;
        let name = name.into();
        let token = CancellationToken::new();

        let cancel = token.clone();
        let task_name = name.clone();
        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            debug!(driver = %task_name, ?period, "tick loop started");

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        trace!(driver = %task_name, "tick");
                        tick();
                    }
                }
            }
            debug!(driver = %task_name, "tick loop stopped");
        });

        Ok(Self {
            name,
            token,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancels the loop. The current tick, if any, runs to completion.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Cancels the loop and waits for the task to exit.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn ticks_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let driver = TickDriver::spawn("net", Duration::from_millis(10), move || {
            seen.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
        assert!(driver.is_running());

        tokio::time::sleep(Duration::from_millis(55)).await;
        let ticks = count.load(Ordering::Relaxed);
        // first tick fires immediately
        assert!((5..=6).contains(&ticks), "{ticks} ticks");

        driver.stop();
        assert!(!driver.is_running());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::Relaxed), ticks);
        driver.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_driver_stops_the_loop() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let driver = TickDriver::spawn("net", Duration::from_millis(10), move || {
            seen.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        drop(driver);
        let ticks = count.load(Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::Relaxed), ticks);
    }

    #[test]
    fn needs_a_runtime() {
        assert!(matches!(
            TickDriver::spawn("net", Duration::from_millis(10), || {}),
            Err(LinkError::NoExecutor)
        ));
    }
}
