//! Single-shot refresh latch
//!
//! Prometheus caches the bearer token it scrapes with. When the token
//! Secret is replaced, the ServiceMonitor has to be recreated once so the
//! new credentials are picked up. Whoever notices the stale token flips
//! the latch; the first consumer in the pass performs the refresh.

use crate::error::ControllerError;
use std::future::Future;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
pub struct Refresher {
    up_to_date: Mutex<bool>,
}

impl Default for Refresher {
    fn default() -> Self {
        Self::new()
    }
}

impl Refresher {
    pub fn new() -> Self {
        Self {
            up_to_date: Mutex::new(true),
        }
    }

    pub async fn set_should_refresh(&self) {
        *self.up_to_date.lock().await = false;
    }

    /// Run `f` if a refresh is pending. The latch is cleared only when `f`
    /// succeeds, so a failed refresh is retried by the next consumer.
    pub async fn refresh<F, Fut>(&self, f: F) -> Result<(), ControllerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), ControllerError>>,
    {
        let mut up_to_date = self.up_to_date.lock().await;
        if *up_to_date {
            return Ok(());
        }
        debug!("Refreshing the monitoring configuration");
        f().await?;
        *up_to_date = true;
        Ok(())
    }

    pub async fn is_up_to_date(&self) -> bool {
        *self.up_to_date.lock().await
    }
}
