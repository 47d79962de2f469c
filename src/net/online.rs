//! Host network status.
//!
//! The host (OS link monitor, browser online flag, container probe) reports
//! whether any network is available at all. The breaker rejects calls while the
//! host is offline, and network-changed retries wait on the online signal.

use std::time::Duration;
use tokio::sync::watch;

/// Shared handle on the host's online/offline signal.
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    tx: watch::Sender<bool>,
}

impl NetworkStatus {
    /// Starts online.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { tx }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Report a host link change. Only actual changes wake waiters.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "Host network status changed");
        }
    }

    /// Wait until the host reports online, up to `timeout`.
    ///
    /// Returns true if the host is online when the wait ends.
    pub async fn wait_online(&self, timeout: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        let woke = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|online| *online)).await,
            Ok(Ok(_))
        );
        woke || self.is_online()
    }
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_starts_online() {
        let status = NetworkStatus::new();
        assert!(status.is_online());
        assert!(status.wait_online(Duration::from_millis(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_online_wakes_on_change() {
        let status = NetworkStatus::new();
        status.set_online(false);

        let waiter = {
            let status = status.clone();
            tokio::spawn(async move { status.wait_online(Duration::from_secs(60)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        status.set_online(true);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_online_times_out_offline() {
        let status = NetworkStatus::new();
        status.set_online(false);
        assert!(!status.wait_online(Duration::from_secs(8)).await);
    }
}
