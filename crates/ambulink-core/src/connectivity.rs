//! Reachability tracking.
//!
//! Platform adapters (or the HTTP probe) report observations through
//! [`ConnectivityMonitor::set_online`]; subscribers only ever see transitions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::normalize_endpoint;
use crate::Result;

/// Online/offline signal shared by the outbox engine and the UI.
#[derive(Clone, Debug)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx: Arc::new(tx) }
    }

    /// Report an observation; returns true when it was a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "Connectivity changed");
        }
        changed
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver that wakes on each transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Invoke `callback` with the new state on every transition.
    ///
    /// The task ends once every monitor handle is dropped.
    pub fn on_change<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(bool) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                callback(online);
            }
        })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

/// One reachability check against the facility side.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Treats any 2xx from the hub's `/healthz` as reachable.
#[derive(Clone)]
pub struct HttpReachabilityProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpReachabilityProbe {
    pub fn new(hub_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base = normalize_endpoint(hub_url.into())?;
        Ok(Self {
            url: format!("{base}/healthz"),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpReachabilityProbe {
    async fn probe(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::debug!(error = %error, "Reachability probe failed");
                false
            }
        }
    }
}

/// Run `probe` every `interval` and feed the results into `monitor`.
pub fn spawn_probe(
    monitor: ConnectivityMonitor,
    probe: Arc<dyn ReachabilityProbe>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let online = probe.probe().await;
            monitor.set_online(online);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn set_online_reports_transitions_only() {
        let monitor = ConnectivityMonitor::new(false);
        assert!(!monitor.set_online(false));
        assert!(monitor.set_online(true));
        assert!(!monitor.set_online(true));
        assert!(monitor.is_online());
        assert!(monitor.set_online(false));
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn on_change_sees_each_transition() {
        let monitor = ConnectivityMonitor::new(false);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _task = monitor.on_change(move |online| {
            let _ = tx.send(online);
        });
        tokio::task::yield_now().await;

        monitor.set_online(true);
        assert_eq!(rx.recv().await, Some(true));
        monitor.set_online(true);
        monitor.set_online(false);
        assert_eq!(rx.recv().await, Some(false));
    }

    #[test]
    fn http_probe_requires_http_url() {
        assert!(HttpReachabilityProbe::new("hub.local", Duration::from_secs(1)).is_err());
        assert!(HttpReachabilityProbe::new("http://hub.local/", Duration::from_secs(1)).is_ok());
    }

    struct SwitchProbe(AtomicBool);

    #[async_trait]
    impl ReachabilityProbe for SwitchProbe {
        async fn probe(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_probe_drives_monitor() {
        let monitor = ConnectivityMonitor::new(false);
        let probe = Arc::new(SwitchProbe(AtomicBool::new(true)));
        let mut rx = monitor.subscribe();
        let task = spawn_probe(monitor.clone(), probe.clone(), Duration::from_secs(10));

        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        probe.0.store(false, Ordering::SeqCst);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
        task.abort();
    }
}
