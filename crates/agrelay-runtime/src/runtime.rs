use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::RuntimeConfig;
use crate::coordinator::Coordinator;
use crate::subscribers::SubscriberRegistry;

/// The one runtime value a daemon process owns. Constructed at startup
/// and passed to the transport adapters; there is no global state.
pub struct Daemon {
    coordinator: Arc<Coordinator>,
    subscribers: Arc<SubscriberRegistry>,
    background: Vec<JoinHandle<()>>,
}

impl Daemon {
    /// Sweep orphans, then start the shared poller and the heartbeat
    /// ticker. Must run inside a tokio runtime.
    pub fn start(config: RuntimeConfig) -> Self {
        let swept = agrelay_agent::sweep_orphans(&config.agent_binary);
        if swept > 0 {
            info!(swept, "terminated orphaned agent children at startup");
        }

        let subscribers = Arc::new(SubscriberRegistry::new());
        let coordinator = Coordinator::new(config.clone(), Arc::clone(&subscribers));

        let poller = {
            let coordinator = Arc::clone(&coordinator);
            let mut interval = tokio::time::interval(config.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tokio::spawn(async move {
                loop {
                    interval.tick().await;
                    coordinator.poll_tick().await;
                }
            })
        };

        let heartbeat = {
            let subscribers = Arc::clone(&subscribers);
            let mut interval = tokio::time::interval(config.heartbeat_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tokio::spawn(async move {
                loop {
                    interval.tick().await;
                    subscribers.heartbeat_all();
                }
            })
        };

        Self {
            coordinator,
            subscribers,
            background: vec![poller, heartbeat],
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn subscribers(&self) -> &Arc<SubscriberRegistry> {
        &self.subscribers
    }

    /// Graceful teardown: stop the tickers, kill owned children, close
    /// every subscriber stream
    pub async fn shutdown(&self) {
        for task in &self.background {
            task.abort();
        }
        self.coordinator.shutdown().await;
    }
}
