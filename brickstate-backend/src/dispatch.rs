//! Subscriber registry and event fan-out.

use crate::events::Event;
use crate::host::{Consumer, Host};
use brickstate_db::Database;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Outcome of delivering one event to every subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Holds the subscribed consumers and persists their names.
pub struct Dispatcher {
    subscribers: RwLock<Vec<Arc<dyn Consumer>>>,
    db: Database,
}

impl Dispatcher {
    pub fn new(db: Database) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            db,
        }
    }

    /// Subscribe a consumer by name. Unknown or unloaded consumers are skipped.
    /// Returns whether the consumer is subscribed afterwards.
    pub async fn subscribe<H: Host>(&self, host: &H, name: &str) -> bool {
        let already = self.subscribers.read().await.iter().any(|s| s.name() == name);

        let subscribed = if already {
            true
        } else {
            match host.lookup_consumer(name).await {
                Some(consumer) if consumer.is_loaded() => {
                    let mut subscribers = self.subscribers.write().await;
                    if !subscribers.iter().any(|s| s.name() == name) {
                        subscribers.push(consumer);
                        info!(consumer = name, "consumer subscribed");
                    }
                    true
                }
                Some(_) => {
                    warn!(consumer = name, "consumer not loaded, subscription skipped");
                    false
                }
                None => {
                    warn!(consumer = name, "unknown consumer, subscription skipped");
                    false
                }
            }
        };

        self.persist().await;
        subscribed
    }

    /// Remove a consumer by name. Removing an absent consumer is a no-op.
    pub async fn unsubscribe(&self, name: &str) {
        let removed = {
            let mut subscribers = self.subscribers.write().await;
            let before = subscribers.len();
            subscribers.retain(|s| s.name() != name);
            before != subscribers.len()
        };
        if removed {
            info!(consumer = name, "consumer unsubscribed");
        }
        self.persist().await;
    }

    /// Subscribe every name persisted by a previous run.
    pub async fn restore<H: Host>(&self, host: &H) -> brickstate_db::Result<()> {
        let names = self.db.load_subscriber_names().await?;
        debug!(count = names.len(), "restoring subscribers");
        for name in names {
            self.subscribe(host, &name).await;
        }
        Ok(())
    }

    pub async fn subscriber_names(&self) -> Vec<String> {
        self.subscribers
            .read()
            .await
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub async fn has_subscribers(&self) -> bool {
        !self.subscribers.read().await.is_empty()
    }

    /// Deliver `event` to every subscriber. A consumer that errors or panics
    /// is logged and skipped.
    pub async fn dispatch(&self, event: &Event) -> DispatchReport {
        let subscribers = self.subscribers.read().await.clone();
        let kind = event.kind();
        let mut report = DispatchReport::default();

        for consumer in subscribers {
            match catch_unwind(AssertUnwindSafe(|| consumer.emit(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    warn!(consumer = consumer.name(), %kind, error = %e, "consumer rejected event");
                    report.failed += 1;
                }
                Err(_) => {
                    error!(consumer = consumer.name(), %kind, "consumer panicked while handling event");
                    report.failed += 1;
                }
            }
        }

        debug!(%kind, delivered = report.delivered, failed = report.failed, "dispatched event");
        report
    }

    async fn persist(&self) {
        let names = self.subscriber_names().await;
        if let Err(e) = self.db.save_subscriber_names(&names).await {
            error!(error = %e, "failed to persist subscriber names");
        }
    }
}
