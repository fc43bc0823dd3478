// In-process topic bus
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::broker::{Broker, BusEvent};
use crate::client::Client;
use crate::Result;

const SUBSCRIPTION_CAPACITY: usize = 1024;

/// Subscription information
#[derive(Debug, Clone)]
struct Subscription {
    id: String,
    sender: mpsc::Sender<BusEvent>,
}

/// Per-topic statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalBusStats {
    pub total_published: u64,
    pub total_delivered: u64,
    pub active_subscriptions: usize,
    pub dropped_events: u64,
}

/// Topic-based pub/sub shared by every client in the process.
///
/// Topics match exactly; each subscription owns a bounded queue and publishers
/// wait when it is full.
#[derive(Debug, Default)]
pub struct LocalBus {
    // Topic -> Subscriber list
    subscriptions: DashMap<String, Vec<Subscription>>,
    stats: DashMap<String, LocalBusStats>,
}

impl LocalBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Handle publishing as `app_id`.
    pub fn connect(self: &Arc<Self>, app_id: impl Into<String>) -> LocalBroker {
        LocalBroker {
            bus: Arc::clone(self),
            app_id: app_id.into(),
        }
    }

    /// Publish to a topic; returns how many subscribers received the event.
    pub async fn publish(&self, source: &str, topic: &str, data: Vec<u8>) -> u64 {
        debug!(topic, source, bytes = data.len(), "Publishing bus event");
        self.update_stats(topic, |stats| stats.total_published += 1);

        // Clone senders out so no shard lock is held while awaiting queue space.
        let senders: Vec<Subscription> = match self.subscriptions.get(topic) {
            Some(subs) => subs.value().clone(),
            None => {
                debug!(topic, "No subscriptions for topic");
                return 0;
            }
        };

        let event = BusEvent {
            topic: topic.to_string(),
            source: source.to_string(),
            data,
        };

        let mut delivered = 0;
        let mut dropped = 0;
        for sub in senders {
            match sub.sender.send(event.clone()).await {
                Ok(_) => delivered += 1,
                Err(_) => {
                    dropped += 1;
                    warn!(subscription = %sub.id, "Failed to deliver bus event");
                }
            }
        }

        self.update_stats(topic, |stats| {
            stats.total_delivered += delivered;
            stats.dropped_events += dropped;
        });
        delivered
    }

    /// Subscribe to topic
    pub fn subscribe(&self, topic: &str) -> (String, mpsc::Receiver<BusEvent>) {
        let subscription_id = format!("sub_{}_{}", topic, uuid::Uuid::new_v4());
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);

        self.subscriptions
            .entry(topic.to_string())
            .or_insert_with(Vec::new)
            .push(Subscription {
                id: subscription_id.clone(),
                sender: tx,
            });
        self.update_stats(topic, |stats| stats.active_subscriptions += 1);

        info!(subscription = %subscription_id, topic, "Created subscription");
        (subscription_id, rx)
    }

    /// Unsubscribe from topic
    pub fn unsubscribe(&self, subscription_id: &str) {
        for mut entry in self.subscriptions.iter_mut() {
            let before = entry.value().len();
            entry.value_mut().retain(|sub| sub.id != subscription_id);
            if entry.value().len() < before {
                let topic = entry.key().clone();
                self.update_stats(&topic, |stats| {
                    stats.active_subscriptions = stats.active_subscriptions.saturating_sub(1);
                });
            }
        }
        info!(subscription = %subscription_id, "Unsubscribed");
    }

    pub fn get_stats(&self, topic: &str) -> Option<LocalBusStats> {
        self.stats.get(topic).map(|s| s.clone())
    }

    fn update_stats<F>(&self, topic: &str, f: F)
    where
        F: FnOnce(&mut LocalBusStats),
    {
        let mut entry = self.stats.entry(topic.to_string()).or_default();
        f(entry.value_mut());
    }
}

/// A client's connection to a [`LocalBus`].
#[derive(Debug, Clone)]
pub struct LocalBroker {
    bus: Arc<LocalBus>,
    app_id: String,
}

#[async_trait]
impl Broker for LocalBroker {
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<()> {
        self.bus.publish(&self.app_id, topic, data).await;
        Ok(())
    }

    async fn app_id(&self) -> Result<String> {
        Ok(self.app_id.clone())
    }
}

/// Registers `client` on the bus and feeds it every event on its topics.
///
/// Performs the subscription handshake (which flips the client online), then
/// dispatches each received event on its own task. The returned handles end
/// when the bus drops the subscriptions or the client's lifetime stops.
pub async fn serve(bus: &Arc<LocalBus>, client: &Client) -> Result<Vec<JoinHandle<()>>> {
    let topics = client.list_topic_subscriptions().await?;
    let mut handles = Vec::with_capacity(topics.len());

    for subscription in topics {
        let (_id, mut rx) = bus.subscribe(&subscription.topic);
        let client = client.clone();
        let token = client.lifetime().cancellation_token();

        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        let client = client.clone();
                        tokio::spawn(async move {
                            client.on_bus_event(event).await;
                        });
                    }
                }
            }
            debug!(topic = %subscription.topic, "Bus pump stopped");
        }));
    }
    Ok(handles)
}
