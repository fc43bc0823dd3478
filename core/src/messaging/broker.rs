use async_trait::async_trait;

use crate::Result;

/// Name of the pub/sub component every topic lives on.
pub const PUBSUB_NAME: &str = "pubsub";

/// The pub/sub sidecar as seen by the runtime.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publishes raw bytes on a topic. The broker stamps the source app id.
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<()>;

    /// Id of the application this client runs as, from sidecar metadata.
    async fn app_id(&self) -> Result<String>;
}

/// A message delivered by the broker to a subscribed topic.
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub topic: String,
    pub source: String,
    pub data: Vec<u8>,
}

/// One entry of the subscription list handed to the broker at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSubscription {
    pub pubsub_name: String,
    pub topic: String,
}

impl TopicSubscription {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            pubsub_name: PUBSUB_NAME.to_string(),
            topic: topic.into(),
        }
    }
}
