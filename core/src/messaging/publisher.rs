// Outbound messaging, gated on the client being online
use std::sync::Arc;

use chrono::{DateTime, Utc};
use prost::Message;
use tokio::sync::watch;
use tracing::{debug, trace};

use super::broker::Broker;
use crate::envelope::{direct_to_app_topic, Envelope};
use crate::payload::{self, Payload};
use crate::proto::{RequestHeader, TelemetryMetric};
use crate::{timestamp, CoreError, Result};

/// Application that collects telemetry metrics.
pub const LOGGING_HOST_SERVICE: &str = "hostsvc-logging";

/// Sends messages through the broker once the client is online.
///
/// Every send waits, without a timeout, until the subscription handshake has
/// completed. Cloning is cheap.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
    online: watch::Receiver<bool>,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>, online: watch::Receiver<bool>) -> Self {
        Self { broker, online }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub async fn wait_until_online(&self) -> Result<()> {
        let mut online = self.online.clone();
        online
            .wait_for(|online| *online)
            .await
            .map(|_| ())
            .map_err(|_| CoreError::Broker("client shut down before coming online".into()))
    }

    /// Publishes a payload as-is on `topic`.
    pub async fn publish_msg<T: Payload>(&self, topic: &str, message: &T) -> Result<()> {
        self.wait_until_online().await?;
        trace!(topic, message_type = T::TYPE_NAME, "Publishing message");
        self.broker.publish(topic, message.encode_to_vec()).await
    }

    /// Wraps a payload in an envelope and sends it to one application.
    pub async fn direct_to_app<T: Payload>(&self, app_id: &str, message: &T) -> Result<()> {
        self.wait_until_online().await?;

        let envelope = Envelope::wrap(message);
        let topic = direct_to_app_topic(app_id);
        debug!(
            target_app = app_id,
            topic = %topic,
            message_type = %envelope.message_type,
            tracking_id = %envelope.tracking_id,
            "Sending direct message"
        );
        self.broker.publish(&topic, envelope.encode()).await
    }

    /// Sends a single metric to the logging host service.
    ///
    /// `metric_time` defaults to now.
    pub async fn send_telemetry_metric(
        &self,
        metric_name: &str,
        metric_value: i32,
        metric_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let tracking_id = payload::new_tracking_id();
        let metric = TelemetryMetric {
            request_header: Some(RequestHeader {
                correlation_id: tracking_id.clone(),
                tracking_id,
                ..Default::default()
            }),
            metric_name: metric_name.to_string(),
            metric_value,
            metric_time: Some(metric_time.map_or_else(timestamp::now, timestamp::to_timestamp)),
        };
        self.direct_to_app(LOGGING_HOST_SERVICE, &metric).await
    }
}
