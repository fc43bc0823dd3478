// Inbound message routing
use std::sync::{Arc, OnceLock};

use prost::Message;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::discovery::DiscoveryRegistry;
use crate::envelope::{direct_to_app_topic, Envelope, CORE_TOPICS, HEARTBEAT_PULSE_TOPIC};
use crate::handler::{HandlerRegistry, PayloadRegistry};
use crate::messaging::{BusEvent, Publisher, TopicSubscription};
use crate::payload::Payload;
use crate::plugin::PluginSupervisor;
use crate::proto::{
    HeartBeatPulse, LogMessageResponse, PluginHealthCheckMultiResponse, PluginHealthCheckRequest,
    TelemetryMetricResponse,
};

/// Response types routinely sent back to us that nobody needs to handle.
const SILENT_DROP_TYPES: &[&str] = &[
    TelemetryMetricResponse::TYPE_NAME,
    LogMessageResponse::TYPE_NAME,
    PluginHealthCheckMultiResponse::TYPE_NAME,
];

/// Why an inbound message went nowhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    MalformedEnvelope,
    UnknownType,
    /// No handler, for a type that is expected to go unhandled.
    Unhandled,
    NoHandler,
}

/// What happened to one bus event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Heartbeat { app_id: String },
    Handled { message_type: String },
    HandlerFailed { message_type: String },
    HealthCheckAnswered,
    Dropped(DropReason),
    /// Topic not addressed to this client.
    Ignored,
}

/// Decodes inbound bus events and hands them to the right consumer.
///
/// Heartbeats go to the discovery registry, plugin health requests to the
/// plugin host, everything else to the handler registered for its type.
pub struct Router {
    publisher: Publisher,
    discovery: Arc<DiscoveryRegistry>,
    plugins: Arc<dyn PluginSupervisor>,
    payloads: Arc<PayloadRegistry>,
    handlers: Arc<HandlerRegistry>,
    online: watch::Sender<bool>,
    direct_topic: OnceLock<String>,
}

impl Router {
    pub fn new(
        publisher: Publisher,
        discovery: Arc<DiscoveryRegistry>,
        plugins: Arc<dyn PluginSupervisor>,
        payloads: Arc<PayloadRegistry>,
        handlers: Arc<HandlerRegistry>,
        online: watch::Sender<bool>,
    ) -> Self {
        Self {
            publisher,
            discovery,
            plugins,
            payloads,
            handlers,
            online,
            direct_topic: OnceLock::new(),
        }
    }

    /// Subscription handshake: the topics this client listens on.
    ///
    /// The first call marks the client online.
    pub fn register(&self, app_id: &str) -> Vec<TopicSubscription> {
        let direct_topic = self
            .direct_topic
            .get_or_init(|| direct_to_app_topic(app_id))
            .clone();

        let mut topics = vec![TopicSubscription::new(direct_topic.clone())];
        topics.extend(CORE_TOPICS.iter().map(|t| TopicSubscription::new(*t)));

        let flipped = self.online.send_if_modified(|online| {
            let changed = !*online;
            *online = true;
            changed
        });
        if flipped {
            info!(app_id, topic = %direct_topic, "Client online");
        }
        topics
    }

    pub fn direct_topic(&self) -> Option<&str> {
        self.direct_topic.get().map(String::as_str)
    }

    /// Routes one event. Never fails; problems are logged and reported in
    /// the outcome.
    pub async fn dispatch(&self, event: &BusEvent) -> DispatchOutcome {
        if event.topic.eq_ignore_ascii_case(HEARTBEAT_PULSE_TOPIC) {
            return self.store_heartbeat(event);
        }

        let addressed_to_us = self
            .direct_topic
            .get()
            .map(|topic| event.topic.to_uppercase().contains(topic.as_str()))
            .unwrap_or(false);
        if !addressed_to_us {
            trace!(topic = %event.topic, "Ignoring event on unrelated topic");
            return DispatchOutcome::Ignored;
        }

        match Envelope::decode(&event.data, &event.source) {
            Ok(envelope) => self.route(envelope).await,
            Err(e) => {
                warn!(topic = %event.topic, source = %event.source, error = %e, "Dropping undecodable envelope");
                DispatchOutcome::Dropped(DropReason::MalformedEnvelope)
            }
        }
    }

    fn store_heartbeat(&self, event: &BusEvent) -> DispatchOutcome {
        match HeartBeatPulse::decode(event.data.as_slice()) {
            Ok(pulse) => {
                let app_id = pulse.app_id.clone();
                self.discovery.store(pulse);
                DispatchOutcome::Heartbeat { app_id }
            }
            Err(e) => {
                warn!(source = %event.source, error = %e, "Dropping undecodable heartbeat");
                DispatchOutcome::Dropped(DropReason::MalformedEnvelope)
            }
        }
    }

    /// Routes a decoded envelope.
    pub async fn route(&self, envelope: Envelope) -> DispatchOutcome {
        let message_type = envelope.message_type.clone();

        let Some(descriptor) = self.payloads.resolve(&message_type) else {
            warn!(message_type = %message_type, source = %envelope.source_app_id, "Unknown message type; dropping");
            return DispatchOutcome::Dropped(DropReason::UnknownType);
        };
        if let Err(e) = (descriptor.validate)(&envelope.message.value) {
            warn!(message_type = %message_type, error = %e, "Payload does not decode as declared type; dropping");
            return DispatchOutcome::Dropped(DropReason::MalformedEnvelope);
        }

        if message_type == PluginHealthCheckRequest::TYPE_NAME {
            return self.answer_health_check(envelope).await;
        }

        match self.handlers.dispatch(&envelope).await {
            None if SILENT_DROP_TYPES.contains(&message_type.as_str()) => {
                trace!(message_type = %message_type, "No handler for acknowledgement; dropping");
                DispatchOutcome::Dropped(DropReason::Unhandled)
            }
            None => {
                warn!(message_type = %message_type, source = %envelope.source_app_id, "No handler registered; dropping");
                DispatchOutcome::Dropped(DropReason::NoHandler)
            }
            Some(Ok(())) => {
                debug!(message_type = %message_type, tracking_id = %envelope.tracking_id, "Message handled");
                DispatchOutcome::Handled { message_type }
            }
            Some(Err(e)) => {
                error!(message_type = %message_type, error = %e, "Message handler failed");
                DispatchOutcome::HandlerFailed { message_type }
            }
        }
    }

    async fn answer_health_check(&self, envelope: Envelope) -> DispatchOutcome {
        let mut request: PluginHealthCheckRequest = match envelope.unpack() {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable plugin health check request");
                return DispatchOutcome::Dropped(DropReason::MalformedEnvelope);
            }
        };
        crate::payload::populate_headers(&mut request, &envelope.source_app_id);

        let response = self.plugins.check_plugin_health(request).await;
        if let Err(e) = self
            .publisher
            .direct_to_app(&envelope.source_app_id, &response)
            .await
        {
            error!(target_app = %envelope.source_app_id, error = %e, "Unable to send plugin health check response");
        }
        DispatchOutcome::HealthCheckAnswered
    }
}
