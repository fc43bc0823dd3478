use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use prost::Message;
use prost_types::Any;
use spacefx_core::proto::{
    HeartBeatPulse, PluginHealthCheckMultiResponse, PluginHealthCheckRequest, RequestHeader,
    SimpleMessage, StatusCodes, TelemetryMetricResponse,
};
use spacefx_core::{
    handler_fn, AppLifetime, Broker, BusEvent, CoreError, DiscoveryRegistry, DispatchOutcome,
    DropReason, Envelope, HandlerRegistry, PayloadRegistry, Plugin, PluginCatalog, PluginHost,
    PluginSupervisor, Publisher, Result, Router,
};
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

const APP_ID: &str = "app-under-test";
const DIRECT_TOPIC: &str = "DIRECTTOAPP-APP-UNDER-TEST";

#[derive(Default)]
struct RecordingBroker {
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<()> {
        self.published.lock().unwrap().push((topic.to_string(), data));
        Ok(())
    }

    async fn app_id(&self) -> Result<String> {
        Ok(APP_ID.to_string())
    }
}

struct Fixture {
    router: Router,
    broker: Arc<RecordingBroker>,
    discovery: Arc<DiscoveryRegistry>,
    handlers: Arc<HandlerRegistry>,
    online: watch::Receiver<bool>,
    _plugin_dir: TempDir,
}

fn fixture() -> Fixture {
    let plugin_dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(RecordingBroker::default());
    let discovery = Arc::new(DiscoveryRegistry::new(Duration::from_secs(10)));
    let handlers = Arc::new(HandlerRegistry::new());
    let plugins: Arc<dyn PluginSupervisor> = Arc::new(PluginHost::<dyn Plugin>::new(
        plugin_dir.path(),
        PluginCatalog::new(),
        AppLifetime::new(),
    ));
    let (online_tx, online_rx) = watch::channel(false);

    let router = Router::new(
        Publisher::new(broker.clone() as Arc<dyn Broker>, online_rx.clone()),
        discovery.clone(),
        plugins,
        Arc::new(PayloadRegistry::with_core_types()),
        handlers.clone(),
        online_tx,
    );

    Fixture {
        router,
        broker,
        discovery,
        handlers,
        online: online_rx,
        _plugin_dir: plugin_dir,
    }
}

fn direct_event(source: &str, envelope: &Envelope) -> BusEvent {
    BusEvent {
        topic: DIRECT_TOPIC.to_string(),
        source: source.to_string(),
        data: envelope.encode(),
    }
}

#[test]
fn register_lists_direct_and_core_topics_and_goes_online() {
    let fx = fixture();
    assert!(!*fx.online.borrow());

    let topics: Vec<String> = fx
        .router
        .register(APP_ID)
        .into_iter()
        .map(|t| t.topic)
        .collect();
    assert_eq!(topics, vec![DIRECT_TOPIC.to_string(), "HeartbeatPulse".to_string()]);
    assert!(*fx.online.borrow());
    assert_eq!(fx.router.direct_topic(), Some(DIRECT_TOPIC));

    // A second handshake returns the same list.
    assert_eq!(fx.router.register(APP_ID).len(), 2);
}

#[tokio::test]
async fn heartbeat_topic_updates_discovery() {
    let fx = fixture();
    let pulse = HeartBeatPulse {
        app_id: "peer-1".into(),
        current_system_time: Some(spacefx_core::timestamp::now()),
        ..Default::default()
    };
    let event = BusEvent {
        topic: "heartbeatpulse".into(),
        source: "peer-1".into(),
        data: pulse.encode_to_vec(),
    };

    let outcome = fx.router.dispatch(&event).await;
    assert_eq!(outcome, DispatchOutcome::Heartbeat { app_id: "peer-1".into() });
    assert!(fx.discovery.get("peer-1").is_some());
}

#[tokio::test]
async fn events_on_other_topics_are_ignored() {
    let fx = fixture();
    let envelope = Envelope::wrap(&SimpleMessage::default());

    // Not registered yet: nothing is addressed to us.
    assert_eq!(
        fx.router.dispatch(&direct_event("peer", &envelope)).await,
        DispatchOutcome::Ignored
    );

    fx.router.register(APP_ID);
    let event = BusEvent {
        topic: "DIRECTTOAPP-SOMEONE-ELSE".into(),
        source: "peer".into(),
        data: envelope.encode(),
    };
    assert_eq!(fx.router.dispatch(&event).await, DispatchOutcome::Ignored);
}

#[tokio::test]
async fn malformed_envelopes_are_dropped() {
    let fx = fixture();
    fx.router.register(APP_ID);

    let event = BusEvent {
        topic: DIRECT_TOPIC.into(),
        source: "peer".into(),
        data: vec![0xff, 0xff, 0xff],
    };
    assert_eq!(
        fx.router.dispatch(&event).await,
        DispatchOutcome::Dropped(DropReason::MalformedEnvelope)
    );
}

#[tokio::test]
async fn unknown_message_types_are_dropped() {
    let fx = fixture();
    fx.router.register(APP_ID);

    let envelope = Envelope {
        message_type: "Not.A.Real.Type".into(),
        message: Any {
            type_url: "type.googleapis.com/Not.A.Real.Type".into(),
            value: vec![],
        },
        ..Envelope::wrap(&SimpleMessage::default())
    };
    assert_eq!(
        fx.router.dispatch(&direct_event("peer", &envelope)).await,
        DispatchOutcome::Dropped(DropReason::UnknownType)
    );
}

#[tokio::test]
async fn acknowledgements_without_handler_drop_quietly() {
    let fx = fixture();
    fx.router.register(APP_ID);

    let ack = Envelope::wrap(&TelemetryMetricResponse::default());
    assert_eq!(
        fx.router.dispatch(&direct_event("hostsvc-logging", &ack)).await,
        DispatchOutcome::Dropped(DropReason::Unhandled)
    );

    let simple = Envelope::wrap(&SimpleMessage::default());
    assert_eq!(
        fx.router.dispatch(&direct_event("peer", &simple)).await,
        DispatchOutcome::Dropped(DropReason::NoHandler)
    );
}

#[tokio::test]
async fn handler_receives_payload_with_populated_headers() {
    let fx = fixture();
    fx.router.register(APP_ID);

    let (tx, mut rx) = mpsc::unbounded_channel();
    fx.handlers.register::<SimpleMessage, _>(handler_fn(move |msg: SimpleMessage, _env: Envelope| {
        let tx = tx.clone();
        async move {
            tx.send(msg).map_err(|e| CoreError::Broker(e.to_string()))?;
            Ok::<(), CoreError>(())
        }
    }));

    let envelope = Envelope::wrap(&SimpleMessage {
        request_header: None,
        message: "hello".into(),
    });
    let outcome = fx.router.dispatch(&direct_event("peer-7", &envelope)).await;
    assert_eq!(
        outcome,
        DispatchOutcome::Handled { message_type: "spacefx.v1.SimpleMessage".into() }
    );

    let received = rx.recv().await.unwrap();
    assert_eq!(received.message, "hello");
    let header = received.request_header.unwrap();
    assert_eq!(header.app_id, "peer-7");
    assert_eq!(header.origin_app_id, "peer-7");
    assert!(!header.tracking_id.is_empty());
    assert_eq!(header.correlation_id, header.tracking_id);
}

#[tokio::test]
async fn handler_errors_are_reported_not_propagated() {
    let fx = fixture();
    fx.router.register(APP_ID);
    fx.handlers.register::<SimpleMessage, _>(handler_fn(|_msg: SimpleMessage, _env: Envelope| async {
        Err::<(), _>(CoreError::Plugin("handler exploded".into()))
    }));

    let envelope = Envelope::wrap(&SimpleMessage::default());
    assert_eq!(
        fx.router.dispatch(&direct_event("peer", &envelope)).await,
        DispatchOutcome::HandlerFailed { message_type: "spacefx.v1.SimpleMessage".into() }
    );
}

#[tokio::test]
async fn plugin_health_requests_are_answered_to_the_sender() {
    let fx = fixture();
    fx.router.register(APP_ID);

    let request = PluginHealthCheckRequest {
        request_header: Some(RequestHeader {
            tracking_id: "health-42".into(),
            ..Default::default()
        }),
    };
    let outcome = fx
        .router
        .dispatch(&direct_event("hostsvc-monitor", &Envelope::wrap(&request)))
        .await;
    assert_eq!(outcome, DispatchOutcome::HealthCheckAnswered);

    let published = fx.broker.published.lock().unwrap().clone();
    assert_eq!(published.len(), 1);
    let (topic, data) = &published[0];
    assert_eq!(topic, "DIRECTTOAPP-HOSTSVC-MONITOR");

    let reply = Envelope::decode(data, "").unwrap();
    assert_eq!(reply.correlation_id, "health-42");
    let response: PluginHealthCheckMultiResponse = reply.unpack().unwrap();
    let header = response.response_header.unwrap();
    assert_eq!(header.status(), StatusCodes::Successful);
    assert!(response.plugin_health_check_responses.is_empty());
}
