//! Messaging layer: the broker seam, the outbound publisher and the in-process bus.
//!
//! - `Broker`: what the runtime needs from the pub/sub sidecar
//! - `Publisher`: readiness-gated outbound path (publish, direct-to-app, telemetry)
//! - `LocalBus`: topic-based pub/sub inside one process, used by the demo host and tests

pub mod broker;
pub mod local;
pub mod publisher;

// Re-export key types for ergonomic access
pub use broker::{Broker, BusEvent, TopicSubscription, PUBSUB_NAME};
pub use local::{serve, LocalBroker, LocalBus, LocalBusStats};
pub use publisher::{Publisher, LOGGING_HOST_SERVICE};
