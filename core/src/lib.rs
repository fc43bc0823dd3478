// SpaceFx Core Library
// Application client runtime: routing, plugins, discovery, cache

pub mod cache;
pub mod client;
pub mod config;
pub mod discovery;
pub mod envelope;
pub mod handler;
pub mod lifecycle;
pub mod messaging;
pub mod payload;
pub mod plugin;
pub mod router;
pub mod services;
pub mod telemetry;
pub mod timestamp;

// Export core types
pub use cache::CacheStore;
pub use client::{Client, ClientBuilder, SidecarStatus, XferDirectories};
pub use config::{get_config_setting, AppConfig};
pub use discovery::DiscoveryRegistry;
pub use envelope::{direct_to_app_topic, Envelope, HEARTBEAT_PULSE_TOPIC};
pub use handler::{handler_fn, HandlerRegistry, MessageHandler, PayloadRegistry};
pub use lifecycle::AppLifetime;
pub use messaging::{Broker, BusEvent, LocalBus, Publisher, TopicSubscription};
pub use payload::{populate_headers, response_from_request, Payload};
pub use plugin::{
    CorePermissions, Plugin, PluginCatalog, PluginContext, PluginError, PluginHost,
    PluginManifest, PluginResult, PluginSupervisor,
};
pub use router::{DispatchOutcome, DropReason, Router};

// Shared message formats
pub use spacefx_proto as proto;

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Unknown payload type: {0}")]
    UnknownPayloadType(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Config setting '{name}' not found in {dir}")]
    ConfigNotFound { name: String, dir: String },

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
