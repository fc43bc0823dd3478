// Payload type and message handler registries
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use prost::Message;

use crate::envelope::Envelope;
use crate::payload::{self, Payload};
use crate::proto::{
    CacheItem, ComplexMessage, DirectToApp, HeartBeatPulse, LogMessageResponse,
    PluginHealthCheckMultiResponse, PluginHealthCheckRequest, PluginHealthCheckResponse,
    SimpleMessage, TelemetryMetric, TelemetryMetricResponse,
};
use crate::Result;

/// Handles one payload type delivered on the application's direct topic.
///
/// Headers are already populated when `message_received` runs.
#[async_trait]
pub trait MessageHandler<T: Payload>: Send + Sync {
    async fn message_received(&self, message: T, envelope: &Envelope) -> Result<()>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    f: F,
}

pub fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler { f }
}

#[async_trait]
impl<T, F, Fut> MessageHandler<T> for FnHandler<F>
where
    T: Payload,
    F: Fn(T, Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn message_received(&self, message: T, envelope: &Envelope) -> Result<()> {
        (self.f)(message, envelope.clone()).await
    }
}

/// Checks that a payload decodes as the registered type.
pub type ValidateFn = fn(&[u8]) -> Result<()>;

fn validate<T: Payload>(bytes: &[u8]) -> Result<()> {
    T::decode(bytes)?;
    Ok(())
}

/// A payload type the router knows how to decode.
#[derive(Clone, Copy)]
pub struct PayloadDescriptor {
    pub type_name: &'static str,
    pub validate: ValidateFn,
}

impl std::fmt::Debug for PayloadDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadDescriptor")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Known payload types keyed by declared type name.
#[derive(Debug, Default)]
pub struct PayloadRegistry {
    types: DashMap<String, PayloadDescriptor>,
}

impl PayloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the shared message formats.
    pub fn with_core_types() -> Self {
        let registry = Self::new();
        registry.register::<DirectToApp>();
        registry.register::<HeartBeatPulse>();
        registry.register::<PluginHealthCheckRequest>();
        registry.register::<PluginHealthCheckResponse>();
        registry.register::<PluginHealthCheckMultiResponse>();
        registry.register::<TelemetryMetric>();
        registry.register::<TelemetryMetricResponse>();
        registry.register::<LogMessageResponse>();
        registry.register::<CacheItem>();
        registry.register::<SimpleMessage>();
        registry.register::<ComplexMessage>();
        registry
    }

    pub fn register<T: Payload>(&self) {
        self.types.insert(
            T::TYPE_NAME.to_string(),
            PayloadDescriptor {
                type_name: T::TYPE_NAME,
                validate: validate::<T>,
            },
        );
    }

    pub fn resolve(&self, type_name: &str) -> Option<PayloadDescriptor> {
        self.types.get(type_name).map(|e| *e.value())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }
}

#[async_trait]
trait ErasedHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope) -> Result<()>;
}

struct TypedHandler<T, H> {
    handler: H,
    _payload: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, H> ErasedHandler for TypedHandler<T, H>
where
    T: Payload,
    H: MessageHandler<T>,
{
    async fn handle(&self, envelope: &Envelope) -> Result<()> {
        let mut message: T = envelope.unpack()?;
        payload::populate_headers(&mut message, &envelope.source_app_id);
        self.handler.message_received(message, envelope).await
    }
}

/// Handlers keyed by declared type name; at most one per type.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn ErasedHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `T`, replacing any previous one.
    pub fn register<T, H>(&self, handler: H)
    where
        T: Payload,
        H: MessageHandler<T> + 'static,
    {
        let erased: Arc<dyn ErasedHandler> = Arc::new(TypedHandler {
            handler,
            _payload: PhantomData::<fn() -> T>,
        });
        if self
            .handlers
            .insert(T::TYPE_NAME.to_string(), erased)
            .is_some()
        {
            tracing::warn!(message_type = T::TYPE_NAME, "Replaced existing message handler");
        }
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.handlers.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the handler registered for the envelope's type.
    ///
    /// Returns `None` when no handler is registered.
    pub async fn dispatch(&self, envelope: &Envelope) -> Option<Result<()>> {
        // Clone out of the map so no shard lock is held across the await.
        let handler = self
            .handlers
            .get(&envelope.message_type)
            .map(|e| Arc::clone(e.value()))?;
        Some(handler.handle(envelope).await)
    }
}
