//! Application-facing client.
//!
//! A [`Client`] ties the runtime together: it owns the router, discovery
//! registry, cache and plugin host, exposes the outbound messaging calls and
//! runs the background services once started. Build one with
//! [`ClientBuilder`]; clones share the same state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::config::{self, AppConfig};
use crate::discovery::DiscoveryRegistry;
use crate::handler::{HandlerRegistry, MessageHandler, PayloadRegistry};
use crate::lifecycle::AppLifetime;
use crate::messaging::{Broker, BusEvent, Publisher, TopicSubscription};
use crate::payload::Payload;
use crate::plugin::{self, Plugin, PluginCatalog, PluginHost, PluginManifest, PluginSupervisor};
use crate::proto::{CacheItem, HeartBeatPulse};
use crate::router::{DispatchOutcome, Router};
use crate::services::{
    HealthReport, HeartbeatService, LivenessCheck, MonitorableService, ResourceScavenger,
};
use crate::{CoreError, Result};

/// Delay between attempts to reach the sidecar.
pub const CLIENT_DELAY: Duration = Duration::from_millis(200);

/// Readiness of the connection to the sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarStatus {
    Pending,
    Healthy,
    Error,
}

enum AppIdState {
    Pending,
    Resolved(String),
    Failed,
}

/// File transfer directories, created on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XferDirectories {
    pub root: PathBuf,
    pub inbox: PathBuf,
    pub outbox: PathBuf,
}

pub struct ClientBuilder {
    config: AppConfig,
    broker: Arc<dyn Broker>,
    plugins: Option<Arc<dyn PluginSupervisor>>,
    payloads: PayloadRegistry,
    handlers: HandlerRegistry,
    app_version: String,
    lifetime: AppLifetime,
}

impl ClientBuilder {
    pub fn new(config: AppConfig, broker: Arc<dyn Broker>) -> Self {
        Self {
            config,
            broker,
            plugins: None,
            payloads: PayloadRegistry::with_core_types(),
            handlers: HandlerRegistry::new(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            lifetime: AppLifetime::new(),
        }
    }

    /// Host whose plugins answer health checks. Without one, an empty host
    /// over the configured plugin directory is used.
    pub fn with_plugin_host(mut self, plugins: Arc<dyn PluginSupervisor>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    pub fn with_handler<T, H>(self, handler: H) -> Self
    where
        T: Payload,
        H: MessageHandler<T> + 'static,
    {
        self.payloads.register::<T>();
        self.handlers.register::<T, H>(handler);
        self
    }

    /// Makes a payload type routable without handling it.
    pub fn with_payload_type<T: Payload>(self) -> Self {
        self.payloads.register::<T>();
        self
    }

    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    pub fn with_lifetime(mut self, lifetime: AppLifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn build(self) -> Result<Client> {
        let cache = Arc::new(CacheStore::open(&self.config.xfer_directory_root)?);
        let discovery = Arc::new(DiscoveryRegistry::new(
            self.config.heartbeat_received_tolerance,
        ));
        let plugins = self.plugins.unwrap_or_else(|| {
            let host: Arc<dyn PluginSupervisor> = Arc::new(PluginHost::<dyn Plugin>::new(
                self.config.plugin_directory.clone(),
                PluginCatalog::new(),
                self.lifetime.clone(),
            ));
            host
        });

        let (online_tx, online_rx) = watch::channel(false);
        let publisher = Publisher::new(Arc::clone(&self.broker), online_rx);
        let handlers = Arc::new(self.handlers);
        let payloads = Arc::new(self.payloads);
        let router = Router::new(
            publisher.clone(),
            Arc::clone(&discovery),
            Arc::clone(&plugins),
            payloads,
            Arc::clone(&handlers),
            online_tx,
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                config: self.config,
                app_version: self.app_version,
                broker: self.broker,
                publisher,
                router,
                handlers,
                discovery,
                plugins,
                cache,
                lifetime: self.lifetime,
                sidecar_status: Mutex::new(SidecarStatus::Pending),
                app_id: Mutex::new(AppIdState::Pending),
                heartbeat: std::sync::OnceLock::new(),
                started: AtomicBool::new(false),
            }),
        })
    }
}

struct ClientInner {
    config: AppConfig,
    app_version: String,
    broker: Arc<dyn Broker>,
    publisher: Publisher,
    router: Router,
    handlers: Arc<HandlerRegistry>,
    discovery: Arc<DiscoveryRegistry>,
    plugins: Arc<dyn PluginSupervisor>,
    cache: Arc<CacheStore>,
    lifetime: AppLifetime,
    sidecar_status: Mutex<SidecarStatus>,
    app_id: Mutex<AppIdState>,
    heartbeat: std::sync::OnceLock<Arc<HeartbeatService>>,
    started: AtomicBool,
}

#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn lifetime(&self) -> &AppLifetime {
        &self.inner.lifetime
    }

    pub fn publisher(&self) -> &Publisher {
        &self.inner.publisher
    }

    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    /// This client's app id, resolved once from the sidecar.
    ///
    /// Resolution retries every [`CLIENT_DELAY`] up to the configured bound.
    /// Both the id and a resolution failure are remembered; the first caller
    /// to finish decides which.
    pub async fn app_id(&self) -> Result<String> {
        match &*self.inner.app_id.lock().await {
            AppIdState::Resolved(id) => return Ok(id.clone()),
            AppIdState::Failed => {
                return Err(CoreError::Timeout("app id resolution failed earlier".into()))
            }
            AppIdState::Pending => {}
        }

        let outcome = self.resolve_app_id().await;
        let mut state = self.inner.app_id.lock().await;
        if let AppIdState::Pending = *state {
            *state = match &outcome {
                Ok(id) => AppIdState::Resolved(id.clone()),
                Err(_) => AppIdState::Failed,
            };
        }
        outcome
    }

    async fn resolve_app_id(&self) -> Result<String> {
        let deadline = Instant::now() + self.inner.config.app_id_resolution_timeout;
        loop {
            match self.inner.broker.app_id().await {
                Ok(id) if !id.trim().is_empty() => {
                    debug!(app_id = %id, "App id resolved");
                    return Ok(id);
                }
                Ok(_) => debug!("Sidecar returned an empty app id"),
                Err(e) => debug!(error = %e, "Sidecar not reachable yet"),
            }

            if Instant::now() + CLIENT_DELAY > deadline {
                return Err(CoreError::Timeout(format!(
                    "app id not resolved within {:?}",
                    self.inner.config.app_id_resolution_timeout
                )));
            }
            tokio::time::sleep(CLIENT_DELAY).await;
        }
    }

    /// Registration handshake with the broker; marks the client online.
    pub async fn list_topic_subscriptions(&self) -> Result<Vec<TopicSubscription>> {
        let app_id = self.app_id().await?;
        Ok(self.inner.router.register(&app_id))
    }

    /// Entry point for every event the broker delivers.
    pub async fn on_bus_event(&self, event: BusEvent) -> DispatchOutcome {
        self.inner.router.dispatch(&event).await
    }

    pub fn is_online(&self) -> bool {
        self.inner.publisher.is_online()
    }

    /// Waits (bounded) for the client to come online.
    ///
    /// Uses the configured default when `timeout` is `None`. Every caller
    /// waits at most its own bound. The first wait to finish fixes the
    /// remembered status: after a timeout every later call fails immediately.
    pub async fn wait_for_online(&self, timeout: Option<Duration>) -> Result<SidecarStatus> {
        let current = *self.inner.sidecar_status.lock().await;
        match current {
            SidecarStatus::Healthy => return Ok(SidecarStatus::Healthy),
            SidecarStatus::Error => {
                return Err(CoreError::Timeout(
                    "client failed to come online earlier".into(),
                ))
            }
            SidecarStatus::Pending => {}
        }

        let bound = timeout.unwrap_or(self.inner.config.online_wait_timeout);
        let outcome =
            match tokio::time::timeout(bound, self.inner.publisher.wait_until_online()).await {
                Ok(Ok(())) => Ok(SidecarStatus::Healthy),
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    warn!(
                        timeout_ms = bound.as_millis() as u64,
                        "Client did not come online in time"
                    );
                    Err(CoreError::Timeout(format!("client not online within {bound:?}")))
                }
            };

        let mut status = self.inner.sidecar_status.lock().await;
        if *status == SidecarStatus::Pending {
            *status = if outcome.is_ok() {
                SidecarStatus::Healthy
            } else {
                SidecarStatus::Error
            };
        }
        outcome
    }

    /// Publishes a payload on a topic; waits until online.
    pub async fn publish_msg<T: Payload>(&self, topic: &str, message: &T) -> Result<()> {
        self.inner.publisher.publish_msg(topic, message).await
    }

    /// Sends a payload to one application; waits until online.
    pub async fn direct_to_app<T: Payload>(&self, app_id: &str, message: &T) -> Result<()> {
        self.inner.publisher.direct_to_app(app_id, message).await
    }

    pub async fn send_telemetry_metric(
        &self,
        metric_name: &str,
        metric_value: i32,
        metric_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.inner
            .publisher
            .send_telemetry_metric(metric_name, metric_value, metric_time)
            .await
    }

    /// Registers a handler after the client was built.
    pub fn register_handler<T, H>(&self, handler: H)
    where
        T: Payload,
        H: MessageHandler<T> + 'static,
    {
        self.inner.handlers.register::<T, H>(handler);
    }

    /// Heartbeats of every peer currently considered alive.
    pub fn services_online(&self) -> Vec<HeartBeatPulse> {
        self.inner.discovery.query()
    }

    pub fn discovery(&self) -> &Arc<DiscoveryRegistry> {
        &self.inner.discovery
    }

    /// Manifests of the loaded plugins.
    pub async fn plugins(&self) -> Vec<PluginManifest> {
        self.inner.plugins.loaded_manifests().await
    }

    pub fn save_cache_item<T: Payload>(
        &self,
        name: &str,
        item: &T,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CacheItem> {
        self.inner.cache.save(name, item, expires_at)
    }

    pub fn get_cache_item<T: Payload>(&self, name: &str) -> Result<Option<T>> {
        self.inner.cache.get(name)
    }

    pub fn delete_cache_item(&self, name: &str) -> Result<()> {
        self.inner.cache.delete(name)
    }

    pub fn list_cache_items(&self) -> Result<Vec<String>> {
        self.inner.cache.list()
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.inner.cache.clear()
    }

    pub fn get_config_setting(&self, name: &str) -> Result<String> {
        config::get_config_setting(&self.inner.config.config_dir, name)
    }

    pub fn config_directory(&self) -> &Path {
        &self.inner.config.config_dir
    }

    pub fn spacefx_directory(&self) -> &Path {
        &self.inner.config.spacefx_dir
    }

    /// Creates (if needed) and returns the file transfer directories.
    pub fn xfer_directories(&self) -> Result<XferDirectories> {
        let root = self.inner.config.xfer_directory_root.clone();
        let dirs = XferDirectories {
            inbox: root.join("inbox"),
            outbox: root.join("outbox"),
            root,
        };
        for dir in [&dirs.inbox, &dirs.outbox, &dirs.root.join("tmp")] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(dirs)
    }

    /// Starts the heartbeat, plugin scan and scavenger loops.
    ///
    /// Needs the app id, so it waits (bounded) for its resolution. Only the
    /// first successful call spawns anything; later calls return no handles.
    pub async fn start(&self) -> Result<Vec<JoinHandle<()>>> {
        let app_id = self.app_id().await?;
        if self.inner.started.swap(true, Ordering::SeqCst) {
            debug!(app_id = %app_id, "Client already started");
            return Ok(Vec::new());
        }
        let config = &self.inner.config;
        let cancel = self.inner.lifetime.cancellation_token();

        let heartbeat = Arc::clone(self.inner.heartbeat.get_or_init(|| {
            Arc::new(HeartbeatService::new(
                self.inner.publisher.clone(),
                app_id.clone(),
                self.inner.app_version.clone(),
                config.heartbeat_pulse_timing,
                self.inner.lifetime.clone(),
            ))
        }));

        let scavenger = Arc::new(ResourceScavenger::new(
            Arc::clone(&self.inner.discovery),
            Arc::clone(&self.inner.cache),
            config.resource_monitor_timing,
            config
                .resource_scavenger_enabled
                .then_some(config.resource_scavenger_timing),
        ));

        let handles = vec![
            heartbeat.spawn(),
            plugin::spawn_scan_loop(
                Arc::clone(&self.inner.plugins),
                config.heartbeat_pulse_timing,
                cancel.clone(),
            ),
            scavenger.spawn(cancel),
        ];

        info!(app_id = %app_id, version = %self.inner.app_version, "Client started");
        Ok(handles)
    }

    /// Liveness probe over the discovery registry and (once started) the heartbeat.
    pub fn liveness(&self) -> LivenessCheck {
        let mut check = LivenessCheck::new(self.inner.lifetime.clone()).with_service(
            Arc::clone(&self.inner.discovery) as Arc<dyn MonitorableService>,
        );
        if let Some(heartbeat) = self.inner.heartbeat.get() {
            check = check.with_service(Arc::clone(heartbeat) as Arc<dyn MonitorableService>);
        }
        check
    }

    pub fn check_liveness(&self) -> HealthReport {
        self.liveness().check()
    }

    pub fn shutdown(&self) {
        self.inner.lifetime.shutdown();
    }
}
