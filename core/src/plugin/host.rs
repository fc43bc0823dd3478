// Plugin discovery, loading and middleware chains
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::catalog::PluginCatalog;
use super::manifest::{self, CorePermissions, PluginManifest, ERRORED_SUFFIX};
use super::{Plugin, PluginContext, PluginError};
use crate::lifecycle::AppLifetime;
use crate::payload::response_from_request;
use crate::proto::{PluginHealthCheckMultiResponse, PluginHealthCheckRequest, StatusCodes};
use crate::Result;

const HEALTH_FAILURE_MESSAGE: &str = "One or more plugins did not have a successful health check";

/// A plugin that passed validation and was configured.
struct LoadedPlugin<P: ?Sized> {
    manifest: Arc<PluginManifest>,
    plugin: Arc<P>,
}

impl<P: ?Sized> Clone for LoadedPlugin<P> {
    fn clone(&self) -> Self {
        Self {
            manifest: Arc::clone(&self.manifest),
            plugin: Arc::clone(&self.plugin),
        }
    }
}

/// Discovers plugins from manifests and runs them as ordered middleware.
///
/// `P` is the application's plugin trait object; chains hand each plugin out
/// as `Arc<P>` so application hooks can be called on it. Plugins run in
/// ascending `processingOrder`, ties in discovery order.
pub struct PluginHost<P: ?Sized + Plugin + 'static = dyn Plugin> {
    plugin_dir: PathBuf,
    catalog: PluginCatalog<P>,
    loaded: RwLock<Vec<LoadedPlugin<P>>>,
    lifetime: AppLifetime,
}

impl<P: ?Sized + Plugin + 'static> PluginHost<P> {
    pub fn new(plugin_dir: impl Into<PathBuf>, catalog: PluginCatalog<P>, lifetime: AppLifetime) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            catalog,
            loaded: RwLock::new(Vec::new()),
            lifetime,
        }
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    /// Loads every new, valid manifest in the plugin directory.
    ///
    /// Returns how many plugins were added. A missing directory is not an error.
    pub async fn scan(&self) -> Result<usize> {
        if !self.plugin_dir.is_dir() {
            trace!(dir = %self.plugin_dir.display(), "Plugin directory not present");
            return Ok(0);
        }

        let mut added = 0;
        for path in manifest::manifest_files(&self.plugin_dir)? {
            let manifest = match PluginManifest::from_file(&path) {
                Ok(manifest) => manifest,
                Err(e) => {
                    error!(file = %path.display(), error = %e, "Unable to parse plugin manifest");
                    mark_errored(&path);
                    continue;
                }
            };

            match self.load(manifest).await {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(file = %path.display(), error = %e, "Unable to load plugin");
                    mark_errored(&path);
                }
            }
        }

        if added > 0 {
            let total = self.loaded.read().await.len();
            info!(added, total, "Plugins loaded");
        }
        Ok(added)
    }

    /// Validates, instantiates and configures the plugin a manifest names.
    ///
    /// `Ok(false)` means nothing was loaded but the manifest stays eligible:
    /// the plugin file is not (yet) present, or it is already loaded.
    pub async fn load(&self, mut manifest: PluginManifest) -> Result<bool> {
        let file_name = Path::new(&manifest.plugin_file)
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or_default();
        if file_name.is_empty() {
            return Err(crate::CoreError::Plugin("manifest names no plugin file".into()));
        }

        let resolved = self.plugin_dir.join(&file_name);
        if !resolved.is_file() {
            error!(plugin_file = %resolved.display(), "Plugin file not found; will retry on next scan");
            return Ok(false);
        }
        manifest.plugin_file = resolved.display().to_string();

        if self
            .loaded
            .read()
            .await
            .iter()
            .any(|p| p.manifest.plugin_file == manifest.plugin_file)
        {
            return Ok(false);
        }

        let mut plugin = self.catalog.instantiate(&file_name).ok_or_else(|| {
            crate::CoreError::Plugin(format!("no compiled-in plugin for '{file_name}'"))
        })?;

        let span = tracing::info_span!("plugin", name = %manifest.display_name());
        let context = PluginContext {
            plugin_name: manifest.display_name().to_string(),
            plugin_file: resolved,
            configuration: manifest.configuration.clone(),
            plugin_permissions: manifest.plugin_permissions.clone(),
            span,
        };
        match plugin.configure(context) {
            Ok(()) => {}
            Err(PluginError::NotImplemented) => {
                debug!(plugin = %manifest.display_name(), "Plugin does not configure logging")
            }
            Err(e) => warn!(plugin = %manifest.display_name(), error = %e, "Plugin configure failed"),
        }

        let entry = LoadedPlugin {
            manifest: Arc::new(manifest),
            plugin: Arc::from(plugin),
        };

        {
            let mut loaded = self.loaded.write().await;
            if loaded
                .iter()
                .any(|p| p.manifest.plugin_file == entry.manifest.plugin_file)
            {
                return Ok(false);
            }
            // Stable: equal orders stay in discovery order.
            let position = loaded
                .iter()
                .position(|p| p.manifest.processing_order > entry.manifest.processing_order)
                .unwrap_or(loaded.len());
            loaded.insert(position, entry.clone());
        }

        info!(
            plugin = %entry.manifest.display_name(),
            processing_order = entry.manifest.processing_order,
            permissions = %entry.manifest.permissions(),
            enabled = entry.manifest.enabled,
            "Plugin loaded"
        );

        if entry.manifest.permissions().contains(CorePermissions::ALLOW_BACKGROUND_TASK) {
            self.spawn_background_task(&entry);
        }
        Ok(true)
    }

    /// Manifests of every loaded plugin, in chain order.
    pub async fn plugins(&self) -> Vec<PluginManifest> {
        self.loaded
            .read()
            .await
            .iter()
            .map(|p| p.manifest.as_ref().clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.loaded.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.loaded.read().await.is_empty()
    }

    /// Threads `request` through every enabled plugin in order.
    ///
    /// A plugin's output replaces the value only when it holds
    /// `ALLOW_WRITEBACK`. Failures are logged and never stop the chain.
    pub async fn run_chain<T, F, Fut>(&self, request: T, per_plugin: F) -> T
    where
        T: Clone,
        F: Fn(T, Arc<P>) -> Fut,
        Fut: Future<Output = std::result::Result<T, PluginError>>,
    {
        let mut current = request;
        for entry in self.snapshot().await {
            let name = entry.manifest.display_name();
            if !entry.manifest.enabled {
                trace!(plugin = %name, "Plugin disabled; skipping");
                continue;
            }

            match per_plugin(current.clone(), Arc::clone(&entry.plugin)).await {
                Ok(output) => {
                    if entry.manifest.permissions().contains(CorePermissions::ALLOW_WRITEBACK) {
                        trace!(plugin = %name, "Plugin output written back");
                        current = output;
                    }
                }
                Err(PluginError::Unauthorized) => {
                    warn!(plugin = %name, "Plugin not authorized for this call")
                }
                Err(PluginError::NotImplemented) => {
                    warn!(plugin = %name, "Plugin does not implement this call")
                }
                Err(e) => error!(plugin = %name, error = %e, "Plugin call failed"),
            }
        }
        current
    }

    /// [`run_chain`](Self::run_chain) over a request/response pair.
    pub async fn run_chain2<T, U, F, Fut>(&self, request: T, response: U, per_plugin: F) -> (T, U)
    where
        T: Clone,
        U: Clone,
        F: Fn(T, U, Arc<P>) -> Fut,
        Fut: Future<Output = std::result::Result<(T, U), PluginError>>,
    {
        self.run_chain((request, response), |(request, response), plugin| {
            per_plugin(request, response, plugin)
        })
        .await
    }

    /// Collects every enabled plugin's health.
    ///
    /// The aggregate is `SUCCESSFUL` unless any collected response reports a
    /// status other than `HEALTHY` or `SUCCESSFUL`.
    pub async fn health_check(&self, request: &PluginHealthCheckRequest) -> PluginHealthCheckMultiResponse {
        let mut response = response_from_request(request, PluginHealthCheckMultiResponse::default());
        if let Some(header) = response.response_header.as_mut() {
            header.set_status(StatusCodes::Successful);
        }

        for entry in self.snapshot().await {
            let name = entry.manifest.display_name();
            if !entry.manifest.enabled {
                continue;
            }
            match entry.plugin.health_check().await {
                Ok(plugin_response) => {
                    response.plugin_health_check_responses.push(plugin_response)
                }
                Err(PluginError::NotImplemented) => {
                    debug!(plugin = %name, "Plugin has no health check")
                }
                Err(e) => error!(plugin = %name, error = %e, "Plugin health check failed"),
            }
        }

        let any_unhealthy = response.plugin_health_check_responses.iter().any(|r| {
            let status = r
                .response_header
                .as_ref()
                .map(|h| h.status())
                .unwrap_or(StatusCodes::Unknown);
            !matches!(status, StatusCodes::Healthy | StatusCodes::Successful)
        });
        if any_unhealthy {
            if let Some(header) = response.response_header.as_mut() {
                header.set_status(StatusCodes::GeneralFailure);
                header.message = HEALTH_FAILURE_MESSAGE.to_string();
            }
        }
        response
    }

    async fn snapshot(&self) -> Vec<LoadedPlugin<P>> {
        self.loaded.read().await.clone()
    }

    fn spawn_background_task(&self, entry: &LoadedPlugin<P>) {
        let plugin = Arc::clone(&entry.plugin);
        let name = entry.manifest.display_name().to_string();
        let lifetime = self.lifetime.clone();

        tokio::spawn(async move {
            debug!(plugin = %name, "Starting plugin background task");
            match plugin.background_task().await {
                Ok(()) => debug!(plugin = %name, "Plugin background task finished"),
                Err(PluginError::NotImplemented) => {
                    warn!(plugin = %name, "Plugin has background permission but no background task")
                }
                Err(e) => {
                    error!(plugin = %name, error = %e, "Plugin background task failed");
                    lifetime.stop_application(format!("plugin '{name}' background task failed: {e}"));
                }
            }
        });
    }
}

fn mark_errored(path: &Path) {
    let mut errored = path.as_os_str().to_owned();
    errored.push(ERRORED_SUFFIX);
    match fs::rename(path, &errored) {
        Ok(()) => warn!(file = %path.display(), "Plugin manifest marked as errored"),
        Err(e) => error!(file = %path.display(), error = %e, "Unable to mark plugin manifest as errored"),
    }
}

/// What the router and client need from a plugin host, whatever its plugin type.
#[async_trait]
pub trait PluginSupervisor: Send + Sync {
    async fn scan_plugins(&self) -> Result<usize>;

    async fn check_plugin_health(&self, request: PluginHealthCheckRequest) -> PluginHealthCheckMultiResponse;

    async fn loaded_manifests(&self) -> Vec<PluginManifest>;
}

#[async_trait]
impl<P: ?Sized + Plugin + 'static> PluginSupervisor for PluginHost<P> {
    async fn scan_plugins(&self) -> Result<usize> {
        self.scan().await
    }

    async fn check_plugin_health(&self, request: PluginHealthCheckRequest) -> PluginHealthCheckMultiResponse {
        self.health_check(&request).await
    }

    async fn loaded_manifests(&self) -> Vec<PluginManifest> {
        self.plugins().await
    }
}

/// Rescans the plugin directory every `interval` until cancelled.
pub fn spawn_scan_loop(
    supervisor: Arc<dyn PluginSupervisor>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_ms = interval.as_millis() as u64, "Plugin scan loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = supervisor.scan_plugins().await {
                        error!(error = %e, "Plugin scan failed");
                    }
                }
            }
        }
        debug!("Plugin scan loop stopped");
    })
}
