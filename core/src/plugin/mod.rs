// Plugin system: manifests, compiled-in catalog, host
use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::proto::PluginHealthCheckResponse;

pub mod catalog;
pub mod host;
pub mod manifest;

pub use catalog::PluginCatalog;
pub use host::{spawn_scan_loop, PluginHost, PluginSupervisor};
pub use manifest::{CorePermissions, PluginManifest};

/// Outcome of a single plugin call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("plugin is not authorized for this call")]
    Unauthorized,

    #[error("plugin does not implement this call")]
    NotImplemented,

    #[error("{0}")]
    Failed(String),
}

pub type PluginResult<T> = std::result::Result<T, PluginError>;

/// Handed to a plugin when it is loaded.
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub plugin_name: String,
    pub plugin_file: PathBuf,
    pub configuration: HashMap<String, String>,
    pub plugin_permissions: String,
    /// Span the plugin should log under.
    pub span: tracing::Span,
}

/// Base contract every plugin implements.
///
/// Applications extend it with their own hook methods (a supertrait bound on
/// `Plugin`) and host a `PluginHost<dyn TheirTrait>`.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Called once before the plugin joins any chain.
    fn configure(&mut self, context: PluginContext) -> PluginResult<()> {
        let _ = context;
        Err(PluginError::NotImplemented)
    }

    /// Long-running work, started only with `ALLOW_BACKGROUND_TASK`.
    async fn background_task(&self) -> PluginResult<()> {
        Err(PluginError::NotImplemented)
    }

    async fn health_check(&self) -> PluginResult<PluginHealthCheckResponse> {
        Err(PluginError::NotImplemented)
    }
}
