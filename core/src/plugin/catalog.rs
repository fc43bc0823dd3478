use std::collections::HashMap;
use std::sync::Arc;

use super::Plugin;

type Factory<P> = Arc<dyn Fn() -> Box<P> + Send + Sync>;

/// Plugins compiled into the application, keyed by the file name a manifest
/// references in `pluginFile`.
pub struct PluginCatalog<P: ?Sized + Plugin> {
    factories: HashMap<String, Factory<P>>,
}

impl<P: ?Sized + Plugin> Default for PluginCatalog<P> {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }
}

impl<P: ?Sized + Plugin> PluginCatalog<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, plugin_file: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<P> + Send + Sync + 'static,
    {
        self.factories.insert(plugin_file.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, plugin_file: &str) -> bool {
        self.factories.contains_key(plugin_file)
    }

    /// A fresh instance of the plugin built from `plugin_file`.
    pub fn instantiate(&self, plugin_file: &str) -> Option<Box<P>> {
        self.factories.get(plugin_file).map(|factory| factory())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
