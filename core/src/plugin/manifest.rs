use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::ops::BitOr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Suffix of plugin manifest files.
pub const MANIFEST_SUFFIX: &str = ".json.spacefx_plugin";
/// Suffix appended to manifests that failed to load.
pub const ERRORED_SUFFIX: &str = ".error";

/// What the runtime lets a plugin do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CorePermissions(u8);

impl CorePermissions {
    pub const NONE: Self = Self(0);
    pub const ALLOW_WRITEBACK: Self = Self(1);
    pub const ALLOW_BACKGROUND_TASK: Self = Self(2);
    pub const ALL: Self = Self(3);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Parses `ALL`, `ALLOW_WRITEBACK, ALLOW_BACKGROUND_TASK`, `none`, ...
    ///
    /// Flags may be separated by commas or pipes. Anything unrecognised yields
    /// [`CorePermissions::NONE`].
    pub fn parse(raw: &str) -> Self {
        let mut permissions = Self::NONE;
        for token in raw.split([',', '|']).map(str::trim).filter(|t| !t.is_empty()) {
            let flag = match token.to_ascii_uppercase().as_str() {
                "NONE" => Self::NONE,
                "ALLOW_WRITEBACK" => Self::ALLOW_WRITEBACK,
                "ALLOW_BACKGROUND_TASK" => Self::ALLOW_BACKGROUND_TASK,
                "ALL" => Self::ALL,
                _ => return Self::NONE,
            };
            permissions = permissions | flag;
        }
        permissions
    }
}

impl BitOr for CorePermissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for CorePermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::NONE => "NONE",
            Self::ALLOW_WRITEBACK => "ALLOW_WRITEBACK",
            Self::ALLOW_BACKGROUND_TASK => "ALLOW_BACKGROUND_TASK",
            _ => "ALL",
        };
        f.write_str(name)
    }
}

fn default_enabled() -> bool {
    true
}

/// Contents of a `*.json.spacefx_plugin` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    #[serde(default = "default_enabled", alias = "ENABLED")]
    pub enabled: bool,
    #[serde(default, alias = "PROCESSING_ORDER")]
    pub processing_order: i32,
    #[serde(alias = "PLUGINFILE", alias = "PLUGIN_FILE")]
    pub plugin_file: String,
    #[serde(default, alias = "PLUGINNAME", alias = "PLUGIN_NAME")]
    pub plugin_name: String,
    #[serde(default, alias = "CORE_PERMISSIONS")]
    pub core_permissions: String,
    /// Opaque to the runtime; interpreted by the application.
    #[serde(default, alias = "PLUGIN_PERMISSIONS")]
    pub plugin_permissions: String,
    #[serde(default, alias = "CONFIGURATION")]
    pub configuration: HashMap<String, String>,
}

impl PluginManifest {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn permissions(&self) -> CorePermissions {
        CorePermissions::parse(&self.core_permissions)
    }

    /// Configuration value for `key`, compared case-insensitively.
    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.configuration
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Name used in logs: `pluginName`, falling back to the plugin file.
    pub fn display_name(&self) -> &str {
        if self.plugin_name.is_empty() {
            &self.plugin_file
        } else {
            &self.plugin_name
        }
    }
}

/// Manifest files directly inside `dir`, sorted by file name.
pub fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_manifest = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(MANIFEST_SUFFIX))
            .unwrap_or(false);
        if is_manifest && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_and_combined_permissions() {
        assert_eq!(CorePermissions::parse("ALL"), CorePermissions::ALL);
        assert_eq!(
            CorePermissions::parse("allow_writeback"),
            CorePermissions::ALLOW_WRITEBACK
        );
        assert_eq!(
            CorePermissions::parse("ALLOW_WRITEBACK, ALLOW_BACKGROUND_TASK"),
            CorePermissions::ALL
        );
        assert_eq!(CorePermissions::parse(""), CorePermissions::NONE);
        assert_eq!(CorePermissions::parse("ALLOW_EVERYTHING"), CorePermissions::NONE);
    }

    #[test]
    fn all_contains_every_flag() {
        assert!(CorePermissions::ALL.contains(CorePermissions::ALLOW_WRITEBACK));
        assert!(CorePermissions::ALL.contains(CorePermissions::ALLOW_BACKGROUND_TASK));
        assert!(!CorePermissions::ALLOW_WRITEBACK.contains(CorePermissions::ALLOW_BACKGROUND_TASK));
    }

    #[test]
    fn manifest_defaults_to_enabled() {
        let manifest: PluginManifest =
            serde_json::from_str(r#"{"pluginFile": "echo.so", "processingOrder": 5}"#).unwrap();
        assert!(manifest.enabled);
        assert_eq!(manifest.processing_order, 5);
        assert_eq!(manifest.permissions(), CorePermissions::NONE);
    }

    #[test]
    fn manifest_accepts_upper_case_keys() {
        let manifest: PluginManifest = serde_json::from_str(
            r#"{"ENABLED": false, "PLUGINFILE": "a.so", "CORE_PERMISSIONS": "ALL",
                "CONFIGURATION": {"Greeting": "hello"}}"#,
        )
        .unwrap();
        assert!(!manifest.enabled);
        assert_eq!(manifest.plugin_file, "a.so");
        assert_eq!(manifest.permissions(), CorePermissions::ALL);
        assert_eq!(manifest.config_value("greeting"), Some("hello"));
    }
}
