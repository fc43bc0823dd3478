use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, warn};

use crate::plugin::manifest::{self, PluginManifest};
use crate::{CoreError, Result};

pub const DEFAULT_SPACEFX_DIR: &str = "/var/spacedev";
pub const DEFAULT_CONFIG_DIR: &str = "/etc/spacefx_config";

/// Setting naming the plugin directory.
pub const PLUGIN_DIR_SETTING: &str = "spacefx_dir_plugins";
/// Setting naming the file transfer root.
pub const XFER_DIR_SETTING: &str = "spacefx_dir_xfer";

/// Runtime configuration of a client.
///
/// Directories come from `SPACEFX_DIR` and `SPACEFX_SECRET_DIR`; every other
/// value is one file per setting inside the config directory.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub spacefx_dir: PathBuf,
    pub config_dir: PathBuf,
    pub xfer_directory_root: PathBuf,
    pub plugin_directory: PathBuf,
    pub heartbeat_pulse_timing: Duration,
    pub heartbeat_received_tolerance: Duration,
    /// Consumed by the host's resource sampler; the runtime only carries it.
    pub resource_monitor_enabled: bool,
    pub resource_monitor_timing: Duration,
    pub resource_scavenger_enabled: bool,
    pub resource_scavenger_timing: Duration,
    /// Upper bound on resolving this client's app id from the sidecar.
    pub app_id_resolution_timeout: Duration,
    /// Default bound for `wait_for_online`.
    pub online_wait_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        let spacefx_dir = PathBuf::from(DEFAULT_SPACEFX_DIR);
        Self {
            xfer_directory_root: spacefx_dir.join("xfer"),
            plugin_directory: spacefx_dir.join("plugins"),
            spacefx_dir,
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            heartbeat_pulse_timing: Duration::from_millis(2_000),
            heartbeat_received_tolerance: Duration::from_millis(10_000),
            resource_monitor_enabled: true,
            resource_monitor_timing: Duration::from_millis(5_000),
            resource_scavenger_enabled: true,
            resource_scavenger_timing: Duration::from_millis(30_000),
            app_id_resolution_timeout: Duration::from_secs(60),
            online_wait_timeout: Duration::from_secs(60),
        }
    }
}

impl AppConfig {
    /// Reads directories from the environment and settings from the config directory.
    pub fn load() -> Self {
        let spacefx_dir = std::env::var("SPACEFX_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SPACEFX_DIR.to_string());
        let config_dir = std::env::var("SPACEFX_SECRET_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_DIR.to_string());
        Self::from_dirs(spacefx_dir, config_dir)
    }

    /// Builds a config from explicit directories, reading settings from `config_dir`.
    pub fn from_dirs(spacefx_dir: impl Into<PathBuf>, config_dir: impl Into<PathBuf>) -> Self {
        let defaults = Self::default();
        let spacefx_dir = spacefx_dir.into();
        let config_dir = config_dir.into();

        let xfer_directory_root = path_setting(&config_dir, XFER_DIR_SETTING)
            .unwrap_or_else(|| spacefx_dir.join("xfer"));
        let plugin_directory = path_setting(&config_dir, PLUGIN_DIR_SETTING)
            .unwrap_or_else(|| spacefx_dir.join("plugins"));

        let ms = |name: &str, default: Duration| {
            Duration::from_millis(setting_or(&config_dir, name, default.as_millis() as u64))
        };

        Self {
            heartbeat_pulse_timing: ms("heartbeatpulsetimingms", defaults.heartbeat_pulse_timing),
            heartbeat_received_tolerance: ms(
                "heartbeatreceivedtolerancems",
                defaults.heartbeat_received_tolerance,
            ),
            resource_monitor_enabled: setting_or(
                &config_dir,
                "resourcemonitorenabled",
                defaults.resource_monitor_enabled,
            ),
            resource_monitor_timing: ms("resourcemonitortimingms", defaults.resource_monitor_timing),
            resource_scavenger_enabled: setting_or(
                &config_dir,
                "resourcescavengerenabled",
                defaults.resource_scavenger_enabled,
            ),
            resource_scavenger_timing: ms(
                "resourcescavengertimingms",
                defaults.resource_scavenger_timing,
            ),
            app_id_resolution_timeout: defaults.app_id_resolution_timeout,
            online_wait_timeout: defaults.online_wait_timeout,
            xfer_directory_root,
            plugin_directory,
            spacefx_dir,
            config_dir,
        }
    }

    pub fn get_config_setting(&self, name: &str) -> Result<String> {
        get_config_setting(&self.config_dir, name)
    }
}

/// Reads one setting.
///
/// The file `<config_dir>/<name>` wins. Otherwise the `configuration` maps of
/// the plugin manifests are searched in file name order, keys compared
/// case-insensitively, and the first match is taken. A blank result is an error.
pub fn get_config_setting(config_dir: &Path, name: &str) -> Result<String> {
    let not_found = || CoreError::ConfigNotFound {
        name: name.to_string(),
        dir: config_dir.display().to_string(),
    };

    let direct = config_dir.join(name);
    if direct.is_file() {
        let value = fs::read_to_string(&direct)?;
        return if value.trim().is_empty() {
            Err(not_found())
        } else {
            Ok(value)
        };
    }

    let plugin_dir_file = config_dir.join(PLUGIN_DIR_SETTING);
    if !plugin_dir_file.is_file() {
        return Err(not_found());
    }
    let plugin_dir = PathBuf::from(fs::read_to_string(&plugin_dir_file)?.trim());
    if !plugin_dir.is_dir() {
        return Err(not_found());
    }

    let mut value = String::new();
    for path in manifest::manifest_files(&plugin_dir)? {
        match PluginManifest::from_file(&path) {
            Ok(manifest) => {
                if let Some(found) = manifest.config_value(name) {
                    value = found.to_string();
                    break;
                }
            }
            Err(e) => debug!(file = %path.display(), error = %e, "Skipping unreadable plugin manifest"),
        }
    }

    if value.trim().is_empty() {
        Err(not_found())
    } else {
        Ok(value)
    }
}

fn path_setting(config_dir: &Path, name: &str) -> Option<PathBuf> {
    get_config_setting(config_dir, name)
        .ok()
        .map(|v| PathBuf::from(v.trim()))
}

fn setting_or<T>(config_dir: &Path, name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match get_config_setting(config_dir, name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(setting = name, value = %raw.trim(), ?default, "Unparseable setting; using default");
                default
            }
        },
        Err(_) => {
            debug!(setting = name, ?default, "Setting not present; using default");
            default
        }
    }
}
