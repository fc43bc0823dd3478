use std::time::Duration;

/// Settings of the debug host itself; the runtime reads its own `AppConfig`.
#[derive(Clone, Debug)]
pub struct DebugHostConfig {
    /// App id this host answers to on the local bus.
    pub app_id: String,
    /// Text of the `SimpleMessage` the host sends itself on startup.
    pub greeting: String,
    pub liveness_interval: Duration,
}

impl Default for DebugHostConfig {
    fn default() -> Self {
        Self {
            app_id: "debug-host".to_string(),
            greeting: "hello from the debug host".to_string(),
            liveness_interval: Duration::from_millis(15_000),
        }
    }
}

impl DebugHostConfig {
    pub fn load() -> Self {
        let defaults = Self::default();
        Self {
            app_id: std::env::var("DEBUG_HOST_APP_ID")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.app_id),
            greeting: std::env::var("DEBUG_HOST_GREETING")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.greeting),
            liveness_interval: std::env::var("DEBUG_HOST_LIVENESS_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.liveness_interval),
        }
    }
}
