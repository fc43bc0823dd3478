use std::sync::Arc;

use tracing::{debug, error};

use super::MonitorableService;
use crate::lifecycle::AppLifetime;

/// Result of one liveness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthReport {
    Healthy,
    Unhealthy(Vec<String>),
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthReport::Healthy)
    }
}

/// Probe over every registered service; any unhealthy one stops the app.
#[derive(Clone)]
pub struct LivenessCheck {
    services: Vec<Arc<dyn MonitorableService>>,
    lifetime: AppLifetime,
}

impl LivenessCheck {
    pub fn new(lifetime: AppLifetime) -> Self {
        Self {
            services: Vec::new(),
            lifetime,
        }
    }

    pub fn with_service(mut self, service: Arc<dyn MonitorableService>) -> Self {
        self.services.push(service);
        self
    }

    pub fn check(&self) -> HealthReport {
        let unhealthy: Vec<String> = self
            .services
            .iter()
            .filter(|s| !s.is_healthy())
            .map(|s| s.service_name().to_string())
            .collect();

        if unhealthy.is_empty() {
            debug!(services = self.services.len(), "Liveness check passed");
            return HealthReport::Healthy;
        }

        let names = unhealthy.join(", ");
        error!(services = %names, "Liveness check failed");
        self.lifetime
            .stop_application(format!("unhealthy services: {names}"));
        HealthReport::Unhealthy(unhealthy)
    }
}
