//! Background services run by a started client.
//!
//! - `HeartbeatService`: publishes this application's pulse on a fixed interval
//! - `ResourceScavenger`: sweeps stale heartbeats and expired cache records
//! - `LivenessCheck`: aggregates service health and stops the app on failure

pub mod heartbeat;
pub mod liveness;
pub mod scavenger;

pub use heartbeat::HeartbeatService;
pub use liveness::{HealthReport, LivenessCheck};
pub use scavenger::ResourceScavenger;

/// A component whose health feeds the liveness check.
pub trait MonitorableService: Send + Sync {
    fn service_name(&self) -> &str;
    fn is_healthy(&self) -> bool;
}
