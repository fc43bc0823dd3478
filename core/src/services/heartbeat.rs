use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::MonitorableService;
use crate::envelope::HEARTBEAT_PULSE_TOPIC;
use crate::lifecycle::AppLifetime;
use crate::messaging::Publisher;
use crate::payload::new_tracking_id;
use crate::proto::{HeartBeatPulse, ResponseHeader, StatusCodes};
use crate::{timestamp, Result};

/// Metric sent alongside every pulse.
pub const HEARTBEAT_METRIC: &str = "Heartbeat";

/// Announces this application to its peers.
///
/// Each tick publishes one pulse and one `Heartbeat` metric. A failed tick is
/// fatal: the application is stopped.
pub struct HeartbeatService {
    publisher: Publisher,
    app_id: String,
    app_version: String,
    pulse_timing: Duration,
    started_at: DateTime<Utc>,
    lifetime: AppLifetime,
    failed: AtomicBool,
}

impl HeartbeatService {
    pub fn new(
        publisher: Publisher,
        app_id: impl Into<String>,
        app_version: impl Into<String>,
        pulse_timing: Duration,
        lifetime: AppLifetime,
    ) -> Self {
        Self {
            publisher,
            app_id: app_id.into(),
            app_version: app_version.into(),
            pulse_timing,
            started_at: Utc::now(),
            lifetime,
            failed: AtomicBool::new(false),
        }
    }

    pub fn build_pulse(&self) -> HeartBeatPulse {
        let id = new_tracking_id();
        let mut header = ResponseHeader {
            correlation_id: id.clone(),
            tracking_id: id,
            app_id: self.app_id.clone(),
            origin_app_id: self.app_id.clone(),
            ..Default::default()
        };
        header.set_status(StatusCodes::Healthy);

        HeartBeatPulse {
            response_header: Some(header),
            app_id: self.app_id.clone(),
            current_system_time: Some(timestamp::now()),
            app_start_time: Some(timestamp::to_timestamp(self.started_at)),
            pulse_frequency_ms: i32::try_from(self.pulse_timing.as_millis()).unwrap_or(i32::MAX),
            app_version: self.app_version.clone(),
        }
    }

    /// Publishes one pulse and its metric.
    pub async fn pulse(&self) -> Result<()> {
        let pulse = self.build_pulse();
        self.publisher.publish_msg(HEARTBEAT_PULSE_TOPIC, &pulse).await?;
        self.publisher.send_telemetry_metric(HEARTBEAT_METRIC, 1, None).await?;
        debug!(app_id = %self.app_id, "Heartbeat pulse sent");
        Ok(())
    }

    /// Emits pulses every `pulse_timing` until the lifetime stops.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let cancel = self.lifetime.cancellation_token();
            info!(
                app_id = %self.app_id,
                interval_ms = self.pulse_timing.as_millis() as u64,
                "Heartbeat service started"
            );

            loop {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = self.pulse() => outcome,
                };
                if let Err(e) = outcome {
                    error!(app_id = %self.app_id, error = %e, "Heartbeat pulse failed");
                    self.failed.store(true, Ordering::Relaxed);
                    self.lifetime.stop_application(format!("heartbeat failed: {e}"));
                    break;
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.pulse_timing) => {}
                }
            }
            debug!(app_id = %self.app_id, "Heartbeat service stopped");
        })
    }
}

impl MonitorableService for HeartbeatService {
    fn service_name(&self) -> &str {
        "HeartbeatService"
    }

    fn is_healthy(&self) -> bool {
        !self.failed.load(Ordering::Relaxed)
    }
}
