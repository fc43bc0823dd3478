// Plugin contract of the debug host and its one compiled-in plugin
use async_trait::async_trait;
use spacefx_core::proto::{PluginHealthCheckResponse, ResponseHeader, SimpleMessage, StatusCodes};
use spacefx_core::{Plugin, PluginContext, PluginError, PluginResult};
use tracing::{info, Span};

/// File name the echo plugin's manifest references.
pub const ECHO_PLUGIN_FILE: &str = "echo-plugin";

/// Hooks the debug host runs its plugins through.
#[async_trait]
pub trait AppPlugin: Plugin {
    async fn simple_message(&self, input: SimpleMessage) -> PluginResult<SimpleMessage> {
        let _ = input;
        Err(PluginError::NotImplemented)
    }
}

/// Appends a configured suffix to every `SimpleMessage`.
pub struct EchoPlugin {
    suffix: String,
    span: Span,
}

impl Default for EchoPlugin {
    fn default() -> Self {
        Self {
            suffix: " (echoed)".to_string(),
            span: Span::none(),
        }
    }
}

#[async_trait]
impl Plugin for EchoPlugin {
    fn configure(&mut self, context: PluginContext) -> PluginResult<()> {
        if let Some(suffix) = context.configuration.get("suffix") {
            self.suffix = suffix.clone();
        }
        self.span = context.span;
        Ok(())
    }

    async fn background_task(&self) -> PluginResult<()> {
        self.span.in_scope(|| info!("Echo plugin ready"));
        Ok(())
    }

    async fn health_check(&self) -> PluginResult<PluginHealthCheckResponse> {
        let mut header = ResponseHeader::default();
        header.set_status(StatusCodes::Healthy);
        Ok(PluginHealthCheckResponse {
            response_header: Some(header),
        })
    }
}

#[async_trait]
impl AppPlugin for EchoPlugin {
    async fn simple_message(&self, mut input: SimpleMessage) -> PluginResult<SimpleMessage> {
        input.message.push_str(&self.suffix);
        self.span
            .in_scope(|| info!(message = %input.message, "Echo plugin processed message"));
        Ok(input)
    }
}
