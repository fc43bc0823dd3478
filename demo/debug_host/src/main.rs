mod config;
mod plugin;

use std::sync::Arc;

use async_trait::async_trait;
use config::DebugHostConfig;
use plugin::{AppPlugin, EchoPlugin, ECHO_PLUGIN_FILE};
use spacefx_core::messaging;
use spacefx_core::proto::SimpleMessage;
use spacefx_core::{
    AppConfig, AppLifetime, ClientBuilder, Envelope, LocalBus, MessageHandler, PluginCatalog,
    PluginHost,
};
use tokio::signal;
use tracing::{error, info, warn};

/// Runs every inbound `SimpleMessage` through the plugin chain.
struct SimpleMessageHandler {
    plugins: Arc<PluginHost<dyn AppPlugin>>,
}

#[async_trait]
impl MessageHandler<SimpleMessage> for SimpleMessageHandler {
    async fn message_received(
        &self,
        message: SimpleMessage,
        envelope: &Envelope,
    ) -> spacefx_core::Result<()> {
        let processed = self
            .plugins
            .run_chain(message, |msg, plugin| async move { plugin.simple_message(msg).await })
            .await;

        info!(
            target: "debug_host",
            source = %envelope.source_app_id,
            tracking_id = %envelope.tracking_id,
            message = %processed.message,
            "SimpleMessage received"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    spacefx_core::telemetry::init_tracing();

    let cfg = DebugHostConfig::load();
    let app_config = AppConfig::load();
    info!(
        target: "debug_host",
        app_id = %cfg.app_id,
        plugin_dir = %app_config.plugin_directory.display(),
        "Starting SpaceFx debug host"
    );

    let lifetime = AppLifetime::new();
    let bus = LocalBus::new();
    let broker = Arc::new(bus.connect(cfg.app_id.clone()));

    let catalog = PluginCatalog::<dyn AppPlugin>::new().register(ECHO_PLUGIN_FILE, || {
        Box::new(EchoPlugin::default()) as Box<dyn AppPlugin>
    });
    let plugins = Arc::new(PluginHost::new(
        app_config.plugin_directory.clone(),
        catalog,
        lifetime.clone(),
    ));

    let client = ClientBuilder::new(app_config, broker)
        .with_plugin_host(plugins.clone())
        .with_lifetime(lifetime.clone())
        .with_app_version(env!("CARGO_PKG_VERSION"))
        .with_handler::<SimpleMessage, _>(SimpleMessageHandler {
            plugins: Arc::clone(&plugins),
        })
        .build()?;

    let mut tasks = messaging::serve(&bus, &client).await?;
    client.wait_for_online(None).await?;
    tasks.extend(client.start().await?);

    let greeting = SimpleMessage {
        request_header: None,
        message: cfg.greeting.clone(),
    };
    if let Err(e) = client.direct_to_app(&cfg.app_id, &greeting).await {
        warn!(target: "debug_host", error = %e, "Unable to send greeting");
    }

    let mut probe = tokio::time::interval(cfg.liveness_interval);
    loop {
        tokio::select! {
            res = signal::ctrl_c() => {
                if let Err(e) = res {
                    error!(target: "debug_host", error = %e, "Unable to listen for Ctrl+C");
                }
                info!(target: "debug_host", "Shutting down...");
                client.shutdown();
                break;
            }
            _ = lifetime.stopped() => break,
            _ = probe.tick() => {
                client.check_liveness();
            }
        }
    }

    for task in tasks {
        task.abort();
    }

    if let Some(reason) = lifetime.stop_reason() {
        error!(target: "debug_host", reason = %reason, "Debug host stopped on failure");
        std::process::exit(1);
    }
    Ok(())
}
