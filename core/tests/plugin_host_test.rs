use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use spacefx_core::proto::{
    PluginHealthCheckRequest, PluginHealthCheckResponse, RequestHeader, ResponseHeader, StatusCodes,
};
use spacefx_core::{AppLifetime, Plugin, PluginCatalog, PluginError, PluginHost, PluginResult};
use tempfile::tempdir;

/// Hook the tests run chains through.
#[async_trait]
trait TextPlugin: Plugin {
    async fn transform(&self, input: String) -> PluginResult<String>;
}

struct Appender {
    suffix: &'static str,
    health: Option<StatusCodes>,
}

#[async_trait]
impl Plugin for Appender {
    async fn health_check(&self) -> PluginResult<PluginHealthCheckResponse> {
        let status = self.health.ok_or(PluginError::NotImplemented)?;
        let mut header = ResponseHeader::default();
        header.set_status(status);
        Ok(PluginHealthCheckResponse {
            response_header: Some(header),
        })
    }
}

#[async_trait]
impl TextPlugin for Appender {
    async fn transform(&self, input: String) -> PluginResult<String> {
        Ok(format!("{input}{}", self.suffix))
    }
}

struct Broken(PluginError);

#[async_trait]
impl Plugin for Broken {
    async fn background_task(&self) -> PluginResult<()> {
        Err(self.0.clone())
    }

    async fn health_check(&self) -> PluginResult<PluginHealthCheckResponse> {
        Err(self.0.clone())
    }
}

#[async_trait]
impl TextPlugin for Broken {
    async fn transform(&self, _input: String) -> PluginResult<String> {
        Err(self.0.clone())
    }
}

fn make_catalog() -> PluginCatalog<dyn TextPlugin> {
    PluginCatalog::<dyn TextPlugin>::new()
        .register("append-a", || {
            Box::new(Appender {
                suffix: "-a",
                health: Some(StatusCodes::Healthy),
            }) as Box<dyn TextPlugin>
        })
        .register("append-b", || {
            Box::new(Appender {
                suffix: "-b",
                health: Some(StatusCodes::Successful),
            }) as Box<dyn TextPlugin>
        })
        .register("append-sick", || {
            Box::new(Appender {
                suffix: "-sick",
                health: Some(StatusCodes::Unhealthy),
            }) as Box<dyn TextPlugin>
        })
        .register("append-quiet", || {
            Box::new(Appender {
                suffix: "-quiet",
                health: None,
            }) as Box<dyn TextPlugin>
        })
        .register("failing", || {
            Box::new(Broken(PluginError::Failed("boom".into()))) as Box<dyn TextPlugin>
        })
        .register("unauthorized", || {
            Box::new(Broken(PluginError::Unauthorized)) as Box<dyn TextPlugin>
        })
}

fn write_plugin(dir: &Path, name: &str, plugin_file: &str, order: i32, permissions: &str, enabled: bool) {
    fs::write(dir.join(plugin_file), b"artifact").unwrap();
    write_manifest(dir, name, plugin_file, order, permissions, enabled);
}

fn write_manifest(dir: &Path, name: &str, plugin_file: &str, order: i32, permissions: &str, enabled: bool) {
    let manifest = serde_json::json!({
        "enabled": enabled,
        "processingOrder": order,
        "pluginFile": format!("/somewhere/else/{plugin_file}"),
        "pluginName": name,
        "corePermissions": permissions,
    });
    fs::write(
        dir.join(format!("{name}.json.spacefx_plugin")),
        serde_json::to_vec_pretty(&manifest).unwrap(),
    )
    .unwrap();
}

fn make_host(dir: &Path) -> PluginHost<dyn TextPlugin> {
    PluginHost::new(dir, make_catalog(), AppLifetime::new())
}

async fn run_text_chain(host: &PluginHost<dyn TextPlugin>, input: &str) -> String {
    host.run_chain(input.to_string(), |text, plugin| async move {
        plugin.transform(text).await
    })
    .await
}

#[tokio::test]
async fn chain_runs_in_processing_order_with_writeback() {
    let dir = tempdir().unwrap();
    write_plugin(dir.path(), "first-by-name", "append-a", 2, "ALLOW_WRITEBACK", true);
    write_plugin(dir.path(), "second-by-name", "append-b", 1, "ALL", true);

    let host = make_host(dir.path());
    assert_eq!(host.scan().await.unwrap(), 2);

    let names: Vec<String> = host.plugins().await.into_iter().map(|m| m.plugin_name).collect();
    assert_eq!(names, vec!["second-by-name".to_string(), "first-by-name".to_string()]);
    assert_eq!(run_text_chain(&host, "x").await, "x-b-a");
}

#[tokio::test]
async fn output_without_writeback_is_discarded() {
    let dir = tempdir().unwrap();
    write_plugin(dir.path(), "a", "append-a", 1, "NONE", true);
    write_plugin(dir.path(), "b", "append-b", 2, "ALLOW_WRITEBACK", true);

    let host = make_host(dir.path());
    host.scan().await.unwrap();
    assert_eq!(run_text_chain(&host, "x").await, "x-b");
}

#[tokio::test]
async fn failing_plugins_do_not_stop_the_chain() {
    let dir = tempdir().unwrap();
    write_plugin(dir.path(), "a", "append-a", 1, "ALLOW_WRITEBACK", true);
    write_plugin(dir.path(), "boom", "failing", 2, "ALLOW_WRITEBACK", true);
    write_plugin(dir.path(), "denied", "unauthorized", 3, "ALLOW_WRITEBACK", true);
    write_plugin(dir.path(), "b", "append-b", 4, "ALLOW_WRITEBACK", true);

    let host = make_host(dir.path());
    assert_eq!(host.scan().await.unwrap(), 4);
    assert_eq!(run_text_chain(&host, "x").await, "x-a-b");
}

#[tokio::test]
async fn disabled_plugins_are_skipped() {
    let dir = tempdir().unwrap();
    write_plugin(dir.path(), "a", "append-a", 1, "ALLOW_WRITEBACK", false);
    write_plugin(dir.path(), "b", "append-b", 2, "ALLOW_WRITEBACK", true);

    let host = make_host(dir.path());
    host.scan().await.unwrap();
    assert_eq!(host.len().await, 2);
    assert_eq!(run_text_chain(&host, "x").await, "x-b");
}

#[tokio::test]
async fn run_chain2_threads_request_and_response() {
    let dir = tempdir().unwrap();
    write_plugin(dir.path(), "a", "append-a", 1, "ALLOW_WRITEBACK", true);
    write_plugin(dir.path(), "b", "append-b", 2, "ALLOW_WRITEBACK", true);

    let host = make_host(dir.path());
    host.scan().await.unwrap();

    let (request, response) = host
        .run_chain2("req".to_string(), String::new(), |request, response, plugin| async move {
            let out = plugin.transform(response).await?;
            Ok((request, out))
        })
        .await;
    assert_eq!(request, "req");
    assert_eq!(response, "-a-b");
}

#[tokio::test]
async fn scan_handles_bad_missing_and_duplicate_manifests() {
    let dir = tempdir().unwrap();
    write_plugin(dir.path(), "good", "append-a", 1, "ALL", true);
    fs::write(dir.path().join("broken.json.spacefx_plugin"), b"{ not json").unwrap();
    write_manifest(dir.path(), "later", "append-b", 2, "ALL", true);
    write_plugin(dir.path(), "unknown", "not-compiled-in", 3, "ALL", true);

    let host = make_host(dir.path());
    assert_eq!(host.scan().await.unwrap(), 1);

    assert!(dir.path().join("broken.json.spacefx_plugin.error").exists());
    assert!(!dir.path().join("broken.json.spacefx_plugin").exists());
    assert!(dir.path().join("unknown.json.spacefx_plugin.error").exists());
    // Missing artifact: left alone and retried.
    assert!(dir.path().join("later.json.spacefx_plugin").exists());

    fs::write(dir.path().join("append-b"), b"artifact").unwrap();
    assert_eq!(host.scan().await.unwrap(), 1);
    assert_eq!(host.scan().await.unwrap(), 0);
    assert_eq!(host.len().await, 2);

    let resolved = dir.path().join("append-a").display().to_string();
    assert_eq!(host.plugins().await[0].plugin_file, resolved);
}

#[tokio::test]
async fn missing_directory_is_not_an_error() {
    let dir = tempdir().unwrap();
    let host = make_host(&dir.path().join("nope"));
    assert_eq!(host.scan().await.unwrap(), 0);
    assert!(host.is_empty().await);
}

#[tokio::test]
async fn health_check_aggregates_plugin_statuses() {
    let dir = tempdir().unwrap();
    write_plugin(dir.path(), "a", "append-a", 1, "NONE", true);
    write_plugin(dir.path(), "b", "append-b", 2, "NONE", true);
    write_plugin(dir.path(), "quiet", "append-quiet", 3, "NONE", true);

    let host = make_host(dir.path());
    host.scan().await.unwrap();

    let request = PluginHealthCheckRequest {
        request_header: Some(RequestHeader {
            tracking_id: "health-1".into(),
            ..Default::default()
        }),
    };
    let response = host.health_check(&request).await;
    let header = response.response_header.clone().unwrap();
    assert_eq!(header.status(), StatusCodes::Successful);
    assert_eq!(header.tracking_id, "health-1");
    assert_eq!(header.correlation_id, "health-1");
    assert_eq!(response.plugin_health_check_responses.len(), 2);

    write_plugin(dir.path(), "sick", "append-sick", 4, "NONE", true);
    write_plugin(dir.path(), "boom", "failing", 5, "NONE", true);
    host.scan().await.unwrap();

    let response = host.health_check(&request).await;
    let header = response.response_header.unwrap();
    assert_eq!(header.status(), StatusCodes::GeneralFailure);
    assert_eq!(
        header.message,
        "One or more plugins did not have a successful health check"
    );
    assert_eq!(response.plugin_health_check_responses.len(), 3);
}

#[tokio::test]
async fn failed_background_task_stops_the_application() {
    let dir = tempdir().unwrap();
    write_plugin(dir.path(), "boom", "failing", 1, "ALLOW_BACKGROUND_TASK", true);

    let lifetime = AppLifetime::new();
    let host = PluginHost::new(dir.path(), make_catalog(), lifetime.clone());
    host.scan().await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), lifetime.stopped())
        .await
        .expect("background failure should stop the application");
    assert!(lifetime.stop_reason().unwrap().contains("boom"));
}

#[tokio::test]
async fn unimplemented_background_task_is_not_fatal() {
    let dir = tempdir().unwrap();
    write_plugin(dir.path(), "a", "append-a", 1, "ALL", true);

    let lifetime = AppLifetime::new();
    let host: Arc<PluginHost<dyn TextPlugin>> =
        Arc::new(PluginHost::new(dir.path(), make_catalog(), lifetime.clone()));
    host.scan().await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!lifetime.is_stopping());
}
