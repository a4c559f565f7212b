//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use documentos_loadtest::{
    HttpClient, HttpResponse, LoadTestError, MetricSink, Result, SeededRandom, VuContext,
};
use parking_lot::Mutex;
use tokio::sync::watch;

pub const BASE_URL: &str = "https://documentos.test";

pub const DOCX_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const ODT_TYPE: &str = "application/vnd.oasis.opendocument.text";

/// Client that answers every GET through a closure after a fixed latency
pub struct ScriptedClient<F> {
    latency: Duration,
    respond: F,
    calls: Mutex<Vec<String>>,
}

impl<F> ScriptedClient<F>
where
    F: Fn(&str) -> Result<HttpResponse> + Send + Sync,
{
    pub fn new(latency: Duration, respond: F) -> Self {
        Self {
            latency,
            respond,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl<F> HttpClient for ScriptedClient<F>
where
    F: Fn(&str) -> Result<HttpResponse> + Send + Sync,
{
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.calls.lock().push(url.to_string());
        tokio::time::sleep(self.latency).await;
        (self.respond)(url)
    }
}

/// Well-formed health payload
pub fn health_ok() -> HttpResponse {
    HttpResponse::new(200)
        .with_header("Content-Type", "application/json")
        .with_body(r#"{"status":"ok","service":"documentos-service"}"#)
}

/// Valid document for the format at the end of `url`
pub fn document_for(url: &str) -> HttpResponse {
    let content_type = if url.ends_with("/pdf") {
        "application/pdf"
    } else if url.ends_with("/docx") {
        DOCX_TYPE
    } else {
        ODT_TYPE
    };
    HttpResponse::new(200)
        .with_header("Content-Type", content_type)
        .with_body(vec![b'%'; 4096])
}

/// Healthy service: every endpoint answers correctly
pub fn healthy_service(url: &str) -> Result<HttpResponse> {
    if url.ends_with("/api/v1/health") {
        Ok(health_ok())
    } else {
        Ok(document_for(url))
    }
}

/// Service that answers every request with a bare status
pub fn status_only(status: u16) -> impl Fn(&str) -> Result<HttpResponse> + Send + Sync {
    move |_| Ok(HttpResponse::new(status))
}

/// Service that is unreachable
pub fn unreachable(_url: &str) -> Result<HttpResponse> {
    Err(LoadTestError::Transport("connection refused".to_string()))
}

/// Context for driving scenario iterations by hand.
///
/// The returned sender keeps the virtual user active while held.
pub fn vu_context(
    sink: Arc<MetricSink>,
    client: Arc<dyn HttpClient>,
    seed: u64,
) -> (VuContext, watch::Sender<bool>) {
    let (retire, retire_rx) = watch::channel(false);
    let ctx = VuContext::new(0, sink, client, Box::new(SeededRandom::new(seed)), retire_rx);
    (ctx, retire)
}

/// Counter total or 0
pub fn count(sink: &MetricSink, name: &str) -> f64 {
    sink.aggregate(name).map(|a| a.count()).unwrap_or(0.0)
}
