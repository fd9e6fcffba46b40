//! Telemetry upload
//!
//! Fire-and-forget: a failed batch is logged and dropped, never re-queued.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cohort_core::{CohortError, CohortResult};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::TelemetrySample;

/// Destination for telemetry batches
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn upload(&self, batch: Vec<TelemetrySample>) -> CohortResult<()>;
}

#[derive(Debug, Serialize)]
struct TelemetryBatch<'a> {
    logs: &'a [TelemetrySample],
}

/// `POST {endpoint}/telemetry` with `{ "logs": [...] }`
#[derive(Debug, Clone)]
pub struct HttpTelemetrySink {
    client: reqwest::Client,
    url: String,
}

impl HttpTelemetrySink {
    pub fn new(endpoint: &str, timeout: Duration) -> CohortResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CohortError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            client,
            url: format!("{}/telemetry", endpoint.trim_end_matches('/')),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TelemetrySink for HttpTelemetrySink {
    async fn upload(&self, batch: Vec<TelemetrySample>) -> CohortResult<()> {
        self.client
            .post(&self.url)
            .json(&TelemetryBatch { logs: &batch })
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| CohortError::UploadFailed(e.to_string()))?;
        Ok(())
    }
}

/// Upload a batch in the background, logging the outcome
pub fn spawn_upload(sink: Arc<dyn TelemetrySink>, batch: Vec<TelemetrySample>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let count = batch.len();
        match sink.upload(batch).await {
            Ok(()) => tracing::debug!(target: "telemetry", count, "telemetry batch uploaded"),
            Err(err) => tracing::warn!(target: "telemetry", count, %err, "telemetry batch dropped"),
        }
    })
}
