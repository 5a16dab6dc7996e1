//! Completion notification sequence.

use std::time::Duration;

use reqwest::Client;
use sceneflow_models::{AnalysisPayload, ReadyPayload, RunResult};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::WebhookConfig;
use crate::error::{WebhookError, WebhookResult};
use crate::sent_cache::{normalize_endpoint, SentCache};

/// Header carrying the run id on every notification.
pub const RUN_ID_HEADER: &str = "X-Run-Id";

/// Result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    /// This run was already delivered to the endpoint
    AlreadySent,
    Failed(String),
}

impl DeliveryOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DeliveryOutcome::Sent)
    }
}

/// What `dispatch` did for one run.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub analysis: Option<DeliveryOutcome>,
    pub ready: Option<DeliveryOutcome>,
    pub callback: Option<DeliveryOutcome>,
    pub ready_delay: Duration,
}

/// Sends the analysis, ready and callback notifications for finished runs.
pub struct WebhookDispatcher {
    http: Client,
    config: WebhookConfig,
    exempt: Vec<String>,
    sent: Mutex<SentCache>,
}

impl WebhookDispatcher {
    pub fn new(config: WebhookConfig) -> WebhookResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("sceneflow-webhook/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let exempt = [&config.analysis_url, &config.processor_url]
            .into_iter()
            .flatten()
            .map(|u| normalize_endpoint(u))
            .collect();

        Ok(Self {
            http,
            sent: Mutex::new(SentCache::new(config.sent_ttl, config.sent_capacity)),
            config,
            exempt,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> WebhookResult<Self> {
        Self::new(WebhookConfig::from_env())
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    fn is_exempt(&self, endpoint: &str) -> bool {
        let normalized = normalize_endpoint(endpoint);
        self.exempt.iter().any(|e| *e == normalized)
    }

    /// Run the full notification sequence for `result`.
    ///
    /// 1. Analysis payload to the analysis endpoint, always.
    /// 2. Pause proportional to the frame count.
    /// 3. Ready payload to the processor endpoint if uploads are verified.
    /// 4. Analysis payload to `callback_url` unless it is a configured endpoint.
    pub async fn dispatch(&self, result: &RunResult, callback_url: Option<&str>) -> DispatchReport {
        let run_id = result.run_id.as_str();
        let analysis = AnalysisPayload::from_result(result);
        let mut report = DispatchReport::default();

        if let Some(url) = &self.config.analysis_url {
            report.analysis = Some(self.deliver(url, run_id, &analysis).await);
        }

        report.ready_delay = self.config.ready_delay(result.frame_count());
        if !report.ready_delay.is_zero() {
            debug!(
                run_id,
                "Waiting {:?} before ready notification",
                report.ready_delay
            );
            tokio::time::sleep(report.ready_delay).await;
        }

        if result.ready_eligible() {
            if let Some(url) = &self.config.processor_url {
                let ready = ReadyPayload::from_result(result);
                report.ready = Some(self.deliver(url, run_id, &ready).await);
            }
        } else if result.is_fatal() {
            info!(
                run_id,
                error = ?result.error.as_ref().map(|e| e.category),
                "Run failed, withholding ready notification"
            );
        } else {
            info!(
                run_id,
                uploaded = result.uploaded,
                failed = result.failed,
                total = result.total,
                "Uploads not verified, withholding ready notification"
            );
        }

        if let Some(url) = callback_url.filter(|u| !u.trim().is_empty()) {
            if self.is_exempt(url) {
                debug!(run_id, "Callback matches a configured endpoint, skipping");
            } else {
                report.callback = Some(self.deliver(url, run_id, &analysis).await);
            }
        }

        report
    }

    /// POST `payload` to `endpoint` unless this run was already delivered
    /// there. Configured endpoints are never de-duplicated.
    pub async fn deliver<T: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        run_id: &str,
        payload: &T,
    ) -> DeliveryOutcome {
        let tracked = !self.is_exempt(endpoint);

        if tracked && !self.sent.lock().await.try_insert(endpoint, run_id) {
            info!(run_id, endpoint, "Notification already sent, skipping");
            return DeliveryOutcome::AlreadySent;
        }

        match self.post(endpoint, run_id, payload).await {
            Ok(()) => {
                info!(run_id, endpoint, "Notification sent");
                DeliveryOutcome::Sent
            }
            Err(e) => {
                if tracked {
                    self.sent.lock().await.remove(endpoint, run_id);
                }
                match &e {
                    WebhookError::Status { status, .. } if *status < 500 => {
                        error!(run_id, endpoint, "Notification rejected: {}", e)
                    }
                    _ => warn!(run_id, endpoint, "Notification failed: {}", e),
                }
                DeliveryOutcome::Failed(e.to_string())
            }
        }
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        run_id: &str,
        payload: &T,
    ) -> WebhookResult<()> {
        let body = serde_json::to_vec(payload)?;
        let response = self
            .http
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(RUN_ID_HEADER, run_id)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(WebhookError::status(status.as_u16(), body))
        }
    }
}
