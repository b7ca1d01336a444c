use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::CallbackSection;
use crate::job::Environment;

use super::error::{PipelineError, PipelineResult};
use super::types::PipelineReport;

/// Delivers completion and failure notifications to the upstream
/// application. Target resolution: per-job callback URL first, configured
/// default second; no URL means no delivery.
#[derive(Debug, Clone)]
pub struct CallbackClient {
    http: Client,
    default_url: Option<String>,
    token: Option<String>,
}

impl CallbackClient {
    pub fn new(config: &CallbackSection) -> PipelineResult<Self> {
        let http = Client::builder()
            .user_agent("vodforge/0.4")
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|err| PipelineError::Callback {
                message: err.to_string(),
            })?;
        Ok(Self {
            http,
            default_url: config.default_url.clone(),
            token: config.token.clone(),
        })
    }

    fn resolve_url<'a>(&'a self, job_url: Option<&'a str>) -> Option<&'a str> {
        job_url.or(self.default_url.as_deref())
    }

    pub async fn send_success(
        &self,
        job_url: Option<&str>,
        report: &PipelineReport,
    ) -> PipelineResult<()> {
        let Some(url) = self.resolve_url(job_url) else {
            debug!(job_id = %report.job_id, "no callback url configured, skipping");
            return Ok(());
        };
        let body = serde_json::json!({
            "jobId": report.job_id,
            "originalKey": report.original_key,
            "outputKey": report.output_key,
            "videoName": report.video_name,
            "environment": report.environment,
            "status": "completed",
            "timestamp": Utc::now().to_rfc3339(),
            "metadata": {
                "duration": report.duration_seconds,
                "originalResolution": report.original_resolution(),
            },
        });
        self.post(url, &body).await
    }

    pub async fn send_failure(
        &self,
        job_url: Option<&str>,
        job_id: &str,
        original_key: &str,
        environment: Environment,
        error: &str,
    ) -> PipelineResult<()> {
        let Some(url) = self.resolve_url(job_url) else {
            debug!(job_id, "no callback url configured, skipping failure notice");
            return Ok(());
        };
        let body = serde_json::json!({
            "jobId": job_id,
            "originalKey": original_key,
            "environment": environment,
            "status": "failed",
            "error": error,
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.post(url, &body).await
    }

    async fn post(&self, url: &str, body: &serde_json::Value) -> PipelineResult<()> {
        let mut request = self.http.post(url).json(body);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let response = request.send().await.map_err(|err| PipelineError::Callback {
            message: format!("{url}: {err}"),
        })?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(url, %status, "callback rejected");
            return Err(PipelineError::Callback {
                message: format!("{url} responded {status}: {body}"),
            });
        }
        Ok(())
    }
}
