//! API client module
//!
//! HTTP client for the Keel node API.

use anyhow::{Context, Result};
use keel_core::domain::kill::{KillEntry, KillRequest};
use keel_core::domain::pipeline::Pipeline;
use reqwest::Client;

use crate::types::{BindNodes, HealthReport, Published, ScheduledPipeline};

/// HTTP client for the Keel node API
pub struct NodeClient {
    base_url: String,
    client: Client,
}

impl NodeClient {
    /// Create a new API client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the node API
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Fetch node and watcher status
    ///
    /// A failed watcher makes the node answer 503 with the same body, so the
    /// report is decoded regardless of status.
    pub async fn health(&self) -> Result<HealthReport> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send health request")?;

        response
            .json()
            .await
            .context("Failed to parse response JSON")
    }

    /// List pipelines known to the node
    pub async fn list_pipelines(&self) -> Result<Vec<ScheduledPipeline>> {
        let url = format!("{}/pipelines", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send list pipelines request")?;

        self.handle_response(response).await
    }

    /// Create or replace a pipeline
    pub async fn publish_pipeline(&self, pipeline: &Pipeline) -> Result<Published> {
        let url = format!("{}/pipeline", self.base_url);
        let response = self
            .client
            .put(&url)
            .json(pipeline)
            .send()
            .await
            .context("Failed to send publish pipeline request")?;

        self.handle_response(response).await
    }

    /// Delete a pipeline
    pub async fn retract_pipeline(&self, id: &str) -> Result<()> {
        let url = format!("{}/pipeline/{}", self.base_url, id);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .context("Failed to send delete pipeline request")?;

        self.check_status(response).await?;
        Ok(())
    }

    /// Replace the node list of a pipeline
    pub async fn bind_nodes(&self, req: &BindNodes) -> Result<Published> {
        let url = format!("{}/pipeline/nodes", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .context("Failed to send bind nodes request")?;

        self.handle_response(response).await
    }

    /// Publish a kill signal for a pipeline
    pub async fn request_kill(&self, pipeline_id: &str) -> Result<()> {
        let url = format!("{}/pipeline/kill", self.base_url);
        let req = KillRequest {
            pipeline_id: pipeline_id.to_string(),
        };
        let response = self
            .client
            .post(&url)
            .json(&req)
            .send()
            .await
            .context("Failed to send kill request")?;

        self.check_status(response).await?;
        Ok(())
    }

    /// List kill markers active on the node
    pub async fn list_active_kills(&self) -> Result<Vec<KillEntry>> {
        let url = format!("{}/killer/active", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send list kills request")?;

        self.handle_response(response).await
    }

    /// Turn a non-success status into an error carrying the response body
    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Request failed with status {}: {}", status, error_text);
        }

        Ok(response)
    }

    /// Handle API response and deserialize JSON
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        self.check_status(response)
            .await?
            .json()
            .await
            .context("Failed to parse response JSON")
    }
}
