use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::error::{ExecutorError, Result};
use crate::executor::{AgentExecutor, ExecuteRequest, ExecutorOutput};

/// `AgentExecutor` backed by the remote agent worker
pub struct HttpExecutor {
    client: Client,
    url: String,
}

impl HttpExecutor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            // Disable proxy for internal worker communication
            client: Client::builder()
                .no_proxy()
                .build()
                .unwrap_or_else(|_| Client::new()),
            url: url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AgentExecutor for HttpExecutor {
    async fn execute(&self, request: ExecuteRequest) -> Result<ExecutorOutput> {
        debug!(
            "Sending step for run {} to worker: {}/execute",
            request.run_id, self.url
        );

        let res = self
            .client
            .post(format!("{}/execute", self.url))
            .json(&request)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ExecutorError::WorkerStatus { status, body });
        }

        let output: ExecutorOutput = res
            .json()
            .await
            .map_err(|e| ExecutorError::invalid_response(e.to_string()))?;

        if let ExecutorOutput::ToolCalls { tool_calls } = &output {
            info!(
                "Worker requested {} tool calls for run {}",
                tool_calls.len(),
                request.run_id
            );
        }
        Ok(output)
    }
}
