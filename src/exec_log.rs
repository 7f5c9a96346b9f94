//! Best-effort execution logging.
//!
//! Records are appended to an external store after the response is already
//! decided; a failed write is logged and swallowed, never surfaced to the
//! caller. This core only writes, it never reads the store back.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::execution::Language;

/// One persisted execution outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub user_id: String,
    pub language: Language,
    pub exit_code: i32,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[async_trait]
pub trait ExecutionLog: Send + Sync {
    async fn record(&self, record: ExecutionRecord) -> anyhow::Result<()>;
}

/// Posts records to a REST endpoint (optionally bearer-authenticated).
pub struct RestExecutionLog {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl RestExecutionLog {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token,
        }
    }
}

#[async_trait]
impl ExecutionLog for RestExecutionLog {
    async fn record(&self, record: ExecutionRecord) -> anyhow::Result<()> {
        let mut request = self.http.post(&self.endpoint).json(&record);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request.send().await?.error_for_status()?;
        debug!(user_id = %record.user_id, language = %record.language, "execution recorded");
        Ok(())
    }
}

/// Used when no log endpoint is configured, and in tests.
pub struct NoopExecutionLog;

#[async_trait]
impl ExecutionLog for NoopExecutionLog {
    async fn record(&self, _record: ExecutionRecord) -> anyhow::Result<()> {
        Ok(())
    }
}
