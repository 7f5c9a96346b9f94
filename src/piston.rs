//! Remote execution proxy for the compiled/interpreted languages.
//!
//! One upstream call per submission, no retries, no queuing. The upstream
//! (a Piston-compatible service) compiles and runs the code; this module
//! only maps languages, packages the source and normalizes the run record.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::execution::{ExecutionResult, Language};

/// Public Piston instance used when no override is configured.
pub const DEFAULT_PISTON_URL: &str = "https://emkc.org/api/v2/piston";

/// Caller-side cap on one upstream request. The original client had none,
/// which let a wedged upstream stall a request indefinitely.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upstream engine identifier, pinned version and entry-point filename for
/// one remote language.
#[derive(Debug, Clone, Copy)]
pub struct RemoteEngine {
    pub engine: &'static str,
    pub version: &'static str,
    pub filename: &'static str,
}

impl Language {
    /// Upstream mapping for remotely executed languages; `None` for the
    /// locally sandboxed one.
    pub fn remote_engine(self) -> Option<RemoteEngine> {
        match self {
            Language::Javascript => None,
            Language::Python => Some(RemoteEngine {
                engine: "python",
                version: "3.10.0",
                filename: "main.py",
            }),
            Language::Java => Some(RemoteEngine {
                engine: "java",
                version: "15.0.2",
                filename: "Main.java",
            }),
            Language::Cpp => Some(RemoteEngine {
                engine: "c++",
                version: "10.2.0",
                filename: "main.cpp",
            }),
            Language::C => Some(RemoteEngine {
                engine: "c",
                version: "10.2.0",
                filename: "main.c",
            }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum PistonError {
    #[error("{0} does not run on the remote executor")]
    NotRemote(Language),
    #[error("Execution service error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Execution service returned {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    language: &'static str,
    version: &'static str,
    files: Vec<SourceFile<'a>>,
}

#[derive(Serialize)]
struct SourceFile<'a> {
    name: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ExecuteResponse {
    run: RunRecord,
}

#[derive(Deserialize)]
struct RunRecord {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    code: Option<i32>,
    #[serde(default)]
    output: String,
}

/// Client for the remote multi-language execution service.
#[derive(Debug, Clone)]
pub struct PistonClient {
    http: reqwest::Client,
    base_url: String,
}

impl PistonClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Execute `code` remotely. Resolves, never rejects: transport faults,
    /// bad statuses and malformed bodies become failed results carrying the
    /// elapsed time so far.
    ///
    /// The reported time is measured end to end by this proxy and includes
    /// network latency, not just compute time.
    pub async fn execute(&self, code: &str, language: Language) -> ExecutionResult {
        let start = Instant::now();
        match self.try_execute(code, language, start).await {
            Ok(result) => result,
            Err(e) => {
                debug!(language = %language, error = %e, "remote execution failed");
                ExecutionResult::failure(e.to_string(), start.elapsed().as_millis() as u64)
            }
        }
    }

    async fn try_execute(
        &self,
        code: &str,
        language: Language,
        start: Instant,
    ) -> Result<ExecutionResult, PistonError> {
        let engine = language
            .remote_engine()
            .ok_or(PistonError::NotRemote(language))?;

        let request = ExecuteRequest {
            language: engine.engine,
            version: engine.version,
            files: vec![SourceFile {
                name: engine.filename,
                content: code,
            }],
        };

        let response = self
            .http
            .post(format!("{}/execute", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PistonError::Status(response.status()));
        }

        let body: ExecuteResponse = response.json().await?;
        let run = body.run;

        let output = if run.stdout.is_empty() {
            run.output
        } else {
            run.stdout
        };

        Ok(ExecutionResult {
            success: run.code == Some(0),
            output,
            error: (!run.stderr.is_empty()).then_some(run.stderr),
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}
