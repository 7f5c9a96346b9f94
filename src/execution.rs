//! Shared execution types: supported languages and the normalized result
//! every execution path returns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Maximum accepted source size (100 KiB).
pub const MAX_CODE_BYTES: usize = 100 * 1024;

/// The five supported playground languages. JavaScript runs in the local
/// sandbox; the rest are proxied to the remote execution service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Javascript,
    Python,
    Java,
    Cpp,
    C,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Javascript,
        Language::Python,
        Language::Java,
        Language::Cpp,
        Language::C,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Language::Javascript => "javascript",
            Language::Python => "python",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::C => "c",
        }
    }

    /// Whether this language runs in the in-process sandbox.
    pub fn is_local(self) -> bool {
        matches!(self, Language::Javascript)
    }
}

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "javascript" => Ok(Language::Javascript),
            "python" => Ok(Language::Python),
            "java" => Ok(Language::Java),
            "cpp" => Ok(Language::Cpp),
            "c" => Ok(Language::C),
            _ => Err(UnsupportedLanguage(s.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

/// Outcome of one execution, local or remote.
///
/// `success` reflects the submitted program, not the service call: a snippet
/// that throws or exits non-zero still produces a 200 response carrying a
/// failed result. `output` and `error` may both be non-empty when a program
/// printed before faulting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "executionTime")]
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    /// A failed result with no captured output.
    pub fn failure(error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            execution_time_ms,
        }
    }
}
