//! Moderation gate for tool results
//!
//! Every text-bearing segment of a tool result is sent to an external
//! prompt-injection classifier. One flagged segment replaces the whole result
//! with [`blocked_result`]. A classifier that cannot be reached is an error,
//! never a pass.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mcp::types::ToolCallResult;

/// Classifier endpoint used unless overridden
pub const DEFAULT_CLASSIFIER_URL: &str = "https://api.moderation.example/v1/classify";

/// Policy selector sent with every classification
pub const POLICY_NAME: &str = "prompt-injection";

/// Fixed bound on one classification call
pub const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Text returned in place of a blocked tool result
pub const BLOCKED_MESSAGE: &str = "This tool result was withheld by the gateway's content \
moderation because it appears to contain a prompt-injection attempt.";

/// Classifier call failures
#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error("classifier request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("classifier returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("classifier timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("classifier response invalid: {0}")]
    InvalidResponse(String),
}

/// Which signal decided a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictSource {
    Heuristic,
    Classifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModerationVerdict {
    pub flagged: bool,
    pub source: VerdictSource,
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
    policy_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    #[serde(alias = "heuristic")]
    heuristic_flagged: bool,
    #[serde(alias = "model")]
    model_flagged: bool,
}

impl From<ClassifyResponse> for ModerationVerdict {
    fn from(response: ClassifyResponse) -> Self {
        if response.heuristic_flagged {
            ModerationVerdict {
                flagged: true,
                source: VerdictSource::Heuristic,
            }
        } else {
            ModerationVerdict {
                flagged: response.model_flagged,
                source: VerdictSource::Classifier,
            }
        }
    }
}

/// The canonical result substituted for a flagged tool result
pub fn blocked_result() -> ToolCallResult {
    ToolCallResult::error_text(BLOCKED_MESSAGE)
}

/// Gate applied to every backend tool result
#[derive(Clone)]
pub struct ModerationGate {
    client: reqwest::Client,
    endpoint: String,
    credential: Option<String>,
    enabled: bool,
    timeout: Duration,
}

impl std::fmt::Debug for ModerationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModerationGate")
            .field("endpoint", &self.endpoint)
            .field("enabled", &self.enabled)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ModerationGate {
    pub fn new(enabled: bool, credential: Option<String>, endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            credential: credential.filter(|c| !c.trim().is_empty()),
            enabled,
            timeout: CLASSIFY_TIMEOUT,
        }
    }

    /// A gate that passes everything through
    pub fn disabled() -> Self {
        Self::new(false, None, DEFAULT_CLASSIFIER_URL)
    }

    /// Override the classification timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enabled and holding a credential, i.e. results are actually classified
    pub fn is_active(&self) -> bool {
        self.enabled && self.credential.is_some()
    }

    /// Classify one piece of text
    pub async fn classify(&self, text: &str) -> Result<ModerationVerdict, ModerationError> {
        let Some(ref credential) = self.credential else {
            return Ok(ModerationVerdict {
                flagged: false,
                source: VerdictSource::Classifier,
            });
        };

        let call = async {
            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(credential)
                .json(&ClassifyRequest {
                    text,
                    policy_name: POLICY_NAME,
                })
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ModerationError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let body = response.text().await?;
            let parsed: ClassifyResponse = serde_json::from_str(&body)
                .map_err(|e| ModerationError::InvalidResponse(e.to_string()))?;
            Ok(ModerationVerdict::from(parsed))
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ModerationError::Timeout(self.timeout)),
        }
    }

    /// Pass `result` through the gate.
    ///
    /// Returns the input unchanged when moderation is off or uncredentialed,
    /// or when no segment is flagged. Returns [`blocked_result`] at the first
    /// flagged segment.
    pub async fn moderate(
        &self,
        backend: &str,
        tool: &str,
        result: ToolCallResult,
    ) -> Result<ToolCallResult, ModerationError> {
        if !self.is_active() {
            return Ok(result);
        }

        for (index, segment) in result.content.iter().enumerate() {
            let Some(text) = segment.text_body() else {
                continue;
            };
            if text.trim().is_empty() {
                continue;
            }

            let verdict = match self.classify(text).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    tracing::error!(
                        backend = %backend,
                        tool = %tool,
                        error = %e,
                        "Moderation classifier call failed"
                    );
                    return Err(e);
                }
            };

            if verdict.flagged {
                tracing::warn!(
                    backend = %backend,
                    tool = %tool,
                    segment = index,
                    source = ?verdict.source,
                    "Tool result blocked by moderation"
                );
                return Ok(blocked_result());
            }
        }

        Ok(result)
    }
}
