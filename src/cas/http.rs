//! Blocking HTTP gateway to a CAS evaluation service.
//!
//! The batch is posted as JSON; the service answers with either
//! `{"results": [...]}` (one entry per statement) or `{"error": "..."}` for a
//! batch-level failure. There is no retry and no streaming.

use std::time::Duration;

use serde::Deserialize;

use super::{CasBatch, CasEvaluator, CasOutput, CasResponse};
use crate::error::{CasError, CasResult};

/// Default request timeout for a single batch.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    results: Vec<CasOutput>,
    #[serde(default)]
    error: Option<String>,
}

/// CAS evaluator reached over HTTP.
pub struct HttpCasEvaluator {
    url: String,
    agent: ureq::Agent,
}

impl std::fmt::Debug for HttpCasEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCasEvaluator")
            .field("url", &self.url)
            .finish()
    }
}

impl HttpCasEvaluator {
    /// Create a gateway posting batches to `url`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            url: url.into(),
            agent,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl CasEvaluator for HttpCasEvaluator {
    fn evaluate(&self, batch: &CasBatch) -> CasResult<CasResponse> {
        tracing::debug!(
            url = %self.url,
            purpose = %batch.purpose,
            statements = batch.len(),
            "posting CAS batch"
        );

        let response = match self.agent.post(&self.url).send_json(batch) {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(CasError::Status { code, body });
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(CasError::Transport {
                    message: transport.to_string(),
                });
            }
        };

        let wire: WireResponse = response.into_json().map_err(|e| CasError::Decode {
            message: e.to_string(),
        })?;

        if let Some(message) = wire.error {
            return Err(CasError::Evaluator { message });
        }

        Ok(CasResponse {
            results: wire.results,
        })
    }
}
