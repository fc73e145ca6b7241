//! Remote stage invocation.
//!
//! Each pipeline stage is owned by a separate service that exposes a single
//! trigger endpoint. [`ServiceInvoker`] POSTs an empty JSON body to it, waits
//! up to the endpoint's timeout, and hands back the opaque JSON reply. Failures
//! are classified into [`InvokeErrorKind`]s, logged, and returned unchanged;
//! nothing is retried here.

use std::time::Instant;

use cncflow_shared::{CncFlowError, InvokeErrorKind, Result, ServiceEndpoint};
use reqwest::Client;
use tracing::{debug, error, instrument};

/// Maximum number of redirects to follow on a trigger call.
const MAX_REDIRECTS: usize = 3;

/// User-Agent string for stage requests.
const USER_AGENT: &str = concat!("cncflow/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// StageResponse
// ---------------------------------------------------------------------------

/// Successful reply from a stage service.
#[derive(Debug, Clone)]
pub struct StageResponse {
    /// The response body, unmodified.
    pub body: serde_json::Value,
    /// Top-level `message` string, if the service sent one.
    pub message: Option<String>,
}

impl StageResponse {
    fn from_body(body: serde_json::Value) -> Self {
        let message = body
            .get("message")
            .and_then(|m| m.as_str())
            .map(String::from);
        Self { body, message }
    }
}

// ---------------------------------------------------------------------------
// ServiceInvoker
// ---------------------------------------------------------------------------

/// Issues one HTTP call per stage.
#[derive(Debug, Clone)]
pub struct ServiceInvoker {
    client: Client,
}

impl ServiceInvoker {
    /// Create an invoker. Timeouts are applied per request from the endpoint.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| CncFlowError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Trigger `path` on the endpoint's service.
    ///
    /// Returns `Ok(None)` without touching the network when the endpoint is
    /// disabled.
    #[instrument(skip_all, fields(stage = %endpoint.stage, path = %path))]
    pub async fn invoke(
        &self,
        endpoint: &ServiceEndpoint,
        path: &str,
    ) -> Result<Option<StageResponse>> {
        if !endpoint.enabled {
            debug!("service disabled, skipping");
            return Ok(None);
        }

        let url = endpoint.url_for(path);
        let started = Instant::now();

        match self.post(endpoint, &url).await {
            Ok(response) => {
                debug!(
                    %url,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "stage call succeeded"
                );
                Ok(Some(response))
            }
            Err(err) => {
                log_failure(endpoint, path, &err, started);
                Err(err)
            }
        }
    }

    async fn post(&self, endpoint: &ServiceEndpoint, url: &str) -> Result<StageResponse> {
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({}))
            .timeout(endpoint.timeout)
            .send()
            .await
            .map_err(|e| transport_error(endpoint, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CncFlowError::ServiceFailed {
                stage: endpoint.stage.to_string(),
                url: endpoint.address.clone(),
                message: format!("HTTP {status}"),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(endpoint, &e))?;

        let body: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| CncFlowError::ServiceFailed {
                stage: endpoint.stage.to_string(),
                url: endpoint.address.clone(),
                message: format!("response is not valid JSON: {e}"),
            })?;

        Ok(StageResponse::from_body(body))
    }
}

// ---------------------------------------------------------------------------
// Failure classification
// ---------------------------------------------------------------------------

/// Decide which [`InvokeErrorKind`] a transport error belongs to.
fn classify(err: &reqwest::Error) -> InvokeErrorKind {
    if err.is_timeout() {
        InvokeErrorKind::Timeout
    } else if err.is_connect() {
        InvokeErrorKind::ConnectionRefused
    } else {
        InvokeErrorKind::Other
    }
}

fn transport_error(endpoint: &ServiceEndpoint, err: &reqwest::Error) -> CncFlowError {
    let stage = endpoint.stage.to_string();
    let url = endpoint.address.clone();
    match classify(err) {
        InvokeErrorKind::Timeout => CncFlowError::ServiceTimeout {
            stage,
            url,
            timeout_ms: endpoint.timeout.as_millis() as u64,
        },
        InvokeErrorKind::ConnectionRefused => CncFlowError::ServiceUnreachable { stage, url },
        InvokeErrorKind::Other => CncFlowError::ServiceFailed {
            stage,
            url,
            message: err.to_string(),
        },
    }
}

fn log_failure(endpoint: &ServiceEndpoint, path: &str, err: &CncFlowError, started: Instant) {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let address = endpoint.address.as_str();
    match err.invoke_kind() {
        Some(InvokeErrorKind::ConnectionRefused) => {
            error!(address, path, elapsed_ms, "service not running");
        }
        Some(InvokeErrorKind::Timeout) => {
            error!(
                address,
                path,
                elapsed_ms,
                "service timed out (operation may still be running)"
            );
        }
        _ => {
            error!(address, path, elapsed_ms, error = %err, "service call failed");
        }
    }
}
