//! One-shot detection call and response classification
//!
//! The exhaustion signature is deliberately narrow: `success == false` alone
//! is an ordinary application error that must pass through to the caller.
//! Only the exact combination with the "No credits available" message means
//! the token's quota is spent.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// Exact message the detection API returns when a token's credits are spent.
const NO_CREDITS_MESSAGE: &str = "No credits available";

/// Classified result of one detection attempt.
#[derive(Debug)]
pub enum Outcome {
    /// The token has no remaining quota. The pool removes it and retries.
    Exhausted,
    /// Any other upstream response, forwarded verbatim to the caller.
    PassThrough(PassThrough),
}

/// An upstream response to forward unchanged, status code included.
#[derive(Debug, Clone)]
pub struct PassThrough {
    pub status: u16,
    pub body: Value,
}

/// HTTP client for the external detection endpoint.
///
/// Holds a shared `reqwest::Client`; cloning is cheap and connection pools
/// are reused across concurrent trial loops.
#[derive(Clone)]
pub struct DetectionClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl DetectionClient {
    pub fn new(http: reqwest::Client, endpoint: String, timeout: Duration) -> Self {
        Self {
            http,
            endpoint,
            timeout,
        }
    }

    /// Perform one detection attempt with the given token.
    ///
    /// The payload is forwarded as the JSON body without inspection or
    /// mutation; the token travels in the `token` header. Transport failures
    /// (connect, DNS, timeout, reset) come back as `Error::Transport`, a
    /// non-JSON response body as `Error::InvalidResponse`.
    pub async fn detect(&self, token: &str, payload: &Value) -> Result<Outcome> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("token", token)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Transport(format!("timeout after {}s", self.timeout.as_secs()))
                } else {
                    Error::Transport(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("reading response body: {e}")))?;
        let body: Value = serde_json::from_slice(&bytes)
            .map_err(|e| Error::InvalidResponse(format!("non-JSON body (status {status}): {e}")))?;

        if is_exhausted(&body) {
            debug!(status, "token credits exhausted");
            return Ok(Outcome::Exhausted);
        }

        debug!(status, "pass-through response");
        Ok(Outcome::PassThrough(PassThrough { status, body }))
    }
}

/// Whether a response body carries the credit-exhaustion signature.
///
/// Requires both the explicit `success: false` flag and the exact
/// no-credits message. A generic failure flag alone is an application
/// error, not exhaustion.
pub fn is_exhausted(body: &Value) -> bool {
    body.get("success").and_then(Value::as_bool) == Some(false)
        && body.get("message").and_then(Value::as_str) == Some(NO_CREDITS_MESSAGE)
}
