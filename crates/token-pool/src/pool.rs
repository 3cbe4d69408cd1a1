//! Trial loop over the token pool
//!
//! One `run` call handles one detection request end-to-end: try tokens in
//! pool order, remove exhausted ones, return the first upstream response.
//! Each call works on its own snapshot; the store serializes removals, so
//! concurrent loops stay consistent without coordinating with each other.

use std::sync::Arc;
use std::time::Duration;

use detector_client::{DetectionClient, Outcome, PassThrough};
use serde_json::Value;
use tracing::{debug, info, warn};

use common::token_fingerprint;

use crate::error::{Error, Result};
use crate::store::TokenStore;

/// The token-rotation proxy core.
pub struct TokenPool {
    store: Arc<TokenStore>,
    client: DetectionClient,
    attempt_delay: Duration,
}

impl TokenPool {
    /// Create a pool over the given store and detection client.
    ///
    /// `attempt_delay` is the fixed pause before every upstream attempt,
    /// including the first. A blunt rate limit toward the detection API.
    pub fn new(store: Arc<TokenStore>, client: DetectionClient, attempt_delay: Duration) -> Self {
        Self {
            store,
            client,
            attempt_delay,
        }
    }

    /// Run the trial loop for one opaque detection payload.
    ///
    /// Attempts tokens first-to-last. An exhausted token is removed from
    /// the store (persisted immediately) and dropped from the working
    /// sequence without advancing, so the element that slid into its slot
    /// is examined next. Transport and malformed-response errors skip to
    /// the next token without touching the pool. Any other upstream
    /// response is terminal and returned verbatim.
    pub async fn run(&self, payload: &Value) -> Result<PassThrough> {
        let mut tokens = self.store.snapshot().await;
        if tokens.is_empty() {
            info!("token pool empty before first attempt");
            return Err(Error::PoolEmpty);
        }

        let mut attempts = 0usize;
        let mut idx = 0usize;
        while idx < tokens.len() {
            tokio::time::sleep(self.attempt_delay).await;
            attempts += 1;

            let token = tokens[idx].clone();
            let fp = token_fingerprint(&token);

            match self.client.detect(&token, payload).await {
                Ok(Outcome::PassThrough(response)) => {
                    metrics::counter!("detection_attempts_total", "outcome" => "pass_through")
                        .increment(1);
                    debug!(
                        token = %fp,
                        status = response.status,
                        attempts,
                        "returning upstream response"
                    );
                    return Ok(response);
                }
                Ok(Outcome::Exhausted) => {
                    metrics::counter!("detection_attempts_total", "outcome" => "exhausted")
                        .increment(1);
                    metrics::counter!("tokens_removed_total").increment(1);
                    info!(token = %fp, "token exhausted, removing from pool");
                    self.store.remove(&token).await;
                    tokens.remove(idx);
                }
                Err(e) => {
                    metrics::counter!("detection_attempts_total", "outcome" => "error")
                        .increment(1);
                    warn!(token = %fp, error = %e, "attempt failed, trying next token");
                    idx += 1;
                }
            }
        }

        info!(attempts, "every token exhausted or failed");
        Err(Error::AllFailed { attempts })
    }

    /// Pool health summary for the health endpoint.
    ///
    /// A pool with at least one token is healthy; an empty pool is
    /// unhealthy (every request will fail until tokens are added).
    pub async fn health(&self) -> serde_json::Value {
        let available = self.store.len().await;
        let status = if available > 0 { "healthy" } else { "unhealthy" };
        serde_json::json!({
            "status": status,
            "tokens_available": available,
        })
    }

    /// The backing store (for the admin surface).
    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }
}
