//! Durable token pool storage
//!
//! Manages a JSON file holding the ordered list of usable tokens under the
//! fixed `available_tokens` key. All writes use atomic temp-file + rename
//! to prevent corruption on crash. A tokio Mutex serializes mutations from
//! concurrent trial loops, so two loops removing tokens at the same time
//! cannot lose each other's update.
//!
//! Persistence is best-effort by contract: a request in flight must keep
//! working even when the pool file cannot be read or written, so `load`
//! degrades to an empty pool and mutations log write failures instead of
//! raising them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use common::token_fingerprint;

/// On-disk shape of the pool file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PoolFile {
    available_tokens: Vec<String>,
}

/// Thread-safe token file manager.
///
/// The Mutex guards the in-memory list and serializes writes; reads clone
/// the list under the lock so trial loops work on their own snapshot.
pub struct TokenStore {
    path: PathBuf,
    state: Mutex<Vec<String>>,
}

impl TokenStore {
    /// Load the pool from the given file path. Never fails.
    ///
    /// Missing file: created empty (cold start with zero tokens; the proxy
    /// answers "pool exhausted" until tokens are added). Unreadable or
    /// corrupt file: logged and treated as an empty pool; the file on disk
    /// is left untouched until the first successful mutation.
    pub async fn load(path: PathBuf) -> Self {
        let tokens = if path.exists() {
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => match serde_json::from_str::<PoolFile>(&contents) {
                    Ok(file) => {
                        info!(path = %path.display(), tokens = file.available_tokens.len(), "loaded token pool");
                        file.available_tokens
                    }
                    Err(e) => {
                        error!(path = %path.display(), error = %e, "corrupt token file, starting with empty pool");
                        Vec::new()
                    }
                },
                Err(e) => {
                    error!(path = %path.display(), error = %e, "unreadable token file, starting with empty pool");
                    Vec::new()
                }
            }
        } else {
            info!(path = %path.display(), "token file not found, starting with empty pool");
            let empty = Vec::new();
            // Create the empty file so future loads don't need the cold-start path
            if let Err(e) = write_atomic(&path, &empty).await {
                warn!(path = %path.display(), error = %e, "could not create empty token file");
            }
            empty
        };

        Self {
            path,
            state: Mutex::new(tokens),
        }
    }

    /// Ordered clone of the current pool. Trial order is first-to-last.
    pub async fn snapshot(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.clone()
    }

    /// Remove a token by value and persist. Returns whether it was present.
    ///
    /// Removing by value rather than by index keeps concurrent trial loops
    /// from corrupting pool order when both discover the same exhausted
    /// token. The relative order of the remaining tokens is preserved.
    pub async fn remove(&self, token: &str) -> bool {
        let mut state = self.state.lock().await;
        let before = state.len();
        state.retain(|t| t != token);
        let removed = state.len() < before;
        if removed {
            debug!(token = %token_fingerprint(token), "removed token from pool");
            persist(&self.path, &state).await;
        }
        removed
    }

    /// Append a token if not already present and persist. Returns whether
    /// the pool changed.
    pub async fn add(&self, token: String) -> bool {
        let mut state = self.state.lock().await;
        if state.contains(&token) {
            return false;
        }
        debug!(token = %token_fingerprint(&token), "added token to pool");
        state.push(token);
        persist(&self.path, &state).await;
        true
    }

    /// Number of usable tokens.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.len()
    }

    /// Whether the pool is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Persist the pool, logging write failures instead of raising them.
async fn persist(path: &Path, tokens: &[String]) {
    if let Err(e) = write_atomic(path, tokens).await {
        error!(path = %path.display(), error = %e, "failed to persist token pool");
    }
}

/// Write the pool file atomically (temp file + rename, mode 0600).
///
/// The rename prevents a crash mid-write from corrupting the pool; the
/// permissions keep quota-bearing tokens owner-readable only.
async fn write_atomic(path: &Path, tokens: &[String]) -> std::io::Result<()> {
    let file = PoolFile {
        available_tokens: tokens.to_vec(),
    };
    let json = serde_json::to_string_pretty(&file).map_err(std::io::Error::other)?;

    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other("token file path has no parent directory"))?;
    let tmp_path = dir.join(format!(".tokens.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes()).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms).await?;
    }

    tokio::fs::rename(&tmp_path, path).await?;

    debug!(path = %path.display(), tokens = tokens.len(), "persisted token pool");
    Ok(())
}
