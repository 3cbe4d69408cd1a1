//! Error types for pool operations

/// Terminal failures of a trial loop.
///
/// The two variants are deliberately distinct: an empty pool before the
/// first attempt means the operator forgot to provision tokens, while
/// `AllFailed` means every provisioned token was tried and none produced a
/// usable response. Both map to the same HTTP 500 for the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no detection tokens available; add new tokens to the pool")]
    PoolEmpty,

    #[error("all detection tokens exhausted or failed ({attempts} attempts)")]
    AllFailed { attempts: usize },
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
