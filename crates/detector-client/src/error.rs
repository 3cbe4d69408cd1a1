//! Error types for detection attempts

/// Errors from a single detection attempt.
///
/// Both variants mean "this attempt produced no usable verdict"; neither
/// disqualifies the token that was used. The pool skips to the next token.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

/// Result alias for detection attempts.
pub type Result<T> = std::result::Result<T, Error>;
