//! Common types for the deepfake detection gateway

mod error;
mod fingerprint;

pub use error::{Error, Result};
pub use fingerprint::token_fingerprint;
