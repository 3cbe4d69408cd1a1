//! Client for the external deepfake detection API
//!
//! Performs exactly one detection attempt per call: POST the opaque request
//! payload with one access token and classify the response. The only
//! response shape this crate interprets is the credit-exhaustion signature;
//! everything else passes through verbatim with the upstream status code.
//!
//! The trial loop that rotates tokens lives in the `token-pool` crate; this
//! crate is a standalone library with no knowledge of the pool.

mod client;
mod error;

pub use client::{DetectionClient, Outcome, PassThrough, is_exhausted};
pub use error::{Error, Result};
