//! Rotating token pool for the deepfake detection API
//!
//! Holds the ordered set of currently-usable detection tokens and runs the
//! trial loop that turns one detection request into one upstream response.
//! The token file is the single source of truth for pool membership; the
//! pool reads a fresh snapshot at the start of every request.
//!
//! Token lifecycle:
//! 1. Operator adds a token via the admin API → appended to the pool file
//! 2. A request tries tokens in pool order, first usable one wins
//! 3. Upstream signals "no credits available" → token removed and persisted
//! 4. Transport errors skip the token without removing it
//! 5. Pool shrinks monotonically until replenished by the operator

pub mod error;
pub mod pool;
pub mod store;

pub use error::{Error, Result};
pub use pool::TokenPool;
pub use store::TokenStore;
