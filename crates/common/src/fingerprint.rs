//! Token fingerprints for log output
//!
//! Detection tokens are quota-bearing credentials and must never appear
//! verbatim in logs. A fingerprint keeps log lines correlatable with the
//! pool file without exposing the token itself.

/// Short, non-reversible identifier for a token, safe to log.
///
/// Format: `{len}:{last4}`, the token length plus its last four characters.
/// Tokens shorter than eight characters are fully redacted.
pub fn token_fingerprint(token: &str) -> String {
    if token.len() < 8 {
        return format!("{}:****", token.len());
    }
    let chars = token.chars().count();
    let tail: String = token.chars().skip(chars.saturating_sub(4)).collect();
    format!("{}:{tail}", token.len())
}
