//! Typed errors for the credential and fetch contracts.
//!
//! Callers branch on these variants, so they are concrete enums rather than
//! opaque `anyhow` chains. Everything else in the crate propagates `anyhow`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// No usable session exists; the caller must drive the out-of-band code
    /// exchange starting from `authorize_url`.
    #[error("authentication required: open {authorize_url} and supply the code via `auth login`")]
    AuthenticationRequired { authorize_url: String },

    /// The code exchange itself failed. Transient; retry with a fresh code.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// A page request failed. The whole fetch is aborted; no partial table is
    /// ever returned.
    #[error("remote query failed: {0}")]
    RemoteQuery(String),

    /// The endpoint answered, but the payload violated the row schema.
    #[error("malformed query response: {0}")]
    MalformedResponse(String),
}
