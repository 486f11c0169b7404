//! Crate-wide error type and result alias.

use reqwest::StatusCode;

/// Convenience alias for this crate's `Result`.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure modes surfaced by this crate.
///
/// Variants are grouped by the taxonomy of kinds the core protocol dance
/// can fail with, not by which internal component raised them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Authentication was required, failed, or misconfigured.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A `Docker-Content-Digest` header (or a caller-supplied digest) was
    /// malformed, named an unsupported algorithm, or did not match.
    #[error("bad digest: {0}")]
    BadDigest(String),

    /// The manifest body violated a structural invariant, or a JWS
    /// `protected` header / embedded JWK could not be parsed.
    #[error("invalid content: {0}")]
    InvalidContent(String),

    /// A manifest signature failed to verify, or used a forbidden
    /// algorithm.
    #[error("manifest verification failed: {0}")]
    ManifestVerification(String),

    /// A blob or manifest download failed for transport reasons this
    /// crate understands (redirect budget, length mismatch).
    #[error("download failed: {0}")]
    Download(String),

    /// A path this crate deliberately does not implement.
    #[error("not implemented: {0}")]
    Internal(String),

    /// The registry responded with a status code this crate treats as a
    /// hard failure, after any 404-body sanitization.
    #[error("unexpected status {status}: {message}")]
    UnexpectedHttpStatus { status: StatusCode, message: String },

    /// Transport-level failure from the HTTP client.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// A URL could not be parsed or joined.
    #[error(transparent)]
    Url(#[from] url::ParseError),

    /// A header value was not valid UTF-8.
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),

    /// JSON (de)serialization failure outside of the paths that produce
    /// `InvalidContent` deliberately.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// An OpenSSL operation failed along the way.
    #[error(transparent)]
    Crypto(#[from] openssl::error::ErrorStack),

    /// A header value was missing where required.
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    /// A `WWW-Authenticate` challenge could not be parsed.
    #[error("malformed WWW-Authenticate challenge: {0}")]
    MalformedChallenge(String),
}

/// Replace a 404 response body with a fixed, safe message when its
/// content-type is not JSON, so that HTML error pages from intermediate
/// proxies never bubble up to callers.
///
/// `fallback` is used verbatim when `body` is empty.
pub fn sanitize_not_found(body: &str, content_type: Option<&str>, fallback: &str) -> String {
    let looks_like_json = content_type
        .map(is_json_mime)
        .unwrap_or(false)
        || body.trim_start().starts_with('{');

    if body.trim().is_empty() {
        fallback.to_string()
    } else if looks_like_json {
        body.to_string()
    } else {
        "not found".to_string()
    }
}

/// Whether a `Content-Type` header value names a JSON media type,
/// including the registry's vendor-specific manifest/errors types
/// (`application/vnd.docker.distribution.errors.v2+json`). Parsed with
/// `mime` rather than a substring check so that a `+json` structured
/// syntax suffix is recognized the same way a bare `application/json`
/// is.
fn is_json_mime(content_type: &str) -> bool {
    match content_type.parse::<mime::Mime>() {
        Ok(m) => m.subtype() == mime::JSON || m.suffix() == Some(mime::JSON),
        Err(_) => content_type.contains("json"),
    }
}
