//! The registry facade: binds a repository, handles lazy login, and
//! exposes the v2 protocol operations.

pub mod auth;
pub mod blobs;
pub mod manifest;
pub mod tags;
pub mod token;

pub use auth::AuthInfo;
pub use blobs::{ResponseChain, ResponseEntry, MAX_REDIRS};
pub use manifest::ManifestV1;
pub use tags::TagsList;

use crate::errors::{sanitize_not_found, Error, Result};
use crate::index::Repository;
use crate::jws::{JwsExtractor, JwsVerifier};
use crate::v2::auth::{pull_scope, AuthCoordinator};
use crate::v2::blobs::BlobTransport;
use crate::DigestRef;
use bytes::Bytes;
use futures::Stream;
use log::debug;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};
use reqwest::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    StatusCode, Url,
};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex as AsyncMutex;

/// Characters left unescaped in a path segment: unreserved marks plus
/// `:`, since digests and references legitimately contain it.
const PATH_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b':');

/// Percent-encode `name` segment-by-segment, preserving the `/`
/// separators.
pub fn encode_repository_path(name: &str) -> String {
    name.split('/')
        .map(|segment| percent_encoding::utf8_percent_encode(segment, PATH_SAFE).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Percent-encode a single path component (a tag, reference, or
/// digest); unlike `encode_repository_path` this does not treat `/` as
/// a separator.
pub fn encode_path_component(value: &str) -> String {
    percent_encoding::utf8_percent_encode(value, PATH_SAFE).to_string()
}

/// The registry client facade.
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    remote_name: String,
    username: Option<String>,
    password: Option<String>,
    insecure: bool,
    auth: AsyncMutex<Option<AuthInfo>>,
    owned_clients: StdMutex<Vec<reqwest::Client>>,
    closed: AtomicBool,
}

impl Client {
    /// Build a client bound to `repository`. TLS verification follows
    /// `insecure`; `repository.index.base_url()` already applies the
    /// official-index and localhost-defaults-to-http rules.
    pub fn new(
        repository: &Repository,
        username: Option<String>,
        password: Option<String>,
        insecure: bool,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .build()?;

        Ok(Client {
            http,
            base_url: repository.base_url(),
            remote_name: repository.remote_name.clone(),
            username,
            password,
            insecure,
            auth: AsyncMutex::new(None),
            owned_clients: StdMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::Internal("client has been closed".to_string()))
        } else {
            Ok(())
        }
    }

    /// `GET /v2/`; surfaces the raw status to the caller.
    pub async fn ping(&self) -> Result<auth::PingOutcome> {
        self.ensure_open()?;
        AuthCoordinator::ping(&self.http, &self.base_url, None).await
    }

    /// True iff the ping succeeded or required auth, *and* the registry
    /// advertised `registry/2.0`.
    pub async fn supports_v2(&self) -> Result<bool> {
        let outcome = self.ping().await?;
        let status_ok = matches!(outcome.status, StatusCode::OK | StatusCode::UNAUTHORIZED);
        let version_ok = outcome
            .api_version_header
            .as_deref()
            .map(|v| v.contains("registry/2.0"))
            .unwrap_or(false);
        Ok(status_ok && version_ok)
    }

    /// No-op if already logged in; otherwise runs the auth state machine
    /// with the default pull scope and caches the result. Concurrent
    /// callers serialize on the same mutex, so the terminal cached state
    /// always reflects exactly one successful login.
    pub async fn login(&self) -> Result<()> {
        self.ensure_open()?;
        let mut guard = self.auth.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let scope = pull_scope(&self.remote_name);
        let info = AuthCoordinator::login(
            &self.http,
            &self.base_url,
            self.username.as_deref(),
            self.password.as_deref(),
            &scope,
            self.insecure,
            None,
        )
        .await?;

        debug!("login succeeded for {}", self.remote_name);
        *guard = Some(info);
        Ok(())
    }

    async fn authorization_header(&self) -> Option<String> {
        let guard = self.auth.lock().await;
        guard.as_ref().and_then(AuthInfo::authorization_header)
    }

    /// `GET /v2/<name>/tags/list`.
    pub async fn list_tags(&self) -> Result<TagsList> {
        self.login().await?;

        let path = format!("/v2/{}/tags/list", encode_repository_path(&self.remote_name));
        let url = Url::parse(&self.base_url)?.join(&path)?;

        let mut builder = self.http.get(url);
        if let Some(auth) = self.authorization_header().await {
            builder = builder.header(AUTHORIZATION, auth);
        }

        let response = builder.send().await?;
        self.decode_or_sanitized_error(response, "tags not found")
            .await
    }

    /// `GET /v2/<name>/manifests/<reference>`, verified end to end:
    /// structural invariants, JWS payload reconstruction, digest match
    /// against `Docker-Content-Digest`, and every embedded signature.
    pub async fn get_manifest(&self, reference: &str) -> Result<(ManifestV1, Option<String>)> {
        self.login().await?;

        let path = format!(
            "/v2/{}/manifests/{}",
            encode_repository_path(&self.remote_name),
            encode_path_component(reference)
        );
        let url = Url::parse(&self.base_url)?.join(&path)?;

        let mut builder = self.http.get(url);
        if let Some(auth) = self.authorization_header().await {
            builder = builder.header(AUTHORIZATION, auth);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UnexpectedHttpStatus {
                status,
                message: sanitize_not_found(&body, content_type.as_deref(), "not found"),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UnexpectedHttpStatus {
                status,
                message: body,
            });
        }

        let docker_content_digest = response
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let raw_body = response.bytes().await?;

        // Track unknown fields the registry sent but this crate doesn't
        // model (other manifest dialects carry more than schema v1
        // does); surfacing them as a debug log rather than silently
        // dropping them makes drift from a registry's actual wire shape
        // visible without treating it as fatal.
        let mut json_deserializer = serde_json::Deserializer::from_slice(&raw_body);
        let manifest: ManifestV1 =
            serde_ignored::deserialize(&mut json_deserializer, |path| {
                debug!("get_manifest: ignoring unknown field '{}'", path);
            })?;
        manifest.validate()?;

        let reconstructed = JwsExtractor::reconstruct(&manifest.signatures, &raw_body)?;

        if let Some(digest_header) = &docker_content_digest {
            let expected = DigestRef::parse(digest_header)?;
            let mut hasher = expected.new_hasher()?;
            hasher.update(&reconstructed.payload)?;
            let actual_hex = hasher.final_hex()?;
            if !expected.matches_hex(&actual_hex) {
                return Err(Error::BadDigest(format!(
                    "Docker-Content-Digest {} does not match reconstructed payload (got {})",
                    digest_header, actual_hex
                )));
            }
        }

        JwsVerifier::verify(&reconstructed)?;

        Ok((manifest, docker_content_digest))
    }

    /// `HEAD /v2/<name>/blobs/<digest>`.
    pub async fn head_blob(&self, digest: &str) -> Result<ResponseChain> {
        self.login().await?;
        let auth = self.authorization_header().await;
        let (chain, clients) = BlobTransport::head_blob(
            &self.base_url,
            &self.remote_name,
            digest,
            auth.as_deref(),
            self.insecure,
        )
        .await?;
        self.track_clients(clients);
        Ok(chain)
    }

    /// `GET /v2/<name>/blobs/<digest>`, returned paused: the caller must
    /// poll/consume the stream.
    pub async fn open_blob_stream(
        &self,
        digest: &str,
    ) -> Result<(impl Stream<Item = Result<Bytes>>, ResponseChain)> {
        self.login().await?;
        let auth = self.authorization_header().await;
        let (stream, chain, clients) = BlobTransport::open_blob_stream(
            &self.base_url,
            &self.remote_name,
            digest,
            auth.as_deref(),
            self.insecure,
        )
        .await?;
        self.track_clients(clients);
        Ok((stream, chain))
    }

    /// Release every HTTP client created during this client's lifetime,
    /// including the per-redirect-hop clients `BlobTransport` built.
    /// After `close`, new operations fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.owned_clients
            .lock()
            .expect("owned_clients mutex poisoned")
            .clear();
    }

    fn track_clients(&self, clients: Vec<reqwest::Client>) {
        self.owned_clients
            .lock()
            .expect("owned_clients mutex poisoned")
            .extend(clients);
    }

    async fn decode_or_sanitized_error<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        fallback: &str,
    ) -> Result<T> {
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UnexpectedHttpStatus {
                status,
                message: sanitize_not_found(&body, content_type.as_deref(), fallback),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UnexpectedHttpStatus {
                status,
                message: body,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_repository_path_preserving_slash() {
        assert_eq!(
            encode_repository_path("library/busybox"),
            "library/busybox"
        );
        assert_eq!(
            encode_repository_path("weird name/repo"),
            "weird%20name/repo"
        );
    }

    #[test]
    fn encodes_path_component_keeps_colon() {
        assert_eq!(
            encode_path_component("sha256:abcd"),
            "sha256:abcd"
        );
    }

    #[test]
    fn encodes_path_component_escapes_spaces() {
        assert_eq!(encode_path_component("a tag"), "a%20tag");
    }
}
