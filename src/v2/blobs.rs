//! Content-addressed blob transport: bounded redirect following and
//! digest-verified streaming.
//!
//! A default `reqwest::Client` follows redirects transparently, which is
//! exactly what must *not* happen here: forwarding the registry's
//! `Authorization` header to a redirect target risks leaking it to a
//! CDN/object-store origin. Each hop therefore gets its own single-use
//! client built with `redirect::Policy::none()`, and the facade is
//! responsible for tracking/closing every client this module creates.

use crate::digest::DigestRef;
use crate::errors::{Error, Result};
use bytes::Bytes;
use futures::Stream;
use log::trace;
use reqwest::{header, Method, StatusCode, Url};

/// Redirects are bounded to 3 hops, for a maximum chain length of 4
/// responses. The budget bounds redirects, not total hops.
pub const MAX_REDIRS: u32 = 3;

#[derive(Debug, Clone)]
pub struct ResponseEntry {
    pub status: StatusCode,
    pub headers: header::HeaderMap,
    pub url: Url,
}

/// The ordered sequence of responses collected while following
/// redirects. Only the last entry has a terminal (non-3xx) status.
#[derive(Debug, Clone, Default)]
pub struct ResponseChain(pub Vec<ResponseEntry>);

impl ResponseChain {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&ResponseEntry> {
        self.0.first()
    }

    pub fn last(&self) -> Option<&ResponseEntry> {
        self.0.last()
    }
}

pub struct BlobTransport;

impl BlobTransport {
    /// `HEAD`/`GET /v2/<name>/blobs/<digest>`, following up to
    /// `MAX_REDIRS` redirects. Returns the collected chain, the final
    /// response (whose body the caller may still consume), and every
    /// extra client created along the way so the facade can track and
    /// later close them.
    pub async fn head_or_get(
        method: Method,
        base_url: &str,
        remote_name: &str,
        digest: &str,
        authorization: Option<&str>,
        insecure: bool,
    ) -> Result<(ResponseChain, reqwest::Response, Vec<reqwest::Client>)> {
        let mut url = build_blob_url(base_url, remote_name, digest)?;
        let mut redirs: u32 = 0;
        let mut chain = Vec::new();
        let mut owned_clients = Vec::new();

        let mut client = new_hop_client(insecure)?;
        owned_clients.push(client.clone());

        loop {
            let mut builder = client.request(method.clone(), url.clone());
            if redirs == 0 {
                if let Some(auth) = authorization {
                    builder = builder.header(header::AUTHORIZATION, auth);
                }
            }

            trace!("blob transport: {} {} (redirect #{})", method, url, redirs);
            let response = builder.send().await?;
            let status = response.status();

            chain.push(ResponseEntry {
                status,
                headers: response.headers().clone(),
                url: response.url().clone(),
            });

            if status == StatusCode::FOUND || status == StatusCode::TEMPORARY_REDIRECT {
                if redirs >= MAX_REDIRS {
                    return Err(Error::Download(
                        "maximum number of redirects exceeded".to_string(),
                    ));
                }

                let location = response
                    .headers()
                    .get(header::LOCATION)
                    .ok_or(Error::MissingHeader("Location"))?
                    .to_str()
                    .map_err(|_| Error::Download("Location header was not valid UTF-8".to_string()))?;

                url = url
                    .join(location)
                    .map_err(|_| Error::Download(format!("invalid redirect Location '{}'", location)))?;

                redirs += 1;
                client = new_hop_client(insecure)?;
                owned_clients.push(client.clone());
                continue;
            }

            return Ok((ResponseChain(chain), response, owned_clients));
        }
    }

    /// `HEAD /v2/<name>/blobs/<digest>`; the caller only needs the
    /// response chain.
    pub async fn head_blob(
        base_url: &str,
        remote_name: &str,
        digest: &str,
        authorization: Option<&str>,
        insecure: bool,
    ) -> Result<(ResponseChain, Vec<reqwest::Client>)> {
        let (chain, _response, clients) = Self::head_or_get(
            Method::HEAD,
            base_url,
            remote_name,
            digest,
            authorization,
            insecure,
        )
        .await?;
        Ok((chain, clients))
    }

    /// `GET /v2/<name>/blobs/<digest>`, returning a digest-verifying
    /// byte stream plus the clients the facade must eventually close.
    pub async fn open_blob_stream(
        base_url: &str,
        remote_name: &str,
        digest: &str,
        authorization: Option<&str>,
        insecure: bool,
    ) -> Result<(
        impl Stream<Item = Result<Bytes>>,
        ResponseChain,
        Vec<reqwest::Client>,
    )> {
        let (chain, response, clients) = Self::head_or_get(
            Method::GET,
            base_url,
            remote_name,
            digest,
            authorization,
            insecure,
        )
        .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(Error::UnexpectedHttpStatus { status, message });
        }

        let expected_digest = DigestRef::parse(digest)?;

        // Docker-Content-Digest is read from the *first* response: most
        // redirect targets (pre-signed object-store URLs) strip it.
        let header_digest = chain
            .first()
            .and_then(|entry| entry.headers.get("Docker-Content-Digest"))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(raw) = &header_digest {
            let parsed = DigestRef::parse(raw)?;
            if !parsed.matches_hex(&expected_digest.expected_hex)
                || parsed.algorithm != expected_digest.algorithm
            {
                return Err(Error::BadDigest(format!(
                    "Docker-Content-Digest {} does not match requested digest {}",
                    raw, digest
                )));
            }
        }

        let content_length = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let hash_while_streaming = header_digest.is_some();
        let algorithm = expected_digest.algorithm.clone();
        let expected_hex = expected_digest.expected_hex.clone();

        let stream = async_stream::try_stream! {
            let mut hasher = if hash_while_streaming {
                Some(crate::digest::Hasher::new(&algorithm)?)
            } else {
                None
            };
            let mut received: u64 = 0;

            let mut body = response.bytes_stream();
            use futures::StreamExt;
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                received += chunk.len() as u64;
                if let Some(h) = hasher.as_mut() {
                    h.update(&chunk)?;
                }
                yield chunk;
            }

            if let Some(expected_len) = content_length {
                if received != expected_len {
                    Err(Error::Download(format!(
                        "received {} bytes but Content-Length was {}",
                        received, expected_len
                    )))?;
                }
            }

            if let Some(h) = hasher {
                let actual_hex = h.final_hex()?;
                if !actual_hex.eq_ignore_ascii_case(&expected_hex) {
                    Err(Error::BadDigest(format!(
                        "streamed blob digest {} did not match expected {}",
                        actual_hex, expected_hex
                    )))?;
                }
            }
        };

        Ok((stream, chain, clients))
    }
}

fn new_hop_client(insecure: bool) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_certs(insecure)
        .build()
        .map_err(Error::from)
}

fn build_blob_url(base_url: &str, remote_name: &str, digest: &str) -> Result<Url> {
    let encoded_name = crate::v2::encode_repository_path(remote_name);
    let encoded_digest = crate::v2::encode_path_component(digest);
    let path = format!("/v2/{}/blobs/{}", encoded_name, encoded_digest);
    Url::parse(base_url)?
        .join(&path)
        .map_err(Error::from)
}
