//! Authentication state machine: ping, interpret the challenge, dispatch
//! to Basic or Bearer, cache credentials.
//!
//! `ping` and `login` are exposed as separate operations so a caller can
//! probe a registry's version support without authenticating. `login`
//! pings first, attaching any supplied username/password as a
//! speculative Basic `Authorization` header, then interprets the
//! outcome: a 200 means those credentials (or anonymous access) already
//! worked; a 401 carrying a challenge determines whether to dispatch to
//! Basic (which, since credentials were already attached to the ping,
//! can only mean they were rejected) or to fetch a Bearer token.

use crate::errors::{Error, Result};
use crate::v2::token::{TokenFetcher, TokenRequest};
use crate::www_authenticate::AuthChallenge;
use log::trace;
use reqwest::{header, StatusCode};

/// Credentials a `Client` holds after a successful login. A client holds
/// at most one of these at a time; once set by a successful login it is
/// immutable until `close`.
#[derive(Debug, Clone)]
pub enum AuthInfo {
    Basic { username: String, password: String },
    Bearer { token: String },
    None,
}

impl AuthInfo {
    /// The `Authorization` header value this credential set implies, if
    /// any.
    pub fn authorization_header(&self) -> Option<String> {
        match self {
            AuthInfo::Basic { username, password } => {
                let creds = format!("{}:{}", username, password);
                Some(format!("Basic {}", base64::encode(creds)))
            }
            AuthInfo::Bearer { token } => Some(format!("Bearer {}", token)),
            AuthInfo::None => None,
        }
    }

    fn masked(&self) -> String {
        match self {
            AuthInfo::Basic { username, .. } => format!("Basic({})", username),
            AuthInfo::Bearer { token } => format!("Bearer({})", mask_token(token)),
            AuthInfo::None => "None".to_string(),
        }
    }
}

fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 2 {
        return "*".repeat(chars.len());
    }
    let mut masked = chars.clone();
    for c in masked.iter_mut().take(chars.len() - 1).skip(1) {
        *c = '*';
    }
    masked.into_iter().collect()
}

/// Outcome of a `GET /v2/` ping. Callers interpret the raw status; this
/// crate does not raise on 401.
#[derive(Debug, Clone)]
pub struct PingOutcome {
    pub status: StatusCode,
    pub www_authenticate: Option<String>,
    pub api_version_header: Option<String>,
}

pub struct AuthCoordinator;

impl AuthCoordinator {
    /// `GET /v2/`, with no retry, returning the raw outcome for the
    /// caller to interpret (200/401/404 all have meaning). `auth`, when
    /// given, is attached as the request's `Authorization` header; this
    /// lets `login` test a set of credentials by pinging with them
    /// already attached, rather than guessing whether they'll be
    /// accepted.
    pub async fn ping(
        client: &reqwest::Client,
        base_url: &str,
        auth: Option<&AuthInfo>,
    ) -> Result<PingOutcome> {
        let url = format!("{}/v2/", base_url.trim_end_matches('/'));
        trace!("ping: GET {}", url);

        let mut builder = client.get(&url);
        if let Some(header_value) = auth.and_then(AuthInfo::authorization_header) {
            builder = builder.header(header::AUTHORIZATION, header_value);
        }

        let response = builder.send().await?;
        let status = response.status();
        let host = reqwest::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));

        let mut www_authenticate = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);

        let api_version_header = response
            .headers()
            .get("Docker-Distribution-Api-Version")
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);

        // quay.io quirk: a 401 with no WWW-Authenticate header is
        // treated as if it had advertised its well-known Bearer realm.
        if status == StatusCode::UNAUTHORIZED
            && www_authenticate.is_none()
            && host.as_deref() == Some("quay.io")
        {
            www_authenticate =
                Some(r#"Bearer realm="https://quay.io/v2/auth",service="quay.io""#.to_string());
        }

        trace!("ping: {} -> {}", url, status);

        Ok(PingOutcome {
            status,
            www_authenticate,
            api_version_header,
        })
    }

    /// Run the login state machine and return the credentials the
    /// facade should cache.
    ///
    /// `existing_ping`, when given, lets a caller that already has a
    /// `GET /v2/` outcome in hand (with a challenge header) skip a
    /// redundant re-ping.
    pub async fn login(
        client: &reqwest::Client,
        base_url: &str,
        username: Option<&str>,
        password: Option<&str>,
        scope: &str,
        insecure: bool,
        existing_ping: Option<PingOutcome>,
    ) -> Result<AuthInfo> {
        let credentials = match (username, password) {
            (Some(u), Some(p)) => Some(AuthInfo::Basic {
                username: u.to_string(),
                password: p.to_string(),
            }),
            _ => None,
        };

        // S0: reuse a supplied ping outcome if it already carries a
        // challenge; otherwise ping fresh, attaching `credentials`
        // speculatively so that a 401 response genuinely reflects
        // whether they were accepted (-> S1).
        let outcome = match existing_ping {
            Some(p) if p.www_authenticate.is_some() => p,
            _ => Self::ping(client, base_url, credentials.as_ref()).await?,
        };

        // S1: interpret the ping outcome.
        match outcome.status {
            StatusCode::OK => {
                let info = credentials.unwrap_or(AuthInfo::None);
                trace!("login: succeeded anonymously or with accepted credentials");
                return Ok(info);
            }
            StatusCode::UNAUTHORIZED => {
                if outcome.www_authenticate.is_none() {
                    return Err(Error::Unauthorized(
                        "401 response carried no WWW-Authenticate header".to_string(),
                    ));
                }
            }
            other => {
                return Err(Error::Unauthorized(format!(
                    "ping returned unexpected status {}",
                    other
                )));
            }
        }

        // S2: parse the challenge.
        let header_value = outcome.www_authenticate.as_deref().expect("checked above");
        let challenge = AuthChallenge::parse(header_value).map_err(|_| {
            Error::Unauthorized("could not parse WWW-Authenticate challenge".to_string())
        })?;

        // S3: dispatch on scheme.
        if challenge.scheme_eq_ignore_case("basic") {
            // The ping above already carried `credentials` (if any) as
            // a Basic `Authorization` header, so a Basic challenge here
            // can only mean those credentials were rejected, or that
            // none were supplied in the first place.
            return Err(Error::Unauthorized(if credentials.is_some() {
                "registry rejected the supplied Basic credentials".to_string()
            } else {
                "registry requires Basic credentials but none were supplied".to_string()
            }));
        }

        if challenge.scheme_eq_ignore_case("bearer") {
            let realm = challenge
                .realm()
                .ok_or_else(|| Error::Unauthorized("Bearer challenge missing realm".to_string()))?;

            let scopes: Vec<String> = if scope.is_empty() {
                Vec::new()
            } else {
                vec![scope.to_string()]
            };

            let token = TokenFetcher::fetch(
                client,
                TokenRequest {
                    realm,
                    service: challenge.service(),
                    scopes: &scopes,
                    username,
                    password,
                    insecure,
                },
            )
            .await?;

            let info = AuthInfo::Bearer { token };
            trace!("login: acquired bearer token {}", info.masked());
            return Ok(info);
        }

        Err(Error::Unauthorized(format!(
            "unsupported auth scheme '{}'",
            challenge.scheme
        )))
    }
}

/// `login`'s default scope request for a client-driven pull.
pub fn pull_scope(remote_name: &str) -> String {
    format!("repository:{}:pull", remote_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_bearer_token_for_logging() {
        let info = AuthInfo::Bearer {
            token: "abcdefgh".to_string(),
        };
        assert_eq!(info.masked(), "Bearer(a******h)");
    }

    #[test]
    fn basic_auth_header_is_base64_userpass() {
        let info = AuthInfo::Basic {
            username: "alice".to_string(),
            password: "wonderland".to_string(),
        };
        let header = info.authorization_header().unwrap();
        assert!(header.starts_with("Basic "));
        let encoded = header.trim_start_matches("Basic ");
        let decoded = base64::decode(encoded).unwrap();
        assert_eq!(decoded, b"alice:wonderland");
    }

    #[test]
    fn bearer_auth_header_is_plain_token() {
        let info = AuthInfo::Bearer {
            token: "tok123".to_string(),
        };
        assert_eq!(
            info.authorization_header(),
            Some("Bearer tok123".to_string())
        );
    }

    #[test]
    fn none_auth_has_no_header() {
        assert_eq!(AuthInfo::None.authorization_header(), None);
    }

    #[test]
    fn pull_scope_format() {
        assert_eq!(
            pull_scope("library/busybox"),
            "repository:library/busybox:pull"
        );
    }
}
