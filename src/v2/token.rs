//! Bearer token acquisition from an external auth realm.
//!
//! GET the realm with service/scope/account query parameters,
//! optionally under HTTP Basic, and pull a `token` field out of the
//! JSON body. Accepts multiple scopes in one request and applies the
//! scheme-defaulting rule for realms with no explicit scheme.

use crate::errors::{Error, Result};
use log::trace;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

/// Parameters for one token request.
pub struct TokenRequest<'a> {
    pub realm: &'a str,
    pub service: Option<&'a str>,
    pub scopes: &'a [String],
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
    pub insecure: bool,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(alias = "access_token")]
    token: Option<String>,
}

pub struct TokenFetcher;

impl TokenFetcher {
    pub async fn fetch(client: &reqwest::Client, req: TokenRequest<'_>) -> Result<String> {
        let url = Self::build_url(&req)?;

        trace!("fetching bearer token from {}", mask_query(&url));

        let mut builder = client.get(url);
        if let (Some(user), Some(password)) = (req.username, req.password) {
            builder = builder.basic_auth(user, Some(password));
        }

        let response = builder.send().await?;
        let status = response.status();

        if status != StatusCode::OK {
            return Err(Error::Unauthorized(format!(
                "token request failed with status {}",
                status
            )));
        }

        let body: TokenResponse = response.json().await?;
        let token = body
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Unauthorized("auth realm response had no token".to_string()))?;

        Ok(token)
    }

    fn build_url(req: &TokenRequest<'_>) -> Result<Url> {
        let realm = Self::realm_with_scheme(req.realm, req.insecure)?;
        let mut url = Url::parse(&realm)?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::Unauthorized(format!(
                    "auth realm has unsupported scheme '{}'",
                    other
                )))
            }
        }

        {
            let mut pairs = url.query_pairs_mut();
            if let Some(service) = req.service {
                pairs.append_pair("service", service);
            }
            for scope in req.scopes {
                pairs.append_pair("scope", scope);
            }
            if let Some(username) = req.username {
                pairs.append_pair("account", username);
            }
        }

        Ok(url)
    }

    fn realm_with_scheme(realm: &str, insecure: bool) -> Result<String> {
        if realm.contains("://") {
            return Ok(realm.to_string());
        }
        let scheme = if insecure { "http" } else { "https" };
        Ok(format!("{}://{}", scheme, realm))
    }
}

fn mask_query(url: &Url) -> String {
    let mut masked = url.clone();
    masked.set_query(None);
    masked.to_string()
}
