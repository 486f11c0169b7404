//! Parser for a single `WWW-Authenticate` challenge.
//!
//! Generalizes the capture-group regex approach dkregistry's own
//! `v2::auth::WwwAuthenticateHeaderContent` uses, but instead of
//! deserializing straight into a `Basic | Bearer` enum, this keeps the
//! parsed scheme and parameters as a generic map. That lets
//! `AuthCoordinator` (see `v2/auth.rs`) dispatch on the scheme itself and
//! keeps unrecognized schemes (seen in the wild from some third-party
//! registries) from being a hard parse error.

use crate::errors::{Error, Result};
use std::collections::BTreeMap;

const REGEX: &str = r#"(?x)\s*
((?P<method>[A-Za-z][A-Za-z0-9]*)\s*)?
(
    \s*
        (?P<key>[A-Za-z0-9_]+)
    \s*
        =
    \s*
        "(?P<value>[^"]*)"
    \s*
)
"#;

/// A single parsed `Scheme k1="v1", k2="v2"` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// The authentication scheme, as given (case preserved for display)
    /// but compared case-insensitively by callers.
    pub scheme: String,
    /// Parameter keys are lowercased; values are preserved verbatim.
    pub params: BTreeMap<String, String>,
}

impl AuthChallenge {
    /// Parse one challenge from a raw header value.
    ///
    /// Multi-challenge input (several challenges joined by `,` at the
    /// top level, as some registries emit when both Basic and Bearer are
    /// advertised) is not supported: only the first scheme/param run is
    /// captured, matching spec behavior left undefined for that input.
    pub fn parse(header_value: &str) -> Result<Self> {
        let re = regex::Regex::new(REGEX).expect("static regex is valid");
        let captures: Vec<_> = re.captures_iter(header_value).collect();

        let scheme = captures
            .get(0)
            .and_then(|c| c.name("method"))
            .ok_or_else(|| {
                Error::MalformedChallenge(format!(
                    "no scheme found in '{}'",
                    header_value
                ))
            })?
            .as_str()
            .to_string();

        let mut params = BTreeMap::new();
        for cap in &captures {
            if let (Some(k), Some(v)) = (cap.name("key"), cap.name("value")) {
                params.insert(k.as_str().to_lowercase(), v.as_str().to_string());
            }
        }

        if params.is_empty() && captures.len() <= 1 {
            return Err(Error::MalformedChallenge(format!(
                "no parameters found in '{}'",
                header_value
            )));
        }

        Ok(AuthChallenge { scheme, params })
    }

    pub fn scheme_eq_ignore_case(&self, scheme: &str) -> bool {
        self.scheme.eq_ignore_ascii_case(scheme)
    }

    pub fn realm(&self) -> Option<&str> {
        self.params.get("realm").map(String::as_str)
    }

    pub fn service(&self) -> Option<&str> {
        self.params.get("service").map(String::as_str)
    }

    pub fn scope(&self) -> Option<&str> {
        self.params.get("scope").map(String::as_str)
    }
}
