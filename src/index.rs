//! Repository addressing: `Index`/`Repository`/`Scheme`, with no
//! string-parsing logic attached.
//!
//! Turning a user-typed image reference (`busybox`, `quay.io/foo/bar`)
//! into an `Index`/`Repository` pair is out of scope for this crate.
//! Callers construct these values directly; a thin wrapper crate is
//! expected to own that parsing.

/// The fixed base URL used whenever an `Index` is the official Docker
/// Hub index, regardless of which of its name variants
/// (`docker.io`, `index.docker.io`, ...) the caller used.
pub const OFFICIAL_REGISTRY_URL: &str = "https://registry-1.docker.io";

/// The logical registry endpoint a repository lives under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub official: bool,
    pub scheme: Scheme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl Index {
    /// The base URL requests against this index should be sent to.
    ///
    /// The official index always resolves to `OFFICIAL_REGISTRY_URL`; a
    /// localhost index with no explicit scheme defaults to `http`,
    /// matching common local-registry setups.
    pub fn base_url(&self) -> String {
        if self.official {
            return OFFICIAL_REGISTRY_URL.to_string();
        }

        let scheme = if is_localhost(&self.name) {
            Scheme::Http
        } else {
            self.scheme
        };

        format!("{}://{}", scheme.as_str(), self.name)
    }
}

fn is_localhost(name: &str) -> bool {
    let host = name.split(':').next().unwrap_or(name);
    host == "localhost" || host == "127.0.0.1"
}

/// A repository bound to an index: `{index, remoteName, localName}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub index: Index,
    /// The repository path as the registry expects it, e.g.
    /// `library/busybox`. For the official index, single-segment names
    /// are expected to already carry the `library/` prefix -- that
    /// normalization is also the external parser's job.
    pub remote_name: String,
    /// The name as the user typed it; used only for display.
    pub local_name: String,
}

impl Repository {
    pub fn base_url(&self) -> String {
        self.index.base_url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn official_index_forces_fixed_url() {
        let index = Index {
            name: "index.docker.io".to_string(),
            official: true,
            scheme: Scheme::Https,
        };
        assert_eq!(index.base_url(), OFFICIAL_REGISTRY_URL);
    }

    #[test]
    fn localhost_defaults_to_http() {
        let index = Index {
            name: "localhost:5000".to_string(),
            official: false,
            scheme: Scheme::Https,
        };
        assert_eq!(index.base_url(), "http://localhost:5000");
    }

    #[test]
    fn remote_index_uses_requested_scheme() {
        let index = Index {
            name: "quay.io".to_string(),
            official: false,
            scheme: Scheme::Https,
        };
        assert_eq!(index.base_url(), "https://quay.io");
    }
}
