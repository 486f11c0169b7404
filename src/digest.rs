//! Content-addressed digest parsing and incremental hashing.
//!
//! A `Docker-Content-Digest` (or a blob reference) is always of the form
//! `<algorithm>:<hex>`. This module parses that shape and hands back a
//! hasher for the named algorithm, backed by OpenSSL's generic message
//! digest API so that the same crypto dependency covers both digesting
//! and JWS signature verification (see `jws.rs`).

use crate::errors::{Error, Result};
use openssl::hash::{Hasher as OsslHasher, MessageDigest};

/// A parsed `<algorithm>:<hex>` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestRef {
    pub algorithm: String,
    pub expected_hex: String,
    pub raw: String,
}

impl DigestRef {
    /// Parse `raw` as `algorithm:hex`, failing if the separator is absent
    /// or the algorithm is not one the platform's hash library supports.
    pub fn parse(raw: &str) -> Result<Self> {
        let (algorithm, hex) = raw
            .split_once(':')
            .ok_or_else(|| Error::BadDigest(format!("missing ':' in digest '{}'", raw)))?;

        if algorithm.is_empty() || hex.is_empty() {
            return Err(Error::BadDigest(format!("empty component in digest '{}'", raw)));
        }

        // Validate early: a name OpenSSL doesn't recognize is not supported.
        MessageDigest::from_name(algorithm)
            .ok_or_else(|| Error::BadDigest(format!("unsupported digest algorithm '{}'", algorithm)))?;

        Ok(DigestRef {
            algorithm: algorithm.to_string(),
            expected_hex: hex.to_lowercase(),
            raw: raw.to_string(),
        })
    }

    /// Build an incremental hasher for this reference's algorithm.
    pub fn new_hasher(&self) -> Result<Hasher> {
        Hasher::new(&self.algorithm)
    }

    /// Whether `hex` (case-insensitively) matches the expected digest.
    pub fn matches_hex(&self, hex: &str) -> bool {
        self.expected_hex.eq_ignore_ascii_case(hex)
    }
}

/// Incremental hasher for a named digest algorithm.
pub struct Hasher {
    inner: OsslHasher,
}

impl Hasher {
    pub fn new(algorithm: &str) -> Result<Self> {
        let md = MessageDigest::from_name(algorithm)
            .ok_or_else(|| Error::BadDigest(format!("unsupported digest algorithm '{}'", algorithm)))?;
        Ok(Hasher {
            inner: OsslHasher::new(md)?,
        })
    }

    pub fn update(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.update(bytes)?;
        Ok(())
    }

    /// Finalize and return the lowercase hex digest. Consumes the hasher
    /// since OpenSSL's `Hasher` resets its internal state on finish.
    pub fn final_hex(mut self) -> Result<String> {
        let digest = self.inner.finish()?;
        Ok(hex_encode(&digest))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}
