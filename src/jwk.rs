//! JSON Web Key parsing and conversion to PEM.
//!
//! Builds a public key directly from a JWK's base64url-encoded
//! coordinates via `openssl::bn::BigNum` (RSA's `n`/`e`, EC's `x`/`y`)
//! and writes the result out as a PEM string, since `JwsExtractor`
//! reconstructs a `jwk_pem` field per signature rather than holding a
//! live key handle.

use crate::errors::{Error, Result};
use base64::URL_SAFE_NO_PAD;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey, EcPoint};
use openssl::nid::Nid;
use openssl::pkey::{PKey, Public};
use openssl::rsa::Rsa;
use serde::Deserialize;

/// A JSON Web Key, per RFC 7517. Only the fields needed to reconstruct a
/// public key for signature verification are modeled; unknown fields are
/// ignored by `serde`.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub crv: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
    #[allow(dead_code)]
    pub kid: Option<String>,
}

impl Jwk {
    /// Convert this JWK into a PEM-encoded public key.
    ///
    /// Only RSA and EC (P-256/P-384/P-521) keys are supported;
    /// unsupported key types surface as `InvalidContent` rather than a
    /// crypto error, since the failure is "we don't understand this
    /// manifest", not "the key is invalid".
    pub fn to_pem(&self) -> Result<String> {
        let pkey = match self.kty.as_str() {
            "RSA" => self.rsa_public_key()?,
            "EC" => self.ec_public_key()?,
            other => {
                return Err(Error::InvalidContent(format!(
                    "unsupported JWK key type '{}'",
                    other
                )))
            }
        };

        let pem = pkey
            .public_key_to_pem()
            .map_err(|e| Error::InvalidContent(format!("failed to encode public key as PEM: {}", e)))?;

        String::from_utf8(pem)
            .map_err(|e| Error::InvalidContent(format!("PEM encoding was not valid UTF-8: {}", e)))
    }

    fn rsa_public_key(&self) -> Result<PKey<Public>> {
        let n = self
            .n
            .as_deref()
            .ok_or_else(|| Error::InvalidContent("RSA JWK missing 'n'".to_string()))?;
        let e = self
            .e
            .as_deref()
            .ok_or_else(|| Error::InvalidContent("RSA JWK missing 'e'".to_string()))?;

        let n = decode_bignum(n)?;
        let e = decode_bignum(e)?;

        let rsa = Rsa::from_public_components(n, e)
            .map_err(|err| Error::InvalidContent(format!("invalid RSA JWK: {}", err)))?;

        PKey::from_rsa(rsa).map_err(Error::from)
    }

    fn ec_public_key(&self) -> Result<PKey<Public>> {
        let crv = self
            .crv
            .as_deref()
            .ok_or_else(|| Error::InvalidContent("EC JWK missing 'crv'".to_string()))?;
        let x = self
            .x
            .as_deref()
            .ok_or_else(|| Error::InvalidContent("EC JWK missing 'x'".to_string()))?;
        let y = self
            .y
            .as_deref()
            .ok_or_else(|| Error::InvalidContent("EC JWK missing 'y'".to_string()))?;

        let nid = match crv {
            "P-256" => Nid::X9_62_PRIME256V1,
            "P-384" => Nid::SECP384R1,
            "P-521" => Nid::SECP521R1,
            other => {
                return Err(Error::InvalidContent(format!(
                    "unsupported EC curve '{}'",
                    other
                )))
            }
        };

        let group = EcGroup::from_curve_name(nid)
            .map_err(|err| Error::InvalidContent(format!("unknown curve: {}", err)))?;

        let x = decode_bignum(x)?;
        let y = decode_bignum(y)?;

        let mut ctx = openssl::bn::BigNumContext::new()?;
        let mut point = EcPoint::new(&group)?;
        point.set_affine_coordinates_gfp(&group, &x, &y, &mut ctx)?;

        let key = EcKey::from_public_key(&group, &point)
            .map_err(|err| Error::InvalidContent(format!("invalid EC JWK: {}", err)))?;

        PKey::from_ec_key(key).map_err(Error::from)
    }
}

fn decode_bignum(fragment: &str) -> Result<BigNum> {
    let bytes = base64::decode_config(fragment, URL_SAFE_NO_PAD)
        .map_err(|err| Error::InvalidContent(format!("invalid base64url in JWK: {}", err)))?;
    BigNum::from_slice(&bytes).map_err(Error::from)
}
