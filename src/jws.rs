//! Reconstruction and verification of the JSON Web Signature embedded in
//! a schema-v1 manifest.
//!
//! Registries serve the *entire* manifest, `signatures` array included,
//! but the bytes that were actually signed predate that array's
//! insertion. Each signature's `protected` header encodes exactly where
//! to cut the raw response body and what suffix to append to recover
//! the original signing payload. This has to be done by splicing the
//! raw bytes, never by re-serializing the decoded JSON, because a JSON
//! encoder is free to reorder keys or change whitespace, which would
//! silently invalidate every signature.
//!
//! Signature verification uses `openssl::sign::Verifier` across the
//! full algorithm set this crate supports, including EC keys, whose JWS
//! signatures are raw `r || s` and need converting to DER before
//! OpenSSL's generic `Verifier` will accept them.

use crate::errors::{Error, Result};
use crate::jwk::Jwk;
use base64::URL_SAFE_NO_PAD;
use openssl::bn::BigNum;
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Padding;
use openssl::sign::{RsaPssSaltlen, Verifier};
use serde::Deserialize;
use serde_json::Value;

/// One entry of a manifest's `signatures` array, as received on the
/// wire.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestSignature {
    pub header: SignatureHeader,
    pub signature: String,
    pub protected: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignatureHeader {
    pub alg: String,
    pub jwk: Option<Jwk>,
    pub chain: Option<Vec<String>>,
}

/// Decoded `protected` header: `{formatLength, formatTail, time?}`.
#[derive(Debug, Clone, Deserialize)]
struct ProtectedHeader {
    #[serde(rename = "formatLength")]
    format_length: serde_json::Number,
    #[serde(rename = "formatTail")]
    format_tail: String,
    #[allow(dead_code)]
    time: Option<String>,
}

/// One signature after reconstruction: the original `protected`/
/// `signature` strings, plus the JWK converted to PEM (when present).
#[derive(Debug, Clone)]
pub struct ReconstructedSignature {
    pub alg: String,
    pub jwk_pem: Option<String>,
    pub has_chain: bool,
    pub signature: String,
    pub protected: String,
}

/// The reconstructed signing payload, plus every signature that was
/// computed over it.
#[derive(Debug, Clone)]
pub struct ReconstructedJws {
    pub payload: Vec<u8>,
    pub signatures: Vec<ReconstructedSignature>,
}

/// Reconstructs the signing payload and per-signature key material from
/// a manifest's `signatures` array and the raw (unparsed) response body.
pub struct JwsExtractor;

impl JwsExtractor {
    pub fn reconstruct(
        signatures: &[ManifestSignature],
        raw_body: &[u8],
    ) -> Result<ReconstructedJws> {
        if signatures.is_empty() {
            return Err(Error::InvalidContent(
                "manifest has no signatures".to_string(),
            ));
        }

        let mut format_length: Option<i64> = None;
        let mut format_tail: Option<Vec<u8>> = None;
        let mut reconstructed = Vec::with_capacity(signatures.len());

        for sig in signatures {
            let protected_json = decode_b64url(&sig.protected)?;
            let protected: ProtectedHeader = serde_json::from_slice(&protected_json)
                .map_err(|e| Error::InvalidContent(format!("bad protected header: {}", e)))?;

            let this_length = protected
                .format_length
                .as_i64()
                .ok_or_else(|| Error::InvalidContent("formatLength is not an integer".to_string()))?;

            let this_tail = decode_b64url(&protected.format_tail)?;

            match (format_length, &format_tail) {
                (None, None) => {
                    format_length = Some(this_length);
                    format_tail = Some(this_tail);
                }
                (Some(len), Some(tail)) => {
                    if len != this_length || tail != &this_tail {
                        return Err(Error::InvalidContent(
                            "signatures disagree on formatLength/formatTail".to_string(),
                        ));
                    }
                }
                _ => unreachable!(),
            }

            let jwk_pem = match &sig.header.jwk {
                Some(jwk) => Some(jwk.to_pem()?),
                None => None,
            };

            reconstructed.push(ReconstructedSignature {
                alg: sig.header.alg.clone(),
                jwk_pem,
                has_chain: sig.header.chain.is_some(),
                signature: sig.signature.clone(),
                protected: sig.protected.clone(),
            });
        }

        let format_length = format_length.expect("checked non-empty above");
        if format_length < 0 {
            return Err(Error::InvalidContent("formatLength is negative".to_string()));
        }
        let format_length = format_length as usize;
        let format_tail = format_tail.expect("checked non-empty above");

        if format_length > raw_body.len() {
            return Err(Error::InvalidContent(
                "formatLength exceeds manifest body length".to_string(),
            ));
        }

        let mut payload = Vec::with_capacity(format_length + format_tail.len());
        payload.extend_from_slice(&raw_body[..format_length]);
        payload.extend_from_slice(&format_tail);

        Ok(ReconstructedJws {
            payload,
            signatures: reconstructed,
        })
    }
}

/// Fixed deny-list of algorithms that must never be accepted, regardless
/// of what key material is attached.
const FORBIDDEN_ALGS: &[&str] = &["none", "None", "NONE"];

/// Verifies every signature in a `ReconstructedJws` against its embedded
/// public key. All signatures must verify for the manifest to be
/// accepted.
pub struct JwsVerifier;

impl JwsVerifier {
    pub fn verify(reconstructed: &ReconstructedJws) -> Result<()> {
        for sig in &reconstructed.signatures {
            Self::verify_one(sig, &reconstructed.payload)?;
        }
        Ok(())
    }

    fn verify_one(sig: &ReconstructedSignature, payload: &[u8]) -> Result<()> {
        if FORBIDDEN_ALGS.contains(&sig.alg.as_str()) {
            return Err(Error::ManifestVerification(format!(
                "algorithm '{}' is forbidden",
                sig.alg
            )));
        }

        if sig.has_chain {
            return Err(Error::Internal(
                "certificate chain (x5c) verification is not implemented".to_string(),
            ));
        }

        let jwk_pem = sig.jwk_pem.as_deref().ok_or_else(|| {
            Error::InvalidContent("signature has neither an embedded jwk nor a chain".to_string())
        })?;

        let signing_input = format!(
            "{}.{}",
            sig.protected,
            base64::encode_config(payload, URL_SAFE_NO_PAD)
        );

        let raw_signature = decode_b64url(&sig.signature)?;

        let pkey = PKey::public_key_from_pem(jwk_pem.as_bytes())?;

        let verified = match sig.alg.as_str() {
            "RS256" => verify_rsa(&pkey, MessageDigest::sha256(), Padding::PKCS1, signing_input.as_bytes(), &raw_signature)?,
            "RS384" => verify_rsa(&pkey, MessageDigest::sha384(), Padding::PKCS1, signing_input.as_bytes(), &raw_signature)?,
            "RS512" => verify_rsa(&pkey, MessageDigest::sha512(), Padding::PKCS1, signing_input.as_bytes(), &raw_signature)?,
            "PS256" => verify_rsa_pss(&pkey, MessageDigest::sha256(), signing_input.as_bytes(), &raw_signature)?,
            "PS384" => verify_rsa_pss(&pkey, MessageDigest::sha384(), signing_input.as_bytes(), &raw_signature)?,
            "PS512" => verify_rsa_pss(&pkey, MessageDigest::sha512(), signing_input.as_bytes(), &raw_signature)?,
            "ES256" => verify_ec(&pkey, MessageDigest::sha256(), signing_input.as_bytes(), &raw_signature, 32)?,
            "ES384" => verify_ec(&pkey, MessageDigest::sha384(), signing_input.as_bytes(), &raw_signature, 48)?,
            "ES512" => verify_ec(&pkey, MessageDigest::sha512(), signing_input.as_bytes(), &raw_signature, 66)?,
            other => {
                return Err(Error::ManifestVerification(format!(
                    "unsupported algorithm '{}'",
                    other
                )))
            }
        };

        if verified {
            Ok(())
        } else {
            Err(Error::ManifestVerification(format!(
                "signature did not verify for alg '{}'",
                sig.alg
            )))
        }
    }
}

fn verify_rsa(
    pkey: &PKey<openssl::pkey::Public>,
    digest: MessageDigest,
    padding: Padding,
    signing_input: &[u8],
    signature: &[u8],
) -> Result<bool> {
    let mut verifier = Verifier::new(digest, pkey)?;
    verifier.set_rsa_padding(padding)?;
    verifier.update(signing_input)?;
    Ok(verifier.verify(signature)?)
}

fn verify_rsa_pss(
    pkey: &PKey<openssl::pkey::Public>,
    digest: MessageDigest,
    signing_input: &[u8],
    signature: &[u8],
) -> Result<bool> {
    let mut verifier = Verifier::new(digest, pkey)?;
    verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
    verifier.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
    verifier.update(signing_input)?;
    Ok(verifier.verify(signature)?)
}

/// JWS EC signatures are the raw concatenation `r || s`, each
/// `coord_len` bytes; OpenSSL's generic `Verifier` needs a DER-encoded
/// `ECDSA-Sig-Value` instead.
fn verify_ec(
    pkey: &PKey<openssl::pkey::Public>,
    digest: MessageDigest,
    signing_input: &[u8],
    signature: &[u8],
    coord_len: usize,
) -> Result<bool> {
    if signature.len() != coord_len * 2 {
        return Err(Error::ManifestVerification(format!(
            "EC signature length {} does not match expected {}",
            signature.len(),
            coord_len * 2
        )));
    }

    let r = BigNum::from_slice(&signature[..coord_len])?;
    let s = BigNum::from_slice(&signature[coord_len..])?;
    let der = EcdsaSig::from_private_components(r, s)?.to_der()?;

    let mut verifier = Verifier::new(digest, pkey)?;
    verifier.update(signing_input)?;
    Ok(verifier.verify(&der)?)
}

fn decode_b64url(value: &str) -> Result<Vec<u8>> {
    // Tolerate both padded and unpadded base64url, since different
    // registries/clients have historically emitted both.
    let trimmed = value.trim_end_matches('=');
    base64::decode_config(trimmed, URL_SAFE_NO_PAD)
        .map_err(|e| Error::InvalidContent(format!("invalid base64url: {}", e)))
}

/// True if `value` parses as a JSON object (used by callers that want to
/// double check `protected` decodes to an object before trusting it).
#[allow(dead_code)]
fn looks_like_json_object(value: &[u8]) -> bool {
    matches!(serde_json::from_slice::<Value>(value), Ok(Value::Object(_)))
}
