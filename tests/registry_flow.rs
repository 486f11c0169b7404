//! End-to-end scenarios against a local mock registry, exercising
//! ping/login/tags/manifest/blob flows. Uses `mockito`'s global mock
//! server to drive a fake registry rather than the real
//! `registry-1.docker.io`.

use base64::URL_SAFE_NO_PAD;
use mockito::mock;
use openssl::hash::{hash, MessageDigest};
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::sign::Signer;
use regcore::index::{Index, Repository, Scheme};
use regcore::v2::Client;
use serde_json::json;

fn b64url(bytes: &[u8]) -> String {
    base64::encode_config(bytes, URL_SAFE_NO_PAD)
}

fn server_repository(remote_name: &str) -> Repository {
    let url = mockito::server_url();
    let host = url.trim_start_matches("http://").to_string();
    Repository {
        index: Index {
            name: host,
            official: false,
            scheme: Scheme::Http,
        },
        remote_name: remote_name.to_string(),
        local_name: remote_name.to_string(),
    }
}

/// Builds a schema-v1 manifest whose single RS256 signature verifies,
/// by signing the payload first and then splicing the `signatures`
/// array onto the same bytes the signature covers -- mirroring
/// production manifests, where the signed bytes predate `signatures`.
struct SignedManifest {
    body: Vec<u8>,
    content_digest: String,
}

fn signed_manifest(tag: &str) -> SignedManifest {
    let rsa = Rsa::generate(2048).unwrap();
    let n = b64url(&rsa.n().to_vec());
    let e = b64url(&rsa.e().to_vec());
    let pkey = PKey::from_rsa(rsa).unwrap();

    let head = format!(
        r#"{{"schemaVersion":1,"name":"library/busybox","tag":"{}","architecture":"amd64","fsLayers":[{{"blobSum":"sha256:{:064x}"}}],"history":[{{"v1Compatibility":"{{}}"}}]"#,
        tag, 0
    );
    let tail = "}";
    let format_length = head.len();
    let payload = format!("{}{}", head, tail);

    let protected = json!({
        "formatLength": format_length,
        "formatTail": b64url(tail.as_bytes()),
    });
    let protected_b64 = b64url(protected.to_string().as_bytes());

    let signing_input = format!("{}.{}", protected_b64, b64url(payload.as_bytes()));

    let mut signer = Signer::new(MessageDigest::sha256(), &pkey).unwrap();
    signer.update(signing_input.as_bytes()).unwrap();
    let raw_signature = signer.sign_to_vec().unwrap();

    let sig_entry = json!({
        "header": {"alg": "RS256", "jwk": {"kty": "RSA", "n": n, "e": e}},
        "signature": b64url(&raw_signature),
        "protected": protected_b64,
    });

    let body = format!(r#"{},"signatures":[{}]}}"#, head, sig_entry);
    let digest_hex = hex_encode(&hash(MessageDigest::sha256(), payload.as_bytes()).unwrap());

    SignedManifest {
        body: body.into_bytes(),
        content_digest: format!("sha256:{}", digest_hex),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[tokio::test]
async fn ping_unauthenticated_surfaces_challenge() {
    let _m = mock("GET", "/v2/")
        .with_status(401)
        .with_header(
            "www-authenticate",
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io""#,
        )
        .create();

    let client = Client::new(&server_repository("library/busybox"), None, None, false).unwrap();
    let outcome = client.ping().await.unwrap();

    assert_eq!(outcome.status, reqwest::StatusCode::UNAUTHORIZED);
    assert!(outcome
        .www_authenticate
        .unwrap()
        .starts_with(r#"Bearer realm="https://auth.docker.io/token""#));
}

#[tokio::test]
async fn supports_v2_requires_version_header() {
    let _m = mock("GET", "/v2/")
        .with_status(200)
        .with_header("docker-distribution-api-version", "registry/2.0")
        .create();

    let client = Client::new(&server_repository("library/busybox"), None, None, false).unwrap();
    assert!(client.supports_v2().await.unwrap());
}

#[tokio::test]
async fn list_tags_after_anonymous_bearer_login() {
    let _ping = mock("GET", "/v2/")
        .with_status(401)
        .with_header(
            "www-authenticate",
            format!(r#"Bearer realm="{}/token",service="registry""#, mockito::server_url()).as_str(),
        )
        .create();

    let _token = mock("GET", mockito::Matcher::Regex("^/token.*".into()))
        .with_status(200)
        .with_body(r#"{"token":"faketoken"}"#)
        .create();

    let _tags = mock("GET", "/v2/library/busybox/tags/list")
        .match_header("authorization", "Bearer faketoken")
        .with_status(200)
        .with_body(r#"{"name":"library/busybox","tags":["latest","1.0"]}"#)
        .create();

    let client = Client::new(&server_repository("library/busybox"), None, None, false).unwrap();
    let tags = client.list_tags().await.unwrap();

    assert_eq!(tags.name, "library/busybox");
    assert!(tags.tags.contains(&"latest".to_string()));
}

#[tokio::test]
async fn get_manifest_verifies_signature_and_digest() {
    let signed = signed_manifest("latest");

    let _ping = mock("GET", "/v2/")
        .with_status(401)
        .with_header(
            "www-authenticate",
            format!(r#"Bearer realm="{}/token",service="registry""#, mockito::server_url()).as_str(),
        )
        .create();

    let _token = mock("GET", mockito::Matcher::Regex("^/token.*".into()))
        .with_status(200)
        .with_body(r#"{"token":"faketoken"}"#)
        .create();

    let _manifest = mock("GET", "/v2/library/busybox/manifests/latest")
        .match_header("authorization", "Bearer faketoken")
        .with_status(200)
        .with_header("docker-content-digest", signed.content_digest.as_str())
        .with_body(signed.body.clone())
        .create();

    let client = Client::new(&server_repository("library/busybox"), None, None, false).unwrap();
    let (manifest, digest) = client.get_manifest("latest").await.unwrap();

    assert_eq!(manifest.schema_version, 1);
    assert_eq!(manifest.name, "library/busybox");
    assert_eq!(manifest.tag, "latest");
    assert_eq!(manifest.fs_layers.len(), manifest.history.len());
    assert_eq!(digest.as_deref(), Some(signed.content_digest.as_str()));
}

#[tokio::test]
async fn get_manifest_rejects_tampered_body() {
    let mut signed = signed_manifest("latest");
    // Flip a byte inside the signed region: the signature must stop
    // verifying even though the structure is still well-formed JSON.
    let idx = signed.body.iter().position(|&b| b == b'b').unwrap();
    signed.body[idx] = b'c';

    let _ping = mock("GET", "/v2/")
        .with_status(401)
        .with_header(
            "www-authenticate",
            format!(r#"Bearer realm="{}/token",service="registry""#, mockito::server_url()).as_str(),
        )
        .create();
    let _token = mock("GET", mockito::Matcher::Regex("^/token.*".into()))
        .with_status(200)
        .with_body(r#"{"token":"faketoken"}"#)
        .create();
    let _manifest = mock("GET", "/v2/library/busybox/manifests/latest")
        .with_status(200)
        .with_header("docker-content-digest", signed.content_digest.as_str())
        .with_body(signed.body.clone())
        .create();

    let client = Client::new(&server_repository("library/busybox"), None, None, false).unwrap();
    let err = client.get_manifest("latest").await.unwrap_err();

    assert!(matches!(
        err,
        regcore::Error::BadDigest(_) | regcore::Error::ManifestVerification(_)
    ));
}

#[tokio::test]
async fn get_manifest_unknown_tag_is_404() {
    let _ping = mock("GET", "/v2/")
        .with_status(401)
        .with_header(
            "www-authenticate",
            format!(r#"Bearer realm="{}/token",service="registry""#, mockito::server_url()).as_str(),
        )
        .create();
    let _token = mock("GET", mockito::Matcher::Regex("^/token.*".into()))
        .with_status(200)
        .with_body(r#"{"token":"faketoken"}"#)
        .create();
    let _manifest = mock("GET", "/v2/library/busybox/manifests/unknowntag")
        .with_status(404)
        .with_header("content-type", "application/json")
        .with_body(r#"{"errors":[{"code":"MANIFEST_UNKNOWN"}]}"#)
        .create();

    let client = Client::new(&server_repository("library/busybox"), None, None, false).unwrap();
    let err = client.get_manifest("unknowntag").await.unwrap_err();

    match err {
        regcore::Error::UnexpectedHttpStatus { status, message } => {
            assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
            assert!(message.contains("MANIFEST_UNKNOWN"));
        }
        other => panic!("unexpected error variant: {:?}", other),
    }
}

#[tokio::test]
async fn head_blob_follows_redirect_chain() {
    let digest = "sha256:0000000000000000000000000000000000000000000000000000000000000000";

    let _ping = mock("GET", "/v2/")
        .with_status(401)
        .with_header(
            "www-authenticate",
            format!(r#"Bearer realm="{}/token",service="registry""#, mockito::server_url()).as_str(),
        )
        .create();
    let _token = mock("GET", mockito::Matcher::Regex("^/token.*".into()))
        .with_status(200)
        .with_body(r#"{"token":"faketoken"}"#)
        .create();

    let _first = mock("HEAD", format!("/v2/library/busybox/blobs/{}", digest).as_str())
        .match_header("authorization", "Bearer faketoken")
        .with_status(307)
        .with_header("location", "/redirected-blob")
        .create();

    let _second = mock("HEAD", "/redirected-blob")
        .with_status(200)
        .with_header("content-length", "4")
        .create();

    let client = Client::new(&server_repository("library/busybox"), None, None, false).unwrap();
    let chain = client.head_blob(digest).await.unwrap();

    assert!(chain.len() >= 2 && chain.len() <= 4);
    assert_eq!(chain.first().unwrap().status, reqwest::StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(chain.last().unwrap().status, reqwest::StatusCode::OK);
}

#[tokio::test]
async fn open_blob_stream_verifies_digest_and_length() {
    let body = b"beep".to_vec();
    let digest_hex = hex_encode(&hash(MessageDigest::sha256(), &body).unwrap());
    let digest = format!("sha256:{}", digest_hex);

    let _ping = mock("GET", "/v2/")
        .with_status(401)
        .with_header(
            "www-authenticate",
            format!(r#"Bearer realm="{}/token",service="registry""#, mockito::server_url()).as_str(),
        )
        .create();
    let _token = mock("GET", mockito::Matcher::Regex("^/token.*".into()))
        .with_status(200)
        .with_body(r#"{"token":"faketoken"}"#)
        .create();

    let path = format!("/v2/library/busybox/blobs/{}", digest);
    let _blob = mock("GET", path.as_str())
        .with_status(200)
        .with_header("docker-content-digest", digest.as_str())
        .with_header("content-length", &body.len().to_string())
        .with_body(body.clone())
        .create();

    let client = Client::new(&server_repository("library/busybox"), None, None, false).unwrap();
    let (mut stream, chain) = client.open_blob_stream(&digest).await.unwrap();

    assert_eq!(chain.len(), 1);

    use futures::StreamExt;
    let mut received = Vec::new();
    while let Some(chunk) = stream.next().await {
        received.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(received, body);
}

#[tokio::test]
async fn open_blob_stream_unknown_digest_is_404() {
    let _ping = mock("GET", "/v2/")
        .with_status(401)
        .with_header(
            "www-authenticate",
            format!(r#"Bearer realm="{}/token",service="registry""#, mockito::server_url()).as_str(),
        )
        .create();
    let _token = mock("GET", mockito::Matcher::Regex("^/token.*".into()))
        .with_status(200)
        .with_body(r#"{"token":"faketoken"}"#)
        .create();

    let digest = "sha256:cafebabe00000000000000000000000000000000000000000000000000000000";
    let path = format!("/v2/library/busybox/blobs/{}", digest);
    let _blob = mock("GET", path.as_str()).with_status(404).create();

    let client = Client::new(&server_repository("library/busybox"), None, None, false).unwrap();
    let err = client.open_blob_stream(digest).await.unwrap_err();

    match err {
        regcore::Error::UnexpectedHttpStatus { status, .. } => {
            assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
        }
        other => panic!("unexpected error variant: {:?}", other),
    }
}
