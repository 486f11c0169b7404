//! A pure-Rust asynchronous client for the core of the Docker Registry
//! HTTP API v2, schema v1 manifests.
//!
//! This crate covers the hard engineering of the protocol dance: the
//! [`v2::auth`] state machine, the [`jws`]/[`jwk`] manifest signature
//! verifier, the [`v2::blobs`] content-addressed transport, and
//! [`digest`] header verification. Index/repository-name *parsing*
//! (turning a user-typed `busybox` or `quay.io/foo/bar` into an
//! [`index::Index`]/[`index::Repository`] pair) is deliberately left to a
//! surrounding crate; this one consumes already-parsed values.
//!
//! The entry point is [`v2::Client`]: bind it to a [`index::Repository`],
//! then call `ping`, `login`, `list_tags`, `get_manifest`, `head_blob`, or
//! `open_blob_stream`.

pub mod digest;
pub mod errors;
pub mod index;
pub mod jwk;
pub mod jws;
pub mod v2;
pub mod www_authenticate;

pub use digest::DigestRef;
pub use errors::{Error, Result};
pub use index::{Index, Repository, Scheme};
pub use v2::Client;
