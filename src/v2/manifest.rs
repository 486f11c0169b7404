//! Schema-v1 manifest decoding and structural invariants.

use crate::errors::{Error, Result};
use crate::jws::ManifestSignature;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct FsLayer {
    #[serde(rename = "blobSum")]
    pub blob_sum: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct History {
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

/// A decoded schema-v1 manifest, before any signature verification.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestV1 {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    pub name: String,
    pub tag: String,
    pub architecture: Option<String>,
    #[serde(rename = "fsLayers")]
    pub fs_layers: Vec<FsLayer>,
    pub history: Vec<History>,
    pub signatures: Vec<ManifestSignature>,
}

impl ManifestV1 {
    /// Check structural invariants before returning the manifest to the
    /// caller: the schema version must be 1, and `fsLayers`/`history`
    /// must be equal length and non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.schema_version != 1 {
            return Err(Error::InvalidContent(format!(
                "unsupported schemaVersion {}",
                self.schema_version
            )));
        }
        if self.fs_layers.len() != self.history.len() {
            return Err(Error::InvalidContent(format!(
                "fsLayers length {} does not match history length {}",
                self.fs_layers.len(),
                self.history.len()
            )));
        }
        if self.fs_layers.is_empty() {
            return Err(Error::InvalidContent(
                "manifest has no layers".to_string(),
            ));
        }
        Ok(())
    }
}
