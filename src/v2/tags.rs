//! `GET /v2/<name>/tags/list` response body.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct TagsList {
    pub name: String,
    pub tags: Vec<String>,
}
