use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A stored mapping from a short key to its target URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ShortLink {
    #[sqlx(rename = "short_key")]
    pub key: String,
    #[sqlx(rename = "original_url")]
    pub target: String,
    pub owner: String,
    #[sqlx(rename = "is_deleted")]
    #[serde(default)]
    pub removed: bool,
}

impl ShortLink {
    pub fn new(key: impl Into<String>, target: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            target: target.into(),
            owner: owner.into(),
            removed: false,
        }
    }
}

/// Outcome of a create call.
///
/// `created == false` means the target was already shortened and `key` is the
/// existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortened {
    pub key: String,
    pub created: bool,
}

impl Shortened {
    pub fn created(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            created: true,
        }
    }

    pub fn conflict(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            created: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ShortenRequest {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShortenResponse {
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUrl {
    pub short_url: String,
    pub original_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub correlation_id: String,
    pub original_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultItem {
    pub correlation_id: String,
    pub short_url: String,
}
