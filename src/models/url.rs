use serde::{Deserialize, Serialize};

/// A short URL record as seen by every storage backend.
///
/// The serde field names are the on-disk format of the log-file backend;
/// renaming them breaks rehydration of existing files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortUrl {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "LongURL")]
    pub long_url: String,
    /// Owning anonymous session, empty when unowned.
    #[serde(rename = "UserID", default)]
    pub user_id: String,
    #[serde(rename = "CorrelationID", default)]
    pub correlation_id: String,
    /// Soft-deletion marker, only ever set by the relational backends.
    #[serde(skip)]
    pub is_deleted: bool,
}

impl ShortUrl {
    pub fn new(long_url: impl Into<String>) -> Self {
        Self {
            long_url: long_url.into(),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
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

#[derive(Debug, Deserialize)]
pub struct BatchShortenRequest {
    pub correlation_id: String,
    pub original_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchShortenResponse {
    pub correlation_id: String,
    pub short_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserUrl {
    pub short_url: String,
    pub original_url: String,
}
