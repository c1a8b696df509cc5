use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A normalized broadcast channel name.
///
/// Tags are the unit of subscription: devices subscribe to tags, and a sync
/// request broadcasts to every device currently subscribed to one. The tag
/// namespace is open — tags are created on first valid reference, loaded from
/// configuration at startup, and reconciled with persisted storage. There is
/// no removal path.
///
/// A `Tag` can only be constructed through [`Tag::normalize`], so holding one
/// is proof the name is trimmed, lowercase, non-empty, and matches
/// `[a-z0-9_]+`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag(String);

/// Rejection reasons for a candidate tag name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagFormatError {
    #[error("tag is empty after trimming")]
    Empty,

    #[error("tag '{0}' contains characters outside [a-z0-9_]")]
    InvalidCharacters(String),
}

impl Tag {
    /// Normalize a raw tag name: trim, ASCII-lowercase, then validate against
    /// `[a-z0-9_]+`. Normalization is idempotent — normalizing an already
    /// normalized tag yields the same tag.
    pub fn normalize(raw: &str) -> Result<Self, TagFormatError> {
        let candidate = raw.trim().to_ascii_lowercase();

        if candidate.is_empty() {
            return Err(TagFormatError::Empty);
        }

        if !candidate
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(TagFormatError::InvalidCharacters(candidate));
        }

        Ok(Tag(candidate))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Tag {
    type Error = TagFormatError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Tag::normalize(&raw)
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.0
    }
}
