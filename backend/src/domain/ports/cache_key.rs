//! Cache key type shared by cache adapters.
use thiserror::Error;

/// Namespaced key for an entry in the key-value cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Construct a key after validating that it is non-empty and has no
    /// whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self, CacheKeyValidationError> {
        let raw = value.into();
        if raw.trim().is_empty() {
            return Err(CacheKeyValidationError::Empty);
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(CacheKeyValidationError::ContainsWhitespace);
        }
        Ok(Self(raw))
    }

    /// Build a key from trusted, whitespace-free segments joined by `:`.
    pub(crate) fn from_segments(segments: &[&str]) -> Self {
        Self(segments.join(":"))
    }

    /// Borrow the underlying key as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Whether this key sits under `prefix`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Validation errors returned when constructing [`CacheKey`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheKeyValidationError {
    /// Key is empty after trimming whitespace.
    #[error("cache key must not be empty")]
    Empty,
    /// Key contains whitespace.
    #[error("cache key must not contain whitespace")]
    ContainsWhitespace,
}

#[cfg(test)]
mod tests {
    //! Validates cache key parsing and whitespace constraints.
    use super::{CacheKey, CacheKeyValidationError};
    use rstest::rstest;

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn cache_key_rejects_blank(#[case] value: &str) {
        let err = CacheKey::new(value).expect_err("blank keys rejected");
        assert_eq!(err, CacheKeyValidationError::Empty);
    }

    #[rstest]
    #[case(" leading")]
    #[case("chat:room 1:stats")]
    fn cache_key_rejects_whitespace(#[case] value: &str) {
        let err = CacheKey::new(value).expect_err("whitespace rejected");
        assert_eq!(err, CacheKeyValidationError::ContainsWhitespace);
    }

    #[rstest]
    fn segments_are_colon_joined() {
        let key = CacheKey::from_segments(&["chat", "room", "7", "stats"]);
        assert_eq!(key.as_str(), "chat:room:7:stats");
        assert!(key.has_prefix("chat:room:7:"));
        assert_eq!(key.to_string(), "chat:room:7:stats");
    }
}
