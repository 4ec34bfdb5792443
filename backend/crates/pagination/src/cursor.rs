//! Cursor encoding and direction parsing.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while encoding or decoding a [`Cursor`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    /// The token was empty once trimmed.
    #[error("cursor token must not be empty")]
    Empty,
    /// The token was not valid base64.
    #[error("cursor token is not valid base64: {message}")]
    Encoding {
        /// Decoder diagnostic.
        message: String,
    },
    /// The decoded bytes did not describe the expected key.
    #[error("cursor token does not contain a valid key: {message}")]
    Payload {
        /// Deserialiser diagnostic.
        message: String,
    },
    /// The key could not be serialised.
    #[error("cursor key could not be serialised: {message}")]
    Serialize {
        /// Serialiser diagnostic.
        message: String,
    },
}

/// Opaque reference point into an ordered collection.
///
/// # Examples
///
/// ```
/// use pagination::Cursor;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Key {
///     id: i64,
/// }
///
/// let token = Cursor::new(Key { id: 7 }).encode().expect("encodes");
/// let decoded = Cursor::<Key>::decode(&token).expect("decodes");
/// assert_eq!(decoded.key(), &Key { id: 7 });
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor<K> {
    key: K,
}

impl<K> Cursor<K> {
    /// Wrap a key in a cursor.
    pub const fn new(key: K) -> Self {
        Self { key }
    }

    /// Borrow the wrapped key.
    pub const fn key(&self) -> &K {
        &self.key
    }

    /// Consume the cursor, returning its key.
    pub fn into_key(self) -> K {
        self.key
    }
}

impl<K: Serialize> Cursor<K> {
    /// Encode the key as a URL-safe opaque token.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError::Serialize`] when the key cannot be rendered as
    /// JSON.
    pub fn encode(&self) -> Result<String, CursorError> {
        let json = serde_json::to_vec(&self.key).map_err(|err| CursorError::Serialize {
            message: err.to_string(),
        })?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }
}

impl<K: DeserializeOwned> Cursor<K> {
    /// Decode a token produced by [`Cursor::encode`].
    ///
    /// Padded standard-alphabet base64 is accepted as well, so tokens minted
    /// by other encoders still round-trip.
    ///
    /// # Errors
    ///
    /// Returns a [`CursorError`] describing why the token is unusable.
    pub fn decode(token: &str) -> Result<Self, CursorError> {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(CursorError::Empty);
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(trimmed)
            .or_else(|_| STANDARD.decode(trimmed))
            .map_err(|err| CursorError::Encoding {
                message: err.to_string(),
            })?;
        let key = serde_json::from_slice(&bytes).map_err(|err| CursorError::Payload {
            message: err.to_string(),
        })?;
        Ok(Self { key })
    }

    /// Decode an optional token, treating anything malformed as absent.
    ///
    /// # Examples
    ///
    /// ```
    /// use pagination::Cursor;
    ///
    /// assert!(Cursor::<i64>::decode_lenient(Some("%%%")).is_none());
    /// assert!(Cursor::<i64>::decode_lenient(None).is_none());
    /// ```
    pub fn decode_lenient(token: Option<&str>) -> Option<Self> {
        token.and_then(|value| Self::decode(value).ok())
    }
}

/// Side of the cursor a page is read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Rows strictly older than the cursor.
    #[default]
    Before,
    /// Rows strictly newer than the cursor.
    After,
}

impl Direction {
    /// Stable lowercase label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a direction label is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown pagination direction: {value}")]
pub struct DirectionParseError {
    /// The rejected input.
    pub value: String,
}

impl FromStr for Direction {
    type Err = DirectionParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "before" => Ok(Self::Before),
            "after" => Ok(Self::After),
            _ => Err(DirectionParseError {
                value: value.to_owned(),
            }),
        }
    }
}
