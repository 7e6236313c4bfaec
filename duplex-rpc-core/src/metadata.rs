//! Header and trailer metadata.
//!
//! [`Metadata`] wraps an [`http::HeaderMap`]: keys are lower-case ASCII, each
//! key maps to one or more values, and entries keep their insertion order.
//! Binary values live under keys ending in [`BINARY_SUFFIX`] and are stored
//! base64-encoded, the way they travel in HTTP/2 header blocks.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};

/// Suffix marking a metadata key whose values are binary.
pub const BINARY_SUFFIX: &str = "-bin";

/// Errors raised when building metadata.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    #[error("invalid metadata key: {0:?}")]
    InvalidKey(String),

    #[error("invalid value for metadata key {0:?}")]
    InvalidValue(String),

    #[error("metadata key {0:?} ends in -bin but was given a text value")]
    TextForBinaryKey(String),

    #[error("metadata key {0:?} must end in -bin to carry a binary value")]
    BinaryForTextKey(String),
}

/// Metadata exchanged alongside a call.
///
/// Used both for the request metadata a caller attaches and for the header and
/// trailer metadata the peer returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    headers: HeaderMap,
}

impl Metadata {
    /// Create new metadata from HTTP headers.
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }

    /// Create empty metadata.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Replace all values for `key` with a single text value.
    pub fn insert(&mut self, key: &str, value: &str) -> Result<(), MetadataError> {
        let (name, value) = text_entry(key, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Add a text value for `key`, keeping existing ones.
    pub fn append(&mut self, key: &str, value: &str) -> Result<(), MetadataError> {
        let (name, value) = text_entry(key, value)?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Replace all values for the binary key `key`.
    pub fn insert_bin(&mut self, key: &str, value: &[u8]) -> Result<(), MetadataError> {
        let (name, value) = binary_entry(key, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Add a binary value for `key`, keeping existing ones.
    pub fn append_bin(&mut self, key: &str, value: &[u8]) -> Result<(), MetadataError> {
        let (name, value) = binary_entry(key, value)?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Get the first text value for `key`.
    ///
    /// Returns `None` if the key is absent or the value is not visible ASCII.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    /// Get all text values for `key`, in insertion order.
    pub fn get_all(&self, key: &str) -> impl Iterator<Item = &str> {
        self.headers
            .get_all(key)
            .iter()
            .filter_map(|v| v.to_str().ok())
    }

    /// Get the first binary value for `key`, decoded.
    pub fn get_bin(&self, key: &str) -> Option<Bytes> {
        self.get_all_bin(key).next()
    }

    /// Get all binary values for `key`, decoded. Undecodable values are skipped.
    pub fn get_all_bin(&self, key: &str) -> impl Iterator<Item = Bytes> {
        self.headers
            .get_all(key)
            .iter()
            .filter_map(|v| decode_binary(v.as_bytes()))
    }

    /// Check if a key exists.
    pub fn contains(&self, key: &str) -> bool {
        self.headers.contains_key(key)
    }

    /// Remove every value for `key`.
    pub fn remove(&mut self, key: &str) {
        self.headers.remove(key);
    }

    /// Get the underlying HeaderMap.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Consume self and return the underlying HeaderMap.
    pub fn into_headers(self) -> HeaderMap {
        self.headers
    }

    /// Iterate over all entries. A key with several values appears once per value.
    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.headers.iter()
    }

    /// Iterate over the distinct keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.headers.keys().map(|k| k.as_str())
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Returns the number of values across all keys.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Add every entry of `other` to `self`.
    pub fn extend(&mut self, other: Metadata) {
        let mut last = None;
        for (name, value) in other.headers {
            // `HeaderMap::into_iter` yields the name only for the first value of a key.
            if let Some(name) = name {
                last = Some(name);
            }
            if let Some(name) = &last {
                self.headers.append(name.clone(), value);
            }
        }
    }
}

impl From<HeaderMap> for Metadata {
    fn from(headers: HeaderMap) -> Self {
        Self::new(headers)
    }
}

impl From<Metadata> for HeaderMap {
    fn from(metadata: Metadata) -> Self {
        metadata.headers
    }
}

/// Returns `true` if `key` names a binary metadata entry.
pub fn is_binary_key(key: &str) -> bool {
    key.ends_with(BINARY_SUFFIX)
}

fn parse_name(key: &str) -> Result<HeaderName, MetadataError> {
    HeaderName::from_bytes(key.as_bytes()).map_err(|_| MetadataError::InvalidKey(key.to_string()))
}

fn text_entry(key: &str, value: &str) -> Result<(HeaderName, HeaderValue), MetadataError> {
    if is_binary_key(key) {
        return Err(MetadataError::TextForBinaryKey(key.to_string()));
    }
    let name = parse_name(key)?;
    let value =
        HeaderValue::from_str(value).map_err(|_| MetadataError::InvalidValue(key.to_string()))?;
    Ok((name, value))
}

fn binary_entry(key: &str, value: &[u8]) -> Result<(HeaderName, HeaderValue), MetadataError> {
    if !is_binary_key(key) {
        return Err(MetadataError::BinaryForTextKey(key.to_string()));
    }
    let name = parse_name(key)?;
    let encoded = STANDARD_NO_PAD.encode(value);
    let value = HeaderValue::from_str(&encoded)
        .map_err(|_| MetadataError::InvalidValue(key.to_string()))?;
    Ok((name, value))
}

/// Peers may or may not pad binary values.
fn decode_binary(raw: &[u8]) -> Option<Bytes> {
    if raw.ends_with(b"=") {
        STANDARD.decode(raw).ok().map(Bytes::from)
    } else {
        STANDARD_NO_PAD.decode(raw).ok().map(Bytes::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_text_values() {
        let mut md = Metadata::empty();
        md.insert("x-custom", "value").unwrap();
        md.append("x-multi", "a").unwrap();
        md.append("x-multi", "b").unwrap();

        assert_eq!(md.get("x-custom"), Some("value"));
        assert_eq!(md.get("missing"), None);
        assert_eq!(md.get_all("x-multi").collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(md.len(), 3);
        assert!(md.contains("x-multi"));
    }

    #[test]
    fn test_metadata_insert_replaces() {
        let mut md = Metadata::empty();
        md.append("x-key", "one").unwrap();
        md.append("x-key", "two").unwrap();
        md.insert("x-key", "three").unwrap();
        assert_eq!(md.get_all("x-key").collect::<Vec<_>>(), vec!["three"]);
    }

    #[test]
    fn test_metadata_binary_values() {
        let mut md = Metadata::empty();
        md.append_bin("trace-bin", &[0, 1, 2, 255]).unwrap();
        md.append_bin("trace-bin", b"\n\r").unwrap();

        assert_eq!(md.get("trace-bin"), Some("AAEC/w"));
        assert_eq!(md.get_bin("trace-bin").unwrap().as_ref(), &[0, 1, 2, 255]);
        assert_eq!(md.get_all_bin("trace-bin").count(), 2);
    }

    #[test]
    fn test_metadata_binary_accepts_padding() {
        let mut headers = HeaderMap::new();
        headers.insert("x-bin", HeaderValue::from_static("AAEC/w=="));
        let md = Metadata::new(headers);
        assert_eq!(md.get_bin("x-bin").unwrap().as_ref(), &[0, 1, 2, 255]);
    }

    #[test]
    fn test_metadata_key_kind_checked() {
        let mut md = Metadata::empty();
        assert_eq!(
            md.insert("x-bin", "text"),
            Err(MetadataError::TextForBinaryKey("x-bin".into()))
        );
        assert_eq!(
            md.insert_bin("x-text", b"raw"),
            Err(MetadataError::BinaryForTextKey("x-text".into()))
        );
        assert!(matches!(
            md.insert("bad key", "v"),
            Err(MetadataError::InvalidKey(_))
        ));
        assert!(matches!(
            md.insert("x-ok", "line\nbreak"),
            Err(MetadataError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_metadata_extend_keeps_all_values() {
        let mut a = Metadata::empty();
        a.insert("x-a", "1").unwrap();
        let mut b = Metadata::empty();
        b.append("x-b", "2").unwrap();
        b.append("x-b", "3").unwrap();

        a.extend(b);
        assert_eq!(a.get("x-a"), Some("1"));
        assert_eq!(a.get_all("x-b").collect::<Vec<_>>(), vec!["2", "3"]);
    }
}
