use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// A single broker header. Order and duplicates are preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: Bytes,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Header {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Ordered header list as carried on the wire.
pub type Headers = Vec<Header>;

/// Convert a stored header mapping into broker headers.
pub fn headers_from_map(map: &BTreeMap<String, String>) -> Headers {
    map.iter()
        .map(|(k, v)| Header::new(k.clone(), Bytes::copy_from_slice(v.as_bytes())))
        .collect()
}

/// A fetched broker message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub offset: u64,
    pub key: Bytes,
    pub payload: Bytes,
    pub headers: Headers,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Message key as text, lossy for non-UTF-8 keys.
    pub fn key_str(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }

    /// First header with this key, as text.
    pub fn header_str(&self, key: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|h| h.key == key)
            .map(|h| String::from_utf8_lossy(&h.value).into_owned())
    }
}
