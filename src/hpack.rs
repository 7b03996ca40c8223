//! HPACK: Header Compression for HTTP/2 (RFC 7541)
//!
//! Thin wrapper around `fluke-hpack`. The decoder is owned by the read side
//! of a connection and the encoder by its write loop, so each dynamic table
//! sees header blocks in exactly the order they cross the wire.

use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{Error, Result};

/// One header field, pseudo or regular, as it appears in a header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2Header {
    pub name: String,
    pub value: String,
}

impl H2Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Pseudo-header fields (`:method`, `:status`, ...) start with a colon.
    pub fn is_pseudo(&self) -> bool {
        self.name.starts_with(':')
    }
}

/// Look up the first header named `name`.
pub fn find<'a>(headers: &'a [H2Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name == name)
        .map(|h| h.value.as_str())
}

/// Append the regular (non-pseudo) fields of `headers` to `map`.
pub fn extend_header_map(map: &mut HeaderMap, headers: &[H2Header]) -> Result<()> {
    for header in headers.iter().filter(|h| !h.is_pseudo()) {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| Error::Message(format!("invalid header name {:?}: {}", header.name, e)))?;
        let value = HeaderValue::from_str(&header.value)
            .map_err(|e| Error::Message(format!("invalid value for {:?}: {}", header.name, e)))?;
        map.append(name, value);
    }
    Ok(())
}

/// Flatten a header map into HPACK fields. Values that are not visible
/// ASCII are carried lossily.
pub fn from_header_map(map: &HeaderMap) -> Vec<H2Header> {
    map.iter()
        .map(|(name, value)| {
            H2Header::new(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Receive-side HPACK context. One per connection, owned by the frame
/// reader.
pub struct HpackDecoder {
    inner: fluke_hpack::Decoder<'static>,
}

impl std::fmt::Debug for HpackDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackDecoder").finish()
    }
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Decoder::new(),
        }
    }

    /// Decode one complete header block.
    ///
    /// A failure leaves the dynamic table in an unknown state, so callers
    /// treat it as a connection error.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<H2Header>> {
        let pairs = self
            .inner
            .decode(data)
            .map_err(|e| Error::Compression(format!("HPACK decode error: {:?}", e)))?;
        Ok(pairs
            .into_iter()
            .map(|(name, value)| {
                H2Header::new(
                    String::from_utf8_lossy(&name).into_owned(),
                    String::from_utf8_lossy(&value).into_owned(),
                )
            })
            .collect())
    }
}

/// Send-side HPACK context, owned by the write loop.
pub struct HpackEncoder {
    inner: fluke_hpack::Encoder<'static>,
}

impl std::fmt::Debug for HpackEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackEncoder").finish()
    }
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Encoder::new(),
        }
    }

    /// Compress `headers` into a single header block fragment.
    pub fn encode(&mut self, headers: &[H2Header]) -> Vec<u8> {
        let pairs: Vec<(&[u8], &[u8])> = headers
            .iter()
            .map(|h| (h.name.as_bytes(), h.value.as_bytes()))
            .collect();
        self.inner.encode(pairs)
    }
}
