//! Cursor-based pagination tokens.
//!
//! We use cursor-based pagination as opposed to offset-based pagination.
//! A cursor carries the feature id to start the page at plus a checksum of
//! the filter query parameters, so a cursor issued under one set of filters
//! can't be replayed under another.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use tracing::info;

const SEPARATOR: u8 = b'|';

/// Next and previous cursor for a page of features.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cursors {
    pub prev: EncodedCursor,
    pub next: EncodedCursor,

    pub has_prev: bool,
    pub has_next: bool,
}

impl Cursors {
    /// Create Cursors based on the prev/next feature ids from the datasource
    /// and the provided filters (captured in a hash).
    pub fn new(fid: PrevNextFid, filters_checksum: &[u8]) -> Self {
        Self {
            prev: encode_cursor(fid.prev, filters_checksum),
            next: encode_cursor(fid.next, filters_checksum),

            has_prev: fid.prev > 0,
            has_next: fid.next > 0,
        }
    }
}

/// A scrambled string representation of the fields in [`DecodedCursor`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedCursor(pub String);

impl EncodedCursor {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Turn the encoded cursor into a [`DecodedCursor`] and verify that the
    /// checksum of the filter query parameters hasn't changed.
    ///
    /// Decoding never fails the request: anything that doesn't parse falls
    /// back to the first page.
    pub fn decode(&self, filters_checksum: &[u8]) -> DecodedCursor {
        if self.0.is_empty() {
            return DecodedCursor::first_page(filters_checksum);
        }

        let decoded = match URL_SAFE.decode(&self.0) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            _ => {
                info!("decoding cursor value '{}' failed, defaulting to first page", self.0);
                return DecodedCursor::first_page(filters_checksum);
            }
        };

        let Some(sep) = decoded.iter().position(|b| *b == SEPARATOR) else {
            info!("cursor '{}' lacks separator, defaulting to first page", self.0);
            return DecodedCursor::first_page(filters_checksum);
        };
        let (fid_bytes, rest) = decoded.split_at(sep);
        let checksum = &rest[1..];

        // feature fid, big-endian with leading zeros stripped
        let Some(fid) = fid_from_be_bytes(fid_bytes) else {
            info!("cursor '{}' doesn't contain a numeric value, defaulting to first page", self.0);
            return DecodedCursor::first_page(filters_checksum);
        };

        // checksum
        if !checksum.is_empty() && checksum != filters_checksum {
            info!("filters in query params have changed during pagination, resetting to first page");
            return DecodedCursor::first_page(filters_checksum);
        }

        DecodedCursor {
            fid,
            filters_checksum: filters_checksum.to_vec(),
        }
    }
}

impl From<&str> for EncodedCursor {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The cursor values after decoding an [`EncodedCursor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCursor {
    pub fid: i64,
    pub filters_checksum: Vec<u8>,
}

impl DecodedCursor {
    pub fn first_page(filters_checksum: &[u8]) -> Self {
        Self {
            fid: 0,
            filters_checksum: filters_checksum.to_vec(),
        }
    }
}

/// Previous and next feature id (fid) to encode in a cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrevNextFid {
    pub prev: i64,
    pub next: i64,
}

fn encode_cursor(fid: i64, filters_checksum: &[u8]) -> EncodedCursor {
    // format of the cursor: <fid><separator><checksum>
    let mut cursor = fid_to_be_bytes(fid);
    cursor.push(SEPARATOR);
    cursor.extend_from_slice(filters_checksum);

    EncodedCursor(URL_SAFE.encode(cursor))
}

/// Minimal big-endian encoding: leading zero bytes stripped, zero is empty.
fn fid_to_be_bytes(fid: i64) -> Vec<u8> {
    let bytes = fid.max(0).to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

fn fid_from_be_bytes(bytes: &[u8]) -> Option<i64> {
    if bytes.len() > 8 {
        return None;
    }
    let mut value: u64 = 0;
    for b in bytes {
        value = (value << 8) | u64::from(*b);
    }
    // corruption can only yield a value outside the fid domain, clamp it
    Some(i64::try_from(value).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECKSUM: &[u8] = &[0xDE, 0xAD, 0xBE, 0xEF];

    #[test]
    fn test_roundtrip() {
        for fid in [0, 1, 7, 255, 256, 123_456_789, i64::MAX] {
            let encoded = encode_cursor(fid, CHECKSUM);
            let decoded = encoded.decode(CHECKSUM);
            assert_eq!(decoded.fid, fid);
            assert_eq!(decoded.filters_checksum, CHECKSUM);
        }
    }

    #[test]
    fn test_empty_cursor_is_first_page() {
        let decoded = EncodedCursor::default().decode(CHECKSUM);
        assert_eq!(decoded, DecodedCursor::first_page(CHECKSUM));
    }

    #[test]
    fn test_garbage_is_first_page() {
        let decoded = EncodedCursor::from("not/base64!!").decode(CHECKSUM);
        assert_eq!(decoded.fid, 0);
        assert_eq!(decoded.filters_checksum, CHECKSUM);
    }

    #[test]
    fn test_checksum_mismatch_resets_to_first_page() {
        let other: &[u8] = &[1, 2, 3, 4];
        let encoded = encode_cursor(42, other);
        let decoded = encoded.decode(CHECKSUM);
        assert_eq!(decoded.fid, 0);
        assert_eq!(decoded.filters_checksum, CHECKSUM);
    }

    #[test]
    fn test_missing_separator_is_first_page() {
        let encoded = EncodedCursor(URL_SAFE.encode([0x01, 0x02]));
        let decoded = encoded.decode(CHECKSUM);
        assert_eq!(decoded.fid, 0);
    }

    #[test]
    fn test_oversized_fid_is_first_page() {
        let mut bytes = vec![0xFF; 9];
        bytes.push(SEPARATOR);
        bytes.extend_from_slice(CHECKSUM);
        let encoded = EncodedCursor(URL_SAFE.encode(bytes));
        assert_eq!(encoded.decode(CHECKSUM).fid, 0);
    }

    #[test]
    fn test_cursors_has_prev_next() {
        let cursors = Cursors::new(PrevNextFid { prev: 0, next: 3 }, CHECKSUM);
        assert!(!cursors.has_prev);
        assert!(cursors.has_next);
        assert_eq!(cursors.next.decode(CHECKSUM).fid, 3);
        assert_eq!(cursors.prev.decode(CHECKSUM).fid, 0);
    }

    #[test]
    fn test_zero_fid_encodes_to_empty_prefix() {
        let encoded = encode_cursor(0, CHECKSUM);
        let raw = URL_SAFE.decode(encoded.as_str()).unwrap();
        assert_eq!(raw[0], SEPARATOR);
    }
}
