//! Hash record codec
//!
//! A [`HashRecord`] is the decoded form of one stored hash: field names
//! mapped to raw byte values. The typed accessors distinguish a field that
//! is absent ([`FieldError::NotFound`]) from one that is present but
//! malformed ([`FieldError::Parse`], [`FieldError::TooLong`]).
//!
//! Numbers are stored as decimal text. Cross-references are surrogate
//! indices; an unset reference is stored as `u32::MAX`.

use crate::error::FieldError;
use relaystate_store::Reply;
use rustc_hash::FxHashMap;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;

/// Stored value of an unset surrogate reference.
pub const NO_REF: u32 = u32::MAX;

/// Field name to raw value mapping of one stored hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashRecord {
    fields: FxHashMap<String, Vec<u8>>,
}

impl HashRecord {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode an `HGETALL` reply.
    pub fn from_pairs(pairs: Vec<(String, Vec<u8>)>) -> Self {
        HashRecord {
            fields: pairs.into_iter().collect(),
        }
    }

    /// Decode an `HGETALL` reply, failing on a malformed shape.
    pub fn from_reply(reply: Reply) -> relaystate_store::Result<Self> {
        Ok(Self::from_pairs(reply.into_pairs()?))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether `field` is present.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    // ------------------------------------------------------------------
    // Write side
    // ------------------------------------------------------------------

    /// Set `field` to raw bytes.
    pub fn put_bytes(&mut self, field: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Set `field` to the decimal or textual form of `value`.
    pub fn put(&mut self, field: impl Into<String>, value: impl Display) {
        self.put_bytes(field, value.to_string().into_bytes());
    }

    /// Set `field` to `0` or `1`.
    pub fn put_bool(&mut self, field: impl Into<String>, value: bool) {
        self.put(field, u8::from(value));
    }

    /// Set `field` to a surrogate reference, `NO_REF` when unset.
    pub fn put_ref(&mut self, field: impl Into<String>, value: Option<u32>) {
        self.put(field, value.unwrap_or(NO_REF));
    }

    /// Fields sorted by name, for deterministic command construction.
    pub fn sorted_fields(&self) -> Vec<(String, Vec<u8>)> {
        let mut out: Vec<_> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Iterate over all fields, unordered.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    // ------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------

    /// Raw bytes of `field`.
    pub fn get_bytes(&self, field: &str) -> Result<&[u8], FieldError> {
        self.fields
            .get(field)
            .map(Vec::as_slice)
            .ok_or_else(|| FieldError::NotFound(field.to_string()))
    }

    /// `field` as UTF-8 text.
    pub fn get_str(&self, field: &str) -> Result<&str, FieldError> {
        let raw = self.get_bytes(field)?;
        std::str::from_utf8(raw).map_err(|_| parse_error(field, raw))
    }

    /// `field` parsed with `FromStr`.
    pub fn get_parsed<T: FromStr>(&self, field: &str) -> Result<T, FieldError> {
        let text = self.get_str(field)?;
        text.trim()
            .parse()
            .map_err(|_| parse_error(field, text.as_bytes()))
    }

    /// `field` as a signed integer.
    pub fn get_int(&self, field: &str) -> Result<i64, FieldError> {
        self.get_parsed(field)
    }

    /// `field` as an unsigned 32-bit integer.
    pub fn get_unsigned(&self, field: &str) -> Result<u32, FieldError> {
        self.get_parsed(field)
    }

    /// `field` as a 64-bit counter.
    pub fn get_u64(&self, field: &str) -> Result<u64, FieldError> {
        self.get_parsed(field)
    }

    /// `field` as a unix time in seconds.
    pub fn get_time(&self, field: &str) -> Result<i64, FieldError> {
        self.get_int(field)
    }

    /// `field` as a boolean stored as an integer.
    pub fn get_bool(&self, field: &str) -> Result<bool, FieldError> {
        Ok(self.get_int(field)? != 0)
    }

    /// `field` as a socket address.
    pub fn get_endpoint(&self, field: &str) -> Result<SocketAddr, FieldError> {
        self.get_parsed(field)
    }

    /// `field` copied into a fixed buffer, zero padded.
    ///
    /// Fails with [`FieldError::TooLong`] if the stored value does not fit.
    pub fn get_buf<const N: usize>(&self, field: &str) -> Result<[u8; N], FieldError> {
        let raw = self.get_bytes(field)?;
        if raw.len() > N {
            return Err(FieldError::TooLong {
                field: field.to_string(),
                len: raw.len(),
                max: N,
            });
        }
        let mut buf = [0u8; N];
        buf[..raw.len()].copy_from_slice(raw);
        Ok(buf)
    }

    /// `field` as a surrogate reference; `None` when stored as unset.
    ///
    /// Accepts both `NO_REF` and `-1` as the unset marker.
    pub fn get_ref(&self, field: &str) -> Result<Option<u32>, FieldError> {
        let value = self.get_int(field)?;
        if value == -1 || value == i64::from(NO_REF) {
            return Ok(None);
        }
        u32::try_from(value)
            .map(Some)
            .map_err(|_| parse_error(field, value.to_string().as_bytes()))
    }
}

fn parse_error(field: &str, raw: &[u8]) -> FieldError {
    FieldError::Parse {
        field: field.to_string(),
        value: String::from_utf8_lossy(raw).into_owned(),
    }
}

/// Parse one list element as a surrogate index.
pub fn parse_index(raw: &[u8]) -> Option<u32> {
    std::str::from_utf8(raw).ok()?.trim().parse().ok()
}

/// One negotiated payload type as stored in a `payload_types` list:
/// `type/encoding/clock/params`.
///
/// The encoding and clock rate may not contain `/`; params may.
pub fn format_payload_token(pt: u32, encoding: &str, clock: u32, params: &str) -> String {
    format!("{}/{}/{}/{}", pt, encoding, clock, params)
}

/// Split a `payload_types` token into its parts.
pub fn parse_payload_token(token: &str) -> Option<(u32, &str, u32, &str)> {
    let mut parts = token.splitn(4, '/');
    let pt = parts.next()?.parse().ok()?;
    let encoding = parts.next()?;
    let clock = parts.next()?.parse().ok()?;
    let params = parts.next()?;
    Some((pt, encoding, clock, params))
}

/// Marker opening a local-interface group in a `map_sfds` list.
pub fn format_local_marker(uid: u32) -> String {
    format!("loc-{}", uid)
}

/// Parse a `loc-<uid>` marker.
pub fn parse_local_marker(token: &[u8]) -> Option<u32> {
    let text = std::str::from_utf8(token).ok()?;
    text.strip_prefix("loc-")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(fields: &[(&str, &str)]) -> HashRecord {
        HashRecord::from_pairs(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect(),
        )
    }

    #[test]
    fn test_not_found_vs_parse_error() {
        let r = record(&[("localport", "abc")]);
        assert!(matches!(r.get_unsigned("missing"), Err(FieldError::NotFound(_))));
        assert!(matches!(r.get_unsigned("localport"), Err(FieldError::Parse { .. })));
    }

    #[test]
    fn test_numeric_accessors() {
        let r = record(&[("a", "-5"), ("b", "42"), ("c", "18446744073709551615"), ("d", "0")]);
        assert_eq!(r.get_int("a").unwrap(), -5);
        assert_eq!(r.get_unsigned("b").unwrap(), 42);
        assert_eq!(r.get_u64("c").unwrap(), u64::MAX);
        assert!(!r.get_bool("d").unwrap());
        assert!(r.get_unsigned("a").is_err());
    }

    #[test]
    fn test_buffer_capacity() {
        let mut r = HashRecord::new();
        r.put_bytes("k", vec![1u8, 2, 3]);
        let buf: [u8; 4] = r.get_buf("k").unwrap();
        assert_eq!(buf, [1, 2, 3, 0]);
        assert!(matches!(
            r.get_buf::<2>("k"),
            Err(FieldError::TooLong { len: 3, max: 2, .. })
        ));
    }

    #[test]
    fn test_refs() {
        let mut r = HashRecord::new();
        r.put_ref("unset", None);
        r.put_ref("set", Some(3));
        r.put("legacy", -1);
        assert_eq!(r.get_ref("unset").unwrap(), None);
        assert_eq!(r.get_ref("set").unwrap(), Some(3));
        assert_eq!(r.get_ref("legacy").unwrap(), None);
    }

    #[test]
    fn test_endpoint() {
        let r = record(&[("endpoint", "[2001:db8::1]:5004"), ("bad", "nope")]);
        assert_eq!(r.get_endpoint("endpoint").unwrap().port(), 5004);
        assert!(r.get_endpoint("bad").is_err());
    }

    #[test]
    fn test_sorted_fields() {
        let r = record(&[("b", "2"), ("a", "1")]);
        let names: Vec<_> = r.sorted_fields().into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_payload_token_keeps_slashes_in_params() {
        assert_eq!(
            parse_payload_token("96/opus/48000/2/extra"),
            Some((96, "opus", 48000, "2/extra"))
        );
        assert_eq!(parse_payload_token("0/PCMU/8000/"), Some((0, "PCMU", 8000, "")));
        assert_eq!(parse_payload_token("0/PCMU/8000"), None);
        assert_eq!(parse_payload_token("x/PCMU/8000/"), None);
    }

    #[test]
    fn test_local_marker() {
        assert_eq!(parse_local_marker(b"loc-3"), Some(3));
        assert_eq!(parse_local_marker(b"3"), None);
        assert_eq!(parse_local_marker(format_local_marker(7).as_bytes()), Some(7));
    }

    proptest! {
        #[test]
        fn prop_payload_token_parses_back(
            pt in 0u32..128,
            encoding in "[A-Za-z0-9-]{1,12}",
            clock in 0u32..200_000,
            params in "[ -~]{0,20}",
        ) {
            let token = format_payload_token(pt, &encoding, clock, &params);
            prop_assert_eq!(
                parse_payload_token(&token),
                Some((pt, encoding.as_str(), clock, params.as_str()))
            );
        }

        #[test]
        fn prop_index_never_panics(raw in proptest::collection::vec(any::<u8>(), 0..12)) {
            let _ = parse_index(&raw);
            let _ = parse_local_marker(&raw);
        }
    }
}
