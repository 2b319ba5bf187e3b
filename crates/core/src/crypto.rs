//! SRTP crypto material and DTLS fingerprints
//!
//! Crypto parameters are embedded value types: they have no identity of their
//! own and are present or absent as a whole. Suites and fingerprint hash
//! functions are resolved by name through static registries.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Capacity of the master key buffer.
pub const MAX_MASTER_KEY_LEN: usize = 32;
/// Capacity of the master salt buffer.
pub const MAX_MASTER_SALT_LEN: usize = 14;
/// Longest MKI accepted.
pub const MAX_MKI_LEN: usize = 255;

/// An SRTP crypto suite.
#[derive(Debug, PartialEq, Eq)]
pub struct CryptoSuite {
    /// SDES name, e.g. `AES_CM_128_HMAC_SHA1_80`
    pub name: &'static str,
    /// Master key length in bytes
    pub master_key_len: usize,
    /// Master salt length in bytes
    pub master_salt_len: usize,
}

static SUITES: [CryptoSuite; 10] = [
    CryptoSuite { name: "AES_CM_128_HMAC_SHA1_80", master_key_len: 16, master_salt_len: 14 },
    CryptoSuite { name: "AES_CM_128_HMAC_SHA1_32", master_key_len: 16, master_salt_len: 14 },
    CryptoSuite { name: "AES_192_CM_HMAC_SHA1_80", master_key_len: 24, master_salt_len: 14 },
    CryptoSuite { name: "AES_192_CM_HMAC_SHA1_32", master_key_len: 24, master_salt_len: 14 },
    CryptoSuite { name: "AES_256_CM_HMAC_SHA1_80", master_key_len: 32, master_salt_len: 14 },
    CryptoSuite { name: "AES_256_CM_HMAC_SHA1_32", master_key_len: 32, master_salt_len: 14 },
    CryptoSuite { name: "F8_128_HMAC_SHA1_80", master_key_len: 16, master_salt_len: 14 },
    CryptoSuite { name: "F8_128_HMAC_SHA1_32", master_key_len: 16, master_salt_len: 14 },
    CryptoSuite { name: "NULL_HMAC_SHA1_80", master_key_len: 16, master_salt_len: 14 },
    CryptoSuite { name: "NULL_HMAC_SHA1_32", master_key_len: 16, master_salt_len: 14 },
];

static SUITE_INDEX: Lazy<HashMap<&'static str, &'static CryptoSuite>> =
    Lazy::new(|| SUITES.iter().map(|s| (s.name, s)).collect());

impl CryptoSuite {
    /// Get a suite by its SDES name.
    ///
    /// Returns `None` for names this build does not know.
    pub fn find(name: &str) -> Option<&'static CryptoSuite> {
        SUITE_INDEX.get(name).copied()
    }

    /// All known suites, in preference order.
    pub fn all() -> &'static [CryptoSuite] {
        &SUITES
    }
}

/// SRTP session parameters (RFC 4568 §6.3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionParams {
    /// `UNENCRYPTED_SRTP`
    pub unencrypted_srtp: bool,
    /// `UNENCRYPTED_SRTCP`
    pub unencrypted_srtcp: bool,
    /// `UNAUTHENTICATED_SRTP`
    pub unauthenticated_srtp: bool,
}

/// Negotiated SDES crypto parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoParams {
    /// Negotiated suite
    pub suite: &'static CryptoSuite,
    /// Master key, zero padded past the suite's key length
    pub master_key: [u8; MAX_MASTER_KEY_LEN],
    /// Master salt
    pub master_salt: [u8; MAX_MASTER_SALT_LEN],
    /// Master key identifier
    pub mki: Option<Vec<u8>>,
    /// Session parameters
    pub session: SessionParams,
}

impl CryptoParams {
    /// Parameters for `suite` with zeroed key material.
    pub fn new(suite: &'static CryptoSuite) -> Self {
        CryptoParams {
            suite,
            master_key: [0; MAX_MASTER_KEY_LEN],
            master_salt: [0; MAX_MASTER_SALT_LEN],
            mki: None,
            session: SessionParams::default(),
        }
    }
}

/// Crypto state of one direction of a packet flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoContext {
    /// Negotiated parameters
    pub params: CryptoParams,
    /// Highest SRTP packet index seen
    pub last_index: u64,
    /// SSRC the context is bound to
    pub ssrc: u32,
}

/// An SDES crypto slot on a media section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdesSlot {
    /// SDES `a=crypto` tag
    pub tag: u32,
    /// Parameters, when a crypto line was negotiated
    pub params: Option<CryptoParams>,
}

/// Hash function of a DTLS certificate fingerprint.
#[derive(Debug, PartialEq, Eq)]
pub struct HashFunc {
    /// SDP name, e.g. `sha-256`
    pub name: &'static str,
    /// Digest length in bytes
    pub digest_len: usize,
}

static HASH_FUNCS: [HashFunc; 5] = [
    HashFunc { name: "sha-1", digest_len: 20 },
    HashFunc { name: "sha-224", digest_len: 28 },
    HashFunc { name: "sha-256", digest_len: 32 },
    HashFunc { name: "sha-384", digest_len: 48 },
    HashFunc { name: "sha-512", digest_len: 64 },
];

impl HashFunc {
    /// Get a hash function by its SDP name (case-insensitive).
    pub fn find(name: &str) -> Option<&'static HashFunc> {
        HASH_FUNCS.iter().find(|h| h.name.eq_ignore_ascii_case(name))
    }
}

/// A DTLS certificate fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtlsFingerprint {
    /// Hash function
    pub hash_func: &'static HashFunc,
    /// Digest, `hash_func.digest_len` bytes
    pub digest: Vec<u8>,
}
