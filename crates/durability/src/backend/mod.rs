//! Storage backends for restore
//!
//! The object-graph builder reads a call through [`GraphSource`], which
//! hides whether the call lives in many hashes and lists or in a single
//! JSON document.

pub mod blob;
pub mod multikey;

pub use blob::BlobDocument;
pub use multikey::MultiKeySource;

use crate::record::HashRecord;
use relaystate_store::Result;

/// Read access to one persisted call.
///
/// # Missing records
///
/// A missing hash is `Ok(None)`, distinct from a present but empty hash.
/// A missing list reads as empty.
pub trait GraphSource {
    /// The call's root hash.
    fn fetch_root(&mut self) -> Result<Option<HashRecord>>;

    /// Hash `<prefix>-<n>` of the call.
    fn fetch_hash(&mut self, prefix: &str, index: u32) -> Result<Option<HashRecord>>;

    /// Hashes `<prefix>-0` up to `<prefix>-<count - 1>`, in order.
    fn fetch_hashes(&mut self, prefix: &str, count: u32) -> Result<Vec<Option<HashRecord>>> {
        (0..count).map(|n| self.fetch_hash(prefix, n)).collect()
    }

    /// List `<prefix>-<n>` of the call.
    fn fetch_list(&mut self, prefix: &str, index: u32) -> Result<Vec<Vec<u8>>>;
}
