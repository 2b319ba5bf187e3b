//! Call persistence for relaystate
//!
//! This crate maps the in-memory call graph onto the key-value store and
//! back:
//!
//! - keys: key naming and storage modes (multi-key, single JSON blob)
//! - record: hash records with typed field access
//! - snapshot: capture of a live call into records
//! - writer: persist, delete and purge pipelines
//! - backend: read access to a stored call in either mode
//! - builder: two-phase reconstruction of a call from stored records
//!
//! ## Snapshot layout (multi-key mode)
//!
//! ```text
//! calls                  set of persisted call ids
//! notifier-<id>          set {<id>}, change-notification trigger
//! call-<id>              root hash
//! sfd-<id>-<n>           socket hash
//! stream-<id>-<n>        stream hash   + stream_sfds-<id>-<n>
//! tag-<id>-<n>           tag hash      + other_tags-<id>-<n>, medias-<id>-<n>
//! media-<id>-<n>         media hash    + streams-, maps-, payload_types-<id>-<n>
//! map-<id>-<n>           map hash      + map_sfds-<id>-<n>
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod builder;
pub mod error;
pub mod keys;
pub mod record;
pub mod snapshot;
pub mod writer;

pub use backend::{BlobDocument, GraphSource, MultiKeySource};
pub use builder::CallBuilder;
pub use error::{FieldError, OptionalField, PersistError, PersistResult, RestoreError, RestoreResult};
pub use keys::{EntityKind, StorageMode};
pub use record::HashRecord;
pub use snapshot::CallSnapshot;
pub use writer::{KindCounts, Writer};
