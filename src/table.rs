//! Contract for the table cache collaborator.
//!
//! This crate plans which SSTable files exist and which get compacted;
//! it never parses table contents itself. The host supplies a
//! [`TableCache`] that, given a file number and size, can answer point
//! lookups and hand out iterators over a table's entries.

use bytes::Bytes;

use crate::Result;

/// A cursor over sorted `(encoded internal key, value)` entries.
///
/// Implemented by the table cache's per-file iterators and by the
/// composition iterators this crate builds on top of them.
pub trait KvIterator {
    /// Whether the iterator is positioned at an entry.
    fn valid(&self) -> bool;

    /// Position at the first entry.
    fn seek_to_first(&mut self);

    /// Position at the last entry.
    fn seek_to_last(&mut self);

    /// Position at the first entry with key >= target.
    fn seek(&mut self, target: &[u8]);

    /// Advance to the next entry.
    ///
    /// Requires `valid()`.
    fn next(&mut self);

    /// Step back to the previous entry.
    ///
    /// Requires `valid()`.
    fn prev(&mut self);

    /// Current encoded internal key. Requires `valid()`.
    fn key(&self) -> &[u8];

    /// Current value. Requires `valid()`.
    fn value(&self) -> &[u8];

    /// Any error the iterator has encountered.
    fn status(&mut self) -> Result<()>;
}

/// Handle to open SSTable readers, keyed by file number and size.
pub trait TableCache: Send + Sync {
    /// Point lookup: the first entry at or after `internal_key` in the
    /// given table, or `None` if the table holds no such entry.
    ///
    /// The returned pair is `(encoded internal key, value)`; the caller
    /// decides whether the entry actually answers its query.
    fn get(
        &self,
        file_number: u64,
        file_size: u64,
        internal_key: &[u8],
    ) -> Result<Option<(Bytes, Bytes)>>;

    /// An iterator over every entry of the given table.
    fn iter(&self, file_number: u64, file_size: u64) -> Result<Box<dyn KvIterator>>;
}
