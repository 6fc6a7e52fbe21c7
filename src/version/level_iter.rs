//! Iterators over the sorted file lists of levels >= 1.
//!
//! A level's files are disjoint and ordered, so the level reads like
//! one big sorted table: an index iterator positions on a file, and a
//! data iterator (opened lazily through the table cache) walks the
//! file's entries.

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::table::{KvIterator, TableCache};
use crate::util::coding::{encode_fixed64, read_fixed64};
use crate::util::comparator::{Comparator, InternalKeyComparator};
use crate::{Error, Result};

use super::FileMetadata;

/// Encoded length of a file entry value: two fixed64 fields.
const FILE_ENTRY_LEN: usize = 16;

/// Index iterator over a level's sorted file list.
///
/// For each file the key is the file's largest internal key and the
/// value is 16 bytes: fixed64 little-endian `file_number` followed by
/// fixed64 little-endian `file_size`.
pub struct LevelFileNumIterator {
    icmp: InternalKeyComparator,
    files: Vec<Arc<FileMetadata>>,
    /// Current position; `files.len()` marks the iterator invalid.
    index: usize,
    key_buf: Bytes,
    value_buf: Bytes,
}

impl LevelFileNumIterator {
    /// Create an iterator over `files`, initially invalid.
    pub fn new(files: Vec<Arc<FileMetadata>>) -> Self {
        let index = files.len();
        Self {
            icmp: InternalKeyComparator::new(),
            files,
            index,
            key_buf: Bytes::new(),
            value_buf: Bytes::new(),
        }
    }

    fn fill_bufs(&mut self) {
        if self.index < self.files.len() {
            let file = &self.files[self.index];
            self.key_buf = file.largest().encode();

            let mut value = BytesMut::with_capacity(FILE_ENTRY_LEN);
            encode_fixed64(&mut value, file.file_number());
            encode_fixed64(&mut value, file.file_size());
            self.value_buf = value.freeze();
        }
    }
}

impl KvIterator for LevelFileNumIterator {
    fn valid(&self) -> bool {
        self.index < self.files.len()
    }

    fn seek_to_first(&mut self) {
        self.index = 0;
        self.fill_bufs();
    }

    fn seek_to_last(&mut self) {
        self.index = if self.files.is_empty() {
            0
        } else {
            self.files.len() - 1
        };
        self.fill_bufs();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index = self.files.partition_point(|f| {
            self.icmp.compare(&f.largest().encode(), target) == Ordering::Less
        });
        self.fill_bufs();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.index += 1;
        self.fill_bufs();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if self.index == 0 {
            self.index = self.files.len();
        } else {
            self.index -= 1;
            self.fill_bufs();
        }
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.key_buf
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.value_buf
    }

    fn status(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Parse a file entry value into `(file_number, file_size)`.
///
/// Values of any other length are corruption.
fn decode_file_entry(value: &[u8]) -> Result<(u64, u64)> {
    if value.len() != FILE_ENTRY_LEN {
        return Err(Error::corruption(format!(
            "file entry value has {} bytes, expected {}",
            value.len(),
            FILE_ENTRY_LEN
        )));
    }
    match (read_fixed64(&value[..8]), read_fixed64(&value[8..])) {
        (Some(number), Some(size)) => Ok((number, size)),
        _ => Err(Error::corruption("file entry value truncated")),
    }
}

/// Two-level iterator: walks an index of files and lazily opens each
/// file's entries through the table cache.
pub struct ConcatenatingIterator {
    index_iter: LevelFileNumIterator,
    table_cache: Arc<dyn TableCache>,
    data_iter: Option<Box<dyn KvIterator>>,
    status: Option<Error>,
}

impl ConcatenatingIterator {
    /// Create an iterator over the files of `index_iter`.
    pub fn new(index_iter: LevelFileNumIterator, table_cache: Arc<dyn TableCache>) -> Self {
        Self {
            index_iter,
            table_cache,
            data_iter: None,
            status: None,
        }
    }

    /// Open the data iterator for the index's current file.
    fn init_data_iter(&mut self) {
        if !self.index_iter.valid() {
            self.data_iter = None;
            return;
        }

        match decode_file_entry(self.index_iter.value())
            .and_then(|(number, size)| self.table_cache.iter(number, size))
        {
            Ok(iter) => self.data_iter = Some(iter),
            Err(e) => {
                self.status = Some(e);
                self.data_iter = None;
            }
        }
    }

    /// Advance over files until the data iterator is positioned, or the
    /// index runs out.
    fn skip_empty_data_iters_forward(&mut self) {
        while self.data_iter.as_ref().map_or(true, |d| !d.valid()) {
            if !self.index_iter.valid() || self.status.is_some() {
                self.data_iter = None;
                return;
            }
            self.index_iter.next();
            self.init_data_iter();
            if let Some(iter) = self.data_iter.as_mut() {
                iter.seek_to_first();
            }
        }
    }

    /// Mirror of the forward skip for reverse iteration.
    fn skip_empty_data_iters_backward(&mut self) {
        while self.data_iter.as_ref().map_or(true, |d| !d.valid()) {
            if !self.index_iter.valid() || self.status.is_some() {
                self.data_iter = None;
                return;
            }
            self.index_iter.prev();
            self.init_data_iter();
            if let Some(iter) = self.data_iter.as_mut() {
                iter.seek_to_last();
            }
        }
    }
}

impl KvIterator for ConcatenatingIterator {
    fn valid(&self) -> bool {
        self.data_iter.as_ref().map_or(false, |d| d.valid())
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_iter();
        if let Some(iter) = self.data_iter.as_mut() {
            iter.seek_to_first();
        }
        self.skip_empty_data_iters_forward();
    }

    fn seek_to_last(&mut self) {
        self.index_iter.seek_to_last();
        self.init_data_iter();
        if let Some(iter) = self.data_iter.as_mut() {
            iter.seek_to_last();
        }
        self.skip_empty_data_iters_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.init_data_iter();
        if let Some(iter) = self.data_iter.as_mut() {
            iter.seek(target);
        }
        self.skip_empty_data_iters_forward();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        if let Some(iter) = self.data_iter.as_mut() {
            iter.next();
        }
        self.skip_empty_data_iters_forward();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if let Some(iter) = self.data_iter.as_mut() {
            iter.prev();
        }
        self.skip_empty_data_iters_backward();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        match &self.data_iter {
            Some(iter) => iter.key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        match &self.data_iter {
            Some(iter) => iter.value(),
            None => &[],
        }
    }

    fn status(&mut self) -> Result<()> {
        if let Some(err) = self.status.take() {
            return Err(err);
        }
        if let Some(iter) = self.data_iter.as_mut() {
            iter.status()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InternalKey;
    use std::collections::HashMap;

    fn make_key(user_key: &[u8], seq: u64) -> InternalKey {
        InternalKey::for_value(Bytes::copy_from_slice(user_key), seq)
    }

    fn make_file(num: u64, size: u64, smallest: &[u8], largest: &[u8]) -> Arc<FileMetadata> {
        Arc::new(FileMetadata::new(
            num,
            size,
            make_key(smallest, 1),
            make_key(largest, 1),
        ))
    }

    #[test]
    fn test_level_file_num_iterator_positions() {
        let files = vec![
            make_file(7, 111, b"a", b"c"),
            make_file(8, 222, b"d", b"f"),
            make_file(9, 333, b"g", b"i"),
        ];
        let mut iter = LevelFileNumIterator::new(files);

        assert!(!iter.valid());

        iter.seek_to_first();
        assert!(iter.valid());
        assert_eq!(decode_file_entry(iter.value()).unwrap(), (7, 111));

        iter.next();
        assert_eq!(decode_file_entry(iter.value()).unwrap(), (8, 222));

        iter.seek_to_last();
        assert_eq!(decode_file_entry(iter.value()).unwrap(), (9, 333));

        iter.prev();
        assert_eq!(decode_file_entry(iter.value()).unwrap(), (8, 222));

        // Stepping before the first file invalidates.
        iter.seek_to_first();
        iter.prev();
        assert!(!iter.valid());
    }

    #[test]
    fn test_level_file_num_iterator_seek() {
        let files = vec![
            make_file(7, 111, b"a", b"c"),
            make_file(8, 222, b"g", b"i"),
        ];
        let mut iter = LevelFileNumIterator::new(files);

        // Inside the first file.
        iter.seek(&make_key(b"b", 1).encode());
        assert_eq!(decode_file_entry(iter.value()).unwrap(), (7, 111));

        // In the gap: lands on the following file.
        iter.seek(&make_key(b"e", 1).encode());
        assert_eq!(decode_file_entry(iter.value()).unwrap(), (8, 222));

        // Past every file.
        iter.seek(&make_key(b"z", 1).encode());
        assert!(!iter.valid());
    }

    #[test]
    fn test_level_file_num_iterator_key_is_largest() {
        let files = vec![make_file(7, 111, b"a", b"c")];
        let mut iter = LevelFileNumIterator::new(files);
        iter.seek_to_first();

        let key = InternalKey::decode(iter.key()).unwrap();
        assert_eq!(key.user_key(), b"c");
    }

    #[test]
    fn test_decode_file_entry_size() {
        assert!(decode_file_entry(&[0u8; 16]).is_ok());
        assert!(decode_file_entry(&[0u8; 15]).unwrap_err().is_corruption());
        assert!(decode_file_entry(&[0u8; 17]).unwrap_err().is_corruption());
        assert!(decode_file_entry(&[]).unwrap_err().is_corruption());
    }

    /// In-memory stand-in for the table cache.
    struct MemTableCache {
        tables: HashMap<u64, Vec<(Bytes, Bytes)>>,
    }

    struct MemTableIterator {
        entries: Vec<(Bytes, Bytes)>,
        index: usize,
    }

    impl KvIterator for MemTableIterator {
        fn valid(&self) -> bool {
            self.index < self.entries.len()
        }
        fn seek_to_first(&mut self) {
            self.index = 0;
        }
        fn seek_to_last(&mut self) {
            self.index = self.entries.len().saturating_sub(1);
            if self.entries.is_empty() {
                self.index = 0;
            }
        }
        fn seek(&mut self, target: &[u8]) {
            let icmp = InternalKeyComparator::new();
            self.index = self
                .entries
                .partition_point(|(k, _)| icmp.compare(k, target) == Ordering::Less);
        }
        fn next(&mut self) {
            self.index += 1;
        }
        fn prev(&mut self) {
            if self.index == 0 {
                self.index = self.entries.len();
            } else {
                self.index -= 1;
            }
        }
        fn key(&self) -> &[u8] {
            &self.entries[self.index].0
        }
        fn value(&self) -> &[u8] {
            &self.entries[self.index].1
        }
        fn status(&mut self) -> Result<()> {
            Ok(())
        }
    }

    impl TableCache for MemTableCache {
        fn get(
            &self,
            _file_number: u64,
            _file_size: u64,
            _internal_key: &[u8],
        ) -> Result<Option<(Bytes, Bytes)>> {
            Err(Error::internal("unused"))
        }

        fn iter(&self, file_number: u64, _file_size: u64) -> Result<Box<dyn KvIterator>> {
            let entries = self
                .tables
                .get(&file_number)
                .cloned()
                .ok_or_else(|| Error::internal(format!("no table {}", file_number)))?;
            Ok(Box::new(MemTableIterator { entries, index: 0 }))
        }
    }

    fn test_cache() -> (Arc<dyn TableCache>, Vec<Arc<FileMetadata>>) {
        let mut tables = HashMap::new();
        tables.insert(
            1,
            vec![
                (make_key(b"a", 1).encode(), Bytes::from("va")),
                (make_key(b"b", 1).encode(), Bytes::from("vb")),
            ],
        );
        tables.insert(2, vec![(make_key(b"d", 1).encode(), Bytes::from("vd"))]);
        tables.insert(
            3,
            vec![
                (make_key(b"g", 1).encode(), Bytes::from("vg")),
                (make_key(b"h", 1).encode(), Bytes::from("vh")),
            ],
        );

        let files = vec![
            make_file(1, 10, b"a", b"b"),
            make_file(2, 10, b"d", b"d"),
            make_file(3, 10, b"g", b"h"),
        ];

        (Arc::new(MemTableCache { tables }), files)
    }

    #[test]
    fn test_concatenating_iterator_scan() {
        let (cache, files) = test_cache();
        let mut iter = ConcatenatingIterator::new(LevelFileNumIterator::new(files), cache);

        iter.seek_to_first();
        let mut seen = Vec::new();
        while iter.valid() {
            seen.push(Bytes::copy_from_slice(iter.value()));
            iter.next();
        }
        assert_eq!(seen, vec!["va", "vb", "vd", "vg", "vh"]);
        assert!(iter.status().is_ok());
    }

    #[test]
    fn test_concatenating_iterator_seek_crosses_files() {
        let (cache, files) = test_cache();
        let mut iter = ConcatenatingIterator::new(LevelFileNumIterator::new(files), cache);

        // "c" is past file 1 but before file 2's only entry.
        iter.seek(&make_key(b"c", 1).encode());
        assert!(iter.valid());
        assert_eq!(iter.value(), b"vd");

        // Seeking past everything invalidates.
        iter.seek(&make_key(b"z", 1).encode());
        assert!(!iter.valid());
    }

    #[test]
    fn test_concatenating_iterator_reverse_scan() {
        let (cache, files) = test_cache();
        let mut iter = ConcatenatingIterator::new(LevelFileNumIterator::new(files), cache);

        iter.seek_to_last();
        let mut seen = Vec::new();
        while iter.valid() {
            seen.push(Bytes::copy_from_slice(iter.value()));
            iter.prev();
        }
        assert_eq!(seen, vec!["vh", "vg", "vd", "vb", "va"]);
    }
}
