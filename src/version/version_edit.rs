//! VersionEdit - describes changes between versions.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashSet;

use crate::options::MAX_LEVELS;
use crate::types::InternalKey;
use crate::util::coding::{
    decode_length_prefixed, decode_varint32, decode_varint64, encode_length_prefixed,
    encode_varint32, encode_varint64,
};
use crate::{Error, Result};

use super::{EditTag, FileMetadata};

/// A VersionEdit describes the changes between two Versions.
///
/// It records:
/// - New files to add and files to delete
/// - Updated log/file/sequence counters
/// - Compaction pointers
///
/// Each field is written to the manifest as a tag byte followed by the
/// field body; fields may appear in any order and later occurrences
/// override earlier ones.
#[derive(Debug, Clone, Default)]
pub struct VersionEdit {
    /// Comparator name (persisted once per manifest).
    pub comparator: Option<String>,
    /// Log file number.
    pub log_number: Option<u64>,
    /// Previous log number (a log still draining at the last switch).
    pub prev_log_number: Option<u64>,
    /// Next file number to allocate.
    pub next_file_number: Option<u64>,
    /// Last sequence number used.
    pub last_sequence: Option<u64>,
    /// Compaction pointers: (level, key the next compaction resumes after).
    pub compact_pointers: Vec<(usize, InternalKey)>,
    /// Files to delete: (level, file_number).
    pub deleted_files: HashSet<(usize, u64)>,
    /// New files to add: (level, FileMetadata).
    pub new_files: Vec<(usize, FileMetadata)>,
}

impl VersionEdit {
    /// Create a new empty edit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the comparator name.
    pub fn set_comparator(&mut self, name: impl Into<String>) {
        self.comparator = Some(name.into());
    }

    /// Set the log number.
    pub fn set_log_number(&mut self, num: u64) {
        self.log_number = Some(num);
    }

    /// Set the previous log number.
    pub fn set_prev_log_number(&mut self, num: u64) {
        self.prev_log_number = Some(num);
    }

    /// Set the next file number.
    pub fn set_next_file_number(&mut self, num: u64) {
        self.next_file_number = Some(num);
    }

    /// Set the last sequence number.
    pub fn set_last_sequence(&mut self, seq: u64) {
        self.last_sequence = Some(seq);
    }

    /// Record a compaction pointer.
    pub fn set_compact_pointer(&mut self, level: usize, key: InternalKey) {
        self.compact_pointers.push((level, key));
    }

    /// Mark a file as deleted.
    pub fn delete_file(&mut self, level: usize, file_number: u64) {
        self.deleted_files.insert((level, file_number));
    }

    /// Add a new file.
    pub fn add_file(&mut self, level: usize, file: FileMetadata) {
        self.new_files.push((level, file));
    }

    /// Add a new file with explicit parameters.
    pub fn add_file_info(
        &mut self,
        level: usize,
        file_number: u64,
        file_size: u64,
        smallest: InternalKey,
        largest: InternalKey,
    ) {
        self.new_files.push((
            level,
            FileMetadata::new(file_number, file_size, smallest, largest),
        ));
    }

    /// Check if the edit is empty.
    pub fn is_empty(&self) -> bool {
        self.comparator.is_none()
            && self.log_number.is_none()
            && self.prev_log_number.is_none()
            && self.next_file_number.is_none()
            && self.last_sequence.is_none()
            && self.compact_pointers.is_empty()
            && self.deleted_files.is_empty()
            && self.new_files.is_empty()
    }

    /// Encode the edit to bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);

        if let Some(ref name) = self.comparator {
            buf.put_u8(EditTag::Comparator.to_byte());
            encode_length_prefixed(&mut buf, name.as_bytes());
        }

        if let Some(num) = self.log_number {
            buf.put_u8(EditTag::LogNumber.to_byte());
            encode_varint64(&mut buf, num);
        }

        if let Some(num) = self.prev_log_number {
            buf.put_u8(EditTag::PrevLogNumber.to_byte());
            encode_varint64(&mut buf, num);
        }

        if let Some(num) = self.next_file_number {
            buf.put_u8(EditTag::NextFileNumber.to_byte());
            encode_varint64(&mut buf, num);
        }

        if let Some(seq) = self.last_sequence {
            buf.put_u8(EditTag::LastSequence.to_byte());
            encode_varint64(&mut buf, seq);
        }

        for (level, key) in &self.compact_pointers {
            buf.put_u8(EditTag::CompactPointer.to_byte());
            encode_varint32(&mut buf, *level as u32);
            encode_length_prefixed(&mut buf, &key.encode());
        }

        for &(level, file_number) in &self.deleted_files {
            buf.put_u8(EditTag::DeletedFile.to_byte());
            encode_varint32(&mut buf, level as u32);
            encode_varint64(&mut buf, file_number);
        }

        for (level, file) in &self.new_files {
            buf.put_u8(EditTag::NewFile.to_byte());
            encode_varint32(&mut buf, *level as u32);
            encode_varint64(&mut buf, file.file_number());
            encode_varint64(&mut buf, file.file_size());
            encode_length_prefixed(&mut buf, &file.smallest().encode());
            encode_length_prefixed(&mut buf, &file.largest().encode());
        }

        buf.freeze()
    }

    /// Decode an edit from bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut edit = VersionEdit::new();
        let mut cursor = data;

        while !cursor.is_empty() {
            let tag_byte = cursor.get_u8();
            let tag = EditTag::from_byte(tag_byte)
                .ok_or_else(|| Error::corruption(format!("unknown edit tag: {}", tag_byte)))?;

            match tag {
                EditTag::Comparator => {
                    let name = decode_length_prefixed(&mut cursor)
                        .ok_or_else(|| Error::corruption("truncated comparator name"))?;
                    edit.comparator = Some(
                        String::from_utf8(name.to_vec())
                            .map_err(|_| Error::corruption("invalid comparator name"))?,
                    );
                }
                EditTag::LogNumber => {
                    edit.log_number = Some(decode_u64(&mut cursor, "log number")?);
                }
                EditTag::PrevLogNumber => {
                    edit.prev_log_number = Some(decode_u64(&mut cursor, "prev log number")?);
                }
                EditTag::NextFileNumber => {
                    edit.next_file_number = Some(decode_u64(&mut cursor, "next file number")?);
                }
                EditTag::LastSequence => {
                    edit.last_sequence = Some(decode_u64(&mut cursor, "last sequence")?);
                }
                EditTag::CompactPointer => {
                    let level = decode_level(&mut cursor)?;
                    let key = decode_internal_key(&mut cursor, "compact pointer")?;
                    edit.compact_pointers.push((level, key));
                }
                EditTag::DeletedFile => {
                    let level = decode_level(&mut cursor)?;
                    let file_number = decode_u64(&mut cursor, "deleted file number")?;
                    edit.deleted_files.insert((level, file_number));
                }
                EditTag::NewFile => {
                    let level = decode_level(&mut cursor)?;
                    let file_number = decode_u64(&mut cursor, "new file number")?;
                    let file_size = decode_u64(&mut cursor, "new file size")?;
                    let smallest = decode_internal_key(&mut cursor, "smallest key")?;
                    let largest = decode_internal_key(&mut cursor, "largest key")?;

                    edit.new_files.push((
                        level,
                        FileMetadata::new(file_number, file_size, smallest, largest),
                    ));
                }
            }
        }

        Ok(edit)
    }
}

fn decode_u64(cursor: &mut &[u8], what: &str) -> Result<u64> {
    decode_varint64(cursor).ok_or_else(|| Error::corruption(format!("truncated {}", what)))
}

fn decode_level(cursor: &mut &[u8]) -> Result<usize> {
    let level =
        decode_varint32(cursor).ok_or_else(|| Error::corruption("truncated level"))? as usize;
    if level >= MAX_LEVELS {
        return Err(Error::corruption(format!("level {} out of range", level)));
    }
    Ok(level)
}

fn decode_internal_key(cursor: &mut &[u8], what: &str) -> Result<InternalKey> {
    let raw = decode_length_prefixed(cursor)
        .ok_or_else(|| Error::corruption(format!("truncated {}", what)))?;
    InternalKey::decode(&raw).ok_or_else(|| Error::corruption(format!("invalid {}", what)))
}
