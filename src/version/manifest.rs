//! Manifest - append-only log of VersionEdits.
//!
//! The manifest persists every change to the store's file layout. On
//! startup it is replayed record by record to reconstruct the current
//! Version.
//!
//! Records are framed in 32KB blocks. Each physical record carries a
//! CRC over its type and payload, and a record too large for the space
//! left in a block is split into First/Middle/Last fragments. A block
//! tail too small to hold a header is zero-filled.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::util::crc::{crc32_multi, verify_crc};
use crate::version::VersionEdit;
use crate::{Error, Result};

/// Block size for the manifest.
const BLOCK_SIZE: usize = 32 * 1024;

/// Header size: CRC (4) + Length (2) + Type (1) = 7 bytes.
const HEADER_SIZE: usize = 7;

/// Record types for manifest entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RecordType {
    /// Zero is reserved for pre-allocated files and block padding.
    Zero = 0,
    /// Complete record in a single fragment.
    Full = 1,
    /// First fragment of a record.
    First = 2,
    /// Middle fragment(s) of a record.
    Middle = 3,
    /// Last fragment of a record.
    Last = 4,
}

impl RecordType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(RecordType::Zero),
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Manifest file writer.
pub struct ManifestWriter {
    /// Buffered writer for the manifest file.
    writer: BufWriter<File>,
    /// Current position within the current block.
    block_offset: usize,
    /// File number for this manifest.
    file_number: u64,
    /// Path to the manifest file.
    path: PathBuf,
}

impl ManifestWriter {
    /// Create a new manifest file, truncating any previous content.
    pub fn create(path: &Path, file_number: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            writer: BufWriter::with_capacity(BLOCK_SIZE * 4, file),
            block_offset: 0,
            file_number,
            path: path.to_path_buf(),
        })
    }

    /// Get the file number.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Get the manifest file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a VersionEdit to the manifest.
    pub fn add_edit(&mut self, edit: &VersionEdit) -> Result<()> {
        self.add_record(&edit.encode())
    }

    /// Append a raw record to the manifest.
    pub fn add_record(&mut self, data: &[u8]) -> Result<()> {
        let mut left = data.len();
        let mut ptr = 0;
        let mut begin = true;

        loop {
            let leftover = BLOCK_SIZE - self.block_offset;

            // Switch to a new block if we can't fit a header.
            if leftover < HEADER_SIZE {
                if leftover > 0 {
                    self.writer.write_all(&[0u8; HEADER_SIZE - 1][..leftover])?;
                }
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_length = std::cmp::min(left, avail);
            let end = left == fragment_length;

            let record_type = if begin && end {
                RecordType::Full
            } else if begin {
                RecordType::First
            } else if end {
                RecordType::Last
            } else {
                RecordType::Middle
            };

            self.emit_physical_record(record_type, &data[ptr..ptr + fragment_length])?;

            ptr += fragment_length;
            left -= fragment_length;
            begin = false;

            if left == 0 {
                return Ok(());
            }
        }
    }

    /// Write a physical record (header + data).
    fn emit_physical_record(&mut self, record_type: RecordType, data: &[u8]) -> Result<()> {
        debug_assert!(data.len() <= 0xFFFF);
        debug_assert!(self.block_offset + HEADER_SIZE + data.len() <= BLOCK_SIZE);

        let crc = crc32_multi(&[&[record_type.to_byte()], data]);

        // Header format: CRC (4) + Length (2) + Type (1).
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&crc.to_le_bytes());
        header[4..6].copy_from_slice(&(data.len() as u16).to_le_bytes());
        header[6] = record_type.to_byte();

        self.writer.write_all(&header)?;
        self.writer.write_all(data)?;

        self.block_offset += HEADER_SIZE + data.len();

        Ok(())
    }

    /// Flush buffered data and sync it to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }
}

/// Manifest file reader.
///
/// Replays VersionEdits from a manifest file, reassembling fragmented
/// records and verifying checksums.
pub struct ManifestReader {
    /// Buffered reader for the manifest file.
    reader: BufReader<File>,
    /// Current block buffer.
    buffer: Vec<u8>,
    /// Current position within the buffer.
    buffer_offset: usize,
    /// Valid bytes in the buffer.
    buffer_size: usize,
    /// Whether we've reached EOF.
    eof: bool,
    /// Whether framing and checksum errors are fatal.
    ///
    /// A non-fatal reader skips to the next block instead, which is how
    /// a torn tail from a crashed writer is tolerated.
    strict: bool,
}

impl ManifestReader {
    /// Open a manifest for reading.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;

        Ok(Self {
            reader: BufReader::with_capacity(BLOCK_SIZE * 4, file),
            buffer: vec![0u8; BLOCK_SIZE],
            buffer_offset: 0,
            buffer_size: 0,
            eof: false,
            strict: true,
        })
    }

    /// Set whether framing and checksum errors should be fatal.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Read the next VersionEdit.
    ///
    /// Returns None when there are no more records.
    pub fn read_edit(&mut self) -> Result<Option<VersionEdit>> {
        match self.read_record()? {
            Some(data) => Ok(Some(VersionEdit::decode(&data)?)),
            None => Ok(None),
        }
    }

    /// Read all remaining VersionEdits.
    pub fn read_all_edits(&mut self) -> Result<Vec<VersionEdit>> {
        let mut edits = Vec::new();
        while let Some(edit) = self.read_edit()? {
            edits.push(edit);
        }
        Ok(edits)
    }

    /// Scan the remaining records for one equal to `record`.
    ///
    /// Used after a failed write to decide whether the record made it to
    /// disk anyway. Framing errors end the scan rather than fail it.
    pub fn contains_record(&mut self, record: &[u8]) -> bool {
        self.strict = false;
        while let Ok(Some(data)) = self.read_record() {
            if data == record {
                return true;
            }
        }
        false
    }

    /// Read the next logical record, reassembling fragments.
    fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let mut scratch = Vec::new();
        let mut in_fragmented_record = false;

        loop {
            match self.read_physical_record()? {
                Some((record_type, data)) => match record_type {
                    RecordType::Full => {
                        if in_fragmented_record {
                            scratch.clear();
                        }
                        return Ok(Some(data));
                    }
                    RecordType::First => {
                        if in_fragmented_record {
                            scratch.clear();
                        }
                        scratch.extend_from_slice(&data);
                        in_fragmented_record = true;
                    }
                    RecordType::Middle => {
                        if !in_fragmented_record {
                            if self.strict {
                                return Err(Error::corruption(
                                    "unexpected middle record fragment",
                                ));
                            }
                            continue;
                        }
                        scratch.extend_from_slice(&data);
                    }
                    RecordType::Last => {
                        if !in_fragmented_record {
                            if self.strict {
                                return Err(Error::corruption("unexpected last record fragment"));
                            }
                            continue;
                        }
                        scratch.extend_from_slice(&data);
                        return Ok(Some(scratch));
                    }
                    RecordType::Zero => {
                        continue;
                    }
                },
                None => {
                    if in_fragmented_record {
                        scratch.clear();
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// Read a physical record from the current position.
    fn read_physical_record(&mut self) -> Result<Option<(RecordType, Vec<u8>)>> {
        loop {
            if self.buffer_offset + HEADER_SIZE > self.buffer_size {
                if !self.read_block()? {
                    return Ok(None);
                }
                continue;
            }

            let header = &self.buffer[self.buffer_offset..self.buffer_offset + HEADER_SIZE];

            let crc_expected = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let length = u16::from_le_bytes([header[4], header[5]]) as usize;
            let record_type_byte = header[6];

            let record_type = match RecordType::from_byte(record_type_byte) {
                Some(rt) => rt,
                None => {
                    if self.strict {
                        return Err(Error::corruption("invalid record type"));
                    }
                    self.buffer_offset = self.buffer_size;
                    continue;
                }
            };

            // All-zero padding at a block tail parses as a Zero record.
            if record_type == RecordType::Zero && length == 0 {
                self.buffer_offset = self.buffer_size;
                continue;
            }

            if self.buffer_offset + HEADER_SIZE + length > self.buffer_size {
                if self.eof {
                    // A record cut off by EOF means the writer crashed
                    // mid-write; the data was never acknowledged.
                    return Ok(None);
                }
                if self.strict {
                    return Err(Error::corruption("record extends beyond block"));
                }
                self.buffer_offset = self.buffer_size;
                continue;
            }

            let data_start = self.buffer_offset + HEADER_SIZE;
            let data_end = data_start + length;
            let data = &self.buffer[data_start..data_end];

            let crc_data = {
                let mut v = Vec::with_capacity(1 + length);
                v.push(record_type_byte);
                v.extend_from_slice(data);
                v
            };
            if !verify_crc(&crc_data, crc_expected) {
                if self.strict {
                    return Err(Error::corruption("record checksum mismatch"));
                }
                self.buffer_offset = self.buffer_size;
                continue;
            }

            self.buffer_offset = data_end;

            return Ok(Some((record_type, data.to_vec())));
        }
    }

    /// Read the next block into the buffer.
    fn read_block(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }

        self.buffer_offset = 0;
        self.buffer_size = 0;

        // Loop because a BufReader may return short reads.
        while self.buffer_size < BLOCK_SIZE {
            let n = self.reader.read(&mut self.buffer[self.buffer_size..])?;
            if n == 0 {
                self.eof = true;
                break;
            }
            self.buffer_size += n;
        }

        Ok(self.buffer_size > 0)
    }
}
