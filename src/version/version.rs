//! Version - immutable snapshot of active SSTable files.

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::options::{Options, MAX_LEVELS};
use crate::table::{KvIterator, TableCache};
use crate::types::{InternalKey, LookupKey, LookupResult};
use crate::util::comparator::{Comparator, InternalKeyComparator};
use crate::{Error, Result};

use super::level_iter::{ConcatenatingIterator, LevelFileNumIterator};
use super::{total_file_size, FileMetadata};

/// Read-path statistics handed back by [`Version::get`].
///
/// When a lookup consults more than one file, the first file read is
/// remembered here so the caller can charge its seek budget afterwards
/// via [`Version::update_stats`].
#[derive(Debug, Default)]
pub struct GetStats {
    seek_file: Option<(Arc<FileMetadata>, usize)>,
}

impl GetStats {
    /// The file (and its level) to be charged for this read, if any.
    pub fn charged_file(&self) -> Option<(&Arc<FileMetadata>, usize)> {
        self.seek_file.as_ref().map(|(f, level)| (f, *level))
    }
}

/// An immutable snapshot of all SSTable files at a point in time.
///
/// Versions are shared through `Arc`; a reader holding one is
/// guaranteed that the files it references outlive the read, no matter
/// what background work installs in the meantime. The file layout never
/// changes after publication. The only mutable pieces are read-path
/// statistics: per-file seek budgets and the slot naming the next
/// seek-triggered compaction.
#[derive(Debug)]
pub struct Version {
    /// Files at each level.
    ///
    /// Level-0 files may overlap each other; levels >= 1 are sorted by
    /// smallest key and pairwise disjoint.
    files: [Vec<Arc<FileMetadata>>; MAX_LEVELS],

    /// Precomputed score of the most urgent size-triggered compaction.
    /// >= 1.0 means compaction is due.
    compaction_score: f64,

    /// Level the score refers to.
    compaction_level: usize,

    /// File whose seek budget ran out, queued for compaction.
    /// At most one file is pending at a time.
    file_to_compact: RwLock<Option<(Arc<FileMetadata>, usize)>>,

    icmp: InternalKeyComparator,
}

impl Version {
    /// Create an empty version.
    pub fn new() -> Self {
        Self::with_files(Default::default())
    }

    /// Create a version holding the given files.
    pub fn with_files(files: [Vec<Arc<FileMetadata>>; MAX_LEVELS]) -> Self {
        Self {
            files,
            compaction_score: 0.0,
            compaction_level: 0,
            file_to_compact: RwLock::new(None),
            icmp: InternalKeyComparator::new(),
        }
    }

    /// Get files at a specific level.
    pub fn files(&self, level: usize) -> &[Arc<FileMetadata>] {
        &self.files[level]
    }

    /// Get number of files at a level.
    pub fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    /// Get total number of files across all levels.
    pub fn total_files(&self) -> usize {
        self.files.iter().map(|f| f.len()).sum()
    }

    /// Total bytes at a level.
    pub fn level_bytes(&self, level: usize) -> u64 {
        total_file_size(&self.files[level])
    }

    /// Get the compaction score.
    pub fn compaction_score(&self) -> f64 {
        self.compaction_score
    }

    /// Get the level that should be compacted next.
    pub fn compaction_level(&self) -> usize {
        self.compaction_level
    }

    pub(super) fn set_compaction_info(&mut self, score: f64, level: usize) {
        self.compaction_score = score;
        self.compaction_level = level;
    }

    /// Check if some compaction is due, for either size or seek reasons.
    pub fn needs_compaction(&self) -> bool {
        self.compaction_score >= 1.0 || self.file_to_compact.read().is_some()
    }

    /// The file queued by seek exhaustion, if any.
    pub fn file_to_compact(&self) -> Option<(Arc<FileMetadata>, usize)> {
        self.file_to_compact.read().clone()
    }

    /// Iterate over all files at all levels.
    pub fn all_files(&self) -> impl Iterator<Item = (usize, &Arc<FileMetadata>)> {
        self.files
            .iter()
            .enumerate()
            .flat_map(|(level, files)| files.iter().map(move |f| (level, f)))
    }

    /// Look up a key, walking levels from newest to oldest.
    ///
    /// The first definitive answer wins: newer writes always live at
    /// lower levels, so once a level yields a value or a tombstone the
    /// deeper levels are irrelevant.
    pub fn get(
        &self,
        key: &LookupKey,
        table_cache: &dyn TableCache,
    ) -> Result<(LookupResult, GetStats)> {
        let ikey = key.internal_key();
        let user_key = key.user_key();
        let ucmp = *self.icmp.user_comparator();

        let mut stats = GetStats::default();
        let mut last_file_read: Option<(Arc<FileMetadata>, usize)> = None;

        for level in 0..MAX_LEVELS {
            let files = &self.files[level];
            if files.is_empty() {
                continue;
            }

            let candidates: Vec<Arc<FileMetadata>> = if level == 0 {
                // Level-0 files may overlap each other. Collect every
                // file containing the key and read newest first.
                let mut tmp: Vec<_> = files
                    .iter()
                    .filter(|f| f.may_contain_key(user_key))
                    .cloned()
                    .collect();
                if tmp.is_empty() {
                    continue;
                }
                tmp.sort_by(|a, b| b.file_number().cmp(&a.file_number()));
                tmp
            } else {
                // Deeper levels are sorted and disjoint: at most one
                // file can contain the key.
                let index = find_file(&self.icmp, files, ikey);
                if index >= files.len() {
                    continue;
                }
                let file = &files[index];
                if ucmp.compare(user_key, file.smallest().user_key()) == Ordering::Less {
                    continue;
                }
                vec![Arc::clone(file)]
            };

            for file in candidates {
                if last_file_read.is_some() && stats.seek_file.is_none() {
                    // This read consulted more than one file. Charge the
                    // first of them.
                    stats.seek_file = last_file_read.clone();
                }
                last_file_read = Some((Arc::clone(&file), level));

                let entry = table_cache.get(file.file_number(), file.file_size(), ikey)?;
                let (entry_key, value) = match entry {
                    Some(pair) => pair,
                    None => continue,
                };

                let parsed = InternalKey::decode(&entry_key).ok_or_else(|| {
                    Error::corruption(format!(
                        "corrupted internal key in file {}",
                        file.file_number()
                    ))
                })?;

                if ucmp.compare(parsed.user_key(), user_key) != Ordering::Equal {
                    // The table held no entry for this user key.
                    continue;
                }

                let result = if parsed.is_deletion() {
                    LookupResult::Deleted
                } else {
                    LookupResult::Found(value)
                };
                return Ok((result, stats));
            }
        }

        Ok((LookupResult::NotFound, stats))
    }

    /// Charge the file recorded in `stats` for one seek.
    ///
    /// Returns true when the file's budget ran out and it was queued as
    /// the next seek-triggered compaction.
    pub fn update_stats(&self, stats: &GetStats) -> bool {
        if let Some((file, level)) = &stats.seek_file {
            let exhausted = file.consume_seek();
            let mut slot = self.file_to_compact.write();
            if exhausted && slot.is_none() {
                *slot = Some((Arc::clone(file), *level));
                return true;
            }
        }
        false
    }

    /// Iterators covering every file in this version.
    ///
    /// Level-0 files may overlap, so each gets its own iterator; each
    /// deeper level yields one concatenating iterator that opens its
    /// files lazily.
    pub fn add_iterators(
        &self,
        table_cache: &Arc<dyn TableCache>,
    ) -> Result<Vec<Box<dyn KvIterator>>> {
        let mut iters: Vec<Box<dyn KvIterator>> = Vec::new();

        for file in &self.files[0] {
            iters.push(table_cache.iter(file.file_number(), file.file_size())?);
        }

        for level in 1..MAX_LEVELS {
            if !self.files[level].is_empty() {
                iters.push(Box::new(ConcatenatingIterator::new(
                    LevelFileNumIterator::new(self.files[level].clone()),
                    Arc::clone(table_cache),
                )));
            }
        }

        Ok(iters)
    }

    /// Whether any file at `level` overlaps the user-key range.
    ///
    /// `None` bounds are unbounded.
    pub fn overlap_in_level(
        &self,
        level: usize,
        smallest_user_key: Option<&[u8]>,
        largest_user_key: Option<&[u8]>,
    ) -> bool {
        some_file_overlaps_range(
            &self.icmp,
            level > 0,
            &self.files[level],
            smallest_user_key,
            largest_user_key,
        )
    }

    /// Pick a level to place a freshly flushed memtable at.
    ///
    /// The output goes as deep as it can while (a) not overlapping that
    /// level, (b) not overlapping the next one, and (c) keeping the
    /// grandparent overlap bounded, so a new file does not immediately
    /// force an expensive parent compaction.
    pub fn pick_level_for_memtable_output(
        &self,
        smallest_user_key: &[u8],
        largest_user_key: &[u8],
        options: &Options,
    ) -> usize {
        let mut level = 0;
        if !self.overlap_in_level(0, Some(smallest_user_key), Some(largest_user_key)) {
            let start = InternalKey::for_seek(Bytes::copy_from_slice(smallest_user_key));
            let limit = InternalKey::for_value(Bytes::copy_from_slice(largest_user_key), 0);
            while level < options.max_mem_compact_level {
                if self.overlap_in_level(
                    level + 1,
                    Some(smallest_user_key),
                    Some(largest_user_key),
                ) {
                    break;
                }
                let overlaps =
                    self.get_overlapping_inputs(level + 2, Some(&start), Some(&limit));
                if total_file_size(&overlaps) > options.max_grand_parent_overlap_bytes() {
                    break;
                }
                level += 1;
            }
        }
        level
    }

    /// All files at `level` intersecting `[begin, end]` (user-key wise).
    ///
    /// `None` bounds are unbounded. For level 0 the range is widened to
    /// the union of every included file's range and the scan restarts,
    /// until it converges: overlapping level-0 files pull each other in
    /// transitively.
    pub fn get_overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Vec<Arc<FileMetadata>> {
        let ucmp = *self.icmp.user_comparator();
        let mut user_begin: Option<Bytes> =
            begin.map(|k| Bytes::copy_from_slice(k.user_key()));
        let mut user_end: Option<Bytes> = end.map(|k| Bytes::copy_from_slice(k.user_key()));

        let mut inputs: Vec<Arc<FileMetadata>> = Vec::new();
        let mut i = 0;
        while i < self.files[level].len() {
            let file = Arc::clone(&self.files[level][i]);
            i += 1;

            let file_start = file.smallest().user_key();
            let file_limit = file.largest().user_key();

            if let Some(ub) = &user_begin {
                if ucmp.compare(file_limit, ub) == Ordering::Less {
                    // Entirely before the range.
                    continue;
                }
            }
            if let Some(ue) = &user_end {
                if ucmp.compare(file_start, ue) == Ordering::Greater {
                    // Entirely after the range.
                    continue;
                }
            }

            inputs.push(Arc::clone(&file));

            if level == 0 {
                // An included level-0 file may extend the range; widen
                // and restart so transitively overlapping files are
                // picked up too.
                if let Some(ub) = user_begin.clone() {
                    if ucmp.compare(file_start, &ub) == Ordering::Less {
                        user_begin = Some(Bytes::copy_from_slice(file_start));
                        inputs.clear();
                        i = 0;
                        continue;
                    }
                }
                if let Some(ue) = user_end.clone() {
                    if ucmp.compare(file_limit, &ue) == Ordering::Greater {
                        user_end = Some(Bytes::copy_from_slice(file_limit));
                        inputs.clear();
                        i = 0;
                    }
                }
            }
        }

        inputs
    }

    /// One-line per-level file-count summary, for logging.
    pub fn level_summary(&self) -> String {
        let counts: Vec<String> = self
            .files
            .iter()
            .map(|files| files.len().to_string())
            .collect();
        format!("files[ {} ]", counts.join(" "))
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new()
    }
}

/// Index of the earliest file whose largest key is >= `internal_key`.
///
/// Returns `files.len()` when every file ends before the key. Requires
/// a sorted, disjoint file list (levels >= 1).
pub(super) fn find_file(
    icmp: &InternalKeyComparator,
    files: &[Arc<FileMetadata>],
    internal_key: &[u8],
) -> usize {
    files.partition_point(|f| {
        icmp.compare(&f.largest().encode(), internal_key) == Ordering::Less
    })
}

/// Whether any file overlaps the user-key range `[smallest, largest]`.
///
/// `disjoint` asserts the files are sorted and non-overlapping, which
/// allows a binary search; level-0 lists are scanned linearly.
pub(super) fn some_file_overlaps_range(
    icmp: &InternalKeyComparator,
    disjoint: bool,
    files: &[Arc<FileMetadata>],
    smallest_user_key: Option<&[u8]>,
    largest_user_key: Option<&[u8]>,
) -> bool {
    let ucmp = *icmp.user_comparator();

    if !disjoint {
        // Need to check against all files.
        for file in files {
            let before = matches!(
                smallest_user_key,
                Some(small) if ucmp.compare(file.largest().user_key(), small) == Ordering::Less
            );
            let after = matches!(
                largest_user_key,
                Some(large) if ucmp.compare(file.smallest().user_key(), large) == Ordering::Greater
            );
            if !before && !after {
                return true;
            }
        }
        return false;
    }

    let index = match smallest_user_key {
        Some(small) => {
            let small_key = InternalKey::for_seek(Bytes::copy_from_slice(small));
            find_file(icmp, files, &small_key.encode())
        }
        // Unbounded below: begin at the first file.
        None => 0,
    };

    if index >= files.len() {
        // Every file ends before the range begins.
        return false;
    }

    !matches!(
        largest_user_key,
        Some(large) if ucmp.compare(large, files[index].smallest().user_key()) == Ordering::Less
    )
}
