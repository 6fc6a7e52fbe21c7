//! Compaction plan objects.
//!
//! A [`Compaction`] names exactly which files participate in merging a
//! level into the next one: the picked files at `level`, the
//! overlapping files at `level + 1`, and the `level + 2` files whose
//! overlap governs where output files are split. The plan is produced
//! by the version set's picking policy and executed elsewhere; its
//! outcome returns as a `VersionEdit`.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::options::{Options, MAX_LEVELS};
use crate::util::comparator::{Comparator, InternalKeyComparator};
use crate::version::{total_file_size, FileMetadata, Version, VersionEdit};

/// A planned compaction of `level` into `level + 1`.
pub struct Compaction {
    /// Level being compacted.
    level: usize,
    /// Size at which the executor closes an output file.
    max_output_file_size: u64,
    /// Cap on grandparent overlap per output file.
    max_grand_parent_overlap_bytes: u64,
    /// Snapshot the inputs were selected from. Holding it keeps every
    /// input file alive for the duration of the compaction.
    input_version: Arc<Version>,
    /// Input files: `inputs[0]` from `level`, `inputs[1]` from `level + 1`.
    inputs: [Vec<Arc<FileMetadata>>; 2],
    /// Files at `level + 2` overlapping the compaction's key range.
    grandparents: Vec<Arc<FileMetadata>>,

    /// Cursor into `grandparents` for output splitting.
    grandparent_index: usize,
    /// Whether an output key has been seen yet.
    seen_key: bool,
    /// Grandparent bytes overlapped by the current output file.
    overlapped_bytes: u64,

    /// Per-level cursors advanced by `is_base_level_for_key`, so the
    /// scan over deeper levels is amortized linear across the whole
    /// key stream of one compaction.
    level_ptrs: [usize; MAX_LEVELS],

    /// The edit the executor fills in as the compaction runs.
    edit: VersionEdit,
}

impl Compaction {
    pub(crate) fn new(level: usize, options: &Options, input_version: Arc<Version>) -> Self {
        Self {
            level,
            max_output_file_size: options.max_file_size_for_level(level),
            max_grand_parent_overlap_bytes: options.max_grand_parent_overlap_bytes(),
            input_version,
            inputs: [Vec::new(), Vec::new()],
            grandparents: Vec::new(),
            grandparent_index: 0,
            seen_key: false,
            overlapped_bytes: 0,
            level_ptrs: [0; MAX_LEVELS],
            edit: VersionEdit::new(),
        }
    }

    /// The level being compacted.
    pub fn level(&self) -> usize {
        self.level
    }

    /// The level output files are written to.
    pub fn output_level(&self) -> usize {
        self.level + 1
    }

    /// Number of input files from `level + which`.
    pub fn num_input_files(&self, which: usize) -> usize {
        self.inputs[which].len()
    }

    /// Input files from `level + which`.
    pub fn inputs(&self, which: usize) -> &[Arc<FileMetadata>] {
        &self.inputs[which]
    }

    /// One input file from `level + which`.
    pub fn input(&self, which: usize, i: usize) -> &Arc<FileMetadata> {
        &self.inputs[which][i]
    }

    /// The grandparent files overlapping this compaction.
    pub fn grandparents(&self) -> &[Arc<FileMetadata>] {
        &self.grandparents
    }

    /// The snapshot this plan was built from.
    pub fn input_version(&self) -> &Arc<Version> {
        &self.input_version
    }

    /// Size at which the executor should close an output file.
    pub fn max_output_file_size(&self) -> u64 {
        self.max_output_file_size
    }

    /// The edit being assembled for this compaction.
    pub fn edit(&self) -> &VersionEdit {
        &self.edit
    }

    /// Mutable access to the edit being assembled.
    pub fn edit_mut(&mut self) -> &mut VersionEdit {
        &mut self.edit
    }

    /// Consume the plan, yielding the assembled edit.
    pub fn into_edit(self) -> VersionEdit {
        self.edit
    }

    pub(crate) fn set_inputs(&mut self, which: usize, files: Vec<Arc<FileMetadata>>) {
        self.inputs[which] = files;
    }

    pub(crate) fn set_grandparents(&mut self, files: Vec<Arc<FileMetadata>>) {
        self.grandparents = files;
    }

    /// Whether this compaction can be done by renaming a single file
    /// down one level, with no merge I/O at all.
    ///
    /// Moving is refused when the file overlaps lots of grandparent
    /// data: the moved file would later force a very expensive merge.
    pub fn is_trivial_move(&self) -> bool {
        self.num_input_files(0) == 1
            && self.num_input_files(1) == 0
            && total_file_size(&self.grandparents) <= self.max_grand_parent_overlap_bytes
    }

    /// Record every input file as deleted in the plan's edit.
    pub fn add_input_deletions(&mut self) {
        for which in 0..2 {
            for file in &self.inputs[which] {
                self.edit
                    .delete_file(self.level + which, file.file_number());
            }
        }
    }

    /// Whether no level deeper than the output level can contain
    /// `user_key`.
    ///
    /// When true, a tombstone for the key has nothing left to shadow
    /// and may be dropped. The per-level cursors only move forward;
    /// callers must feed keys in ascending order.
    pub fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        let ucmp = *InternalKeyComparator::new().user_comparator();
        for lvl in self.level + 2..MAX_LEVELS {
            let files = self.input_version.files(lvl);
            while self.level_ptrs[lvl] < files.len() {
                let file = &files[self.level_ptrs[lvl]];
                if ucmp.compare(user_key, file.largest().user_key()) != Ordering::Greater {
                    if ucmp.compare(user_key, file.smallest().user_key()) != Ordering::Less {
                        // Key falls inside this file's range.
                        return false;
                    }
                    break;
                }
                self.level_ptrs[lvl] += 1;
            }
        }
        true
    }

    /// Whether the current output file should be closed before writing
    /// `internal_key`.
    ///
    /// Tracks how many grandparent bytes the output overlaps as keys
    /// stream by; crossing the cap starts a new output file so that no
    /// single file becomes expensive to compact later.
    pub fn should_stop_before(&mut self, internal_key: &[u8]) -> bool {
        let icmp = InternalKeyComparator::new();

        // Advance past every grandparent file wholly before this key.
        while self.grandparent_index < self.grandparents.len()
            && icmp.compare(
                internal_key,
                &self.grandparents[self.grandparent_index].largest().encode(),
            ) == Ordering::Greater
        {
            if self.seen_key {
                self.overlapped_bytes += self.grandparents[self.grandparent_index].file_size();
            }
            self.grandparent_index += 1;
        }
        self.seen_key = true;

        if self.overlapped_bytes > self.max_grand_parent_overlap_bytes {
            // Too much overlap for the current output; start a new one.
            self.overlapped_bytes = 0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InternalKey;
    use bytes::Bytes;

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

    fn version_with(level_files: Vec<(usize, Arc<FileMetadata>)>) -> Arc<Version> {
        let mut files: [Vec<Arc<FileMetadata>>; MAX_LEVELS] = Default::default();
        for (level, file) in level_files {
            files[level].push(file);
        }
        Arc::new(Version::with_files(files))
    }

    #[test]
    fn test_trivial_move() {
        let opts = Options::default();
        let version = version_with(vec![]);

        let mut c = Compaction::new(2, &opts, version);
        c.set_inputs(0, vec![make_file(1, 1000, b"p", b"q")]);
        assert!(c.is_trivial_move());

        // A second input file at the level rules it out.
        c.set_inputs(0, vec![
            make_file(1, 1000, b"p", b"q"),
            make_file(2, 1000, b"r", b"s"),
        ]);
        assert!(!c.is_trivial_move());

        // Overlap at the parent level rules it out.
        c.set_inputs(0, vec![make_file(1, 1000, b"p", b"q")]);
        c.set_inputs(1, vec![make_file(3, 1000, b"p", b"z")]);
        assert!(!c.is_trivial_move());

        // Heavy grandparent overlap rules it out.
        c.set_inputs(1, vec![]);
        c.set_grandparents(vec![make_file(
            4,
            opts.max_grand_parent_overlap_bytes() + 1,
            b"a",
            b"z",
        )]);
        assert!(!c.is_trivial_move());
    }

    #[test]
    fn test_add_input_deletions() {
        let opts = Options::default();
        let version = version_with(vec![]);

        let mut c = Compaction::new(1, &opts, version);
        c.set_inputs(0, vec![make_file(10, 100, b"a", b"c"), make_file(11, 100, b"d", b"f")]);
        c.set_inputs(1, vec![make_file(20, 100, b"a", b"f")]);

        c.add_input_deletions();
        let edit = c.into_edit();
        assert_eq!(edit.deleted_files.len(), 3);
        assert!(edit.deleted_files.contains(&(1, 10)));
        assert!(edit.deleted_files.contains(&(1, 11)));
        assert!(edit.deleted_files.contains(&(2, 20)));
    }

    #[test]
    fn test_is_base_level_for_key() {
        let opts = Options::default();
        // Compacting level 1 -> 2; level 3 holds [t, w].
        let version = version_with(vec![(3, make_file(30, 100, b"t", b"w"))]);

        let mut c = Compaction::new(1, &opts, version);

        // "u" falls inside the level-3 file: a tombstone for it must
        // be preserved.
        assert!(!c.is_base_level_for_key(b"u"));

        // Keys outside every deeper file are at their base level.
        let version = version_with(vec![(3, make_file(30, 100, b"t", b"w"))]);
        let mut c = Compaction::new(1, &opts, version);
        assert!(c.is_base_level_for_key(b"a"));
        assert!(c.is_base_level_for_key(b"s"));
        assert!(c.is_base_level_for_key(b"x"));
    }

    #[test]
    fn test_is_base_level_for_key_advances_monotonically() {
        let opts = Options::default();
        let version = version_with(vec![
            (3, make_file(30, 100, b"c", b"d")),
            (3, make_file(31, 100, b"m", b"n")),
        ]);

        let mut c = Compaction::new(1, &opts, version);

        // Ascending key stream; the cursor moves past files for good.
        assert!(c.is_base_level_for_key(b"a"));
        assert!(!c.is_base_level_for_key(b"c"));
        assert!(c.is_base_level_for_key(b"e"));
        assert!(!c.is_base_level_for_key(b"n"));
        assert!(c.is_base_level_for_key(b"z"));
    }

    #[test]
    fn test_should_stop_before() {
        let mut opts = Options::default();
        // Tiny limit so two grandparent files exceed it.
        opts.target_file_size_base = 100;
        let limit = opts.max_grand_parent_overlap_bytes();
        assert_eq!(limit, 1000);

        let version = version_with(vec![]);
        let mut c = Compaction::new(1, &opts, version);
        c.set_grandparents(vec![
            make_file(40, 600, b"b", b"c"),
            make_file(41, 600, b"e", b"f"),
            make_file(42, 600, b"h", b"i"),
        ]);

        // Nothing is charged before the first key.
        assert!(!c.should_stop_before(&make_key(b"a", 1).encode()));

        // Passing one grandparent file accumulates 600 bytes; under
        // the 1000-byte cap.
        assert!(!c.should_stop_before(&make_key(b"d", 1).encode()));

        // Passing the second pushes the total to 1200 and splits the
        // output; the counter resets.
        assert!(c.should_stop_before(&make_key(b"g", 1).encode()));
        assert!(!c.should_stop_before(&make_key(b"g", 1).encode()));
    }

    #[test]
    fn test_should_stop_before_first_key_past_everything() {
        let mut opts = Options::default();
        opts.target_file_size_base = 100;

        let version = version_with(vec![]);
        let mut c = Compaction::new(1, &opts, version);
        c.set_grandparents(vec![
            make_file(40, 600, b"b", b"c"),
            make_file(41, 600, b"e", b"f"),
        ]);

        // The very first key skips every grandparent without charging:
        // there is no open output yet to split.
        assert!(!c.should_stop_before(&make_key(b"z", 1).encode()));
    }
}
