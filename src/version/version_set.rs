//! VersionSet - owns the current version and durably evolves it.
//!
//! The version set tracks:
//! - The current [`Version`] plus every older one still held by readers
//! - Monotone counters: next file number, last sequence, log numbers
//! - Per-level compaction cursors
//! - The active manifest, an append-only log of [`VersionEdit`]s
//!
//! All layout changes funnel through [`VersionSet::log_and_apply`]: the
//! edit is appended to the manifest and synced, then the new version is
//! published. Readers load `current` wait-free and are never blocked by
//! the manifest write; concurrent writers serialize on the manifest
//! lock. On startup [`VersionSet::recover`] replays the manifest named
//! by `CURRENT` to rebuild the exact layout.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use log::{info, warn};
use parking_lot::{Mutex, RwLock};

use crate::compaction::Compaction;
use crate::options::{Options, MAX_LEVELS};
use crate::types::InternalKey;
use crate::util::comparator::{Comparator, InternalKeyComparator};
use crate::util::filename::{
    current_file_path, current_manifest_number, manifest_file_path, set_current_file,
};
use crate::{Error, Result};

use super::{total_file_size, FileMetadata, ManifestReader, ManifestWriter, Version, VersionEdit};

/// Manages the set of versions, the manifest, and compaction picking.
pub struct VersionSet {
    /// Store directory path.
    db_path: PathBuf,
    /// Tuning knobs.
    options: Arc<Options>,
    icmp: InternalKeyComparator,
    /// Name persisted to and validated against the manifest.
    comparator_name: String,

    /// Current version, swapped atomically on install.
    current: ArcSwap<Version>,
    /// Every version that may still be referenced, including current.
    /// Dead entries are pruned opportunistically.
    live_versions: Mutex<Vec<Weak<Version>>>,

    /// Next file number to allocate.
    next_file_number: AtomicU64,
    /// Number the next manifest file will be created under.
    manifest_number: AtomicU64,
    /// Last used sequence number.
    last_sequence: AtomicU64,
    /// Current write-ahead log number.
    log_number: AtomicU64,
    /// Log number still draining at the last log switch (0 if none).
    prev_log_number: AtomicU64,

    /// Active manifest writer. Doubles as the lock serializing
    /// `log_and_apply` callers.
    manifest: Mutex<Option<ManifestWriter>>,

    /// Per-level cursor: encoded largest key of the most recent
    /// compaction at that level. Empty means unset. Size-triggered
    /// picking resumes after the cursor, rotating through the key
    /// space across successive compactions.
    compact_pointers: RwLock<[Vec<u8>; MAX_LEVELS]>,
}

impl VersionSet {
    /// Create a fresh VersionSet for `db_path`.
    ///
    /// File number 1 is reserved for the first manifest; allocation
    /// starts at 2.
    pub fn new(db_path: &Path, options: Arc<Options>) -> Self {
        let icmp = InternalKeyComparator::new();
        let comparator_name = icmp.user_comparator().name().to_string();

        let vs = Self {
            db_path: db_path.to_path_buf(),
            options,
            icmp,
            comparator_name,
            current: ArcSwap::from_pointee(Version::new()),
            live_versions: Mutex::new(Vec::new()),
            next_file_number: AtomicU64::new(2),
            manifest_number: AtomicU64::new(1),
            last_sequence: AtomicU64::new(0),
            log_number: AtomicU64::new(0),
            prev_log_number: AtomicU64::new(0),
            manifest: Mutex::new(None),
            compact_pointers: RwLock::new(Default::default()),
        };

        let initial = vs.current.load_full();
        vs.live_versions.lock().push(Arc::downgrade(&initial));
        vs
    }

    /// Get the store directory path.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Get the current version.
    pub fn current(&self) -> Arc<Version> {
        self.current.load_full()
    }

    /// Allocate and return a new file number.
    pub fn new_file_number(&self) -> u64 {
        self.next_file_number.fetch_add(1, AtomicOrdering::SeqCst)
    }

    /// The next file number that would be allocated.
    pub fn next_file_number(&self) -> u64 {
        self.next_file_number.load(AtomicOrdering::SeqCst)
    }

    /// Ensure future allocations skip past `number`.
    pub fn mark_file_number_used(&self, number: u64) {
        // Racing allocations only ever raise the counter, so a simple
        // compare-and-bump loop suffices.
        let mut next = self.next_file_number.load(AtomicOrdering::SeqCst);
        while next <= number {
            match self.next_file_number.compare_exchange(
                next,
                number + 1,
                AtomicOrdering::SeqCst,
                AtomicOrdering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => next = observed,
            }
        }
    }

    /// Get the last sequence number.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(AtomicOrdering::SeqCst)
    }

    /// Set the last sequence number.
    pub fn set_last_sequence(&self, seq: u64) {
        debug_assert!(seq >= self.last_sequence());
        self.last_sequence.store(seq, AtomicOrdering::SeqCst)
    }

    /// Get the current log number.
    pub fn log_number(&self) -> u64 {
        self.log_number.load(AtomicOrdering::SeqCst)
    }

    /// Get the previous log number.
    pub fn prev_log_number(&self) -> u64 {
        self.prev_log_number.load(AtomicOrdering::SeqCst)
    }

    /// The number the next manifest will be created under.
    pub fn manifest_number(&self) -> u64 {
        self.manifest_number.load(AtomicOrdering::SeqCst)
    }

    /// Get the comparator name.
    pub fn comparator_name(&self) -> &str {
        &self.comparator_name
    }

    /// Number of files at a level of the current version.
    pub fn num_files_at_level(&self, level: usize) -> usize {
        self.current().num_files(level)
    }

    /// Total bytes at a level of the current version.
    pub fn num_level_bytes(&self, level: usize) -> u64 {
        self.current().level_bytes(level)
    }

    /// Whether the current version wants a compaction.
    pub fn needs_compaction(&self) -> bool {
        self.current().needs_compaction()
    }

    /// Per-level file-count summary of the current version.
    pub fn level_summary(&self) -> String {
        self.current().level_summary()
    }

    /// The compaction cursor for a level (encoded internal key).
    pub fn compact_pointer(&self, level: usize) -> Option<Vec<u8>> {
        let pointers = self.compact_pointers.read();
        if pointers[level].is_empty() {
            None
        } else {
            Some(pointers[level].clone())
        }
    }

    /// File numbers referenced by any live version.
    ///
    /// Anything on disk outside this set (and the active log/manifest)
    /// is garbage and safe to unlink.
    pub fn live_files(&self) -> HashSet<u64> {
        let mut live = HashSet::new();
        let mut versions = self.live_versions.lock();
        versions.retain(|weak| weak.strong_count() > 0);
        for weak in versions.iter() {
            if let Some(version) = weak.upgrade() {
                for (_, file) in version.all_files() {
                    live.insert(file.file_number());
                }
            }
        }
        live
    }

    /// Largest overlap (in bytes) any single file has with its next
    /// level, across the current version.
    pub fn max_next_level_overlapping_bytes(&self) -> u64 {
        let current = self.current();
        let mut result = 0;
        for level in 1..MAX_LEVELS - 1 {
            for file in current.files(level) {
                let overlaps = current.get_overlapping_inputs(
                    level + 1,
                    Some(file.smallest()),
                    Some(file.largest()),
                );
                result = std::cmp::max(result, total_file_size(&overlaps));
            }
        }
        result
    }

    /// Apply `edit` and persist it, installing the resulting version.
    ///
    /// Missing counters are filled from the set's state. The first call
    /// after open (or after recovery) creates a fresh manifest seeded
    /// with a snapshot of the entire current layout and repoints
    /// `CURRENT` at it.
    ///
    /// The manifest append and sync happen under the manifest lock
    /// only: readers keep loading `current` untouched, and concurrent
    /// writers queue behind the lock, appearing in the manifest in
    /// exactly the order their versions are installed.
    ///
    /// On failure `current` is left as it was, and a manifest created
    /// by this call is deleted.
    pub fn log_and_apply(&self, edit: &mut VersionEdit) -> Result<()> {
        if let Some(num) = edit.log_number {
            debug_assert!(num >= self.log_number());
            debug_assert!(num < self.next_file_number());
        } else {
            edit.set_log_number(self.log_number());
        }
        if edit.prev_log_number.is_none() {
            edit.set_prev_log_number(self.prev_log_number());
        }
        edit.set_next_file_number(self.next_file_number());
        edit.set_last_sequence(self.last_sequence());

        let base = self.current();
        let mut builder = VersionBuilder::new(&base);
        builder.apply(edit);
        self.apply_compact_pointers(edit);
        let mut version = builder.save();
        self.finalize(&mut version);

        let mut manifest_guard = self.manifest.lock();

        // Roll over to a new manifest if none is active, writing a
        // snapshot of the current state as its first record.
        let mut created_manifest: Option<PathBuf> = None;
        if manifest_guard.is_none() {
            let number = self.manifest_number();
            let path = manifest_file_path(&self.db_path, number);
            let created = ManifestWriter::create(&path, number).and_then(|mut writer| {
                writer.add_edit(&self.snapshot_edit())?;
                Ok(writer)
            });
            match created {
                Ok(writer) => {
                    *manifest_guard = Some(writer);
                    created_manifest = Some(path);
                }
                Err(err) => {
                    let _ = fs::remove_file(&path);
                    return Err(err);
                }
            }
        }

        let writer = match manifest_guard.as_mut() {
            Some(writer) => writer,
            None => return Err(Error::internal("no active manifest")),
        };

        let record = edit.encode();
        let mut status = writer.add_record(&record).and_then(|_| writer.sync());

        if let Err(err) = &status {
            warn!("manifest write: {}", err);
            // The record may have reached the file even though the
            // write reported failure. If it is there, the logged state
            // matches what we are about to install and the error can
            // be dropped.
            let present = ManifestReader::open(writer.path())
                .map(|mut reader| reader.contains_record(&record))
                .unwrap_or(false);
            if present {
                warn!(
                    "manifest contains record despite error; \
                     advancing to the new version anyway"
                );
                status = Ok(());
            }
        }

        // A freshly created manifest becomes visible by repointing
        // CURRENT at it.
        if status.is_ok() && created_manifest.is_some() {
            status = set_current_file(&self.db_path, self.manifest_number());
        }

        match status {
            Ok(()) => {
                self.install_version(version);
                if let Some(num) = edit.log_number {
                    self.log_number.store(num, AtomicOrdering::SeqCst);
                }
                if let Some(num) = edit.prev_log_number {
                    self.prev_log_number.store(num, AtomicOrdering::SeqCst);
                }
                Ok(())
            }
            Err(err) => {
                if let Some(path) = created_manifest {
                    *manifest_guard = None;
                    let _ = fs::remove_file(&path);
                }
                Err(err)
            }
        }
    }

    /// Rebuild state from the manifest named by `CURRENT`.
    ///
    /// Returns false when no store exists at the path yet. The
    /// descriptor log is left closed; the first `log_and_apply`
    /// afterwards rolls over to a fresh manifest.
    pub fn recover(&self) -> Result<bool> {
        if !current_file_path(&self.db_path).exists() {
            return Ok(false);
        }

        let manifest_number = current_manifest_number(&self.db_path)?;
        let manifest_path = manifest_file_path(&self.db_path, manifest_number);
        let mut reader = ManifestReader::open(&manifest_path)?;

        let mut log_number = None;
        let mut prev_log_number = None;
        let mut next_file_number = None;
        let mut last_sequence = None;

        let base = Version::new();
        let mut builder = VersionBuilder::new(&base);

        while let Some(edit) = reader.read_edit()? {
            if let Some(name) = &edit.comparator {
                if name != &self.comparator_name {
                    return Err(Error::invalid_argument(format!(
                        "{} does not match existing comparator {}",
                        name, self.comparator_name
                    )));
                }
            }

            builder.apply(&edit);
            self.apply_compact_pointers(&edit);

            if let Some(num) = edit.log_number {
                log_number = Some(num);
            }
            if let Some(num) = edit.prev_log_number {
                prev_log_number = Some(num);
            }
            if let Some(num) = edit.next_file_number {
                next_file_number = Some(num);
            }
            if let Some(seq) = edit.last_sequence {
                last_sequence = Some(seq);
            }
        }

        let next_file = next_file_number
            .ok_or_else(|| Error::corruption("no next-file entry in manifest"))?;
        let log_number =
            log_number.ok_or_else(|| Error::corruption("no log-number entry in manifest"))?;
        let last_sequence = last_sequence
            .ok_or_else(|| Error::corruption("no last-sequence entry in manifest"))?;
        let prev_log_number = prev_log_number.unwrap_or(0);

        let mut version = builder.save();
        self.finalize(&mut version);

        // The recovered manifest's number is reused for the next
        // rollover; allocation continues past it. The log numbers are
        // marked used so new files never collide with a live log.
        self.manifest_number
            .store(next_file, AtomicOrdering::SeqCst);
        self.next_file_number
            .store(next_file + 1, AtomicOrdering::SeqCst);
        self.mark_file_number_used(prev_log_number);
        self.mark_file_number_used(log_number);
        self.last_sequence
            .store(last_sequence, AtomicOrdering::SeqCst);
        self.log_number.store(log_number, AtomicOrdering::SeqCst);
        self.prev_log_number
            .store(prev_log_number, AtomicOrdering::SeqCst);

        info!(
            "recovered {}: log {}, sequence {}, {}",
            manifest_path.display(),
            log_number,
            last_sequence,
            version.level_summary()
        );

        self.install_version(version);

        Ok(true)
    }

    /// Select the next compaction to run, if any is due.
    ///
    /// Size-triggered compactions (a level over budget) are preferred
    /// over seek-triggered ones (a file read past too often): an
    /// oversized level degrades every read crossing it, while a hot
    /// file only degrades reads of its own range.
    pub fn pick_compaction(&self) -> Option<Compaction> {
        let current = self.current();

        let size_compaction = current.compaction_score() >= 1.0;

        let (level, initial) = if size_compaction {
            let level = current.compaction_level();
            debug_assert!(level + 1 < MAX_LEVELS);
            let files = current.files(level);

            // Resume after the last compacted key at this level,
            // wrapping around to the start of the key space when the
            // cursor is past every file.
            let pointer = self.compact_pointers.read()[level].clone();
            let picked = files
                .iter()
                .find(|f| {
                    pointer.is_empty()
                        || self.icmp.compare(&f.largest().encode(), &pointer)
                            == Ordering::Greater
                })
                .or_else(|| files.first())
                .cloned();
            (level, picked?)
        } else if let Some((file, level)) = current.file_to_compact() {
            (level, file)
        } else {
            return None;
        };

        let mut compaction = Compaction::new(level, &self.options, Arc::clone(&current));
        compaction.set_inputs(0, vec![initial]);

        // Level-0 files may overlap each other: grow the pick to every
        // file the chosen one transitively overlaps. This replaces the
        // initial pick, which the widened set necessarily includes.
        if level == 0 {
            if let Some((smallest, largest)) = key_range(compaction.inputs(0)) {
                let expanded =
                    current.get_overlapping_inputs(0, Some(&smallest), Some(&largest));
                debug_assert!(!expanded.is_empty());
                compaction.set_inputs(0, expanded);
            }
        }

        self.setup_other_inputs(&mut compaction);
        Some(compaction)
    }

    /// Plan a manual compaction of every file at `level` overlapping
    /// `[begin, end]` (unbounded when `None`).
    ///
    /// A wide range is cut down to a prefix of roughly one output
    /// file's worth, so a store-wide request becomes a sequence of
    /// bounded compactions rather than one enormous one.
    pub fn compact_range(
        &self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Option<Compaction> {
        debug_assert!(level + 1 < MAX_LEVELS);
        let current = self.current();
        let mut inputs = current.get_overlapping_inputs(level, begin, end);
        if inputs.is_empty() {
            return None;
        }

        let limit = self.options.max_file_size_for_level(level);
        let mut total = 0;
        for (i, file) in inputs.iter().enumerate() {
            total += file.file_size();
            if total >= limit {
                inputs.truncate(i + 1);
                break;
            }
        }

        let mut compaction = Compaction::new(level, &self.options, current);
        compaction.set_inputs(0, inputs);
        self.setup_other_inputs(&mut compaction);
        Some(compaction)
    }

    /// Complete a plan whose `inputs[0]` is chosen: pull in the
    /// overlapping parent files, try to grow the pick, and record the
    /// grandparents and the new compaction cursor.
    fn setup_other_inputs(&self, compaction: &mut Compaction) {
        let current = Arc::clone(compaction.input_version());
        let level = compaction.level();

        let (smallest, mut largest) = match key_range(compaction.inputs(0)) {
            Some(range) => range,
            None => return,
        };

        let inputs1 = current.get_overlapping_inputs(level + 1, Some(&smallest), Some(&largest));
        compaction.set_inputs(1, inputs1);

        let (mut all_start, mut all_limit) =
            match key_range2(compaction.inputs(0), compaction.inputs(1)) {
                Some(range) => range,
                None => return,
            };

        // Try to grow the number of level files without changing the
        // level+1 files picked up: more data compacted for the same
        // parent-level cost.
        if !compaction.inputs(1).is_empty() {
            let expanded0 =
                current.get_overlapping_inputs(level, Some(&all_start), Some(&all_limit));
            let inputs0_size = total_file_size(compaction.inputs(0));
            let inputs1_size = total_file_size(compaction.inputs(1));
            let expanded0_size = total_file_size(&expanded0);

            if expanded0.len() > compaction.num_input_files(0)
                && inputs1_size + expanded0_size
                    < self.options.expanded_compaction_byte_size_limit()
            {
                if let Some((new_start, new_limit)) = key_range(&expanded0) {
                    let expanded1 = current.get_overlapping_inputs(
                        level + 1,
                        Some(&new_start),
                        Some(&new_limit),
                    );
                    if expanded1.len() == compaction.num_input_files(1) {
                        info!(
                            "expanding@{} {}+{} ({}+{} bytes) to {}+{} ({}+{} bytes)",
                            level,
                            compaction.num_input_files(0),
                            compaction.num_input_files(1),
                            inputs0_size,
                            inputs1_size,
                            expanded0.len(),
                            expanded1.len(),
                            expanded0_size,
                            inputs1_size,
                        );
                        largest = new_limit;
                        compaction.set_inputs(0, expanded0);
                        compaction.set_inputs(1, expanded1);
                        if let Some(range) =
                            key_range2(compaction.inputs(0), compaction.inputs(1))
                        {
                            all_start = range.0;
                            all_limit = range.1;
                        }
                    }
                }
            }
        }
        // Grandparent overlap is what later splits the output files.
        if level + 2 < MAX_LEVELS {
            compaction.set_grandparents(current.get_overlapping_inputs(
                level + 2,
                Some(&all_start),
                Some(&all_limit),
            ));
        }

        // Advance the cursor immediately rather than when the edit
        // commits: a failed compaction must not retry the same range.
        self.compact_pointers.write()[level] = largest.encode().to_vec();
        compaction.edit_mut().set_compact_pointer(level, largest);
    }

    /// A full-state edit: replaying it alone reproduces the current
    /// layout. Written as the first record of every new manifest.
    fn snapshot_edit(&self) -> VersionEdit {
        let mut edit = VersionEdit::new();
        edit.set_comparator(self.comparator_name.clone());

        let pointers = self.compact_pointers.read();
        for (level, pointer) in pointers.iter().enumerate() {
            if !pointer.is_empty() {
                if let Some(key) = InternalKey::decode(pointer) {
                    edit.set_compact_pointer(level, key);
                }
            }
        }

        let current = self.current();
        for (level, file) in current.all_files() {
            edit.add_file(level, file.as_ref().clone());
        }

        edit
    }

    /// Compute the next compaction choice for a freshly built version.
    fn finalize(&self, version: &mut Version) {
        let mut best_level = 0;
        let mut best_score = -1.0_f64;

        for level in 0..MAX_LEVELS - 1 {
            let score = if level == 0 {
                // Level 0 is scored by file count, not bytes: every
                // read merges all level-0 files, so with small files
                // (tiny write buffers, heavy compression) a byte
                // budget would let far too many of them pile up.
                version.num_files(0) as f64 / self.options.l0_compaction_trigger as f64
            } else {
                version.level_bytes(level) as f64
                    / self.options.max_bytes_for_level(level) as f64
            };

            if score > best_score {
                best_level = level;
                best_score = score;
            }
        }

        version.set_compaction_info(best_score, best_level);
    }

    fn apply_compact_pointers(&self, edit: &VersionEdit) {
        if edit.compact_pointers.is_empty() {
            return;
        }
        let mut pointers = self.compact_pointers.write();
        for (level, key) in &edit.compact_pointers {
            pointers[*level] = key.encode().to_vec();
        }
    }

    /// Publish `version` as current and register it for live tracking.
    fn install_version(&self, version: Version) {
        let version = Arc::new(version);
        {
            let mut live = self.live_versions.lock();
            live.retain(|weak| weak.strong_count() > 0);
            live.push(Arc::downgrade(&version));
        }
        self.current.store(version);
    }
}

/// Smallest and largest internal keys across `files`.
fn key_range(files: &[Arc<FileMetadata>]) -> Option<(InternalKey, InternalKey)> {
    let mut smallest: Option<&InternalKey> = None;
    let mut largest: Option<&InternalKey> = None;
    for file in files {
        if smallest.map_or(true, |s| file.smallest() < s) {
            smallest = Some(file.smallest());
        }
        if largest.map_or(true, |l| file.largest() > l) {
            largest = Some(file.largest());
        }
    }
    match (smallest, largest) {
        (Some(s), Some(l)) => Some((s.clone(), l.clone())),
        _ => None,
    }
}

/// Smallest and largest internal keys across two file lists.
fn key_range2(
    files1: &[Arc<FileMetadata>],
    files2: &[Arc<FileMetadata>],
) -> Option<(InternalKey, InternalKey)> {
    match (key_range(files1), key_range(files2)) {
        (Some((s1, l1)), Some((s2, l2))) => {
            Some((std::cmp::min(s1, s2), std::cmp::max(l1, l2)))
        }
        (Some(range), None) | (None, Some(range)) => Some(range),
        (None, None) => None,
    }
}

/// Applies a sequence of edits to a base version, producing the new
/// version in one pass without materializing intermediates.
struct VersionBuilder<'a> {
    base: &'a Version,
    /// Per-level file numbers deleted by the applied edits.
    deleted_files: [HashSet<u64>; MAX_LEVELS],
    /// Per-level added files, kept in (smallest, number) order.
    added_files: [BTreeSet<Arc<FileMetadata>>; MAX_LEVELS],
}

impl<'a> VersionBuilder<'a> {
    fn new(base: &'a Version) -> Self {
        Self {
            base,
            deleted_files: Default::default(),
            added_files: Default::default(),
        }
    }

    /// Fold one edit into the accumulated state.
    fn apply(&mut self, edit: &VersionEdit) {
        for &(level, number) in &edit.deleted_files {
            self.deleted_files[level].insert(number);
        }

        for (level, file) in &edit.new_files {
            let file = Arc::new(file.clone());
            // A file deleted and re-added within the same accumulated
            // run of edits is simply kept.
            self.deleted_files[*level].remove(&file.file_number());
            self.added_files[*level].insert(file);
        }
    }

    /// Materialize the accumulated state as a new version.
    fn save(self) -> Version {
        let mut files: [Vec<Arc<FileMetadata>>; MAX_LEVELS] = Default::default();

        for (level, out) in files.iter_mut().enumerate() {
            // Merge the added files into the base files, preserving
            // (smallest, number) order and dropping deletions. Each
            // added file is preceded by the chunk of base files that
            // sort before it.
            let base_files = self.base.files(level);
            let added = &self.added_files[level];
            let deleted = &self.deleted_files[level];
            out.reserve(base_files.len() + added.len());

            let mut base_pos = 0;
            for added_file in added {
                let chunk_end = base_pos
                    + base_files[base_pos..].partition_point(|f| f < added_file);
                for file in &base_files[base_pos..chunk_end] {
                    Self::maybe_add_file(deleted, out, level, file);
                }
                base_pos = chunk_end;
                Self::maybe_add_file(deleted, out, level, added_file);
            }
            for file in &base_files[base_pos..] {
                Self::maybe_add_file(deleted, out, level, file);
            }
        }

        Version::with_files(files)
    }

    fn maybe_add_file(
        deleted: &HashSet<u64>,
        files: &mut Vec<Arc<FileMetadata>>,
        level: usize,
        file: &Arc<FileMetadata>,
    ) {
        if deleted.contains(&file.file_number()) {
            return;
        }
        if level > 0 {
            if let Some(prev) = files.last() {
                // Levels above 0 must stay disjoint.
                debug_assert!(
                    prev.largest() < file.smallest(),
                    "overlapping ranges in level {}: {:?} vs {:?}",
                    level,
                    prev.largest(),
                    file.smallest(),
                );
            }
        }
        files.push(Arc::clone(file));
    }
}
