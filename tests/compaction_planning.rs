//! End-to-end compaction planning scenarios driven through the public
//! API, with table contents served by an in-memory table cache.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tempfile::tempdir;

use strata::{
    Comparator, InternalKey, InternalKeyComparator, KvIterator, LookupKey, LookupResult, Options,
    OptionsBuilder, Result, TableCache, VersionEdit, VersionSet,
};

const MIB: u64 = 1024 * 1024;

fn make_key(user_key: &[u8], seq: u64) -> InternalKey {
    InternalKey::for_value(Bytes::copy_from_slice(user_key), seq)
}

/// Table cache stub serving sorted entries from memory.
#[derive(Default)]
struct MemTableCache {
    tables: RwLock<HashMap<u64, Vec<(Bytes, Bytes)>>>,
}

impl MemTableCache {
    fn add_table(&self, file_number: u64, mut entries: Vec<(InternalKey, Bytes)>) {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        self.tables.write().insert(
            file_number,
            entries.into_iter().map(|(k, v)| (k.encode(), v)).collect(),
        );
    }
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
        self.index = if self.entries.is_empty() {
            0
        } else {
            self.entries.len() - 1
        };
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
        file_number: u64,
        _file_size: u64,
        internal_key: &[u8],
    ) -> Result<Option<(Bytes, Bytes)>> {
        let icmp = InternalKeyComparator::new();
        let tables = self.tables.read();
        let entries = tables.get(&file_number).cloned().unwrap_or_default();
        Ok(entries
            .iter()
            .find(|(k, _)| icmp.compare(k, internal_key) != Ordering::Less)
            .cloned())
    }

    fn iter(&self, file_number: u64, _file_size: u64) -> Result<Box<dyn KvIterator>> {
        let entries = self
            .tables
            .read()
            .get(&file_number)
            .cloned()
            .unwrap_or_default();
        Ok(Box::new(MemTableIterator { entries, index: 0 }))
    }
}

#[test]
fn seek_exhaustion_triggers_compaction_of_the_charged_file() {
    let dir = tempdir().unwrap();
    let vs = VersionSet::new(dir.path(), Arc::new(Options::default()));
    let cache = MemTableCache::default();

    // Level 1 holds a 3MB file covering [a, m] that does not contain
    // the looked-up key; level 2 holds the actual value. Every lookup
    // consults the level-1 file first, misses, and moves on, charging
    // the level-1 file's seek budget.
    let mut edit = VersionEdit::new();
    edit.add_file_info(1, 10, 3 * MIB, make_key(b"a", 1), make_key(b"m", 1));
    edit.add_file_info(2, 20, MIB, make_key(b"a", 1), make_key(b"z", 1));
    vs.log_and_apply(&mut edit).unwrap();

    cache.add_table(10, vec![(make_key(b"a", 1), Bytes::from("other"))]);
    cache.add_table(20, vec![(make_key(b"g", 1), Bytes::from("value"))]);

    // A 3MB file affords 3MB / 16KB = 192 seeks.
    let budget = 3 * MIB / 16384;
    assert_eq!(budget, 192);

    let current = vs.current();
    for i in 0..budget {
        let (result, stats) = current
            .get(&LookupKey::new(Bytes::from_static(b"g"), 100), &cache)
            .unwrap();
        assert_eq!(result, LookupResult::Found(Bytes::from("value")));

        let queued = current.update_stats(&stats);
        assert_eq!(queued, i == budget - 1, "queued on iteration {}", i);
    }

    // The pick is seek-triggered: the charged file plus every level-2
    // file overlapping its range.
    let compaction = vs.pick_compaction().unwrap();
    assert_eq!(compaction.level(), 1);
    assert_eq!(compaction.num_input_files(0), 1);
    assert_eq!(compaction.input(0, 0).file_number(), 10);
    assert_eq!(compaction.num_input_files(1), 1);
    assert_eq!(compaction.input(1, 0).file_number(), 20);
}

#[test]
fn input_expansion_grows_level_files_for_free() {
    let dir = tempdir().unwrap();
    // Shrink the level-1 budget so three 1MB files put it over.
    let options = OptionsBuilder::new()
        .max_bytes_for_level_base(2 * MIB)
        .build()
        .unwrap();
    let vs = VersionSet::new(dir.path(), Arc::new(options));

    // Level 1: A=[a,e], B=[f,j], C=[k,o], 1MB each.
    // Level 2: X=[a,z], 5MB, overlapping all of them.
    let mut edit = VersionEdit::new();
    edit.add_file_info(1, 11, MIB, make_key(b"a", 1), make_key(b"e", 1));
    edit.add_file_info(1, 12, MIB, make_key(b"f", 1), make_key(b"j", 1));
    edit.add_file_info(1, 13, MIB, make_key(b"k", 1), make_key(b"o", 1));
    edit.add_file_info(2, 21, 5 * MIB, make_key(b"a", 1), make_key(b"z", 1));
    vs.log_and_apply(&mut edit).unwrap();

    // The initial pick is [A] + [X]. Since X spans [a, z], the whole
    // of level 1 fits under X for no extra parent cost, and the
    // expanded total (5MB + 3MB) is far below the expansion cap, so
    // the plan grows to [A, B, C] + [X].
    let compaction = vs.pick_compaction().unwrap();
    assert_eq!(compaction.level(), 1);

    let level_files: Vec<u64> = compaction
        .inputs(0)
        .iter()
        .map(|f| f.file_number())
        .collect();
    assert_eq!(level_files, vec![11, 12, 13]);

    let parent_files: Vec<u64> = compaction
        .inputs(1)
        .iter()
        .map(|f| f.file_number())
        .collect();
    assert_eq!(parent_files, vec![21]);
}

#[test]
fn expansion_refused_when_it_would_pull_in_more_parents() {
    let dir = tempdir().unwrap();
    let options = OptionsBuilder::new()
        .max_bytes_for_level_base(2 * MIB)
        .build()
        .unwrap();
    let vs = VersionSet::new(dir.path(), Arc::new(options));

    // Level 2 has two files; widening the level-1 pick would drag the
    // second one in, so the expansion must be declined.
    let mut edit = VersionEdit::new();
    edit.add_file_info(1, 11, 2 * MIB, make_key(b"a", 1), make_key(b"e", 1));
    edit.add_file_info(1, 12, 2 * MIB, make_key(b"f", 1), make_key(b"j", 1));
    edit.add_file_info(2, 21, MIB, make_key(b"a", 1), make_key(b"g", 1));
    edit.add_file_info(2, 22, MIB, make_key(b"h", 1), make_key(b"z", 1));
    vs.log_and_apply(&mut edit).unwrap();

    let compaction = vs.pick_compaction().unwrap();
    assert_eq!(compaction.level(), 1);

    // Initial pick [A=11] overlaps only parent 21 ([a,g]). Expanding
    // to [11, 12] would also overlap 22, so inputs stay put.
    let level_files: Vec<u64> = compaction
        .inputs(0)
        .iter()
        .map(|f| f.file_number())
        .collect();
    assert_eq!(level_files, vec![11]);
    let parent_files: Vec<u64> = compaction
        .inputs(1)
        .iter()
        .map(|f| f.file_number())
        .collect();
    assert_eq!(parent_files, vec![21]);
}

#[test]
fn trivial_move_reassigns_the_file_without_merging() {
    let dir = tempdir().unwrap();
    let options = OptionsBuilder::new()
        .max_bytes_for_level_base(2 * MIB)
        .build()
        .unwrap();
    let vs = VersionSet::new(dir.path(), Arc::new(options));

    // One oversized file at level 2, nothing at level 3 or 4.
    let mut edit = VersionEdit::new();
    edit.add_file_info(2, 30, 40 * MIB, make_key(b"p", 1), make_key(b"q", 1));
    vs.log_and_apply(&mut edit).unwrap();

    let mut compaction = vs.pick_compaction().unwrap();
    assert_eq!(compaction.level(), 2);
    assert!(compaction.is_trivial_move());

    // The executor's whole job here is one edit: drop the file from
    // level 2 and re-add it at level 3.
    let file = Arc::clone(compaction.input(0, 0));
    compaction.add_input_deletions();
    compaction.edit_mut().add_file_info(
        3,
        file.file_number(),
        file.file_size(),
        file.smallest().clone(),
        file.largest().clone(),
    );
    let mut edit = compaction.into_edit();
    vs.log_and_apply(&mut edit).unwrap();

    assert_eq!(vs.num_files_at_level(2), 0);
    assert_eq!(vs.num_files_at_level(3), 1);
    assert_eq!(vs.current().files(3)[0].file_number(), 30);
}

#[test]
fn tombstones_survive_while_deeper_levels_hold_the_key() {
    let dir = tempdir().unwrap();
    let vs = VersionSet::new(dir.path(), Arc::new(Options::default()));

    // A level 1 -> 2 compaction while level 3 holds G=[t,w].
    let mut edit = VersionEdit::new();
    edit.add_file_info(1, 10, MIB, make_key(b"s", 5), make_key(b"v", 5));
    edit.add_file_info(3, 30, MIB, make_key(b"t", 1), make_key(b"w", 1));
    vs.log_and_apply(&mut edit).unwrap();

    let mut compaction = vs
        .compact_range(1, Some(&make_key(b"s", 5)), Some(&make_key(b"v", 5)))
        .unwrap();
    assert_eq!(compaction.level(), 1);

    // "u" could still be shadowing an older value inside G; its
    // tombstone must be kept. "a" has nothing below it.
    assert!(!compaction.is_base_level_for_key(b"u"));

    let mut compaction2 = {
        let dir2 = tempdir().unwrap();
        let vs2 = VersionSet::new(dir2.path(), Arc::new(Options::default()));
        let mut edit = VersionEdit::new();
        edit.add_file_info(1, 10, MIB, make_key(b"s", 5), make_key(b"v", 5));
        vs2.log_and_apply(&mut edit).unwrap();
        vs2.compact_range(1, Some(&make_key(b"s", 5)), Some(&make_key(b"v", 5)))
            .unwrap()
    };
    // With no deeper file containing "u", the tombstone may go.
    assert!(compaction2.is_base_level_for_key(b"u"));

    // Executing the first plan records the inputs as deletions.
    compaction.add_input_deletions();
    assert!(compaction.edit().deleted_files.contains(&(1, 10)));
}

#[test]
fn compaction_outcome_applies_as_one_atomic_edit() {
    let dir = tempdir().unwrap();
    let options = OptionsBuilder::new()
        .max_bytes_for_level_base(2 * MIB)
        .build()
        .unwrap();
    let vs = VersionSet::new(dir.path(), Arc::new(options));
    vs.mark_file_number_used(21);

    let mut edit = VersionEdit::new();
    edit.add_file_info(1, 11, 3 * MIB, make_key(b"a", 1), make_key(b"e", 1));
    edit.add_file_info(2, 21, MIB, make_key(b"a", 1), make_key(b"c", 1));
    vs.log_and_apply(&mut edit).unwrap();

    let mut compaction = vs.pick_compaction().unwrap();
    assert_eq!(compaction.level(), 1);
    assert!(!compaction.is_trivial_move());

    // Pretend the merge produced one output table.
    let output_number = vs.new_file_number();
    compaction.add_input_deletions();
    compaction.edit_mut().add_file_info(
        2,
        output_number,
        2 * MIB,
        make_key(b"a", 1),
        make_key(b"e", 1),
    );
    let mut edit = compaction.into_edit();
    vs.log_and_apply(&mut edit).unwrap();

    assert_eq!(vs.num_files_at_level(1), 0);
    assert_eq!(vs.num_files_at_level(2), 1);
    assert_eq!(vs.current().files(2)[0].file_number(), output_number);

    // The old inputs are no longer live once no reader holds them.
    let live = vs.live_files();
    assert!(!live.contains(&11));
    assert!(!live.contains(&21));
    assert!(live.contains(&output_number));
}

#[test]
fn version_iterators_cover_every_level() {
    let dir = tempdir().unwrap();
    let vs = VersionSet::new(dir.path(), Arc::new(Options::default()));
    let cache: Arc<dyn TableCache> = {
        let cache = MemTableCache::default();
        cache.add_table(1, vec![(make_key(b"b", 9), Bytes::from("l0"))]);
        cache.add_table(2, vec![(make_key(b"a", 1), Bytes::from("l1a"))]);
        cache.add_table(3, vec![(make_key(b"m", 1), Bytes::from("l1m"))]);
        Arc::new(cache)
    };

    let mut edit = VersionEdit::new();
    edit.add_file_info(0, 1, 1024, make_key(b"b", 9), make_key(b"b", 9));
    edit.add_file_info(1, 2, 1024, make_key(b"a", 1), make_key(b"a", 1));
    edit.add_file_info(1, 3, 1024, make_key(b"m", 1), make_key(b"m", 1));
    vs.log_and_apply(&mut edit).unwrap();

    // One iterator for the level-0 file, one concatenating iterator
    // for the two level-1 files.
    let mut iters = vs.current().add_iterators(&cache).unwrap();
    assert_eq!(iters.len(), 2);

    let mut values = Vec::new();
    for iter in iters.iter_mut() {
        iter.seek_to_first();
        while iter.valid() {
            values.push(Bytes::copy_from_slice(iter.value()));
            iter.next();
        }
    }
    assert_eq!(values, vec!["l0", "l1a", "l1m"]);
}
