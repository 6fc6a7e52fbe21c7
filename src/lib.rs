//! # strata
//!
//! The version-management and compaction-planning core of an LSM-tree
//! key-value storage engine.
//!
//! Given an on-disk corpus of immutable sorted tables organized into
//! numbered levels, this crate answers three questions:
//!
//! - **What does the store look like right now?** Atomic snapshots
//!   ([`Version`]) that readers hold while background work changes the
//!   layout underneath them.
//! - **How does the layout durably evolve?** Deltas ([`VersionEdit`])
//!   appended to a manifest log and replayed on startup.
//! - **What should be compacted next?** Scoring, file selection, and
//!   boundary expansion ([`VersionSet::pick_compaction`]) producing
//!   [`Compaction`] plans.
//!
//! Reading and writing the tables themselves is the host's business:
//! the host hands in a [`TableCache`] and executes the planned
//! compactions, feeding each outcome back as a `VersionEdit`.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use strata::{Options, VersionEdit, VersionSet};
//!
//! let options = Arc::new(Options::default());
//! let versions = VersionSet::new(path, options);
//! versions.recover()?;
//!
//! // A memtable flush produced table 7; record it at level 0.
//! let mut edit = VersionEdit::new();
//! edit.add_file_info(0, 7, file_size, smallest, largest);
//! versions.log_and_apply(&mut edit)?;
//!
//! // Background worker: plan and execute one compaction.
//! if let Some(mut compaction) = versions.pick_compaction() {
//!     // ... merge the inputs, emit new tables into the edit ...
//!     compaction.add_input_deletions();
//!     versions.log_and_apply(compaction.edit_mut())?;
//! }
//! ```

// Public modules
pub mod error;
pub mod options;
pub mod types;

// Internal modules
mod compaction;
mod table;
mod util;
mod version;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use options::{Options, OptionsBuilder, MAX_LEVELS};
pub use types::{InternalKey, LookupKey, LookupResult, ValueType};

pub use compaction::Compaction;
pub use table::{KvIterator, TableCache};
pub use version::{
    total_file_size, ConcatenatingIterator, FileMetadata, GetStats, LevelFileNumIterator,
    ManifestReader, ManifestWriter, Version, VersionEdit, VersionSet,
};

pub use util::comparator::{BytewiseComparator, Comparator, InternalKeyComparator};
pub use util::filename::{
    current_file_path, manifest_file_path, parse_file_name, set_current_file, table_file_path,
    FileType,
};
