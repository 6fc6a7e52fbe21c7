//! Configuration options for strata.

/// Maximum number of levels in the LSM tree.
pub const MAX_LEVELS: usize = 7;

/// Default number of level-0 files that makes the level due for compaction.
pub const DEFAULT_L0_COMPACTION_TRIGGER: usize = 4;

/// Default target size for SSTable files at levels >= 1 (2MB).
pub const DEFAULT_TARGET_FILE_SIZE: u64 = 2 * 1024 * 1024;

/// Default size budget for level 1 (10MB). Each deeper level gets
/// `max_bytes_for_level_multiplier` times the budget of the previous one.
pub const DEFAULT_MAX_BYTES_FOR_LEVEL_BASE: u64 = 10 * 1024 * 1024;

/// Default level size multiplier.
pub const DEFAULT_LEVEL_MULTIPLIER: u64 = 10;

/// Default ceiling for the level a new memtable flush may be placed at.
pub const DEFAULT_MAX_MEM_COMPACT_LEVEL: usize = 2;

/// Configuration for version management and compaction planning.
#[derive(Debug, Clone)]
pub struct Options {
    /// Enable extra verification (paranoid checks).
    pub paranoid_checks: bool,

    /// Number of level-0 files that yields a compaction score of 1.
    ///
    /// Level 0 is scored by file count rather than bytes: every read
    /// merges all level-0 files, so their number governs read latency.
    pub l0_compaction_trigger: usize,

    /// Target file size for levels >= 1.
    pub target_file_size_base: u64,

    /// Size budget for level 1.
    pub max_bytes_for_level_base: u64,

    /// Size multiplier applied per level beyond level 1.
    pub max_bytes_for_level_multiplier: u64,

    /// Highest level a freshly flushed memtable may be placed at.
    pub max_mem_compact_level: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            paranoid_checks: false,
            l0_compaction_trigger: DEFAULT_L0_COMPACTION_TRIGGER,
            target_file_size_base: DEFAULT_TARGET_FILE_SIZE,
            max_bytes_for_level_base: DEFAULT_MAX_BYTES_FOR_LEVEL_BASE,
            max_bytes_for_level_multiplier: DEFAULT_LEVEL_MULTIPLIER,
            max_mem_compact_level: DEFAULT_MAX_MEM_COMPACT_LEVEL,
        }
    }
}

impl Options {
    /// Create new options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the options.
    pub fn validate(&self) -> crate::Result<()> {
        if self.l0_compaction_trigger == 0 {
            return Err(crate::Error::invalid_argument(
                "l0_compaction_trigger must be at least 1",
            ));
        }
        if self.target_file_size_base == 0 {
            return Err(crate::Error::invalid_argument(
                "target_file_size_base must be nonzero",
            ));
        }
        if self.max_bytes_for_level_base == 0 {
            return Err(crate::Error::invalid_argument(
                "max_bytes_for_level_base must be nonzero",
            ));
        }
        if self.max_bytes_for_level_multiplier < 2 {
            return Err(crate::Error::invalid_argument(
                "max_bytes_for_level_multiplier must be at least 2",
            ));
        }
        if self.max_mem_compact_level >= MAX_LEVELS - 1 {
            return Err(crate::Error::invalid_argument(format!(
                "max_mem_compact_level must be below {}",
                MAX_LEVELS - 1
            )));
        }
        Ok(())
    }

    /// Size budget for a given level.
    ///
    /// Level 0 has no byte budget (it is scored by file count); the
    /// returned value is only meaningful for levels >= 1.
    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        let mut size = self.max_bytes_for_level_base;
        for _ in 1..level {
            size *= self.max_bytes_for_level_multiplier;
        }
        size
    }

    /// Maximum file size produced by a compaction into `level`.
    ///
    /// Currently uniform across levels. This could vary per level to
    /// reduce the number of files at deep levels.
    pub fn max_file_size_for_level(&self, _level: usize) -> u64 {
        self.target_file_size_base
    }

    /// Cap on bytes of grandparent (level + 2) overlap per output file.
    ///
    /// An output file overlapping too many grandparent files would make
    /// the next compaction of that file expensive.
    pub fn max_grand_parent_overlap_bytes(&self) -> u64 {
        10 * self.target_file_size_base
    }

    /// Cap on total bytes in an expanded compaction.
    pub fn expanded_compaction_byte_size_limit(&self) -> u64 {
        25 * self.target_file_size_base
    }
}

/// Builder for Options.
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Create a new builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set paranoid_checks.
    pub fn paranoid_checks(mut self, value: bool) -> Self {
        self.options.paranoid_checks = value;
        self
    }

    /// Set the level-0 compaction trigger.
    pub fn l0_compaction_trigger(mut self, count: usize) -> Self {
        self.options.l0_compaction_trigger = count;
        self
    }

    /// Set the target file size for levels >= 1.
    pub fn target_file_size_base(mut self, size: u64) -> Self {
        self.options.target_file_size_base = size;
        self
    }

    /// Set the level-1 size budget.
    pub fn max_bytes_for_level_base(mut self, size: u64) -> Self {
        self.options.max_bytes_for_level_base = size;
        self
    }

    /// Set the per-level size multiplier.
    pub fn max_bytes_for_level_multiplier(mut self, mult: u64) -> Self {
        self.options.max_bytes_for_level_multiplier = mult;
        self
    }

    /// Build the options.
    pub fn build(self) -> crate::Result<Options> {
        self.options.validate()?;
        Ok(self.options)
    }
}
