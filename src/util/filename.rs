//! Store file naming conventions.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// File types in the store directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// SSTable data file.
    Table,
    /// Manifest file (version history).
    Manifest,
    /// Current file (points to the active manifest).
    Current,
    /// Temporary file.
    Temp,
}

/// Generate the current file path.
pub fn current_file_path(db_path: &Path) -> PathBuf {
    db_path.join("CURRENT")
}

/// Generate a manifest file name.
pub fn manifest_file_name(number: u64) -> String {
    format!("MANIFEST-{:06}", number)
}

/// Generate a manifest file path.
pub fn manifest_file_path(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(manifest_file_name(number))
}

/// Generate an SSTable file path.
pub fn table_file_path(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(format!("{:06}.sst", number))
}

/// Generate a temporary file path.
pub fn temp_file_path(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(format!("{:06}.tmp", number))
}

/// Parse a file name and return its type and number.
///
/// Returns `None` if the file name doesn't match any known pattern.
pub fn parse_file_name(name: &str) -> Option<(FileType, u64)> {
    if name == "CURRENT" {
        return Some((FileType::Current, 0));
    }

    if let Some(suffix) = name.strip_prefix("MANIFEST-") {
        if let Ok(number) = suffix.parse::<u64>() {
            return Some((FileType::Manifest, number));
        }
        return None;
    }

    if let Some(dot_pos) = name.rfind('.') {
        let (num_str, ext) = name.split_at(dot_pos);
        let ext = &ext[1..];

        if let Ok(number) = num_str.parse::<u64>() {
            let file_type = match ext {
                "sst" => FileType::Table,
                "tmp" => FileType::Temp,
                _ => return None,
            };
            return Some((file_type, number));
        }
    }

    None
}

/// Point the CURRENT file at the given manifest.
///
/// Writes a temp file, syncs it, then renames over CURRENT so readers
/// never observe a partially written pointer.
pub fn set_current_file(db_path: &Path, manifest_number: u64) -> Result<()> {
    let manifest_name = manifest_file_name(manifest_number);
    let current_path = current_file_path(db_path);
    let temp_path = temp_file_path(db_path, manifest_number);

    {
        let mut file = File::create(&temp_path)?;
        writeln!(file, "{}", manifest_name)?;
        file.sync_all()?;
    }

    fs::rename(&temp_path, &current_path)?;

    Ok(())
}

/// Read the CURRENT file and return the manifest name it points at.
///
/// The file must consist of the manifest name followed by a newline.
pub fn read_current_file(db_path: &Path) -> Result<String> {
    let content = fs::read_to_string(current_file_path(db_path))?;
    if content.is_empty() || !content.ends_with('\n') {
        return Err(Error::corruption("CURRENT file does not end with newline"));
    }
    Ok(content[..content.len() - 1].to_string())
}

/// Extract the manifest number named by the CURRENT file.
pub fn current_manifest_number(db_path: &Path) -> Result<u64> {
    let name = read_current_file(db_path)?;
    match parse_file_name(&name) {
        Some((FileType::Manifest, number)) => Ok(number),
        _ => Err(Error::corruption(format!(
            "CURRENT names an invalid manifest: {}",
            name
        ))),
    }
}
