//! Folds the configuration fragment shipped with a bootstrap into the node's config file.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::BootstrapError;
use crate::layout::{remove_file_if_exists, rename, with_suffix, BACKUP_SUFFIX, TMP_SUFFIX};

/// Lines carrying this directive are dropped from the existing config; the fragment brings its own.
pub const PEER_SEED_DIRECTIVE: &str = "addnode";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MergeOutcome {
    NothingToMerge,
    /// No config existed, the fragment was copied verbatim.
    Copied,
    Merged,
}

impl MergeOutcome {
    pub fn changed_config(self) -> bool {
        !matches!(self, MergeOutcome::NothingToMerge)
    }
}

/// The live config is never absent during a merge: the backup is a copy and the merged
/// file replaces the config atomically. A rerun after a completed merge is a no-op.
pub fn merge_config(config: &Path, fragment: &Path) -> Result<MergeOutcome, BootstrapError> {
    let fragment_text = match fs::read_to_string(fragment) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(MergeOutcome::NothingToMerge)
        }
        Err(err) => return Err(BootstrapError::io("read", fragment, err)),
    };

    let backup = with_suffix(config, BACKUP_SUFFIX);
    let original = match fs::read_to_string(config) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return restore_from_backup(config, &backup, &fragment_text);
        }
        Err(err) => return Err(BootstrapError::io("read", config, err)),
    };

    if let Ok(previous) = fs::read_to_string(&backup) {
        if merged_text(&previous, &fragment_text) == original {
            return Ok(MergeOutcome::Merged);
        }
    }

    remove_file_if_exists(&backup)?;
    write_atomic(&backup, original.as_bytes())?;
    write_atomic(config, merged_text(&original, &fragment_text).as_bytes())?;
    Ok(MergeOutcome::Merged)
}

/// A config that vanished after its backup was taken is rebuilt from the backup.
fn restore_from_backup(
    config: &Path,
    backup: &Path,
    fragment_text: &str,
) -> Result<MergeOutcome, BootstrapError> {
    match fs::read_to_string(backup) {
        Ok(previous) => {
            write_atomic(config, merged_text(&previous, fragment_text).as_bytes())?;
            Ok(MergeOutcome::Merged)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            write_atomic(config, fragment_text.as_bytes())?;
            Ok(MergeOutcome::Copied)
        }
        Err(err) => Err(BootstrapError::io("read", backup, err)),
    }
}

fn merged_text(original: &str, fragment: &str) -> String {
    let mut merged = String::with_capacity(original.len() + fragment.len());
    for line in config_lines(original)
        .filter(|line| !line.contains(PEER_SEED_DIRECTIVE))
        .chain(config_lines(fragment))
    {
        merged.push_str(line);
        merged.push('\n');
    }
    merged
}

/// Splits on `\n` only, so `\r` and other line content survive untouched.
fn config_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive('\n')
        .map(|line| line.strip_suffix('\n').unwrap_or(line))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BootstrapError> {
    let tmp = with_suffix(path, TMP_SUFFIX);
    fs::write(&tmp, bytes).map_err(BootstrapError::io_at("write", &tmp))?;
    rename(&tmp, path)
}
