//! Names the bootstrap subsystem reads and rewrites inside the data directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::BootstrapError;

pub const ARCHIVE_FILE_NAME: &str = "bootstrap.zip";
pub const STAGING_DIR_NAME: &str = "bootstrap";
pub const VERIFIED_MARKER_NAME: &str = "verified";
pub const CONF_FRAGMENT_NAME: &str = "ledgerboot.conf";
pub const PEERS_FILE_NAME: &str = "peers.dat";
pub const BANLIST_FILE_NAME: &str = "banlist.dat";
pub const LOCK_FILE_NAME: &str = ".bootstrap.lock";
pub const BACKUP_SUFFIX: &str = ".bak";
pub const TMP_SUFFIX: &str = ".tmp";

/// Sub-trees carried by a bootstrap archive and replaced in the data directory.
pub const LEDGER_DIRS: [&str; 3] = ["blocks", "chainstate", "zerocoin"];

#[derive(Clone, Debug)]
pub struct BootstrapLayout {
    data_dir: PathBuf,
}

impl BootstrapLayout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn archive_path(&self) -> PathBuf {
        self.data_dir.join(ARCHIVE_FILE_NAME)
    }

    pub fn archive_tmp_path(&self) -> PathBuf {
        with_suffix(&self.archive_path(), TMP_SUFFIX)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join(STAGING_DIR_NAME)
    }

    pub fn verified_marker(&self) -> PathBuf {
        self.staging_dir().join(VERIFIED_MARKER_NAME)
    }

    pub fn conf_fragment(&self) -> PathBuf {
        self.staging_dir().join(CONF_FRAGMENT_NAME)
    }

    pub fn staged_dir(&self, name: &str) -> PathBuf {
        self.staging_dir().join(name)
    }

    pub fn live_dir(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    pub fn backup_dir(&self, name: &str) -> PathBuf {
        with_suffix(&self.live_dir(name), BACKUP_SUFFIX)
    }

    pub fn peers_file(&self) -> PathBuf {
        self.data_dir.join(PEERS_FILE_NAME)
    }

    pub fn banlist_file(&self) -> PathBuf {
        self.data_dir.join(BANLIST_FILE_NAME)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.data_dir.join(LOCK_FILE_NAME)
    }

    /// Removes the staging root, the staged archive and any partial download.
    ///
    /// `keep` protects a user-selected source archive that happens to live at the
    /// staged archive path. Missing targets are not an error.
    pub fn cleanup(&self, keep: Option<&Path>) -> Result<(), BootstrapError> {
        remove_dir_if_exists(&self.staging_dir())?;
        let archive = self.archive_path();
        if !keep.is_some_and(|keep| same_file(keep, &archive)) {
            remove_file_if_exists(&archive)?;
        }
        remove_file_if_exists(&self.archive_tmp_path())?;
        Ok(())
    }
}

/// Compares resolved paths so `./`, `..` and symlinked spellings of one file match.
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Appends `suffix` to the final path component (`blocks` -> `blocks.bak`).
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Returns whether something was removed.
pub fn remove_file_if_exists(path: &Path) -> Result<bool, BootstrapError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(BootstrapError::io("remove", path, err)),
    }
}

/// Returns whether something was removed.
pub fn remove_dir_if_exists(path: &Path) -> Result<bool, BootstrapError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(BootstrapError::io("remove", path, err)),
    }
}

pub fn rename(from: &Path, to: &Path) -> Result<(), BootstrapError> {
    fs::rename(from, to).map_err(|err| {
        BootstrapError::io(
            "rename",
            from,
            io::Error::new(err.kind(), format!("to {}: {err}", to.display())),
        )
    })
}
