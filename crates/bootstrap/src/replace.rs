//! Swaps staged ledger sub-trees into the live data directory.
//!
//! Every step is guarded by an existence check, so a run that died halfway can be
//! repeated and will finish only the work that is still outstanding.

use ledgerboot_log::{log_debug, log_info};

use crate::error::BootstrapError;
use crate::layout::{
    remove_dir_if_exists, remove_file_if_exists, rename, BootstrapLayout, LEDGER_DIRS,
};

/// What happened to one sub-tree during a replacement pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SubtreeReport {
    pub stale_backup_removed: bool,
    pub backed_up: bool,
    pub promoted: bool,
}

pub fn replace_ledger(
    layout: &BootstrapLayout,
) -> Result<Vec<(&'static str, SubtreeReport)>, BootstrapError> {
    let mut reports = Vec::with_capacity(LEDGER_DIRS.len());
    for name in LEDGER_DIRS {
        let report = replace_subtree(layout, name)?;
        log_debug!("replaced {name}: {report:?}");
        reports.push((name, report));
    }
    Ok(reports)
}

pub fn replace_subtree(
    layout: &BootstrapLayout,
    name: &str,
) -> Result<SubtreeReport, BootstrapError> {
    let staged = layout.staged_dir(name);
    let live = layout.live_dir(name);
    let backup = layout.backup_dir(name);
    let mut report = SubtreeReport::default();

    if staged.exists() && live.exists() {
        report.stale_backup_removed = remove_dir_if_exists(&backup)?;
    }
    if live.exists() && !backup.exists() {
        rename(&live, &backup)?;
        report.backed_up = true;
    }
    if staged.exists() {
        rename(&staged, &live)?;
        report.promoted = true;
    }
    Ok(report)
}

/// Deletes the peer cache and ban list. Returns how many files were removed.
pub fn remove_peer_state(layout: &BootstrapLayout) -> Result<usize, BootstrapError> {
    let mut removed = 0;
    for path in [layout.peers_file(), layout.banlist_file()] {
        if remove_file_if_exists(&path)? {
            log_info!("removed {}", path.display());
            removed += 1;
        }
    }
    Ok(removed)
}
