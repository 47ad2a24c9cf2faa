//! Archive sanity checks and extraction into the staging root.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;

use ledgerboot_log::{log_debug, log_error};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::BootstrapError;
use crate::layout::{remove_dir_if_exists, remove_file_if_exists};

pub const ZIP_MAGIC: [u8; 2] = *b"PK";

/// Confirms `path` opens and starts with the zip signature.
pub fn verify_archive(path: &Path) -> Result<(), BootstrapError> {
    let mut file = File::open(path).map_err(BootstrapError::io_at("open", path))?;
    let mut magic = [0u8; ZIP_MAGIC.len()];
    let mut filled = 0;
    while filled < magic.len() {
        match file.read(&mut magic[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(BootstrapError::io("read", path, err)),
        }
    }
    if filled < magic.len() || magic != ZIP_MAGIC {
        return Err(BootstrapError::Format(format!(
            "file {} is not a valid .zip archive",
            path.display()
        )));
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Authenticity {
    Verified,
    /// No authenticity check was performed. Callers must treat the archive as untrusted.
    Unchecked,
}

/// Decides whether an archive comes from a trusted publisher.
pub trait AuthenticityCheck: Send + Sync {
    fn check(&self, archive: &Path) -> Result<Authenticity, BootstrapError>;
}

/// Placeholder used until archives ship with detached signatures.
#[derive(Clone, Copy, Debug, Default)]
pub struct UncheckedAuthenticity;

impl AuthenticityCheck for UncheckedAuthenticity {
    fn check(&self, _archive: &Path) -> Result<Authenticity, BootstrapError> {
        Ok(Authenticity::Unchecked)
    }
}

#[derive(Debug)]
pub struct Extracted {
    pub entries: usize,
    /// Set when the staging root already existed and had to be cleared first.
    pub healed: Option<BootstrapError>,
}

/// Unpacks every entry of `archive` into a freshly created `staging` directory.
pub fn extract_archive(archive: &Path, staging: &Path) -> Result<Extracted, BootstrapError> {
    let healed = prepare_staging(staging)?;
    fs::create_dir_all(staging).map_err(BootstrapError::io_at("create", staging))?;

    let fail = |detail: String| {
        BootstrapError::Format(format!(
            "zip extract from {} to {} failed: {detail}",
            archive.display(),
            staging.display()
        ))
    };

    let file = File::open(archive).map_err(|err| fail(err.to_string()))?;
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|err| fail(zip_detail(&err)))?;
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|err| fail(zip_detail(&err)))?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(fail(format!("entry {} escapes the staging root", entry.name())));
        };
        let out_path = staging.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|err| fail(err.to_string()))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|err| fail(err.to_string()))?;
        }
        let mut out = File::create(&out_path).map_err(|err| fail(err.to_string()))?;
        io::copy(&mut entry, &mut out)
            .map_err(|err| fail(format!("{}: {err}", relative.display())))?;
    }
    log_debug!(
        "extracted {} entries from {} into {}",
        zip.len(),
        archive.display(),
        staging.display()
    );

    Ok(Extracted {
        entries: zip.len(),
        healed,
    })
}

fn prepare_staging(staging: &Path) -> Result<Option<BootstrapError>, BootstrapError> {
    let Ok(meta) = fs::symlink_metadata(staging) else {
        return Ok(None);
    };
    let fault = BootstrapError::Consistency(format!(
        "staging directory {} already exists before extraction",
        staging.display()
    ));
    log_error!("consistency fault: {fault}; clearing it and continuing");
    if meta.is_dir() {
        remove_dir_if_exists(staging)?;
    } else {
        remove_file_if_exists(staging)?;
    }
    Ok(Some(fault))
}

fn zip_detail(err: &ZipError) -> String {
    match err {
        ZipError::Io(err) => err.to_string(),
        other => other.to_string(),
    }
}
