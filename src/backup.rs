//! Transaction-log backup: replace a destination directory with a fresh copy
//! of the source directory's contents.
//!
//! The replace is destructive, not a rename swap. A crash part way through can
//! leave the destination missing or partially populated.

use serde::{Deserialize, Serialize};
use std::fs::{self, File, FileTimes, Metadata};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Message reported when every entry was copied.
pub const SUCCESS_MESSAGE: &str = "The files are copied successfully!";

const DESTINATION_MODE: u32 = 0o755;

/// Failures of the individual backup steps.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Remove of '{}' folder is failed: {source}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Creation of '{}' folder is failed: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `path` is the source entry that failed; `copied` entries made it over.
    #[error("Copying of '{}' is failed after {copied} copied entries: {source}", path.display())]
    Copy {
        path: PathBuf,
        copied: usize,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupStatus {
    Ok,
    Error,
}

/// Outcome of one `/store` call, serialized as `{"Status": .., "Message": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackupResult {
    pub status: BackupStatus,
    pub message: String,
}

impl BackupResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: BackupStatus::Ok,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: BackupStatus::Error,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == BackupStatus::Ok
    }
}

/// Source and destination directories, fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRequest {
    source: PathBuf,
    destination: PathBuf,
}

impl BackupRequest {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Runs the backup and folds any failure into the result.
    pub fn run(&self) -> BackupResult {
        backup(&self.source, &self.destination)
    }
}

/// Replaces `destination` with a copy of the contents of `source`.
///
/// Never fails as a call: every error ends up in the returned [`BackupResult`].
pub fn backup(source: &Path, destination: &Path) -> BackupResult {
    match replace_destination(source, destination) {
        Ok(copied) => {
            info!(
                "copied {} entries from '{}' to '{}'",
                copied,
                source.display(),
                destination.display()
            );
            BackupResult::ok(SUCCESS_MESSAGE)
        },
        Err(err) => {
            warn!("backup failed: {}", err);
            BackupResult::error(err.to_string())
        },
    }
}

/// Remove, recreate, copy. Returns the number of entries copied.
pub fn replace_destination(source: &Path, destination: &Path) -> crate::Result<usize> {
    remove_existing(destination)?;

    fs::DirBuilder::new()
        .mode(DESTINATION_MODE)
        .create(destination)
        .map_err(|source| BackupError::Create {
            path: destination.to_path_buf(),
            source,
        })?;

    Ok(copy_tree(source, destination)?)
}

fn remove_existing(path: &Path) -> Result<(), BackupError> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(BackupError::Remove {
                path: path.to_path_buf(),
                source,
            })
        },
    };

    debug!("removing existing '{}'", path.display());
    let removed = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.map_err(|source| BackupError::Remove {
        path: path.to_path_buf(),
        source,
    })
}

/// Recursively copies the entries inside `source` into the existing
/// `destination`, preserving permission bits and timestamps. Symbolic links
/// are recreated, not followed.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<usize, BackupError> {
    let root_error = |source_err: io::Error| BackupError::Copy {
        path: source.to_path_buf(),
        copied: 0,
        source: source_err,
    };
    // Follows a symlinked root, like the walk does.
    if !fs::metadata(source).map_err(root_error)?.is_dir() {
        return Err(root_error(io::Error::new(
            io::ErrorKind::NotADirectory,
            "source is not a directory",
        )));
    }

    let mut copied = 0;
    let mut directories = Vec::new();

    for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|err| BackupError::Copy {
            path: err.path().unwrap_or(source).to_path_buf(),
            copied,
            source: err.into(),
        })?;

        let fail = |source: io::Error| BackupError::Copy {
            path: entry.path().to_path_buf(),
            copied,
            source,
        };
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| fail(io::Error::other(e)))?;
        let target = destination.join(relative);
        let metadata = entry.metadata().map_err(|e| fail(e.into()))?;
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir(&target).map_err(fail)?;
            directories.push((entry.path().to_path_buf(), target, metadata));
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(fail)?;
            std::os::unix::fs::symlink(link, &target).map_err(fail)?;
        } else if file_type.is_file() {
            copy_file(entry.path(), &target, &metadata).map_err(fail)?;
        } else {
            warn!("skipping special file '{}'", entry.path().display());
            continue;
        }
        copied += 1;
    }

    // Children first, so restoring a read-only mode or an mtime on a parent
    // happens after nothing else will be written into it.
    for (path, target, metadata) in directories.iter().rev() {
        preserve_directory(target, metadata).map_err(|source| BackupError::Copy {
            path: path.clone(),
            copied,
            source,
        })?;
    }

    Ok(copied)
}

fn file_times(metadata: &Metadata) -> io::Result<FileTimes> {
    Ok(FileTimes::new()
        .set_accessed(metadata.accessed()?)
        .set_modified(metadata.modified()?))
}

fn copy_file(source: &Path, target: &Path, metadata: &Metadata) -> io::Result<()> {
    let mut reader = File::open(source)?;
    let mut writer = File::create_new(target)?;
    io::copy(&mut reader, &mut writer)?;
    writer.set_times(file_times(metadata)?)?;
    drop(writer);
    fs::set_permissions(target, metadata.permissions())
}

fn preserve_directory(target: &Path, metadata: &Metadata) -> io::Result<()> {
    File::open(target)?.set_times(file_times(metadata)?)?;
    fs::set_permissions(target, metadata.permissions())
}
