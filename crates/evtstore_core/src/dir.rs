//! Container directory management.
//!
//! A container is a directory of members:
//!
//! ```text
//! <container>/
//! ├─ metadata.txt                 # format version, serialization, storage type
//! ├─ event_data.000001            # length-prefixed serialized events
//! ├─ event_index.000001           # u32 offsets into event_data.000001
//! ├─ event_timestamps.000001      # i64 timestamps of event_data.000001
//! ├─ event_source_data.000001 ... # sources, tags, errors, reports, markers
//! └─ <member>.tmp                 # member being written, never read
//! ```
//!
//! Members are committed with write-then-rename, so a member only shows up
//! in a listing once it is complete. A container opened for writing lives
//! in a [`WorkingCopy`] until it is closed.

use crate::error::{CoreError, CoreResult};
use crate::layout::{temp_member_name, Layout, StreamKind};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Handle on a container directory.
#[derive(Debug, Clone)]
pub struct ContainerDir {
    path: PathBuf,
}

impl ContainerDir {
    /// Opens a container directory.
    ///
    /// # Errors
    ///
    /// Returns `ContainerNotFound` if the directory does not exist and
    /// `create_if_missing` is false, and `InvalidFormat` if the path exists
    /// but is not a directory.
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::ContainerNotFound {
                    path: path.to_path_buf(),
                });
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "container path is not a directory: {}",
                path.display()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Returns the path to the container directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of a member.
    #[must_use]
    pub fn member_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Returns the path a member is written to before it is committed.
    #[must_use]
    pub fn temp_member_path(&self, name: &str) -> PathBuf {
        self.path.join(temp_member_name(name))
    }

    /// Whether a committed member exists.
    #[must_use]
    pub fn has_member(&self, name: &str) -> bool {
        self.member_path(name).is_file()
    }

    /// Lists the stream numbers of `kind`, in ascending order.
    ///
    /// Temporary members and names that do not parse are skipped.
    pub fn stream_numbers(&self, layout: Layout, kind: StreamKind) -> CoreResult<Vec<u32>> {
        let mut numbers = Vec::new();
        let prefix = layout.prefix(kind);

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                warn!(path = %entry.path().display(), "skipping member with non UTF-8 name");
                continue;
            };
            if !name.starts_with(prefix) {
                continue;
            }
            match layout.parse_stream_name(&name) {
                Some((found, number)) if found == kind => numbers.push(number),
                Some(_) => {}
                None if name.ends_with(crate::layout::TEMP_SUFFIX) => {}
                None => warn!(member = %name, "skipping unparseable member name"),
            }
        }

        numbers.sort_unstable();
        numbers.dedup();
        Ok(numbers)
    }

    /// Returns the highest stream number of `kind`, or 0 if there is none.
    pub fn last_stream_number(&self, layout: Layout, kind: StreamKind) -> CoreResult<u32> {
        Ok(self
            .stream_numbers(layout, kind)?
            .last()
            .copied()
            .unwrap_or(0))
    }

    /// Reads a whole member, or `None` if it does not exist.
    pub fn read_member(&self, name: &str) -> CoreResult<Option<Vec<u8>>> {
        let path = self.member_path(name);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }

    /// Writes a whole member atomically.
    ///
    /// 1. Write to `<name>.tmp`
    /// 2. Sync the temporary file
    /// 3. Rename it to `<name>`
    /// 4. Sync the directory so the rename is durable
    pub fn write_member(&self, name: &str, data: &[u8]) -> CoreResult<()> {
        let temp_path = self.temp_member_path(name);

        let result = (|| -> CoreResult<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
            drop(file);
            fs::rename(&temp_path, self.member_path(name))?;
            Ok(())
        })();

        if let Err(err) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(CoreError::write_aborted(name, err));
        }

        self.sync_directory()
    }

    /// Commits a temporary member written by a stream writer.
    pub fn commit_member(&self, name: &str) -> CoreResult<()> {
        fs::rename(self.temp_member_path(name), self.member_path(name))?;
        self.sync_directory()
    }

    /// Removes a committed member. A member that does not exist is not an
    /// error.
    pub fn remove_member(&self, name: &str) -> CoreResult<()> {
        match fs::remove_file(self.member_path(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Syncs the container directory so member renames are durable.
    #[cfg(unix)]
    pub fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    /// Syncs the container directory so member renames are durable.
    #[cfg(not(unix))]
    pub fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// A container being written.
///
/// Writes never touch the container at its final path. On creation an
/// existing container is moved into a hidden sibling directory
/// `.<name>.<uuid>.tmp/<name>`; [`WorkingCopy::commit`] moves it back and
/// removes the hidden directory. If commit never happens the working copy
/// stays where it is.
#[derive(Debug)]
pub struct WorkingCopy {
    final_path: PathBuf,
    temp_parent: PathBuf,
    working_path: PathBuf,
}

impl WorkingCopy {
    /// Sets up a working copy for the container at `final_path`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if `final_path` has no file name or exists but
    /// is not a directory, or an I/O error if the move fails.
    pub fn create(final_path: &Path) -> CoreResult<Self> {
        let name = final_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                CoreError::invalid_format(format!(
                    "container path has no usable file name: {}",
                    final_path.display()
                ))
            })?;

        if final_path.exists() && !final_path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "container path is not a directory: {}",
                final_path.display()
            )));
        }

        let parent = match final_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let temp_parent = parent.join(format!(".{name}.{}.tmp", Uuid::new_v4().simple()));
        let working_path = temp_parent.join(name);

        fs::create_dir_all(&temp_parent)?;
        if final_path.exists() {
            if let Err(err) = fs::rename(final_path, &working_path) {
                let _ = fs::remove_dir(&temp_parent);
                return Err(err.into());
            }
        }

        debug!(
            container = %final_path.display(),
            working = %working_path.display(),
            "created working copy"
        );

        Ok(Self {
            final_path: final_path.to_path_buf(),
            temp_parent,
            working_path,
        })
    }

    /// Returns the path the container is written at.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.working_path
    }

    /// Returns the path the container is committed to.
    #[must_use]
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Moves the container to its final path and removes the hidden
    /// directory.
    pub fn commit(self) -> CoreResult<PathBuf> {
        fs::rename(&self.working_path, &self.final_path)?;
        fs::remove_dir(&self.temp_parent)?;
        debug!(container = %self.final_path.display(), "committed working copy");
        Ok(self.final_path)
    }
}
