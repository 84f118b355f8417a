use crate::Result;
use log::*;
use std::{
    fs::{self, Permissions},
    io::{self, Write},
    path::Path,
};
use tempfile::NamedTempFile;

/// Writes the contents into the given path by way of a temporary file in the same directory, so the path never holds
/// a partially written file. An existing file's permissions and owner are kept.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = temp_file_for(path)?;
    file.write_all(contents)?;
    persist(file, path)
}

/// Returns a new temporary file in the same directory as the given path.
pub(crate) fn temp_file_for(path: &Path) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    Ok(NamedTempFile::new_in(dir)?)
}

/// Moves a temporary file over the given path.
pub(crate) fn persist(file: NamedTempFile, path: &Path) -> Result<()> {
    file.as_file().sync_all()?;

    let permissions = match fs::metadata(path) {
        Ok(meta) => {
            keep_owner(&file, &meta, path);
            Some(meta.permissions())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => default_permissions(),
        Err(e) => return Err(e.into()),
    };

    if let Some(permissions) = permissions {
        fs::set_permissions(file.path(), permissions)?;
    }

    file.persist(path)?;
    Ok(())
}

// changing the owner fails unless running as root, the file is replaced with the current user's ownership then
#[cfg(unix)]
fn keep_owner(file: &NamedTempFile, existing: &fs::Metadata, path: &Path) {
    use std::os::unix::fs::{chown, MetadataExt};

    let current = match file.as_file().metadata() {
        Ok(meta) => meta,
        Err(e) => {
            warn!("Failed to read the owner of {}: {}", file.path().display(), e);
            return;
        }
    };

    if current.uid() == existing.uid() && current.gid() == existing.gid() {
        return;
    }

    if let Err(e) = chown(file.path(), Some(existing.uid()), Some(existing.gid())) {
        warn!(
            "Failed to keep owner {}:{} of {}: {}",
            existing.uid(),
            existing.gid(),
            path.display(),
            e
        );
    }
}

#[cfg(not(unix))]
fn keep_owner(_file: &NamedTempFile, _existing: &fs::Metadata, _path: &Path) {}

// temporary files are created as 0600
#[cfg(unix)]
fn default_permissions() -> Option<Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn default_permissions() -> Option<Permissions> {
    None
}
