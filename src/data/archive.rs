//! Tar codec for data transfer

use crate::error::{BerthError, Result};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Archive the contents of `src` into `out`, with every entry placed under
/// `prefix`, and hand `out` back.
///
/// The directories making up `prefix` get their own entries so the archive
/// can be extracted at `/` even when they do not exist yet.
pub fn pack_dir<W: Write>(src: &Path, prefix: &str, out: W) -> Result<W> {
    if !src.is_dir() {
        return Err(BerthError::Transfer(format!(
            "{} is not a directory",
            src.display()
        )));
    }

    let prefix = PathBuf::from(prefix.trim_matches('/'));
    let mut builder = tar::Builder::new(out);

    let mut current = PathBuf::new();
    for component in prefix.components() {
        current.push(component);
        builder.append_dir(&current, src)?;
    }

    for entry in walkdir::WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| BerthError::Transfer(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| BerthError::Transfer(e.to_string()))?;
        let name = prefix.join(rel);

        if entry.file_type().is_dir() {
            builder.append_dir(&name, entry.path())?;
        } else {
            builder.append_path_with_name(entry.path(), &name)?;
        }
    }

    Ok(builder.into_inner()?)
}

/// Extract an archive into `dest`.
pub fn unpack(reader: impl Read, dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.unpack(dest)?;
    Ok(())
}

/// Replace a lone top-level directory named `wrapper` inside `dir` with its
/// contents. Returns whether anything was hoisted.
pub fn hoist(dir: &Path, wrapper: &str) -> Result<bool> {
    let entries: Vec<_> = std::fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    let [entry] = entries.as_slice() else {
        return Ok(false);
    };
    if entry.file_name() != wrapper || !entry.file_type()?.is_dir() {
        return Ok(false);
    }

    // Move the wrapper aside first; it may contain an entry of its own name.
    let staging = dir.join(format!(".hoist-{}", uuid::Uuid::new_v4().simple()));
    std::fs::rename(entry.path(), &staging)?;
    for child in std::fs::read_dir(&staging)? {
        let child = child?;
        std::fs::rename(child.path(), dir.join(child.file_name()))?;
    }
    std::fs::remove_dir(&staging)?;

    debug!("Hoisted {} in {}", wrapper, dir.display());
    Ok(true)
}

/// Move everything under `src` into `dest`, creating `dest` if needed.
///
/// Files are copied and then deleted, so `src` and `dest` may be on
/// different filesystems. The first failure stops the move and is returned;
/// whatever was already moved stays in `dest`.
pub fn move_contents(src: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;

    for entry in walkdir::WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| BerthError::Transfer(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| BerthError::Transfer(e.to_string()))?;
        let target = dest.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }

        if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            if target.symlink_metadata().is_ok() {
                std::fs::remove_file(&target)?;
            }
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| {
                BerthError::Transfer(format!(
                    "moving {} to {}: {}",
                    entry.path().display(),
                    target.display(),
                    e
                ))
            })?;
        }
        std::fs::remove_file(entry.path())?;
    }
    Ok(())
}
