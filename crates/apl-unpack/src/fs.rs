//! Filesystem helpers: tree copies that keep symlinks as symlinks,
//! relocation out of scratch directories, and permission fixes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Result, UnpackError};

/// Immediate children of `dir`, sorted by name.
///
/// # Errors
///
/// `dir` cannot be read.
pub fn children(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| UnpackError::io(dir, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| UnpackError::io(dir, e))?;
    entries.sort();
    Ok(entries)
}

/// Copy one file, symlink, or empty directory from `src` to `dst`.
///
/// Symlinks are recreated, never followed. Permission bits are kept and
/// ownership is copied when the process is allowed to.
///
/// # Errors
///
/// Any IO failure, tagged with the offending path.
pub fn copy_entry(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(src).map_err(|e| UnpackError::io(src, e))?;
    let file_type = meta.file_type();

    if file_type.is_symlink() {
        let target = fs::read_link(src).map_err(|e| UnpackError::io(src, e))?;
        make_symlink(&target, dst).map_err(|e| UnpackError::io(dst, e))?;
    } else if file_type.is_dir() {
        fs::create_dir_all(dst).map_err(|e| UnpackError::io(dst, e))?;
        fs::set_permissions(dst, meta.permissions()).map_err(|e| UnpackError::io(dst, e))?;
    } else {
        // fs::copy carries the permission bits along.
        fs::copy(src, dst).map_err(|e| UnpackError::io(dst, e))?;
    }

    copy_ownership(&meta, dst);
    Ok(())
}

/// Recursively copy the *contents* of `src_dir` into `dst_dir`.
///
/// # Errors
///
/// Any IO failure while walking or copying.
pub fn copy_tree(src_dir: &Path, dst_dir: &Path) -> Result<()> {
    fs::create_dir_all(dst_dir).map_err(|e| UnpackError::io(dst_dir, e))?;

    // Directories are created first and get their final modes last, so a
    // read-only directory does not block copying its own children.
    let mut dirs = Vec::new();
    for entry in WalkDir::new(src_dir).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| walk_error(src_dir, e))?;
        let rel = entry
            .path()
            .strip_prefix(src_dir)
            .map_err(|_| {
                UnpackError::io(entry.path(), io::Error::other("path escaped walk root"))
            })?;
        let target = dst_dir.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| UnpackError::io(&target, e))?;
            dirs.push((entry.path().to_path_buf(), target));
        } else {
            copy_entry(entry.path(), &target)?;
        }
    }

    for (src, dst) in dirs.iter().rev() {
        copy_entry(src, dst)?;
    }
    Ok(())
}

/// Move every child of `scratch` into `dest`.
///
/// Conflicts are checked for all children before anything moves, so a
/// refused relocation leaves `dest` untouched. Renames fall back to a copy
/// when `scratch` and `dest` live on different devices.
///
/// # Errors
///
/// [`UnpackError::DestinationConflict`] if a child's name already exists in
/// `dest`, or any IO failure.
pub fn relocate(scratch: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).map_err(|e| UnpackError::io(dest, e))?;

    let moves: Vec<(PathBuf, PathBuf)> = children(scratch)?
        .into_iter()
        .filter_map(|child| {
            let name = child.file_name()?.to_owned();
            Some((child, dest.join(name)))
        })
        .collect();

    for (_, target) in &moves {
        if fs::symlink_metadata(target).is_ok() {
            return Err(UnpackError::DestinationConflict {
                path: target.clone(),
            });
        }
    }

    for (src, target) in moves {
        if fs::rename(&src, &target).is_ok() {
            continue;
        }
        tracing::debug!("Rename failed, copying {} instead", src.display());
        if fs::symlink_metadata(&src)
            .map_err(|e| UnpackError::io(&src, e))?
            .is_dir()
        {
            copy_tree(&src, &target)?;
            copy_entry(&src, &target)?;
        } else {
            copy_entry(&src, &target)?;
        }
    }
    Ok(())
}

/// Add the owner-write bit to every non-symlink under `root` (inclusive).
///
/// With `dirs_only`, regular files are left alone.
///
/// # Errors
///
/// Any IO failure while walking or changing modes.
pub fn make_owner_writable(root: &Path, dirs_only: bool) -> Result<()> {
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        let file_type = entry.file_type();
        if file_type.is_symlink() || (dirs_only && !file_type.is_dir()) {
            continue;
        }
        let meta = entry.metadata().map_err(|e| walk_error(root, e))?;
        let mut perms = meta.permissions();
        if add_owner_write(&mut perms) {
            fs::set_permissions(entry.path(), perms)
                .map_err(|e| UnpackError::io(entry.path(), e))?;
        }
    }
    Ok(())
}

fn walk_error(root: &Path, err: walkdir::Error) -> UnpackError {
    let path = err.path().unwrap_or(root).to_path_buf();
    UnpackError::io(path, io::Error::other(err))
}

#[cfg(unix)]
fn add_owner_write(perms: &mut fs::Permissions) -> bool {
    use std::os::unix::fs::PermissionsExt;
    let mode = perms.mode();
    if mode & 0o200 == 0 {
        perms.set_mode(mode | 0o200);
        true
    } else {
        false
    }
}

#[cfg(not(unix))]
fn add_owner_write(perms: &mut fs::Permissions) -> bool {
    if perms.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        true
    } else {
        false
    }
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn make_symlink(_target: &Path, link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("symlinks are not supported here: {}", link.display()),
    ))
}

#[cfg(unix)]
fn copy_ownership(meta: &fs::Metadata, dst: &Path) {
    use std::os::unix::fs::MetadataExt;
    // Only root can hand files to other users; failure is expected otherwise.
    if let Err(e) = std::os::unix::fs::lchown(dst, Some(meta.uid()), Some(meta.gid())) {
        tracing::trace!("Keeping default ownership for {}: {e}", dst.display());
    }
}

#[cfg(not(unix))]
fn copy_ownership(_meta: &fs::Metadata, _dst: &Path) {}
