//! Filesystem helpers: scoped temporary directories and tree copies.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;
use tracing::debug;

use crate::error::{Error, Result};

/// Prefix for every scoped temporary root we create.
pub const TEMP_PREFIX: &str = "cwr_tst_";

/// Create a uniquely named directory, optionally below `parent`.
///
/// The directory and everything in it is removed when the returned
/// handle is dropped, on every exit path.
pub fn temp_dir(parent: Option<&Utf8Path>) -> Result<TempDir> {
    let mut b = tempfile::Builder::new();
    b.prefix(TEMP_PREFIX);
    let r = match parent {
        Some(p) => b.tempdir_in(p),
        None => b.tempdir(),
    };
    r.map_err(Error::io("creating temporary directory"))
}

/// The UTF-8 path of a temporary directory.
pub fn temp_path(td: &TempDir) -> Result<&Utf8Path> {
    Utf8Path::from_path(td.path())
        .ok_or_else(|| Error::resource(td.path().to_string_lossy().into_owned(), "path is not UTF-8"))
}

/// Create `name` (below `parent` when given); an existing directory is fine.
pub fn ensure_dir(name: impl AsRef<Utf8Path>, parent: Option<&Utf8Path>) -> Result<Utf8PathBuf> {
    let path = match parent {
        Some(p) => p.join(name),
        None => name.as_ref().to_owned(),
    };
    match fs::create_dir(&path) {
        Ok(()) => Ok(path),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(path),
        Err(e) => Err(Error::io(format!("creating {path}"))(e)),
    }
}

/// Recursively copy `src` to a new directory `dst`.
///
/// Entries whose file name matches `exclude` are skipped at every depth.
/// Symbolic links are recreated rather than followed.
pub fn copy_tree(src: &Utf8Path, dst: &Utf8Path, exclude: &dyn Fn(&str) -> bool) -> Result<()> {
    fs::create_dir(dst).map_err(Error::io(format!("creating {dst}")))?;
    let perms = fs::metadata(src)
        .map_err(Error::io(format!("reading {src}")))?
        .permissions();
    fs::set_permissions(dst, perms).map_err(Error::io(format!("setting permissions on {dst}")))?;

    for entry in src
        .read_dir_utf8()
        .map_err(Error::io(format!("reading directory {src}")))?
    {
        let entry = entry.map_err(Error::io(format!("reading directory {src}")))?;
        let name = entry.file_name();
        if exclude(name) {
            debug!("Skipping {}", entry.path());
            continue;
        }
        let target = dst.join(name);
        let ty = entry
            .file_type()
            .map_err(Error::io(format!("reading {}", entry.path())))?;
        if ty.is_symlink() {
            let link = fs::read_link(entry.path())
                .map_err(Error::io(format!("reading link {}", entry.path())))?;
            std::os::unix::fs::symlink(&link, &target)
                .map_err(Error::io(format!("creating link {target}")))?;
        } else if ty.is_dir() {
            copy_tree(entry.path(), &target, exclude)?;
        } else {
            fs::copy(entry.path(), &target)
                .map_err(Error::io(format!("copying {} to {target}", entry.path())))?;
        }
    }
    Ok(())
}

fn exclude_nothing(_: &str) -> bool {
    false
}

/// Copy `src` to `dst`, deleting any existing `dst` first so the result
/// mirrors `src` exactly.
pub fn copytree_force(
    src: &Utf8Path,
    dst: &Utf8Path,
    exclude: Option<&dyn Fn(&str) -> bool>,
) -> Result<()> {
    if let Ok(meta) = dst.symlink_metadata() {
        debug!("Removing existing {dst}");
        let r = if meta.is_dir() {
            fs::remove_dir_all(dst)
        } else {
            fs::remove_file(dst)
        };
        r.map_err(Error::io(format!("removing {dst}")))?;
    }
    copy_tree(src, dst, exclude.unwrap_or(&exclude_nothing))
}
