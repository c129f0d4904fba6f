//! Filesystem helpers for Atlas stores, scratch files and region inputs.
//!
//! Every path is resolved into an ambient `cap-std` directory plus a
//! relative suffix, so the remaining operations run with the capability of
//! that directory only.
#![forbid(unsafe_code)]

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};
use std::io;
use std::path::Component;

/// Open a UTF-8 file path for reading.
///
/// # Errors
///
/// Returns the underlying I/O error when the file cannot be opened.
pub fn open_utf8_file(path: &Utf8Path) -> io::Result<fs_utf8::File> {
    let (dir, name) = open_dir_and_file(path)?;
    dir.open(name.as_str())
}

/// Create or truncate a UTF-8 file path for writing.
///
/// # Errors
///
/// Returns the underlying I/O error when the file cannot be created.
pub fn create_utf8_file(path: &Utf8Path) -> io::Result<fs_utf8::File> {
    let (dir, name) = open_dir_and_file(path)?;
    dir.create(name.as_str())
}

/// Read a UTF-8 text file into memory.
///
/// # Errors
///
/// Returns the underlying I/O error when the file cannot be read.
pub fn read_to_string(path: &Utf8Path) -> io::Result<String> {
    let (dir, name) = open_dir_and_file(path)?;
    dir.read_to_string(name.as_str())
}

/// Remove a single file.
///
/// # Errors
///
/// Returns the underlying I/O error when the file cannot be removed.
pub fn remove_file(path: &Utf8Path) -> io::Result<()> {
    let (dir, name) = open_dir_and_file(path)?;
    dir.remove_file(name.as_str())
}

/// Resolve the parent directory of `path` and return it with the file name.
///
/// # Errors
///
/// Returns an error when `path` has no file name or its parent cannot be
/// opened.
pub fn open_dir_and_file(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, String)> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::other(format!("{path} has no file name")))?
        .to_owned();
    let dir = fs_utf8::Dir::open_ambient_dir(parent, ambient_authority())?;
    Ok((dir, file_name))
}

/// Ensure the parent directory of `path` exists.
///
/// # Errors
///
/// Returns the underlying I/O error when a directory cannot be created.
pub fn ensure_parent_dir(path: &Utf8Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => ensure_dir(parent),
        None => Ok(()),
    }
}

/// Ensure `dir` and all of its ancestors exist.
///
/// # Errors
///
/// Returns the underlying I/O error when a directory cannot be created.
pub fn ensure_dir(dir: &Utf8Path) -> io::Result<()> {
    if dir.as_str().is_empty() || dir == Utf8Path::new("/") {
        return Ok(());
    }
    let (base, relative) = base_dir_and_relative(dir)?;
    if relative.as_str().is_empty() {
        return Ok(());
    }
    base.create_dir_all(&relative)
}

/// Whether `path` exists and is a regular file.
///
/// Unreadable parents count as absent.
#[must_use]
pub fn file_is_file(path: &Utf8Path) -> bool {
    open_dir_and_file(path)
        .and_then(|(dir, name)| dir.metadata(name.as_str()))
        .is_ok_and(|meta| meta.is_file())
}

/// Split a directory path into an ambient base directory and the relative
/// suffix beneath it.
///
/// # Errors
///
/// Returns an error when the base cannot be opened or the path contains a
/// prefix component.
pub fn base_dir_and_relative(dir: &Utf8Path) -> io::Result<(fs_utf8::Dir, Utf8PathBuf)> {
    let (base, relative) = match dir.as_std_path().components().next() {
        Some(Component::RootDir) => {
            let root = Utf8PathBuf::from(std::path::MAIN_SEPARATOR.to_string());
            let relative = dir
                .strip_prefix(&root)
                .map_err(|_| io::Error::other(format!("cannot strip root from {dir}")))?
                .to_path_buf();
            (root, relative)
        }
        Some(Component::Prefix(_)) => {
            return Err(io::Error::other(format!(
                "{dir} uses a path prefix; pass a path relative to a directory"
            )));
        }
        _ => (Utf8PathBuf::from("."), dir.to_path_buf()),
    };
    let base_dir = fs_utf8::Dir::open_ambient_dir(&base, ambient_authority())?;
    Ok((base_dir, relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::io::{Read, Write};
    use tempfile::TempDir;

    #[fixture]
    fn scratch() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().expect("create temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
        (dir, root)
    }

    #[rstest]
    fn creates_nested_parents(scratch: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = scratch;
        let target = root.join("a/b/c/store.db");
        ensure_parent_dir(&target).expect("create parents");
        assert!(root.join("a/b/c").as_std_path().is_dir());
        assert!(!file_is_file(&target));
    }

    #[rstest]
    fn writes_reads_and_removes_files(scratch: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = scratch;
        let target = root.join("run_000.run");
        create_utf8_file(&target)
            .and_then(|mut file| file.write_all(b"atlas"))
            .expect("write file");
        assert!(file_is_file(&target));

        let mut text = String::new();
        open_utf8_file(&target)
            .and_then(|mut file| file.read_to_string(&mut text))
            .expect("read file");
        assert_eq!(text, "atlas");
        assert_eq!(read_to_string(&target).expect("read text"), "atlas");

        remove_file(&target).expect("remove file");
        assert!(!file_is_file(&target));
    }

    #[rstest]
    fn directories_are_not_files(scratch: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = scratch;
        ensure_dir(&root.join("scratch")).expect("create dir");
        assert!(!file_is_file(&root.join("scratch")));
    }

    #[rstest]
    fn missing_parent_counts_as_absent() {
        assert!(!file_is_file(Utf8Path::new("/definitely/not/here/atlas.db")));
    }
}
