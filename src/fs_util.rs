use std::fs;
use std::io::Write;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::MergeError;

/// Writes through a temp file in the destination directory, then persists over `path`.
pub fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), MergeError> {
    let parent = path
        .parent()
        .ok_or_else(|| MergeError::Filesystem(format!("invalid destination path: {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| MergeError::Filesystem(format!("create {parent}: {err}")))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".modmerge-write")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| MergeError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| MergeError::Filesystem(format!("write {path}: {err}")))?;
    temp.persist(path.as_std_path())
        .map_err(|err| MergeError::Filesystem(format!("persist {path}: {err}")))?;
    Ok(())
}

pub fn read_to_string(path: &Utf8Path) -> Result<String, MergeError> {
    fs::read_to_string(path.as_std_path())
        .map_err(|err| MergeError::Filesystem(format!("read {path}: {err}")))
}

/// Absolute form of `path`, resolved against the current directory.
pub fn absolute(path: &Utf8Path) -> Result<Utf8PathBuf, MergeError> {
    let absolute = std::path::absolute(path.as_std_path())
        .map_err(|err| MergeError::Filesystem(format!("resolve {path}: {err}")))?;
    Utf8PathBuf::from_path_buf(absolute)
        .map_err(|path| MergeError::Filesystem(format!("non-utf8 path: {}", path.display())))
}

/// Locates an executable on `PATH`.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}
