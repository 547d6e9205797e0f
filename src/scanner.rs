use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::domain::FileKind;
use crate::error::MergeError;

/// One module directory and the files found inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Module {
    pub path: Utf8PathBuf,
    pub bed: Option<Utf8PathBuf>,
    pub bim: Option<Utf8PathBuf>,
    pub fam: Option<Utf8PathBuf>,
    pub janno: Option<Utf8PathBuf>,
}

impl Module {
    /// Scans every file kind. A kind with more than one match fails the scan
    /// with `AmbiguousFile`; a kind with none is left as `None`.
    pub fn scan(path: &Utf8Path) -> Result<Self, MergeError> {
        Ok(Self {
            path: path.to_path_buf(),
            bed: find_unique(path, FileKind::Bed)?,
            bim: find_unique(path, FileKind::Bim)?,
            fam: find_unique(path, FileKind::Fam)?,
            janno: find_unique(path, FileKind::Janno)?,
        })
    }

    pub fn file(&self, kind: FileKind) -> Option<&Utf8Path> {
        match kind {
            FileKind::Bed => self.bed.as_deref(),
            FileKind::Bim => self.bim.as_deref(),
            FileKind::Fam => self.fam.as_deref(),
            FileKind::Janno => self.janno.as_deref(),
        }
    }

    /// The `bed bim fam` triplet, or the first missing kind.
    pub fn genotype_files(&self) -> Result<[&Utf8Path; 3], FileKind> {
        let bed = self.bed.as_deref().ok_or(FileKind::Bed)?;
        let bim = self.bim.as_deref().ok_or(FileKind::Bim)?;
        let fam = self.fam.as_deref().ok_or(FileKind::Fam)?;
        Ok([bed, bim, fam])
    }
}

/// All files of `kind` below `dir`, sorted, skipping hidden files and directories.
pub fn scan_kind(dir: &Utf8Path, kind: FileKind) -> Result<Vec<Utf8PathBuf>, MergeError> {
    if !dir.as_std_path().is_dir() {
        return Err(MergeError::Filesystem(format!(
            "module directory not found: {dir}"
        )));
    }

    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(path.as_std_path())
            .map_err(|err| MergeError::Filesystem(format!("read {path}: {err}")))?;
        for entry in entries {
            let entry = entry.map_err(|err| MergeError::Filesystem(err.to_string()))?;
            let path = Utf8PathBuf::from_path_buf(entry.path()).map_err(|path| {
                MergeError::Filesystem(format!("non-utf8 path: {}", path.display()))
            })?;
            if path
                .file_name()
                .map(|name| name.starts_with('.'))
                .unwrap_or(false)
            {
                continue;
            }
            if path.as_std_path().is_dir() {
                stack.push(path);
            } else if path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case(kind.extension()))
                .unwrap_or(false)
            {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

pub fn find_unique(dir: &Utf8Path, kind: FileKind) -> Result<Option<Utf8PathBuf>, MergeError> {
    let mut matches = scan_kind(dir, kind)?;
    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.pop()),
        _ => Err(MergeError::AmbiguousFile {
            module: dir.to_string(),
            kind: kind.to_string(),
            paths: matches.into_iter().map(|path| path.to_string()).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn touch(root: &Utf8Path, relative: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path()).unwrap();
        }
        fs::write(path.as_std_path(), b"").unwrap();
    }

    fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, root)
    }

    #[test]
    fn scan_is_recursive_and_skips_hidden_paths() {
        let (_temp, root) = temp_root();
        touch(&root, "nested/deeper/data.bed");
        touch(&root, ".snapshot/old.bed");
        touch(&root, "nested/.old.bed");
        touch(&root, "data.BIM");

        let beds = scan_kind(&root, FileKind::Bed).unwrap();
        assert_eq!(beds, vec![root.join("nested/deeper/data.bed")]);
        assert_eq!(scan_kind(&root, FileKind::Bim).unwrap().len(), 1);
        assert!(scan_kind(&root, FileKind::Fam).unwrap().is_empty());
    }

    #[test]
    fn two_matches_are_ambiguous() {
        let (_temp, root) = temp_root();
        touch(&root, "a.fam");
        touch(&root, "sub/b.fam");

        let err = find_unique(&root, FileKind::Fam).unwrap_err();
        assert_matches!(err, MergeError::AmbiguousFile { ref paths, .. } if paths.len() == 2);
    }

    #[test]
    fn module_reports_first_missing_genotype_kind() {
        let (_temp, root) = temp_root();
        touch(&root, "m.bed");
        touch(&root, "m.fam");

        let module = Module::scan(&root).unwrap();
        assert_eq!(module.genotype_files().unwrap_err(), FileKind::Bim);
        assert!(module.janno.is_none());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let err = scan_kind(Utf8Path::new("/definitely/not/here"), FileKind::Bed).unwrap_err();
        assert_matches!(err, MergeError::Filesystem(_));
    }
}
