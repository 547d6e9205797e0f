use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{FileKind, MissingFilePolicy};
use crate::error::MergeError;
use crate::fs_util;
use crate::scanner::Module;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
    Genotype,
    Metadata,
}

impl ManifestKind {
    /// Kinds whose paths make up a manifest line.
    pub fn kinds(&self) -> &'static [FileKind] {
        match self {
            ManifestKind::Genotype => &FileKind::GENOTYPE,
            ManifestKind::Metadata => &[FileKind::Janno],
        }
    }

    /// Kinds a module needs to be included. Metadata rows are only usable for
    /// modules whose samples are genotyped.
    pub fn required(&self) -> &'static [FileKind] {
        match self {
            ManifestKind::Genotype => &FileKind::GENOTYPE,
            ManifestKind::Metadata => &[
                FileKind::Bed,
                FileKind::Bim,
                FileKind::Fam,
                FileKind::Janno,
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub module: Utf8PathBuf,
    /// `None` marks a module skipped under the lenient policy.
    pub files: Option<Vec<Utf8PathBuf>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub kind: ManifestKind,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that contribute to downstream stages, in module order.
    pub fn included(&self) -> impl Iterator<Item = (&Utf8Path, &[Utf8PathBuf])> {
        self.entries.iter().filter_map(|entry| {
            entry
                .files
                .as_deref()
                .map(|files| (entry.module.as_path(), files))
        })
    }

    pub fn included_count(&self) -> usize {
        self.included().count()
    }

    /// One line per module, paths joined by a space; gaps render as empty lines.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            if let Some(files) = &entry.files {
                let line = files
                    .iter()
                    .map(|path| path.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                out.push_str(&line);
            }
            out.push('\n');
        }
        out
    }

    pub fn write(&self, path: &Utf8Path) -> Result<(), MergeError> {
        fs_util::write_atomic(path, self.render().as_bytes())
    }

    /// plink `--merge-list` input: one `bed bim fam` line per included module.
    pub fn render_included(&self) -> String {
        let mut out = String::new();
        for (_, files) in self.included() {
            let line = files
                .iter()
                .map(|path| path.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestGap {
    pub module: Utf8PathBuf,
    pub manifest: ManifestKind,
    pub missing: FileKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct Manifests {
    pub modules: Vec<Module>,
    pub genotype: Manifest,
    pub metadata: Manifest,
    pub gaps: Vec<ManifestGap>,
}

/// Reads the module list: one directory per line, blank lines skipped.
pub fn read_module_list(path: &Utf8Path) -> Result<Vec<Utf8PathBuf>, MergeError> {
    let content = fs_util::read_to_string(path)?;
    let modules = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| fs_util::absolute(Utf8Path::new(line)))
        .collect::<Result<Vec<_>, _>>()?;
    if modules.is_empty() {
        return Err(MergeError::EmptyInput(format!(
            "module list {path} contains no module directories"
        )));
    }
    Ok(modules)
}

pub struct FileListBuilder {
    policy: MissingFilePolicy,
}

impl FileListBuilder {
    pub fn new(policy: MissingFilePolicy) -> Self {
        Self { policy }
    }

    pub fn build(&self, module_paths: &[Utf8PathBuf]) -> Result<Manifests, MergeError> {
        let modules = module_paths
            .iter()
            .map(|path| Module::scan(path))
            .collect::<Result<Vec<_>, _>>()?;

        let mut gaps = Vec::new();
        let genotype = self.manifest_for(&modules, ManifestKind::Genotype, &mut gaps)?;
        let metadata = self.manifest_for(&modules, ManifestKind::Metadata, &mut gaps)?;

        Ok(Manifests {
            modules,
            genotype,
            metadata,
            gaps,
        })
    }

    fn manifest_for(
        &self,
        modules: &[Module],
        kind: ManifestKind,
        gaps: &mut Vec<ManifestGap>,
    ) -> Result<Manifest, MergeError> {
        let mut entries = Vec::with_capacity(modules.len());
        for module in modules {
            let missing = kind
                .required()
                .iter()
                .copied()
                .find(|file_kind| module.file(*file_kind).is_none());
            let files = match missing {
                None => Some(
                    kind.kinds()
                        .iter()
                        .filter_map(|file_kind| module.file(*file_kind))
                        .map(Utf8Path::to_path_buf)
                        .collect::<Vec<_>>(),
                ),
                Some(file_kind) => match self.policy {
                    MissingFilePolicy::Strict => {
                        return Err(MergeError::MissingFile {
                            module: module.path.to_string(),
                            kind: file_kind.to_string(),
                        });
                    }
                    MissingFilePolicy::Lenient => {
                        warn!(
                            module = %module.path,
                            missing = %file_kind,
                            "skipping module in {:?} manifest",
                            kind
                        );
                        gaps.push(ManifestGap {
                            module: module.path.clone(),
                            manifest: kind,
                            missing: file_kind,
                        });
                        None
                    }
                },
            };
            debug!(module = %module.path, included = files.is_some(), "manifest entry");
            entries.push(ManifestEntry {
                module: module.path.clone(),
                files,
            });
        }
        Ok(Manifest { kind, entries })
    }
}
