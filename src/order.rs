//! Canonical sample order shared by every merged output.
//!
//! The order is the concatenation of each module's `.fam` records in
//! module-list order. plink receives it through `--indiv-sort f`, and the
//! metadata merge sorts its rows by it, so both outputs list the same
//! individuals in the same sequence.

use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::domain::{FileKind, SampleId};
use crate::error::MergeError;
use crate::fs_util;
use crate::manifest::Manifest;

#[derive(Debug, Clone, Default)]
pub struct SampleOrder {
    samples: Vec<SampleId>,
    origins: Vec<usize>,
    sources: Vec<Utf8PathBuf>,
    index: HashMap<SampleId, usize>,
    by_individual: HashMap<String, Vec<usize>>,
}

impl SampleOrder {
    /// Builds the order from the `.fam` files of the included genotype entries.
    pub fn from_manifest(manifest: &Manifest) -> Result<Self, MergeError> {
        let mut order = Self::default();
        for (module, files) in manifest.included() {
            let fam = files
                .iter()
                .find(|path| {
                    path.extension()
                        .map(|ext| ext.eq_ignore_ascii_case(FileKind::Fam.extension()))
                        .unwrap_or(false)
                })
                .ok_or_else(|| MergeError::MissingFile {
                    module: module.to_string(),
                    kind: FileKind::Fam.to_string(),
                })?;
            order.append_fam(module, fam)?;
        }
        if order.is_empty() {
            return Err(MergeError::EmptyInput(
                "no samples found in any .fam file".to_string(),
            ));
        }
        info!(samples = order.len(), "resolved sample order");
        Ok(order)
    }

    pub fn append_fam(&mut self, module: &Utf8Path, fam: &Utf8Path) -> Result<(), MergeError> {
        let content = fs_util::read_to_string(fam)?;
        self.append_records(module, fam, &content)
    }

    /// Appends one module's individual records. Blank lines are ignored.
    pub fn append_records(
        &mut self,
        module: &Utf8Path,
        table: &Utf8Path,
        content: &str,
    ) -> Result<(), MergeError> {
        let source = self.sources.len();
        self.sources.push(module.to_path_buf());
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let id: SampleId = line.parse().map_err(|_| MergeError::MalformedTable {
                path: table.to_string(),
                message: format!("line {} has fewer than two fields", line_no + 1),
            })?;
            self.push(id, source)?;
        }
        Ok(())
    }

    fn push(&mut self, id: SampleId, source: usize) -> Result<(), MergeError> {
        if let Some(&existing) = self.index.get(&id) {
            return Err(MergeError::DuplicateSample {
                sample: id.to_string(),
                first: self.sources[self.origins[existing]].to_string(),
                second: self.sources[source].to_string(),
            });
        }
        let position = self.samples.len();
        self.index.insert(id.clone(), position);
        self.by_individual
            .entry(id.individual().to_string())
            .or_default()
            .push(position);
        self.samples.push(id);
        self.origins.push(source);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[SampleId] {
        &self.samples
    }

    pub fn position(&self, id: &SampleId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Looks a sample up by individual id alone. Returns `None` when the id is
    /// unknown or shared by several families.
    pub fn position_of_individual(&self, individual: &str) -> Option<usize> {
        match self.by_individual.get(individual).map(Vec::as_slice) {
            Some([position]) => Some(*position),
            _ => None,
        }
    }

    /// Every position whose individual id is `individual`, across families.
    pub fn positions_of_individual(&self, individual: &str) -> &[usize] {
        self.by_individual
            .get(individual)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// plink `--indiv-sort f` format: `FID IID` per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for id in &self.samples {
            out.push_str(id.family());
            out.push(' ');
            out.push_str(id.individual());
            out.push('\n');
        }
        out
    }

    pub fn write(&self, path: &Utf8Path) -> Result<(), MergeError> {
        fs_util::write_atomic(path, self.render().as_bytes())
    }
}
