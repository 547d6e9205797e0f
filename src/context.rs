use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::MergeError;

/// Run-scoped namespace: `<workdir>/<timestamp>/` for intermediates and logs,
/// plus the output prefixes every stage writes to.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: String,
    run_dir: Utf8PathBuf,
    output_dir: Utf8PathBuf,
    dataset_name: String,
}

impl RunContext {
    pub fn create(
        workdir: &Utf8Path,
        output_dir: &Utf8Path,
        dataset_name: &str,
    ) -> Result<Self, MergeError> {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        Self::create_with_id(workdir, output_dir, dataset_name, &timestamp)
    }

    /// Creates `<workdir>/<run_id>`, suffixing `-1`, `-2`, ... if a concurrent
    /// run already claimed the name.
    pub fn create_with_id(
        workdir: &Utf8Path,
        output_dir: &Utf8Path,
        dataset_name: &str,
        run_id: &str,
    ) -> Result<Self, MergeError> {
        fs::create_dir_all(workdir.as_std_path())
            .map_err(|err| MergeError::Filesystem(format!("create {workdir}: {err}")))?;
        fs::create_dir_all(output_dir.as_std_path())
            .map_err(|err| MergeError::Filesystem(format!("create {output_dir}: {err}")))?;

        let mut attempt = 0;
        let (run_id, run_dir) = loop {
            let candidate = if attempt == 0 {
                run_id.to_string()
            } else {
                format!("{run_id}-{attempt}")
            };
            let run_dir = workdir.join(&candidate);
            match fs::create_dir(run_dir.as_std_path()) {
                Ok(()) => break (candidate, run_dir),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => {
                    return Err(MergeError::Filesystem(format!("create {run_dir}: {err}")));
                }
            }
        };

        let context = Self {
            run_id,
            run_dir,
            output_dir: output_dir.to_path_buf(),
            dataset_name: dataset_name.to_string(),
        };
        fs::create_dir_all(context.log_dir().as_std_path())
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        Ok(context)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Utf8Path {
        &self.run_dir
    }

    pub fn output_dir(&self) -> &Utf8Path {
        &self.output_dir
    }

    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    pub fn log_dir(&self) -> Utf8PathBuf {
        self.run_dir.join("logs")
    }

    pub fn job_log(&self, job: &str) -> Utf8PathBuf {
        self.log_dir().join(format!("{job}.log"))
    }

    pub fn genotype_manifest(&self) -> Utf8PathBuf {
        self.run_dir.join("genotype_files.txt")
    }

    pub fn metadata_manifest(&self) -> Utf8PathBuf {
        self.run_dir.join("janno_files.txt")
    }

    pub fn merge_list(&self) -> Utf8PathBuf {
        self.run_dir.join("plink_merge_list.txt")
    }

    pub fn order_file(&self) -> Utf8PathBuf {
        self.run_dir.join("plink_order_file.txt")
    }

    pub fn convertf_params(&self, prefix: &Utf8Path) -> Utf8PathBuf {
        let stem = prefix.file_name().unwrap_or(self.dataset_name.as_str());
        self.run_dir.join(format!("convertf_{stem}.par"))
    }

    pub fn report_path(&self) -> Utf8PathBuf {
        self.run_dir.join("run.json")
    }

    pub fn merged_prefix(&self) -> Utf8PathBuf {
        self.output_dir.join(&self.dataset_name)
    }

    pub fn extracted_prefix(&self) -> Utf8PathBuf {
        self.output_dir.join(format!("{}_snps", self.dataset_name))
    }

    pub fn merged_janno(&self) -> Utf8PathBuf {
        self.output_dir.join(format!("{}.janno", self.dataset_name))
    }
}
