use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::warn;

use crate::config::{ResolvedConfig, StageResources};
use crate::context::RunContext;
use crate::domain::Resources;
use crate::error::MergeError;
use crate::fs_util;

pub const MERGE_JOB: &str = "merge";
pub const EXTRACT_JOB: &str = "extract";
pub const CONVERT_MERGED_JOB: &str = "convert_merged";
pub const CONVERT_EXTRACTED_JOB: &str = "convert_extracted";

/// A unit of work for the scheduler. Dependencies refer to other jobs by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSpec {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub resources: Resources,
    pub dependencies: Vec<String>,
}

impl JobSpec {
    /// Shell form of the command, suitable for `sbatch --wrap`.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "_-./=:,+@%".contains(ch));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tools {
    pub plink: String,
    pub convertf: String,
}

impl Tools {
    /// Uses configured paths as given, otherwise looks the tools up on `PATH`.
    /// With `require` unset a missing tool falls back to its bare name.
    pub fn resolve(config: &ResolvedConfig, require: bool) -> Result<Self, MergeError> {
        Ok(Self {
            plink: resolve_tool("plink", config.tools.plink.as_deref(), require)?,
            convertf: resolve_tool("convertf", config.tools.convertf.as_deref(), require)?,
        })
    }
}

pub(crate) fn resolve_tool(
    name: &str,
    configured: Option<&str>,
    require: bool,
) -> Result<String, MergeError> {
    if let Some(path) = configured {
        return Ok(path.to_string());
    }
    match fs_util::find_in_path(name) {
        Some(path) => Ok(path.to_string_lossy().to_string()),
        None if require => Err(MergeError::MissingTool(name.to_string())),
        None => {
            warn!(tool = name, "not found on PATH, using bare name");
            Ok(name.to_string())
        }
    }
}

/// Builds the fixed set of external jobs for one run.
pub struct StagePlanner<'a> {
    context: &'a RunContext,
    tools: &'a Tools,
    resources: &'a StageResources,
}

impl<'a> StagePlanner<'a> {
    pub fn new(context: &'a RunContext, tools: &'a Tools, resources: &'a StageResources) -> Self {
        Self {
            context,
            tools,
            resources,
        }
    }

    pub fn genotype_merge(&self, merge_list: &Utf8Path, order_file: &Utf8Path) -> JobSpec {
        JobSpec {
            name: MERGE_JOB.to_string(),
            program: self.tools.plink.clone(),
            args: vec![
                "--merge-list".to_string(),
                merge_list.to_string(),
                "--make-bed".to_string(),
                "--indiv-sort".to_string(),
                "f".to_string(),
                order_file.to_string(),
                "--out".to_string(),
                self.context.merged_prefix().to_string(),
            ],
            resources: self.resources.merge.clone(),
            dependencies: Vec::new(),
        }
    }

    pub fn snp_extraction(&self, reference: &Utf8Path) -> JobSpec {
        JobSpec {
            name: EXTRACT_JOB.to_string(),
            program: self.tools.plink.clone(),
            args: vec![
                "--bfile".to_string(),
                self.context.merged_prefix().to_string(),
                "--extract".to_string(),
                reference.to_string(),
                "--make-bed".to_string(),
                "--out".to_string(),
                self.context.extracted_prefix().to_string(),
            ],
            resources: self.resources.extract.clone(),
            dependencies: vec![MERGE_JOB.to_string()],
        }
    }

    /// The job plus the descriptor it reads; the caller writes the descriptor
    /// before submitting.
    pub fn conversion(
        &self,
        name: &str,
        prefix: &Utf8Path,
        depends_on: &str,
    ) -> (JobSpec, ConvertfDescriptor) {
        let descriptor = ConvertfDescriptor::eigenstrat(prefix, prefix);
        let params = self.context.convertf_params(prefix);
        let job = JobSpec {
            name: name.to_string(),
            program: self.tools.convertf.clone(),
            args: vec!["-p".to_string(), params.to_string()],
            resources: self.resources.convert.clone(),
            dependencies: vec![depends_on.to_string()],
        };
        (job, descriptor.at(params))
    }
}

/// convertf parameter file turning a PLINK binary triplet into EIGENSTRAT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvertfDescriptor {
    pub input_prefix: Utf8PathBuf,
    pub output_prefix: Utf8PathBuf,
    pub path: Option<Utf8PathBuf>,
}

impl ConvertfDescriptor {
    pub fn eigenstrat(input_prefix: &Utf8Path, output_prefix: &Utf8Path) -> Self {
        Self {
            input_prefix: input_prefix.to_path_buf(),
            output_prefix: output_prefix.to_path_buf(),
            path: None,
        }
    }

    fn at(mut self, path: Utf8PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    pub fn render(&self) -> String {
        let input = self.input_prefix.as_str();
        let output = self.output_prefix.as_str();
        format!(
            "genotypename: {input}.bed\n\
             snpname: {input}.bim\n\
             indivname: {input}.fam\n\
             outputformat: EIGENSTRAT\n\
             genotypeoutname: {output}.geno\n\
             snpoutname: {output}.snp\n\
             indivoutname: {output}.ind\n"
        )
    }

    pub fn write(&self) -> Result<(), MergeError> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| MergeError::Filesystem("descriptor has no destination".to_string()))?;
        fs_util::write_atomic(path, self.render().as_bytes())
    }
}
