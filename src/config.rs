use std::fs;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::{MissingFilePolicy, Resources};
use crate::error::MergeError;

pub const DEFAULT_CONFIG_FILE: &str = "modmerge.json";
pub const DEFAULT_NA_SENTINEL: &str = "n/a";
pub const DEFAULT_ID_COLUMN: &str = "Individual_ID";
pub const DEFAULT_SNP_REFERENCE: &str = "1240K.snp_list";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub missing_file_policy: Option<MissingFilePolicy>,
    #[serde(default)]
    pub strict_columns: Option<bool>,
    #[serde(default)]
    pub na_sentinel: Option<String>,
    #[serde(default)]
    pub id_column: Option<String>,
    #[serde(default)]
    pub family_column: Option<String>,
    #[serde(default)]
    pub dataset_name: Option<String>,
    #[serde(default)]
    pub snp_reference: Option<String>,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub tools: ToolConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub merge: Option<Resources>,
    #[serde(default)]
    pub extract: Option<Resources>,
    #[serde(default)]
    pub convert: Option<Resources>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct ToolConfig {
    #[serde(default)]
    pub plink: Option<String>,
    #[serde(default)]
    pub convertf: Option<String>,
    #[serde(default)]
    pub sbatch: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StageResources {
    pub merge: Resources,
    pub extract: Resources,
    pub convert: Resources,
}

impl Default for StageResources {
    fn default() -> Self {
        Self {
            merge: Resources::new(4, "32G"),
            extract: Resources::new(2, "16G"),
            convert: Resources::new(2, "8G"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub missing_file_policy: MissingFilePolicy,
    pub strict_columns: bool,
    pub na_sentinel: String,
    pub id_column: String,
    pub family_column: Option<String>,
    pub dataset_name: String,
    /// Relative paths are resolved against the run's workdir.
    pub snp_reference: Utf8PathBuf,
    pub workdir: Option<Utf8PathBuf>,
    pub partition: String,
    pub resources: StageResources,
    pub tools: ToolConfig,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            missing_file_policy: MissingFilePolicy::Strict,
            strict_columns: false,
            na_sentinel: DEFAULT_NA_SENTINEL.to_string(),
            id_column: DEFAULT_ID_COLUMN.to_string(),
            family_column: None,
            dataset_name: "merged".to_string(),
            snp_reference: Utf8PathBuf::from(DEFAULT_SNP_REFERENCE),
            workdir: None,
            partition: "short".to_string(),
            resources: StageResources::default(),
            tools: ToolConfig::default(),
        }
    }
}

impl ResolvedConfig {
    pub fn workdir_for(&self, output_dir: &Utf8Path) -> Utf8PathBuf {
        self.workdir
            .clone()
            .unwrap_or_else(|| output_dir.join(".modmerge"))
    }

    pub fn snp_reference_for(&self, workdir: &Utf8Path) -> Utf8PathBuf {
        if self.snp_reference.is_absolute() {
            self.snp_reference.clone()
        } else {
            workdir.join(&self.snp_reference)
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `modmerge.json` in the current directory when it exists.
    /// Without either, the defaults apply.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, MergeError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(ResolvedConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| MergeError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| MergeError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, MergeError> {
        let defaults = ResolvedConfig::default();

        let dataset_name = config.dataset_name.unwrap_or(defaults.dataset_name);
        let valid_name = !dataset_name.is_empty()
            && !dataset_name.starts_with('.')
            && dataset_name
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'));
        if !valid_name {
            return Err(MergeError::ConfigParse(format!(
                "dataset_name must be a plain file name: {dataset_name:?}"
            )));
        }

        let id_column = config.id_column.unwrap_or(defaults.id_column);
        if id_column.trim().is_empty() {
            return Err(MergeError::ConfigParse(
                "id_column must not be empty".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            missing_file_policy: config
                .missing_file_policy
                .unwrap_or(defaults.missing_file_policy),
            strict_columns: config.strict_columns.unwrap_or(defaults.strict_columns),
            na_sentinel: config.na_sentinel.unwrap_or(defaults.na_sentinel),
            id_column,
            family_column: config.family_column,
            dataset_name,
            snp_reference: config
                .snp_reference
                .map(Utf8PathBuf::from)
                .unwrap_or(defaults.snp_reference),
            workdir: config.workdir.map(Utf8PathBuf::from),
            partition: config.partition.unwrap_or(defaults.partition),
            resources: StageResources {
                merge: config.resources.merge.unwrap_or(defaults.resources.merge),
                extract: config
                    .resources
                    .extract
                    .unwrap_or(defaults.resources.extract),
                convert: config
                    .resources
                    .convert
                    .unwrap_or(defaults.resources.convert),
            },
            tools: config.tools,
        })
    }
}
