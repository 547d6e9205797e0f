use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::MergeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Bed,
    Bim,
    Fam,
    Janno,
}

impl FileKind {
    pub const GENOTYPE: [FileKind; 3] = [FileKind::Bed, FileKind::Bim, FileKind::Fam];

    pub fn extension(&self) -> &'static str {
        match self {
            FileKind::Bed => "bed",
            FileKind::Bim => "bim",
            FileKind::Fam => "fam",
            FileKind::Janno => "janno",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl FromStr for FileKind {
    type Err = MergeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().trim_start_matches('.').to_lowercase().as_str() {
            "bed" => Ok(FileKind::Bed),
            "bim" => Ok(FileKind::Bim),
            "fam" => Ok(FileKind::Fam),
            "janno" => Ok(FileKind::Janno),
            _ => Err(MergeError::EmptyInput(format!("unknown file kind: {value}"))),
        }
    }
}

/// What to do with a module that lacks one of the files a stage needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MissingFilePolicy {
    #[default]
    Strict,
    Lenient,
}

impl fmt::Display for MissingFilePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingFilePolicy::Strict => write!(f, "strict"),
            MissingFilePolicy::Lenient => write!(f, "lenient"),
        }
    }
}

/// Composite sample identifier: the first two columns of a `.fam` record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleId {
    family: String,
    individual: String,
}

impl SampleId {
    pub fn new(family: impl Into<String>, individual: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            individual: individual.into(),
        }
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn individual(&self) -> &str {
        &self.individual
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.family, self.individual)
    }
}

impl FromStr for SampleId {
    type Err = MergeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut fields = value.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(family), Some(individual)) => Ok(Self::new(family, individual)),
            _ => Err(MergeError::EmptyInput(format!(
                "sample record needs family and individual fields: {value:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub cores: u32,
    pub memory: String,
}

impl Resources {
    pub fn new(cores: u32, memory: impl Into<String>) -> Self {
        Self {
            cores,
            memory: memory.into(),
        }
    }
}
