use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MergeError {
    #[error("module {module} has no .{kind} file")]
    #[diagnostic(help("add the file or rerun with --policy lenient to skip the module"))]
    MissingFile { module: String, kind: String },

    #[error("module {module} has {} .{kind} files: {}", .paths.len(), .paths.join(", "))]
    #[diagnostic(help("keep exactly one file of each kind per module"))]
    AmbiguousFile {
        module: String,
        kind: String,
        paths: Vec<String>,
    },

    #[error("sample {sample} appears in {first} and again in {second}")]
    DuplicateSample {
        sample: String,
        first: String,
        second: String,
    },

    #[error(
        "metadata table {table} has columns [{}], expected [{}]",
        .found.join(", "),
        .expected.join(", ")
    )]
    #[diagnostic(help("disable strict_columns to merge by column union"))]
    SchemaMismatch {
        table: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("sample {sample} in {table} is not part of the genotype sample order")]
    UnresolvedSample { sample: String, table: String },

    #[error("individual {sample} in {table} matches {matches} samples of different families")]
    #[diagnostic(help("set family_column to match rows on family and individual id"))]
    AmbiguousSample {
        sample: String,
        table: String,
        matches: usize,
    },

    #[error("{program} {} failed: {message}", .args.join(" "))]
    ExternalTool {
        program: String,
        args: Vec<String>,
        status: Option<i32>,
        message: String,
    },

    #[error("scheduler rejected job {job}: {message}")]
    Submission { job: String, message: String },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("malformed table {path}: {message}")]
    MalformedTable { path: String, message: String },

    #[error("{0}")]
    EmptyInput(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl MergeError {
    /// Errors raised while validating inputs, before anything reaches the scheduler.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            MergeError::MissingFile { .. }
                | MergeError::AmbiguousFile { .. }
                | MergeError::DuplicateSample { .. }
                | MergeError::SchemaMismatch { .. }
                | MergeError::UnresolvedSample { .. }
                | MergeError::AmbiguousSample { .. }
                | MergeError::MalformedTable { .. }
                | MergeError::EmptyInput(_)
        )
    }
}
