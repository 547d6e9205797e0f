use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;

use camino::Utf8Path;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::MergeError;
use crate::stages::{JobSpec, resolve_tool};

/// Acknowledgement returned by the scheduler for an accepted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Submission boundary. `dependencies` holds the handles of every job `job`
/// depends on, all of which were already accepted.
pub trait Scheduler {
    fn submit(
        &self,
        job: &JobSpec,
        dependencies: &[JobHandle],
        log: &Utf8Path,
    ) -> Result<JobHandle, MergeError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
pub struct SlurmScheduler {
    sbatch: PathBuf,
    partition: String,
}

impl SlurmScheduler {
    pub fn new(sbatch: Option<&str>, partition: &str) -> Result<Self, MergeError> {
        let sbatch = resolve_tool("sbatch", sbatch, true)?;
        Ok(Self::with_program(sbatch, partition))
    }

    pub fn with_program(sbatch: impl Into<PathBuf>, partition: &str) -> Self {
        Self {
            sbatch: sbatch.into(),
            partition: partition.to_string(),
        }
    }

    pub fn sbatch_args(
        &self,
        job: &JobSpec,
        dependencies: &[JobHandle],
        log: &Utf8Path,
    ) -> Vec<String> {
        let mut args = vec![
            "--parsable".to_string(),
            "-p".to_string(),
            self.partition.clone(),
            "-c".to_string(),
            job.resources.cores.to_string(),
            format!("--mem={}", job.resources.memory),
            "-J".to_string(),
            job.name.clone(),
            "-o".to_string(),
            log.to_string(),
        ];
        if !dependencies.is_empty() {
            let ids = dependencies
                .iter()
                .map(JobHandle::as_str)
                .collect::<Vec<_>>()
                .join(":");
            args.push(format!("--dependency=afterok:{ids}"));
        }
        args.push(format!("--wrap={}", job.command_line()));
        args
    }
}

impl Scheduler for SlurmScheduler {
    fn submit(
        &self,
        job: &JobSpec,
        dependencies: &[JobHandle],
        log: &Utf8Path,
    ) -> Result<JobHandle, MergeError> {
        let args = self.sbatch_args(job, dependencies, log);
        debug!(job = %job.name, ?args, "sbatch");
        let output = Command::new(&self.sbatch)
            .args(&args)
            .output()
            .map_err(|err| external_error(&self.sbatch, &args, None, err.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("sbatch exited with {}", output.status)
            } else {
                stderr
            };
            return Err(MergeError::Submission {
                job: job.name.clone(),
                message,
            });
        }

        let id = parse_job_id(&stdout).ok_or_else(|| MergeError::Submission {
            job: job.name.clone(),
            message: format!("unrecognised sbatch output: {stdout:?}"),
        })?;
        info!(job = %job.name, id = %id, "submitted");
        Ok(JobHandle::new(id))
    }

    fn name(&self) -> &'static str {
        "slurm"
    }
}

/// Accepts `--parsable` output (`<id>` or `<id>;<cluster>`) as well as the
/// default `Submitted batch job <id>` line.
pub fn parse_job_id(stdout: &str) -> Option<String> {
    let pattern = Regex::new(r"(?m)^(?:Submitted batch job )?(\d+)(?:;\S+)?$").ok()?;
    pattern
        .captures(stdout.trim())
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
}

/// Runs each job to completion in the foreground, stdout and stderr going to
/// the job log. Submission order already satisfies the dependencies.
#[derive(Debug, Clone, Default)]
pub struct LocalScheduler;

impl Scheduler for LocalScheduler {
    fn submit(
        &self,
        job: &JobSpec,
        _dependencies: &[JobHandle],
        log: &Utf8Path,
    ) -> Result<JobHandle, MergeError> {
        let program = Path::new(&job.program);
        let stdout = fs::File::create(log.as_std_path())
            .map_err(|err| MergeError::Filesystem(format!("create {log}: {err}")))?;
        let stderr = stdout
            .try_clone()
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;

        info!(job = %job.name, "running locally");
        let status = Command::new(program)
            .args(&job.args)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .status()
            .map_err(|err| external_error(program, &job.args, None, err.to_string()))?;
        if !status.success() {
            return Err(external_error(
                program,
                &job.args,
                status.code(),
                format!("{status}, see {log}"),
            ));
        }
        Ok(JobHandle::new(format!("local-{}", job.name)))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Records jobs without running or submitting anything.
#[derive(Debug, Default)]
pub struct DryRunScheduler {
    submitted: Mutex<Vec<String>>,
}

impl DryRunScheduler {
    pub fn submitted(&self) -> Vec<String> {
        self.submitted
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl Scheduler for DryRunScheduler {
    fn submit(
        &self,
        job: &JobSpec,
        _dependencies: &[JobHandle],
        _log: &Utf8Path,
    ) -> Result<JobHandle, MergeError> {
        let mut guard = self.submitted.lock().map_err(|_| MergeError::Submission {
            job: job.name.clone(),
            message: "dry-run recorder poisoned".to_string(),
        })?;
        guard.push(job.name.clone());
        Ok(JobHandle::new(format!("dry-run-{}", guard.len())))
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}

fn external_error(
    program: &Path,
    args: &[String],
    status: Option<i32>,
    message: String,
) -> MergeError {
    MergeError::ExternalTool {
        program: program.display().to_string(),
        args: args.to_vec(),
        status,
        message,
    }
}
