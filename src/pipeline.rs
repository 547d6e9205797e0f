use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ResolvedConfig;
use crate::context::RunContext;
use crate::domain::MissingFilePolicy;
use crate::error::MergeError;
use crate::fs_util;
use crate::manifest::{FileListBuilder, ManifestGap, read_module_list};
use crate::metadata::{MetadataMergeOptions, merge_manifest};
use crate::order::SampleOrder;
use crate::scheduler::{JobHandle, Scheduler};
use crate::stages::{
    CONVERT_EXTRACTED_JOB, CONVERT_MERGED_JOB, EXTRACT_JOB, JobSpec, MERGE_JOB, StagePlanner,
    Tools,
};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Submitted { handle: JobHandle },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    #[serde(flatten)]
    pub spec: JobSpec,
    pub command: String,
    pub log: Utf8PathBuf,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobRecord {
    pub fn handle(&self) -> Option<&JobHandle> {
        match &self.state {
            JobState::Submitted { handle } => Some(handle),
            JobState::Pending => None,
        }
    }
}

/// Fixed-size dependency graph of external jobs, keyed by job name.
#[derive(Debug, Clone)]
pub struct JobGraph {
    jobs: Vec<JobSpec>,
}

impl JobGraph {
    pub fn new(jobs: Vec<JobSpec>) -> Result<Self, MergeError> {
        let mut names = HashSet::new();
        for job in &jobs {
            if !names.insert(job.name.as_str()) {
                return Err(MergeError::Submission {
                    job: job.name.clone(),
                    message: "job name used twice".to_string(),
                });
            }
        }
        for job in &jobs {
            if let Some(missing) = job
                .dependencies
                .iter()
                .find(|dep| !names.contains(dep.as_str()))
            {
                return Err(MergeError::Submission {
                    job: job.name.clone(),
                    message: format!("depends on unknown job {missing}"),
                });
            }
        }
        Ok(Self { jobs })
    }

    pub fn jobs(&self) -> &[JobSpec] {
        &self.jobs
    }

    /// Indices in an order where every job follows all of its dependencies.
    /// Ties keep insertion order.
    pub fn submission_order(&self) -> Result<Vec<usize>, MergeError> {
        let index = self
            .jobs
            .iter()
            .enumerate()
            .map(|(i, job)| (job.name.as_str(), i))
            .collect::<HashMap<_, _>>();
        let mut remaining = self
            .jobs
            .iter()
            .map(|job| job.dependencies.len())
            .collect::<Vec<_>>();
        let mut dependents = vec![Vec::new(); self.jobs.len()];
        for (i, job) in self.jobs.iter().enumerate() {
            for dep in &job.dependencies {
                dependents[index[dep.as_str()]].push(i);
            }
        }

        let mut ready = (0..self.jobs.len())
            .filter(|&i| remaining[i] == 0)
            .collect::<VecDeque<_>>();
        let mut order = Vec::with_capacity(self.jobs.len());
        while let Some(i) = ready.pop_front() {
            order.push(i);
            for &next in &dependents[i] {
                remaining[next] -= 1;
                if remaining[next] == 0 {
                    ready.push_back(next);
                }
            }
        }

        if order.len() != self.jobs.len() {
            let stuck = (0..self.jobs.len())
                .find(|i| !order.contains(i))
                .map(|i| self.jobs[i].name.clone())
                .unwrap_or_default();
            return Err(MergeError::Submission {
                job: stuck,
                message: "dependency cycle".to_string(),
            });
        }
        Ok(order)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetadataSummary {
    pub path: Utf8PathBuf,
    pub rows: usize,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutputs {
    pub merged_prefix: Utf8PathBuf,
    pub extracted_prefix: Utf8PathBuf,
    pub janno: Option<MetadataSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub run_dir: Utf8PathBuf,
    pub started_at: String,
    pub tool: String,
    pub scheduler: String,
    pub policy: MissingFilePolicy,
    pub modules: usize,
    pub genotype_modules: usize,
    pub metadata_modules: usize,
    pub samples: usize,
    pub warnings: Vec<ManifestGap>,
    pub outputs: RunOutputs,
    pub jobs: Vec<JobRecord>,
}

impl RunReport {
    pub fn write(&self, path: &Utf8Path) -> Result<(), MergeError> {
        let content = serde_json::to_vec_pretty(self)
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        fs_util::write_atomic(path, &content)
    }

    pub fn submitted(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| job.handle().is_some())
            .count()
    }
}

pub struct Pipeline<S: Scheduler> {
    config: ResolvedConfig,
    tools: Tools,
    scheduler: S,
}

impl<S: Scheduler> Pipeline<S> {
    pub fn new(config: ResolvedConfig, tools: Tools, scheduler: S) -> Self {
        Self {
            config,
            tools,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Validates every input, writes the run artifacts, then submits the job
    /// graph. Nothing is submitted unless all validation succeeded.
    pub fn run(
        &self,
        module_list: &Utf8Path,
        output_dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, MergeError> {
        let output_dir = fs_util::absolute(output_dir)?;
        let workdir = fs_util::absolute(&self.config.workdir_for(&output_dir))?;
        let context = RunContext::create(&workdir, &output_dir, &self.config.dataset_name)?;
        self.run_in(module_list, &context, sink)
    }

    pub fn run_in(
        &self,
        module_list: &Utf8Path,
        context: &RunContext,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, MergeError> {
        let started_at = chrono::Utc::now().to_rfc3339();
        let start = Instant::now();
        info!(run = context.run_id(), dir = %context.run_dir(), "starting merge run");

        sink.event(ProgressEvent {
            message: format!("phase=Scan; reading module list {module_list}"),
            elapsed: None,
        });
        let module_paths = read_module_list(module_list)?;
        let manifests =
            FileListBuilder::new(self.config.missing_file_policy).build(&module_paths)?;
        manifests.genotype.write(&context.genotype_manifest())?;
        manifests.metadata.write(&context.metadata_manifest())?;
        if manifests.genotype.included_count() == 0 {
            return Err(MergeError::EmptyInput(
                "no module provides a complete bed/bim/fam triplet".to_string(),
            ));
        }
        fs_util::write_atomic(
            &context.merge_list(),
            manifests.genotype.render_included().as_bytes(),
        )?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Scan; {} modules, {} genotype, {} metadata",
                manifests.modules.len(),
                manifests.genotype.included_count(),
                manifests.metadata.included_count()
            ),
            elapsed: Some(start.elapsed()),
        });

        sink.event(ProgressEvent {
            message: "phase=Order; resolving sample order".to_string(),
            elapsed: None,
        });
        let order = SampleOrder::from_manifest(&manifests.genotype)?;
        order.write(&context.order_file())?;

        sink.event(ProgressEvent {
            message: "phase=Metadata; merging janno tables".to_string(),
            elapsed: None,
        });
        let janno = if manifests.metadata.included_count() > 0 {
            let merged = merge_manifest(
                &manifests.metadata,
                &order,
                &MetadataMergeOptions::from(&self.config),
            )?;
            let path = context.merged_janno();
            merged.write(&path)?;
            Some(MetadataSummary {
                path,
                rows: merged.rows.len(),
                columns: merged.columns,
            })
        } else {
            warn!("no module provides a janno table, skipping metadata merge");
            None
        };

        let reference = self.config.snp_reference_for(&workdir_of(context));
        if !reference.as_std_path().is_file() {
            warn!(path = %reference, "SNP reference list not found locally");
        }

        let planner = StagePlanner::new(context, &self.tools, &self.config.resources);
        let merge = planner.genotype_merge(&context.merge_list(), &context.order_file());
        let extract = planner.snp_extraction(&reference);
        let (convert_merged, merged_descriptor) =
            planner.conversion(CONVERT_MERGED_JOB, &context.merged_prefix(), MERGE_JOB);
        let (convert_extracted, extracted_descriptor) = planner.conversion(
            CONVERT_EXTRACTED_JOB,
            &context.extracted_prefix(),
            EXTRACT_JOB,
        );
        merged_descriptor.write()?;
        extracted_descriptor.write()?;
        let graph = JobGraph::new(vec![merge, extract, convert_merged, convert_extracted])?;

        let mut report = RunReport {
            run_id: context.run_id().to_string(),
            run_dir: context.run_dir().to_path_buf(),
            started_at,
            tool: format!("modmerge/{}", env!("CARGO_PKG_VERSION")),
            scheduler: self.scheduler.name().to_string(),
            policy: self.config.missing_file_policy,
            modules: manifests.modules.len(),
            genotype_modules: manifests.genotype.included_count(),
            metadata_modules: manifests.metadata.included_count(),
            samples: order.len(),
            warnings: manifests.gaps.clone(),
            outputs: RunOutputs {
                merged_prefix: context.merged_prefix(),
                extracted_prefix: context.extracted_prefix(),
                janno,
            },
            jobs: graph
                .jobs()
                .iter()
                .map(|job| JobRecord {
                    spec: job.clone(),
                    command: job.command_line(),
                    log: context.job_log(&job.name),
                    state: JobState::Pending,
                })
                .collect(),
        };

        sink.event(ProgressEvent {
            message: format!(
                "phase=Submit; {} jobs via {}",
                graph.jobs().len(),
                self.scheduler.name()
            ),
            elapsed: None,
        });
        let submitted = self.submit_graph(&graph, &mut report.jobs);
        let written = report.write(&context.report_path());
        match (submitted, written) {
            (Err(err), Err(write_err)) => {
                warn!(
                    path = %context.report_path(),
                    error = %write_err,
                    "could not write run report"
                );
                return Err(err);
            }
            (Err(err), Ok(())) => return Err(err),
            (Ok(()), written) => written?,
        }

        sink.event(ProgressEvent {
            message: format!("phase=Done; submitted {} jobs", report.submitted()),
            elapsed: Some(start.elapsed()),
        });
        Ok(report)
    }

    /// Submits each job once, after all of its dependencies were accepted.
    /// Stops at the first rejection; jobs already accepted stay recorded.
    pub fn submit_graph(
        &self,
        graph: &JobGraph,
        records: &mut [JobRecord],
    ) -> Result<(), MergeError> {
        let mut handles: HashMap<&str, JobHandle> = HashMap::new();
        for i in graph.submission_order()? {
            let job = &graph.jobs()[i];
            let dependencies = job
                .dependencies
                .iter()
                .map(|dep| {
                    handles.get(dep.as_str()).cloned().ok_or_else(|| {
                        MergeError::Submission {
                            job: job.name.clone(),
                            message: format!("dependency {dep} was not submitted"),
                        }
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let handle = self
                .scheduler
                .submit(job, &dependencies, &records[i].log)?;
            info!(job = %job.name, handle = handle.as_str(), "job accepted");
            records[i].state = JobState::Submitted {
                handle: handle.clone(),
            };
            handles.insert(job.name.as_str(), handle);
        }
        Ok(())
    }
}

fn workdir_of(context: &RunContext) -> Utf8PathBuf {
    context
        .run_dir()
        .parent()
        .map(Utf8Path::to_path_buf)
        .unwrap_or_else(|| context.run_dir().to_path_buf())
}
