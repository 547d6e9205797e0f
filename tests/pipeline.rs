use std::fs;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use modmerge::config::ResolvedConfig;
use modmerge::context::RunContext;
use modmerge::domain::MissingFilePolicy;
use modmerge::error::MergeError;
use modmerge::output::JsonOutput;
use modmerge::pipeline::{JobState, Pipeline};
use modmerge::scheduler::{JobHandle, Scheduler};
use modmerge::stages::{JobSpec, Tools};

#[derive(Default)]
struct RecordingScheduler {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    reject: Option<String>,
}

impl RecordingScheduler {
    fn rejecting(job: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reject: Some(job.to_string()),
        }
    }

    fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Scheduler for RecordingScheduler {
    fn submit(
        &self,
        job: &JobSpec,
        dependencies: &[JobHandle],
        _log: &Utf8Path,
    ) -> Result<JobHandle, MergeError> {
        if self.reject.as_deref() == Some(job.name.as_str()) {
            return Err(MergeError::Submission {
                job: job.name.clone(),
                message: "partition unavailable".to_string(),
            });
        }
        let mut calls = self.calls.lock().unwrap();
        calls.push((
            job.name.clone(),
            dependencies
                .iter()
                .map(|handle| handle.as_str().to_string())
                .collect(),
        ));
        Ok(JobHandle::new(format!("{}", 100 + calls.len())))
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    root: Utf8PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        Self { _temp: temp, root }
    }

    fn module(&self, name: &str, fam: &str, janno: Option<&str>, exts: &[&str]) -> Utf8PathBuf {
        let dir = self.root.join("modules").join(name);
        fs::create_dir_all(dir.as_std_path()).unwrap();
        for ext in exts {
            fs::write(dir.join(format!("{name}.{ext}")).as_std_path(), b"").unwrap();
        }
        if exts.contains(&"fam") {
            fs::write(dir.join(format!("{name}.fam")).as_std_path(), fam).unwrap();
        }
        if let Some(janno) = janno {
            fs::write(dir.join(format!("{name}.janno")).as_std_path(), janno).unwrap();
        }
        dir
    }

    fn module_list(&self, modules: &[&Utf8Path]) -> Utf8PathBuf {
        let path = self.root.join("modules.txt");
        let mut content = String::from("\n");
        for module in modules {
            content.push_str(module.as_str());
            content.push_str("\n\n");
        }
        fs::write(path.as_std_path(), content).unwrap();
        path
    }

    fn context(&self) -> RunContext {
        RunContext::create_with_id(
            &self.root.join("work"),
            &self.root.join("out"),
            "merged",
            "20240102_030405",
        )
        .unwrap()
    }

    fn two_modules(&self, m2_exts: &[&str]) -> Utf8PathBuf {
        let m1 = self.module(
            "m1",
            "P1 S1 0 0 1 -9\nP1 S2 0 0 2 -9\n",
            Some("id\tsex\nS2\tF\nS1\tM\n"),
            &["bed", "bim", "fam"],
        );
        let m2 = self.module(
            "m2",
            "P2 S3 0 0 1 -9\n",
            Some("id\tage\nS3\t40\n"),
            m2_exts,
        );
        self.module_list(&[&m1, &m2])
    }
}

fn config(policy: MissingFilePolicy) -> ResolvedConfig {
    ResolvedConfig {
        missing_file_policy: policy,
        id_column: "id".to_string(),
        ..ResolvedConfig::default()
    }
}

fn tools() -> Tools {
    Tools {
        plink: "plink".to_string(),
        convertf: "convertf".to_string(),
    }
}

#[test]
fn merges_two_modules_and_submits_in_dependency_order() {
    let fixture = Fixture::new();
    let list = fixture.two_modules(&["bed", "bim", "fam"]);
    let context = fixture.context();
    let pipeline = Pipeline::new(
        config(MissingFilePolicy::Strict),
        tools(),
        RecordingScheduler::default(),
    );

    let report = pipeline.run_in(&list, &context, &JsonOutput).unwrap();

    assert_eq!(report.samples, 3);
    assert_eq!(report.submitted(), 4);
    assert_eq!(
        pipeline.scheduler().calls(),
        vec![
            ("merge".to_string(), vec![]),
            ("extract".to_string(), vec!["101".to_string()]),
            ("convert_merged".to_string(), vec!["101".to_string()]),
            ("convert_extracted".to_string(), vec!["102".to_string()]),
        ]
    );

    let order = fs::read_to_string(context.order_file().as_std_path()).unwrap();
    assert_eq!(order, "P1 S1\nP1 S2\nP2 S3\n");

    let janno = fs::read_to_string(context.merged_janno().as_std_path()).unwrap();
    assert_eq!(janno, "id\tsex\tage\nS1\tM\tn/a\nS2\tF\tn/a\nS3\tn/a\t40\n");

    let merge = &report.jobs[0];
    assert_eq!(merge.spec.name, "merge");
    assert!(merge.command.contains("--indiv-sort f"));
    assert!(merge.command.contains(context.order_file().as_str()));

    let manifest = fs::read_to_string(context.genotype_manifest().as_std_path()).unwrap();
    assert_eq!(manifest.lines().count(), 2);
    assert!(manifest.lines().next().unwrap().ends_with("m1.fam"));

    let params = context.convertf_params(&context.extracted_prefix());
    let descriptor = fs::read_to_string(params.as_std_path()).unwrap();
    assert!(descriptor.contains("outputformat: EIGENSTRAT"));
    assert!(context.report_path().as_std_path().is_file());
}

#[test]
fn strict_policy_aborts_before_any_submission() {
    let fixture = Fixture::new();
    let list = fixture.two_modules(&["bed", "fam"]);
    let pipeline = Pipeline::new(
        config(MissingFilePolicy::Strict),
        tools(),
        RecordingScheduler::default(),
    );

    let err = pipeline
        .run_in(&list, &fixture.context(), &JsonOutput)
        .unwrap_err();

    assert_matches!(err, MergeError::MissingFile { ref kind, .. } if kind == "bim");
    assert!(pipeline.scheduler().calls().is_empty());
}

#[test]
fn lenient_policy_skips_incomplete_module() {
    let fixture = Fixture::new();
    let list = fixture.two_modules(&["bed", "fam"]);
    let context = fixture.context();
    let pipeline = Pipeline::new(
        config(MissingFilePolicy::Lenient),
        tools(),
        RecordingScheduler::default(),
    );

    let report = pipeline.run_in(&list, &context, &JsonOutput).unwrap();

    assert_eq!(report.modules, 2);
    assert_eq!(report.genotype_modules, 1);
    assert_eq!(report.samples, 2);
    assert!(report.warnings.iter().any(|gap| gap.module.ends_with("m2")));
    assert_eq!(report.submitted(), 4);

    let manifest = fs::read_to_string(context.genotype_manifest().as_std_path()).unwrap();
    assert_eq!(manifest.lines().collect::<Vec<_>>()[1], "");
    let merge_list = fs::read_to_string(context.merge_list().as_std_path()).unwrap();
    assert_eq!(merge_list.lines().count(), 1);

    let janno = fs::read_to_string(context.merged_janno().as_std_path()).unwrap();
    assert_eq!(janno, "id\tsex\nS1\tM\nS2\tF\n");
}

#[test]
fn two_fam_files_are_fatal_under_any_policy() {
    for policy in [MissingFilePolicy::Strict, MissingFilePolicy::Lenient] {
        let fixture = Fixture::new();
        let list = fixture.two_modules(&["bed", "bim", "fam"]);
        let extra = fixture.root.join("modules/m2/old/copy.fam");
        fs::create_dir_all(extra.parent().unwrap().as_std_path()).unwrap();
        fs::write(extra.as_std_path(), "P2 S3 0 0 1 -9\n").unwrap();
        let pipeline = Pipeline::new(config(policy), tools(), RecordingScheduler::default());

        let err = pipeline
            .run_in(&list, &fixture.context(), &JsonOutput)
            .unwrap_err();

        assert_matches!(err, MergeError::AmbiguousFile { ref kind, .. } if kind == "fam");
        assert!(pipeline.scheduler().calls().is_empty());
    }
}

#[test]
fn overlapping_samples_abort_the_run() {
    let fixture = Fixture::new();
    let m1 = fixture.module("m1", "P1 S1 0 0 1 -9\n", Some("id\nS1\n"), &["bed", "bim", "fam"]);
    let m2 = fixture.module("m2", "P1 S1 0 0 1 -9\n", Some("id\nS1\n"), &["bed", "bim", "fam"]);
    let list = fixture.module_list(&[&m1, &m2]);
    let pipeline = Pipeline::new(
        config(MissingFilePolicy::Strict),
        tools(),
        RecordingScheduler::default(),
    );

    let err = pipeline
        .run_in(&list, &fixture.context(), &JsonOutput)
        .unwrap_err();

    assert_matches!(err, MergeError::DuplicateSample { .. });
    assert!(pipeline.scheduler().calls().is_empty());
}

#[test]
fn rejected_submission_is_recorded_in_report() {
    let fixture = Fixture::new();
    let list = fixture.two_modules(&["bed", "bim", "fam"]);
    let context = fixture.context();
    let pipeline = Pipeline::new(
        config(MissingFilePolicy::Strict),
        tools(),
        RecordingScheduler::rejecting("extract"),
    );

    let err = pipeline.run_in(&list, &context, &JsonOutput).unwrap_err();
    assert_matches!(err, MergeError::Submission { ref job, .. } if job == "extract");

    let report: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(context.report_path().as_std_path()).unwrap(),
    )
    .unwrap();
    let jobs = report["jobs"].as_array().unwrap();
    assert_eq!(jobs[0]["state"], "submitted");
    assert_eq!(jobs[0]["handle"], "101");
    assert_eq!(jobs[1]["state"], "pending");
    assert!(jobs[1]["command"].as_str().unwrap().starts_with("plink --bfile"));
}

#[test]
fn rejected_submission_outranks_report_write_failure() {
    let fixture = Fixture::new();
    let list = fixture.two_modules(&["bed", "bim", "fam"]);
    let context = fixture.context();
    fs::create_dir_all(context.report_path().as_std_path()).unwrap();
    let pipeline = Pipeline::new(
        config(MissingFilePolicy::Strict),
        tools(),
        RecordingScheduler::rejecting("merge"),
    );

    let err = pipeline.run_in(&list, &context, &JsonOutput).unwrap_err();
    assert_matches!(err, MergeError::Submission { ref job, .. } if job == "merge");
}

#[test]
fn genotyped_sample_missing_from_janno_keeps_its_row() {
    let fixture = Fixture::new();
    let m1 = fixture.module(
        "m1",
        "P1 S1 0 0 1 -9\nP1 S2 0 0 2 -9\nP1 S3 0 0 1 -9\n",
        Some("id\tsex\nS1\tM\nS3\tF\n"),
        &["bed", "bim", "fam"],
    );
    let list = fixture.module_list(&[&m1]);
    let context = fixture.context();
    let pipeline = Pipeline::new(
        config(MissingFilePolicy::Strict),
        tools(),
        RecordingScheduler::default(),
    );

    pipeline.run_in(&list, &context, &JsonOutput).unwrap();

    let janno = fs::read_to_string(context.merged_janno().as_std_path()).unwrap();
    assert_eq!(janno, "id\tsex\nS1\tM\nS2\tn/a\nS3\tF\n");
}

#[test]
fn rerun_recomputes_and_resubmits() {
    let fixture = Fixture::new();
    let list = fixture.two_modules(&["bed", "bim", "fam"]);
    let pipeline = Pipeline::new(
        config(MissingFilePolicy::Strict),
        tools(),
        RecordingScheduler::default(),
    );

    let first = pipeline.run_in(&list, &fixture.context(), &JsonOutput).unwrap();
    let second = pipeline.run_in(&list, &fixture.context(), &JsonOutput).unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(pipeline.scheduler().calls().len(), 8);
    assert!(matches!(second.jobs[3].state, JobState::Submitted { .. }));
}
