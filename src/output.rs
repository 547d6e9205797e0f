use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::pipeline::{JobState, ProgressEvent, ProgressSink, RunReport};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress to the tracing subscriber.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

pub fn render_summary(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "modmerge run {} ({} scheduler)\n",
        report.run_id, report.scheduler
    ));
    out.push_str(&format!(
        "  modules: {} ({} genotype, {} janno), samples: {}\n",
        report.modules, report.genotype_modules, report.metadata_modules, report.samples
    ));
    for gap in &report.warnings {
        out.push_str(&format!(
            "  warning: {} skipped from {:?} manifest (no .{})\n",
            gap.module, gap.manifest, gap.missing
        ));
    }
    for job in &report.jobs {
        let state = match &job.state {
            JobState::Submitted { handle } => handle.as_str().to_string(),
            JobState::Pending => "not submitted".to_string(),
        };
        out.push_str(&format!("  job {:<18} {}\n", job.spec.name, state));
    }
    out.push_str(&format!("  genotypes: {}\n", report.outputs.merged_prefix));
    if let Some(janno) = &report.outputs.janno {
        out.push_str(&format!("  janno:     {} ({} rows)\n", janno.path, janno.rows));
    }
    out.push_str(&format!("  report:    {}\n", report.run_dir.join("run.json")));
    out
}
