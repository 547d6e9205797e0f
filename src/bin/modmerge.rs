use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use modmerge::config::{ConfigLoader, ResolvedConfig};
use modmerge::domain::MissingFilePolicy;
use modmerge::error::MergeError;
use modmerge::output::{JsonOutput, LogSink, OutputMode, render_summary};
use modmerge::pipeline::{Pipeline, ProgressSink, RunReport};
use modmerge::scheduler::{DryRunScheduler, LocalScheduler, Scheduler, SlurmScheduler};
use modmerge::stages::Tools;

#[derive(Parser)]
#[command(name = "modmerge")]
#[command(about = "Merge genotype modules and their janno tables into one dataset")]
#[command(version, author)]
struct Cli {
    /// JSON config file (default: modmerge.json in the current directory, if present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Merge the modules listed in <input_file> into <output_directory>")]
    Merge(MergeArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum SchedulerKind {
    Slurm,
    Local,
}

#[derive(Args)]
struct MergeArgs {
    input_file: Utf8PathBuf,

    output_directory: Utf8PathBuf,

    #[arg(long)]
    policy: Option<MissingFilePolicy>,

    #[arg(long)]
    strict_columns: bool,

    #[arg(long, value_enum, default_value = "slurm")]
    scheduler: SchedulerKind,

    /// Validate and write all run artifacts without submitting jobs
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<MergeError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MergeError) -> u8 {
    if error.is_input_error() {
        return 2;
    }
    match error {
        MergeError::ExternalTool { .. }
        | MergeError::Submission { .. }
        | MergeError::MissingTool(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Merge(args) => run_merge(args, config),
    }
}

fn run_merge(args: MergeArgs, mut config: ResolvedConfig) -> miette::Result<()> {
    if let Some(policy) = args.policy {
        config.missing_file_policy = policy;
    }
    if args.strict_columns {
        config.strict_columns = true;
    }
    let output_mode = if args.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let tools = Tools::resolve(&config, !args.dry_run)?;

    let report = if args.dry_run {
        execute(config, tools, DryRunScheduler::default(), &args, output_mode)?
    } else {
        match args.scheduler {
            SchedulerKind::Slurm => {
                let slurm = SlurmScheduler::new(config.tools.sbatch.as_deref(), &config.partition)?;
                execute(config, tools, slurm, &args, output_mode)?
            }
            SchedulerKind::Local => execute(config, tools, LocalScheduler, &args, output_mode)?,
        }
    };

    match output_mode {
        OutputMode::Json => JsonOutput::print_report(&report).into_diagnostic()?,
        OutputMode::Human => print!("{}", render_summary(&report)),
    }
    Ok(())
}

fn execute<S: Scheduler>(
    config: ResolvedConfig,
    tools: Tools,
    scheduler: S,
    args: &MergeArgs,
    output_mode: OutputMode,
) -> Result<RunReport, MergeError> {
    let pipeline = Pipeline::new(config, tools, scheduler);
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &LogSink,
    };
    pipeline.run(&args.input_file, &args.output_directory, sink)
}
