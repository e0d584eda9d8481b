use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use bids_curator::anonymize::anonymize_acq_times;
use bids_curator::config::ConfigLoader;
use bids_curator::domain::{SessionId, SubjectId};
use bids_curator::intended_for::{CompleteOptions, complete_sidecars};
use bids_curator::layout::Layout;
use bids_curator::merge::merge_dataset;
use bids_curator::output::JsonOutput;
use bids_curator::registry::Registry;
use bids_curator::sidecar::clean_dataset_sidecars;
use bids_curator::validator::check_validator_file;

#[derive(Parser)]
#[command(name = "bids-curator")]
#[command(about = "Curation passes for converted BIDS datasets: sidecar completion, dataset merging, anonymization")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fill IntendedFor, TotalReadoutTime, and TaskName sidecar fields")]
    Complete(CompleteArgs),
    #[command(about = "Merge a converted subject/session into the cumulative dataset")]
    Merge(MergeArgs),
    #[command(about = "Anonymize acquisition datetimes in scans registries")]
    Anonymize(AnonymizeArgs),
    #[command(about = "Restrict sidecars to the shared-key whitelist")]
    CleanSidecars(CleanSidecarsArgs),
    #[command(about = "Fill empty registry cells, writing a *_cleaned sibling")]
    CleanRegistry(CleanRegistryArgs),
}

#[derive(Args)]
struct CompleteArgs {
    #[arg(long, short = 'd')]
    bids_dir: Utf8PathBuf,

    #[arg(long, short = 's', required = true, num_args = 1..)]
    subjects: Vec<String>,

    #[arg(long)]
    ses: Option<String>,

    #[arg(long)]
    overwrite: bool,

    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct MergeArgs {
    #[arg(long)]
    source: Utf8PathBuf,

    #[arg(long)]
    target: Utf8PathBuf,

    #[arg(long)]
    project: Option<String>,

    #[arg(long)]
    sub: String,

    #[arg(long)]
    ses: Option<String>,

    /// Captured output of the external BIDS validator; merging is
    /// refused when it does not report success.
    #[arg(long)]
    validator_file: Option<Utf8PathBuf>,

    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct AnonymizeArgs {
    #[arg(long, short = 'd')]
    bids_dir: Utf8PathBuf,
}

#[derive(Args)]
struct CleanSidecarsArgs {
    #[arg(long, short = 'd')]
    bids_dir: Utf8PathBuf,
}

#[derive(Args)]
struct CleanRegistryArgs {
    in_file: Utf8PathBuf,

    #[arg(long, default_value = "0")]
    fill: String,
}

fn main() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Complete(args) => run_complete(args)?,
        Commands::Merge(args) => run_merge(args)?,
        Commands::Anonymize(args) => run_anonymize(args)?,
        Commands::CleanSidecars(args) => run_clean_sidecars(args)?,
        Commands::CleanRegistry(args) => run_clean_registry(args)?,
    }
    Ok(ExitCode::SUCCESS)
}

fn run_complete(args: CompleteArgs) -> miette::Result<()> {
    let mut options = CompleteOptions {
        overwrite: args.overwrite,
        ..CompleteOptions::default()
    };
    if let Some(config) = &args.config {
        let resolved = ConfigLoader::resolve(Some(config)).into_diagnostic()?;
        options.overwrite = args.overwrite || resolved.overwrite;
        options.directions = resolved.directions;
        options.target_classes = resolved.target_classes;
    }

    let layout = Layout::new(args.bids_dir).into_diagnostic()?;
    let session = args
        .ses
        .map(|raw| raw.parse::<SessionId>())
        .transpose()
        .into_diagnostic()?;
    for raw in &args.subjects {
        let subject: SubjectId = raw.parse().into_diagnostic()?;
        let result =
            complete_sidecars(&layout, &subject, session.as_ref(), &options).into_diagnostic()?;
        JsonOutput::print_complete(&result).into_diagnostic()?;
    }
    Ok(())
}

fn run_merge(args: MergeArgs) -> miette::Result<()> {
    if let Some(validator_file) = &args.validator_file
        && !check_validator_file(validator_file).into_diagnostic()?
    {
        miette::bail!("converted dataset failed the BIDS validator, refusing to merge");
    }

    let project = match (&args.project, &args.config) {
        (Some(project), _) => project.clone(),
        (None, Some(config)) => ConfigLoader::resolve(Some(config)).into_diagnostic()?.project,
        (None, None) => ConfigLoader::resolve(None).into_diagnostic()?.project,
    };

    let subject: SubjectId = args.sub.parse().into_diagnostic()?;
    let session = args
        .ses
        .map(|raw| raw.parse::<SessionId>())
        .transpose()
        .into_diagnostic()?;
    let result = merge_dataset(
        &args.source,
        &args.target,
        &project,
        &subject,
        session.as_ref(),
    )
    .into_diagnostic()?;
    JsonOutput::print_merge(&result).into_diagnostic()?;
    Ok(())
}

fn run_anonymize(args: AnonymizeArgs) -> miette::Result<()> {
    let result = anonymize_acq_times(&args.bids_dir).into_diagnostic()?;
    JsonOutput::print_anonymize(&result).into_diagnostic()?;
    Ok(())
}

fn run_clean_sidecars(args: CleanSidecarsArgs) -> miette::Result<()> {
    let layout = Layout::new(args.bids_dir).into_diagnostic()?;
    let cleaned = clean_dataset_sidecars(&layout).into_diagnostic()?;
    JsonOutput::print_json(&serde_json::json!({ "sidecars_cleaned": cleaned }))
        .into_diagnostic()?;
    Ok(())
}

fn run_clean_registry(args: CleanRegistryArgs) -> miette::Result<()> {
    let mut registry = Registry::load(&args.in_file).into_diagnostic()?;
    registry.fill_empty(&args.fill);
    let out_file = cleaned_sibling(&args.in_file);
    registry.save(&out_file).into_diagnostic()?;
    JsonOutput::print_json(&serde_json::json!({ "out_file": out_file.as_str() }))
        .into_diagnostic()?;
    Ok(())
}

/// `scans.tsv` becomes `scans_cleaned.tsv` beside the input.
fn cleaned_sibling(path: &Utf8Path) -> Utf8PathBuf {
    let stem = path.file_stem().unwrap_or("registry");
    let name = match path.extension() {
        Some(ext) => format!("{stem}_cleaned.{ext}"),
        None => format!("{stem}_cleaned"),
    };
    path.with_file_name(name)
}
