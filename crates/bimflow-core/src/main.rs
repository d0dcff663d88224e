//! `bimflow` command line
//!
//! Exits with status 1 when any step of the requested flow failed.

use anyhow::{bail, Context, Result};
use bimflow_core::{FileSource, FlowError, FlowRun, Orchestrator, OrchestratorConfig};
use bimflow_kernel::ReportSummary;
use bimflow_model::{EditInstruction, MemberId, SectionId};
use bimflow_worker::JobId;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let job = || {
        Arg::new("job")
            .long("job")
            .required(true)
            .value_parser(value_parser!(JobId))
            .help("Job identifier printed by extract")
    };

    Command::new("bimflow")
        .version(bimflow_model::VERSION)
        .about("BIM to structural analysis round trips through external workers")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("extract")
                .about("Stage a model and export its analytical model")
                .arg(
                    Arg::new("model")
                        .long("model")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Original BIM model file"),
                ),
        )
        .subcommand(
            Command::new("modify")
                .about("Override member sections and write input.json")
                .arg(job())
                .arg(
                    Arg::new("member")
                        .long("member")
                        .action(ArgAction::Append)
                        .value_parser(parse_override)
                        .help("Section override as <member id>=<cross section id>"),
                )
                .arg(
                    Arg::new("revert")
                        .long("revert")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("member")
                        .help("Restore input.json from the extracted model"),
                ),
        )
        .subcommand(
            Command::new("analyze")
                .about("Run the structural analysis on input.json")
                .arg(job())
                .arg(
                    Arg::new("load")
                        .long("load")
                        .value_parser(value_parser!(f64))
                        .help("Nodal load in kN"),
                )
                .arg(
                    Arg::new("allowable")
                        .long("allowable")
                        .value_parser(value_parser!(f64))
                        .help("Allowable deformation in mm"),
                )
                .arg(
                    Arg::new("apply")
                        .long("apply")
                        .action(ArgAction::SetTrue)
                        .help("Write recommended sections to input.json"),
                ),
        )
        .subcommand(
            Command::new("update")
                .about("Write input.json back into the model")
                .arg(job()),
        )
        .subcommand(
            Command::new("report")
                .about("Show stored flow reports")
                .arg(job())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}

fn parse_override(raw: &str) -> Result<(MemberId, SectionId), String> {
    let (member, section) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <member>=<section>, got '{raw}'"))?;
    let member = member.trim().parse::<i64>().map_err(|e| format!("member id: {e}"))?;
    let section = section.trim().parse::<i64>().map_err(|e| format!("section id: {e}"))?;
    Ok((MemberId(member), SectionId(section)))
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(matches: &ArgMatches) -> Result<OrchestratorConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => Ok(OrchestratorConfig::load(path)?),
        None => Ok(OrchestratorConfig::default()),
    }
}

fn job_arg(args: &ArgMatches) -> Result<JobId> {
    args.get_one::<JobId>("job")
        .copied()
        .context("missing --job")
}

fn print_summary(summary: &ReportSummary) {
    println!(
        "{} [{}] {}",
        summary.pipeline,
        summary.started_at.to_rfc3339(),
        if summary.succeeded { "succeeded" } else { "FAILED" }
    );
    for step in &summary.steps {
        let detail = match (&step.error, &step.caused_by) {
            (Some(error), _) => format!(": {error}"),
            (None, Some(cause)) => format!(" (after {cause} failed)"),
            (None, None) => String::new(),
        };
        println!("  {:<16} {:<8}{detail}", step.name, step.status);
    }
}

fn print_run<T>(run: &FlowRun<T>) -> bool {
    println!("job {}", run.job);
    print_summary(&run.summary());
    if let Some((step, err)) = run.report.first_failure() {
        let hint = if err.is_retryable() {
            "retry may succeed"
        } else if err.is_user_fatal() {
            "fix the input before retrying"
        } else {
            "see logs for details"
        };
        eprintln!("first failure in {step}: {hint}");
    }
    run.is_success()
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("log-json"));

    let config = load_config(&matches)?;
    let orchestrator = Orchestrator::new(config)?;

    let succeeded = match matches.subcommand() {
        Some(("extract", args)) => {
            let model = args
                .get_one::<PathBuf>("model")
                .context("missing --model")?;
            let run = orchestrator
                .extract(Arc::new(FileSource::new(model)))
                .await?;
            print_run(&run)
        }
        Some(("modify", args)) => {
            let job = job_arg(args)?;
            let edits = if args.get_flag("revert") {
                EditInstruction::revert()
            } else {
                args.get_many::<(MemberId, SectionId)>("member")
                    .into_iter()
                    .flatten()
                    .fold(EditInstruction::default(), |edits, (member, section)| {
                        edits.with_override(*member, *section)
                    })
            };
            print_run(&orchestrator.modify(job, edits).await?)
        }
        Some(("analyze", args)) => {
            let job = job_arg(args)?;
            let mut settings = orchestrator.config().analysis;
            if let Some(load) = args.get_one::<f64>("load") {
                settings.load_magnitude_kn = *load;
            }
            if let Some(allowable) = args.get_one::<f64>("allowable") {
                settings.allowable_deformation_mm = *allowable;
            }
            let run = orchestrator
                .analyze(job, settings, args.get_flag("apply"))
                .await?;
            print_run(&run)
        }
        Some(("update", args)) => {
            let job = job_arg(args)?;
            let run = orchestrator.update(job).await?;
            if let Some(path) = &run.value {
                println!("updated model: {}", path.display());
            }
            print_run(&run)
        }
        Some(("report", args)) => {
            let job = job_arg(args)?;
            let summaries = match orchestrator.reports(job).await {
                Ok(summaries) => summaries,
                Err(FlowError::UnknownJob(job)) => bail!("no job {job} under the staging root"),
                Err(e) => return Err(e.into()),
            };
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                for summary in &summaries {
                    print_summary(summary);
                }
            }
            summaries.iter().all(|s| s.succeeded)
        }
        _ => true,
    };

    std::process::exit(if succeeded { 0 } else { 1 });
}
