use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Args, Parser, Subcommand};
use genegraph::config::{Config, PROJECT_CONFIG_FILE, default_config_yaml, load_effective_config};
use genegraph::consolidate::consolidate_genes;
use genegraph::graph::GraphStore;
use genegraph::graph::model::Partition;
use genegraph::ingest::BatchEngine;
use genegraph::loaders::{LoaderKind, LoaderSpec, run_loader};
use genegraph::pipeline::{InterconnectOutcome, PartitionStatus, Pipeline, PipelineError};
use genegraph::report::{ReportFormat, summarize, write_report};
use serde_json::{Value, json};
use tracing::warn;
use tracing_subscriber::EnvFilter;

static CANCEL: AtomicBool = AtomicBool::new(false);

#[derive(Debug)]
struct CliError {
    code: &'static str,
    message: String,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn io(code: &'static str, err: io::Error) -> Self {
        Self::new(code, err.to_string())
    }
}

impl From<rusqlite::Error> for CliError {
    fn from(value: rusqlite::Error) -> Self {
        Self::new("sqlite_error", value.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::new("json_error", value.to_string())
    }
}

impl From<PipelineError> for CliError {
    fn from(value: PipelineError) -> Self {
        match value {
            PipelineError::Prerequisites(_) => Self::new("prerequisites_failed", value.to_string()),
            PipelineError::Store(err) => err.into(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "genegraph")]
#[command(about = "Builds a Gene Ontology knowledge graph from ontology and annotation files")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Init,
    Build(BuildArgs),
    Partition(PartitionArgs),
    Consolidate,
    Interconnect,
    Load(LoadArgs),
    Report,
    Checkpoints(CheckpointArgs),
}

#[derive(Args, Debug)]
struct BuildArgs {
    #[arg(long = "partition")]
    partitions: Vec<String>,
    #[arg(long)]
    report: Option<PathBuf>,
    #[arg(long, default_value = "json")]
    format: String,
}

#[derive(Args, Debug)]
struct PartitionArgs {
    partition: String,
}

#[derive(Args, Debug)]
struct LoadArgs {
    #[arg(long)]
    kind: String,
    path: String,
}

#[derive(Args, Debug)]
struct CheckpointArgs {
    #[arg(long)]
    clear: bool,
    #[arg(long)]
    stage: Option<String>,
}

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let payload = json!({
                "error": {
                    "code": err.code,
                    "message": err.message,
                }
            });
            eprintln!("{payload}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().map_err(|err| CliError::io("cwd_error", err))?;
    let mut config = load_effective_config(&cwd, cli.config.as_deref())
        .map_err(|err| CliError::new("config_error", err.to_string()))?;
    if let Some(store) = cli.store {
        config.store = if store.is_absolute() { store } else { cwd.join(store) };
    }

    match cli.command {
        Command::Init => cmd_init(&cwd, &config),
        Command::Build(args) => cmd_build(&config, args),
        Command::Partition(args) => cmd_partition(&config, args),
        Command::Consolidate => cmd_consolidate(&config),
        Command::Interconnect => cmd_interconnect(&config),
        Command::Load(args) => cmd_load(&cwd, &config, args),
        Command::Report => cmd_report(&config),
        Command::Checkpoints(args) => cmd_checkpoints(&config, args),
    }
}

fn cmd_init(cwd: &Path, config: &Config) -> Result<(), CliError> {
    let _ = open_store(&config.store)?;
    let config_path = cwd.join(PROJECT_CONFIG_FILE);
    let created_config = if config_path.exists() {
        false
    } else {
        fs::write(&config_path, default_config_yaml()).map_err(|err| CliError::io("write_error", err))?;
        true
    };
    print_json(&json!({
        "status": "ok",
        "store": config.store,
        "config": config_path,
        "created_config": created_config,
    }))
}

fn cmd_build(config: &Config, args: BuildArgs) -> Result<(), CliError> {
    let format = ReportFormat::parse(&args.format)
        .ok_or_else(|| CliError::new("invalid_format", format!("unknown report format `{}`", args.format)))?;
    let partitions = parse_partitions(&args.partitions)?;
    let store = open_store(&config.store)?;
    install_interrupt_handler();

    let report = Pipeline::new(&store, config)
        .with_cancel(Some(&CANCEL))
        .run(&partitions)?;
    if let Some(path) = &args.report {
        write_report(path, &report, format).map_err(|err| CliError::io("report_write_error", err))?;
    }
    print_json(&serde_json::to_value(&report)?)?;
    interrupted_error()
}

fn cmd_partition(config: &Config, args: PartitionArgs) -> Result<(), CliError> {
    let partition = parse_partition(&args.partition)?;
    let store = open_store(&config.store)?;
    install_interrupt_handler();

    let reports = Pipeline::new(&store, config)
        .with_cancel(Some(&CANCEL))
        .run_partitions(&[partition])?;
    let failed = reports
        .iter()
        .any(|report| report.status == PartitionStatus::Failed);
    print_json(&json!({
        "status": if failed { "failed" } else { "ok" },
        "partitions": reports,
    }))?;
    interrupted_error()
}

fn cmd_consolidate(config: &Config) -> Result<(), CliError> {
    let store = open_store(&config.store)?;
    let stats = consolidate_genes(&store, &config.consolidation_keys)?;
    print_json(&json!({
        "status": if stats.errors == 0 { "ok" } else { "partial" },
        "consolidation": stats,
    }))
}

fn cmd_interconnect(config: &Config) -> Result<(), CliError> {
    let store = open_store(&config.store)?;
    install_interrupt_handler();
    let outcome = Pipeline::new(&store, config)
        .with_cancel(Some(&CANCEL))
        .run_interconnect();
    if let InterconnectOutcome::Failed { reason } = &outcome {
        return Err(CliError::new("interconnect_failed", reason.clone()));
    }
    print_json(&json!({ "interconnect": outcome }))?;
    interrupted_error()
}

fn cmd_load(cwd: &Path, config: &Config, args: LoadArgs) -> Result<(), CliError> {
    let kind = LoaderKind::parse(&args.kind)
        .ok_or_else(|| CliError::new("invalid_loader_kind", format!("unknown loader kind `{}`", args.kind)))?;
    let store = open_store(&config.store)?;
    install_interrupt_handler();

    let engine = BatchEngine::new(&store, config.batch_sizes.loader)
        .with_resume(config.resume)
        .with_cancel(Some(&CANCEL));
    let spec = LoaderSpec {
        kind,
        path: args.path,
    };
    let stats = run_loader(&engine, &spec, cwd).map_err(|err| CliError::new("loader_error", err.to_string()))?;
    print_json(&json!({
        "status": if stats.has_errors() { "partial" } else { "ok" },
        "loader": stats,
    }))?;
    interrupted_error()
}

fn cmd_report(config: &Config) -> Result<(), CliError> {
    let store = open_store(&config.store)?;
    let summary = summarize(&store)?;
    print_json(&json!({ "summary": summary }))
}

fn cmd_checkpoints(config: &Config, args: CheckpointArgs) -> Result<(), CliError> {
    let store = open_store(&config.store)?;
    if args.clear {
        let removed = store.clear_checkpoints(args.stage.as_deref())?;
        return print_json(&json!({
            "status": "ok",
            "removed": removed,
            "stage": args.stage,
        }));
    }

    let rows = store.checkpoints(args.stage.as_deref())?;
    let checkpoints: Vec<Value> = rows
        .into_iter()
        .map(|row| {
            json!({
                "stage": row.stage,
                "batch_hash": row.batch_hash,
                "records": row.records,
                "committed_at": row.committed_at,
            })
        })
        .collect();
    print_json(&json!({
        "count": checkpoints.len(),
        "checkpoints": checkpoints,
    }))
}

fn open_store(path: &Path) -> Result<GraphStore, CliError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| CliError::io("mkdir_error", err))?;
    }
    Ok(GraphStore::open(path)?)
}

fn parse_partition(raw: &str) -> Result<Partition, CliError> {
    Partition::parse(raw)
        .ok_or_else(|| CliError::new("invalid_partition", format!("unknown partition `{raw}`")))
}

fn parse_partitions(raw: &[String]) -> Result<Vec<Partition>, CliError> {
    if raw.is_empty() {
        return Ok(Partition::ALL.to_vec());
    }
    let mut out = Vec::with_capacity(raw.len());
    for value in raw {
        let partition = parse_partition(value)?;
        if !out.contains(&partition) {
            out.push(partition);
        }
    }
    Ok(out)
}

fn install_interrupt_handler() {
    if let Err(err) = ctrlc::set_handler(|| CANCEL.store(true, Ordering::SeqCst)) {
        warn!(error = %err, "interrupt handler unavailable");
    }
}

fn interrupted_error() -> Result<(), CliError> {
    if CANCEL.load(Ordering::SeqCst) {
        Err(CliError::new("interrupted", "stopped after the last committed batch"))
    } else {
        Ok(())
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string(value)?;
    println!("{rendered}");
    Ok(())
}
