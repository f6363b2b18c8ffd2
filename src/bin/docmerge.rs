use std::process::ExitCode;
use std::sync::Arc;
use std::time::SystemTime;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use docmerge::app::{MergeService, TracingProgress};
use docmerge::config::{ConfigLoader, ResolvedConfig, resolve_scratch_dir};
use docmerge::error::MergeError;
use docmerge::fetch::HttpSourceClient;
use docmerge::output::{JsonOutput, MergeSummary};
use docmerge::scratch::ScratchSpace;
use docmerge::server::MergeServer;

#[derive(Parser)]
#[command(name = "docmerge")]
#[command(about = "Merge .docx exam papers and marking schemes fetched by URL into one document")]
#[command(version)]
struct Cli {
    /// Path to a JSON config file (defaults to ./docmerge.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the HTTP merge service (default)")]
    Serve(ServeArgs),
    #[command(about = "Merge documents once and write the result to a file")]
    Merge(MergeArgs),
    #[command(about = "Remove scratch files older than the retention window")]
    Sweep,
}

#[derive(Args, Default)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<String>,

    #[arg(long)]
    scratch_dir: Option<String>,
}

#[derive(Args)]
struct MergeArgs {
    #[arg(required = true)]
    urls: Vec<String>,

    #[arg(long, short)]
    output: Utf8PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<MergeError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MergeError) -> u8 {
    match error {
        MergeError::EmptyRequest
        | MergeError::InvalidUrl { .. }
        | MergeError::ConfigRead(_)
        | MergeError::ConfigParse(_) => 2,
        MergeError::FetchStatus { .. } | MergeError::FetchTransport { .. } => 3,
        MergeError::UnrecognizedFormat { .. }
        | MergeError::Assembly { .. }
        | MergeError::NoSources => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Serve(args)) => run_serve(args, config),
        None => run_serve(ServeArgs::default(), config),
        Some(Commands::Merge(args)) => run_merge(args, config),
        Some(Commands::Sweep) => run_sweep(config),
    }
}

fn build_service(config: &ResolvedConfig) -> miette::Result<MergeService<HttpSourceClient>> {
    let client = HttpSourceClient::new(config.fetch_timeout, config.fetch_retries)?;
    let scratch = ScratchSpace::new(config.scratch_dir.clone(), config.retention)?;
    Ok(MergeService::new(client, scratch))
}

fn run_serve(args: ServeArgs, mut config: ResolvedConfig) -> miette::Result<()> {
    if let Some(bind) = args.bind {
        config.bind_addr = bind
            .parse()
            .map_err(|err| MergeError::ConfigParse(format!("--bind: {err}")))?;
    }
    if args.scratch_dir.is_some() {
        config.scratch_dir = resolve_scratch_dir(args.scratch_dir.as_deref())?;
    }

    // The blocking HTTP client must be created, and finally dropped, outside
    // the async runtime.
    let service = Arc::new(build_service(&config)?);
    let server = MergeServer::new(config, Arc::clone(&service));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;
    let served = runtime.block_on(server.serve());
    drop(runtime);
    drop(service);
    served?;
    Ok(())
}

fn run_merge(args: MergeArgs, config: ResolvedConfig) -> miette::Result<()> {
    let service = build_service(&config)?;
    let document = service.merge_documents(&args.urls, &TracingProgress)?;
    std::fs::write(args.output.as_std_path(), &document.bytes).into_diagnostic()?;
    JsonOutput::print_merge(&MergeSummary {
        output: args.output.to_string(),
        documents: document.source_count,
        page_breaks: document.page_breaks,
        bytes: document.bytes.len(),
    })
    .into_diagnostic()?;
    Ok(())
}

fn run_sweep(config: ResolvedConfig) -> miette::Result<()> {
    let scratch = ScratchSpace::new(config.scratch_dir, config.retention)?;
    let report = scratch.sweep(SystemTime::now())?;
    JsonOutput::print_sweep(&report).into_diagnostic()?;
    Ok(())
}
