use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, miette};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use wf2ro::api::{AppState, router};
use wf2ro::backend::{Backend, HttpBackend};
use wf2ro::bundle_io::BUNDLE_MEDIA_TYPE;
use wf2ro::config::{ConfigLoader, ServiceConfig};
use wf2ro::engine::JobEngine;
use wf2ro::error::Wf2RoError;
use wf2ro::job::{ExtractFolders, Job, JobRequest, JobState};
use wf2ro::output::JsonOutput;
use wf2ro::registry::JobRegistry;

#[derive(Parser)]
#[command(name = "wf2ro")]
#[command(about = "Convert workflow bundles into research objects stored in RODL")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the conversion job service")]
    Serve(ServeArgs),
    #[command(about = "Convert one workflow bundle and print the job status")]
    Convert(ConvertArgs),
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<SocketAddr>,

    #[arg(long)]
    max_active_jobs: Option<usize>,

    #[arg(long)]
    public_base_url: Option<Url>,
}

#[derive(Args)]
struct ConvertArgs {
    #[arg(long)]
    resource: Url,

    #[arg(long, default_value = BUNDLE_MEDIA_TYPE)]
    format: String,

    #[arg(long)]
    ro: Url,

    #[arg(long)]
    token: String,

    #[arg(long)]
    extract_main: Option<Url>,

    #[arg(long)]
    extract_nested: Option<Url>,

    #[arg(long)]
    extract_scripts: Option<Url>,

    #[arg(long)]
    extract_services: Option<Url>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<Wf2RoError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &Wf2RoError) -> u8 {
    match error {
        _ if error.is_input_error() => 2,
        Wf2RoError::ConfigRead(_) => 2,
        _ if error.is_remote_error() => 3,
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
        Commands::Serve(args) => run_serve(args, config),
        Commands::Convert(args) => run_convert(args, config),
    }
}

fn run_serve(args: ServeArgs, mut config: ServiceConfig) -> miette::Result<()> {
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(max_active_jobs) = args.max_active_jobs {
        config.max_active_jobs = max_active_jobs.max(1);
    }
    if let Some(public_base_url) = args.public_base_url {
        config.public_base_url = Some(public_base_url);
    }

    let registry = Arc::new(JobRegistry::new(config.registry_limits()));
    let backend: Arc<dyn Backend> = Arc::new(HttpBackend::new(&config));
    let engine = JobEngine::new(registry, backend);
    let app = router(AppState::new(engine, config.public_base_url.clone()));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(config.bind)
            .await
            .into_diagnostic()?;
        info!(bind = %config.bind, "wf2ro listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .into_diagnostic()
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "can't listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn run_convert(args: ConvertArgs, config: ServiceConfig) -> miette::Result<()> {
    let request = JobRequest {
        resource: args.resource,
        format: args.format,
        ro: args.ro,
        token: args.token,
        extract: ExtractFolders {
            main: args.extract_main,
            nested: args.extract_nested,
            scripts: args.extract_scripts,
            services: args.extract_services,
        },
    };

    let backend = HttpBackend::new(&config);
    let job = Job::new(request);
    let state = job.run(&backend)?;
    let status = job.status();
    JsonOutput::print_status(&status).into_diagnostic()?;

    match state {
        JobState::Done => Ok(()),
        other => Err(miette!(
            "conversion ended as {other:?}: {}",
            status.reason.unwrap_or_default()
        )),
    }
}
