//! Cloud Reconciler
//!
//! Plans and applies a desired-state document against a remote control
//! plane, recording what it created in a local state file.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use prometheus::Registry;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cloud_reconciler::controlplane::{PlannedAction, ResourceTarget};
use cloud_reconciler::{
    AttributeFilter, DesiredDocument, EngineMetrics, ListScope, Orchestrator, ProviderConfig,
    RemoteFactory, ResourceRegistry, StateFile,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Cloud Reconciler - declarative create/update/delete of cloud resources
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Provider configuration file (YAML)
    #[arg(long, env = "RECONCILER_CONFIG")]
    config: Option<PathBuf>,

    /// Remote facade (memory, rest); overrides the configuration file
    #[arg(long, env = "RECONCILER_REMOTE")]
    remote: Option<String>,

    /// REST endpoint; overrides the configuration file
    #[arg(long, env = "RECONCILER_ENDPOINT")]
    endpoint: Option<String>,

    /// Serve /metrics and /healthz on this address
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show what apply would change
    Plan {
        /// Desired-state document (YAML or JSON)
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long, default_value = "reconciler.state.json")]
        state: PathBuf,
    },
    /// Reconcile the remote to the document
    Apply {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long, default_value = "reconciler.state.json")]
        state: PathBuf,
        /// Delete recorded resources no longer in the document
        #[arg(long)]
        prune: bool,
    },
    /// Delete every resource in the state file
    Destroy {
        #[arg(long, default_value = "reconciler.state.json")]
        state: PathBuf,
    },
    /// List remote resources of one kind
    List {
        #[arg(long)]
        kind: String,
        #[arg(long)]
        compartment: String,
        /// Attribute filter, `name=pattern` with glob patterns
        #[arg(long = "filter")]
        filters: Vec<String>,
    },
    /// Print the document JSON Schema, or one kind's attribute schema
    Schema {
        #[arg(long)]
        kind: Option<String>,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting {} v{}", cloud_reconciler::NAME, cloud_reconciler::VERSION);

    let config = load_config(&args)?;
    let registry = ResourceRegistry::with_defaults();
    let metrics_registry = Registry::new();
    let metrics = EngineMetrics::register(&metrics_registry)?;

    if let Some(addr) = &args.metrics_addr {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid metrics address '{}'", addr))?;
        let served = metrics_registry.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, served).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    if let Command::Schema { kind } = &args.command {
        return print_schema(&registry, kind.as_deref());
    }

    let remote = RemoteFactory::create(&config.remote)?;
    info!("  Remote: {}", remote.name());

    let orchestrator =
        Orchestrator::new(config.orchestrator_config()?, registry, remote).with_metrics(metrics);

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight operations");
            cancel.cancel();
        }
    });

    match args.command {
        Command::Plan { file, state } => plan(&orchestrator, &file, &state).await,
        Command::Apply { file, state, prune } => apply(&orchestrator, &file, &state, prune).await,
        Command::Destroy { state } => destroy(&orchestrator, &state).await,
        Command::List {
            kind,
            compartment,
            filters,
        } => list(&orchestrator, &kind, &compartment, &filters).await,
        Command::Schema { .. } => Ok(()),
    }
}

fn load_config(args: &Args) -> anyhow::Result<ProviderConfig> {
    let mut config = match &args.config {
        Some(path) => ProviderConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => ProviderConfig::default(),
    };

    if let Some(name) = &args.remote {
        config.remote.kind = name.parse()?;
    }
    if let Some(endpoint) = &args.endpoint {
        config.remote.rest.endpoint = endpoint.clone();
    }
    Ok(config)
}

// =============================================================================
// Commands
// =============================================================================

async fn plan(orchestrator: &Orchestrator, file: &Path, state_path: &Path) -> anyhow::Result<()> {
    let document = DesiredDocument::load(file)?;
    let state = StateFile::load(state_path)?;
    let specs = document.specs(|name| state.id_of(name));

    for planned in orchestrator.plan(&specs).await? {
        let line = match &planned.action {
            PlannedAction::Create => "create".to_string(),
            PlannedAction::Change(plan) => plan.summary(),
        };
        println!("{} ({}): {}", planned.name, planned.kind, line);
    }

    let declared: Vec<&str> = document.resources.iter().map(|r| r.name.as_str()).collect();
    for orphan in state.orphans(&declared) {
        println!("{} ({}): destroy with --prune", orphan.name, orphan.kind);
    }
    Ok(())
}

async fn apply(
    orchestrator: &Orchestrator,
    file: &Path,
    state_path: &Path,
    prune: bool,
) -> anyhow::Result<()> {
    let document = DesiredDocument::load(file)?;
    let mut state = StateFile::load(state_path)?;
    let specs = document.specs(|name| state.id_of(name));

    let report = orchestrator.apply(specs).await?;
    state.record(&report);
    state.save(state_path)?;

    if prune {
        let declared: Vec<&str> = document.resources.iter().map(|r| r.name.as_str()).collect();
        let orphans: Vec<ResourceTarget> = state.orphans(&declared).collect();
        if !orphans.is_empty() {
            let pruned = orchestrator.destroy(orphans).await?;
            state.record(&pruned);
            state.save(state_path)?;
            summarize(&pruned);
        }
    }

    summarize(&report);
    if !report.is_success() {
        bail!("{} resource(s) failed to reconcile", report.failures().count());
    }
    Ok(())
}

async fn destroy(orchestrator: &Orchestrator, state_path: &Path) -> anyhow::Result<()> {
    let mut state = StateFile::load(state_path)?;
    let report = orchestrator.destroy(state.targets()).await?;
    state.record(&report);
    state.save(state_path)?;

    summarize(&report);
    if !report.is_success() {
        bail!("{} resource(s) failed to delete", report.failures().count());
    }
    Ok(())
}

async fn list(
    orchestrator: &Orchestrator,
    kind: &str,
    compartment: &str,
    filters: &[String],
) -> anyhow::Result<()> {
    let engine = orchestrator.engine(kind)?;
    let filters = filters
        .iter()
        .map(|raw| {
            let (name, pattern) = raw
                .split_once('=')
                .with_context(|| format!("filter '{}' must be name=pattern", raw))?;
            Ok(AttributeFilter::glob(name, [pattern])?)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut listing = engine.list(ListScope::new(compartment), filters);
    info!(listing = %listing.id(), "Listing {}", kind);
    while let Some(item) = listing.next().await {
        println!("{}", serde_json::to_string(&item?)?);
    }
    Ok(())
}

fn print_schema(registry: &ResourceRegistry, kind: Option<&str>) -> anyhow::Result<()> {
    let schema = match kind {
        Some(kind) => serde_json::to_string_pretty(registry.get(kind)?.schema())?,
        None => DesiredDocument::json_schema()?,
    };
    println!("{}", schema);
    Ok(())
}

fn summarize(report: &cloud_reconciler::controlplane::ApplyReport) {
    for entry in &report.entries {
        match &entry.outcome {
            Ok(applied) => println!("{} ({}): {} {}", entry.name, entry.kind, applied.action, applied.id),
            Err(e) => println!("{} ({}): failed: {}", entry.name, entry.kind, e),
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=info".parse()?);

    let result = if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to initialise logging: {}", e))
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr, registry: Registry) -> anyhow::Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    fn respond(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
        let mut response = Response::new(body.into());
        *response.status_mut() = status;
        response
    }

    let registry = Arc::new(registry);
    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => {
                            let encoder = TextEncoder::new();
                            let mut buffer = Vec::new();
                            match encoder.encode(&registry.gather(), &mut buffer) {
                                Ok(()) => {
                                    let mut response = respond(StatusCode::OK, buffer);
                                    if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
                                        response.headers_mut().insert(CONTENT_TYPE, value);
                                    }
                                    response
                                }
                                Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                            }
                        }
                        "/healthz" => respond(StatusCode::OK, "ok"),
                        _ => respond(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}
