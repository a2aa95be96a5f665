//! Storage Fleet Scheduler
//!
//! Loads a fleet of storage arrays, keeps their capabilities and capacities
//! fresh, and selects pools for volume requests.
//!
//! # Usage
//!
//! ```text
//! storage-fleet-scheduler --config fleet.yaml serve
//! storage-fleet-scheduler --config fleet.yaml select --size 80Gi -p allocType=thick
//! ```

use clap::{Args as ClapArgs, Parser, Subcommand};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_fleet_scheduler::{
    parse_capacity, AdapterFactory, Error, FleetConfig, RefreshEngine, RefreshMode, Registry,
    Result, Scheduler, Topology, TopologyRequirement, VolumeConstraints,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Fleet Scheduler - pool selection across block and file arrays
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Fleet configuration file (YAML)
    #[arg(long, env = "FLEET_CONFIG", default_value = "fleet.yaml")]
    config: PathBuf,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Seconds between capability refresh passes
    #[arg(long, env = "REFRESH_INTERVAL", default_value = "60")]
    refresh_interval_secs: u64,

    /// Per-backend refresh timeout in seconds
    #[arg(long, env = "REFRESH_TIMEOUT", default_value = "30")]
    refresh_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keep the fleet refreshed and serve health and metrics (default)
    Serve,
    /// Refresh once, select pools for one request and print them as JSON
    Select(SelectArgs),
}

#[derive(ClapArgs, Debug)]
struct SelectArgs {
    /// Requested size (e.g. 80Gi)
    #[arg(long)]
    size: String,

    /// Constraint as key=value (repeatable)
    #[arg(short = 'p', long = "param", value_parser = parse_key_value)]
    params: Vec<(String, String)>,

    /// Requisite topology as key=value[,key=value] (repeatable, any may match)
    #[arg(long, value_parser = parse_topology)]
    requisite: Vec<Topology>,

    /// Preferred topology, highest priority first (repeatable)
    #[arg(long, value_parser = parse_topology)]
    preferred: Vec<Topology>,

    /// Seed for the tie-break shuffle
    #[arg(long)]
    seed: Option<u64>,
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {:?}", s))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

fn parse_topology(s: &str) -> std::result::Result<Topology, String> {
    s.split(',').map(parse_key_value).collect()
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting Storage Fleet Scheduler");
    info!("  Version: {}", storage_fleet_scheduler::VERSION);
    info!("  Config: {}", args.config.display());

    let fleet = FleetConfig::from_file(&args.config)?;
    let registry = Registry::register(&fleet.backends, &AdapterFactory::new()).await?;
    let engine = RefreshEngine::new(registry.clone())
        .with_timeout(Duration::from_secs(args.refresh_timeout_secs));

    // Every backend must answer once before anything is scheduled
    let report = engine.refresh_all(RefreshMode::Synchronous).await?;
    info!("Initial refresh complete: {} backends", report.refreshed.len());

    match args.command.take().unwrap_or(Command::Serve) {
        Command::Serve => serve(&args, registry, engine).await,
        Command::Select(select) => select_once(registry, select),
    }
}

async fn serve(args: &Args, registry: Arc<Registry>, engine: RefreshEngine) -> Result<()> {
    let cancel = CancellationToken::new();
    let interval = Duration::from_secs(args.refresh_interval_secs.max(1));

    let refresh = {
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run(interval, cancel).await })
    };
    info!("Periodic refresh every {:?}", interval);

    // Start health server
    let health_addr = parse_addr(&args.health_addr, "health")?;
    let health_registry = registry.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr, health_registry).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = parse_addr(&args.metrics_addr, "metrics")?;
    let metrics_registry = registry.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, metrics_registry).await {
            error!("Metrics server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    cancel.cancel();
    if let Err(e) = refresh.await {
        error!("Refresh task ended abnormally: {}", e);
    }

    info!("Scheduler shutdown complete");
    Ok(())
}

fn select_once(registry: Arc<Registry>, args: SelectArgs) -> Result<()> {
    let size = parse_capacity(&args.size)?;
    let size = i64::try_from(size)
        .map_err(|_| Error::CapacityParse(format!("size out of range: {}", args.size)))?;

    let parameters: BTreeMap<String, String> = args.params.into_iter().collect();
    let mut constraints = VolumeConstraints::from_parameters(&parameters)?;
    if !args.requisite.is_empty() || !args.preferred.is_empty() {
        constraints = constraints.with_topology(TopologyRequirement {
            requisite: args.requisite,
            preferred: args.preferred,
        });
    }

    let scheduler = match args.seed {
        Some(seed) => Scheduler::with_seed(registry, seed),
        None => Scheduler::new(registry),
    };
    let selection = scheduler.select_storage_pool(size, &constraints)?;

    println!("{}", serde_json::to_string_pretty(&selection)?);
    Ok(())
}

fn parse_addr(addr: &str, server: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} server address: {}", server, e)))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "hyper=warn".parse() {
        filter = filter.add_directive(directive);
    }

    // stdout is reserved for `select` output
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
}

fn health_response(registry: &Registry, path: &str) -> Response<Body> {
    match path {
        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
        "/readyz" => {
            let stats = registry.stats();
            if stats.available_backends > 0 {
                text_response(StatusCode::OK, "ok")
            } else {
                text_response(StatusCode::SERVICE_UNAVAILABLE, "no backend available")
            }
        }
        _ => text_response(StatusCode::NOT_FOUND, "not found"),
    }
}

async fn run_health_server(addr: SocketAddr, registry: Arc<Registry>) -> Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let response = health_response(&registry, req.uri().path());
                async move { Ok::<_, Infallible>(response) }
            }))
        }
    });

    info!("Health server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Health server bind error: {}", e)))?
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

fn metrics_response(registry: &Registry, path: &str) -> Response<Body> {
    if path != "/metrics" {
        return text_response(StatusCode::NOT_FOUND, "not found");
    }
    match registry.metrics().encode() {
        Ok(buffer) => {
            let mut response = text_response(StatusCode::OK, buffer);
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
        }
    }
}

async fn run_metrics_server(addr: SocketAddr, registry: Arc<Registry>) -> Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let response = metrics_response(&registry, req.uri().path());
                async move { Ok::<_, Infallible>(response) }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Metrics server bind error: {}", e)))?
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
