//! actop - remote actor sampling agent.
//!
//! Connects to an actor runtime's debug console and exposes an HTTP control
//! endpoint: `/start` begins sampling, `/stop` ends it and returns the
//! top-N report.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::io::IsTerminal;
use std::process;
use std::thread;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use clap::Parser;
use serde::Deserialize;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use actop::collector::{CollectError, SamplerConfig, SessionHandle, spawn_session};
use actop::storage::Metric;

/// Remote actor sampling agent.
#[derive(Parser)]
#[command(name = "actop", about = "Remote actor sampling agent", version = actop::VERSION)]
struct Args {
    /// Control endpoint listen address.
    #[arg(long, default_value = "0.0.0.0:3000", env = "ACTOP_LISTEN")]
    listen: String,

    /// Debug console address of the monitored service.
    #[arg(long, default_value = "127.0.0.1:8031", env = "ACTOP_REMOTE")]
    remote: String,

    /// Dial timeout in seconds.
    #[arg(long, default_value = "5", env = "ACTOP_DIAL_TIMEOUT")]
    dial_timeout: u64,

    /// Pause between sampling rounds in seconds.
    #[arg(short, long, default_value = "1", env = "ACTOP_INTERVAL")]
    interval: u64,

    /// Number of actors reported per metric.
    #[arg(long, default_value = "10", env = "ACTOP_TOP")]
    top: usize,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("actop={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[derive(Clone)]
struct AppState {
    session: SessionHandle,
    top: usize,
}

#[derive(Deserialize)]
struct ReportQuery {
    /// Actors per metric; defaults to `--top`.
    top: Option<usize>,
    /// Restricts the report to one metric, e.g. `CPU` or `lua_mem`.
    metric: Option<String>,
}

impl ReportQuery {
    fn metric(&self) -> Result<Option<Metric>, Response> {
        self.metric
            .as_deref()
            .map(str::parse::<Metric>)
            .transpose()
            .map_err(|e| (StatusCode::BAD_REQUEST, e).into_response())
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("actop {} starting", actop::VERSION);
    info!(
        "Config: remote={}, interval={}s, top={}, listen={}",
        args.remote, args.interval, args.top, args.listen
    );

    let config = SamplerConfig {
        remote: args.remote.clone(),
        dial_timeout: Duration::from_secs(args.dial_timeout),
        interval: Duration::from_secs(args.interval),
    };

    let (session, session_thread) = match spawn_session(config) {
        Ok(spawned) => spawned,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    // The session ends only on a fatal error; the agent cannot continue without it.
    thread::spawn(move || {
        match session_thread.join() {
            Ok(Ok(())) => info!("sampling session finished"),
            Ok(Err(e)) => {
                error!("{}", e);
                process::exit(1);
            }
            Err(_) => {
                error!("sampling session panicked");
                process::exit(1);
            }
        }
        process::exit(0);
    });

    let state = AppState {
        session,
        top: args.top,
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(serve(args.listen, state));
}

async fn serve(listen: String, state: AppState) {
    let app = Router::new()
        .route("/start", get(handle_start))
        .route("/stop", get(handle_stop))
        .route("/report", get(handle_report))
        .route("/health", get(handle_health))
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind(listen.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %listen, error = %e, "failed to bind control endpoint");
            process::exit(1);
        }
    };
    info!(addr = %listen, "control endpoint listening");

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "control endpoint failed");
        process::exit(1);
    }
}

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_start(State(state): State<AppState>) -> Response {
    let session = state.session.clone();
    match tokio::task::spawn_blocking(move || session.start()).await {
        Ok(Ok(true)) => "Sampling...".into_response(),
        Ok(Ok(false)) => (StatusCode::CONFLICT, "already sampling").into_response(),
        Ok(Err(e)) => session_error(e),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn handle_stop(State(state): State<AppState>, Query(query): Query<ReportQuery>) -> Response {
    let top = query.top.unwrap_or(state.top);
    let session = state.session.clone();
    match tokio::task::spawn_blocking(move || session.stop_and_report(top)).await {
        Ok(Ok(Some(report))) => {
            report.log_summary(top, std::io::stdout().is_terminal());
            Json(report).into_response()
        }
        Ok(Ok(None)) => (StatusCode::CONFLICT, "not sampling").into_response(),
        Ok(Err(e)) => session_error(e),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn handle_report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Response {
    let top = query.top.unwrap_or(state.top);
    let metric = match query.metric() {
        Ok(metric) => metric,
        Err(rejection) => return rejection,
    };
    let session = state.session.clone();
    match tokio::task::spawn_blocking(move || session.report(top)).await {
        Ok(Ok(report)) => match metric {
            Some(metric) => Json(report.only(metric)).into_response(),
            None => Json(report).into_response(),
        },
        Ok(Err(e)) => session_error(e),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn session_error(e: CollectError) -> Response {
    warn!(error = %e, "control request failed");
    (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
}
