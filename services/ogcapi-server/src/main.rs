//! OGC API Server
//!
//! Cloud native OGC APIs server over GeoPackage: Common, Collections,
//! Features, Tiles, Styles and 3D GeoVolumes from a single configuration.

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::Request;
use axum::ServiceExt;
use clap::Parser;
use tokio::sync::oneshot;
use tower::Layer;
use tower_http::normalize_path::NormalizePathLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use ogcapi_server::config::Config;
use ogcapi_server::state::AppState;
use ogcapi_server::{build_debug_router, build_router};

/// Hard cap on connection draining once shutdown starts.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// OGC API Server
#[derive(Parser, Debug)]
#[command(name = "ogcapi-server")]
#[command(about = "Cloud native OGC APIs server over GeoPackage")]
struct Args {
    /// Bind host for the OGC server
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    host: String,

    /// Bind port for the OGC server
    #[arg(long, default_value_t = 8080, env = "PORT")]
    port: u16,

    /// Bind port for the debug server (disabled by default), do not expose
    /// this port publicly
    #[arg(long, default_value_t = -1, env = "DEBUG_PORT")]
    debug_port: i32,

    /// Delay (in seconds) before initiating graceful shutdown, useful in k8s
    /// to allow ingress controllers to update their endpoint lists
    #[arg(long, default_value_t = 0, env = "SHUTDOWN_DELAY")]
    shutdown_delay: u64,

    /// Reference to the YAML configuration file
    #[arg(long, env = "CONFIG_FILE")]
    config_file: PathBuf,

    /// Reference to a (customized) OGC OpenAPI spec for the dynamic parts of
    /// the API
    #[arg(long, env = "OPENAPI_FILE")]
    openapi_file: Option<PathBuf>,

    /// Support API calls to URLs with a trailing slash
    #[arg(long, default_value_t = false, env = "ALLOW_TRAILING_SLASH")]
    allow_trailing_slash: bool,

    /// Log level
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .json()
        .init();

    info!("starting OGC API server");

    let config = Config::load_from_file(&args.config_file)?;
    let state = match AppState::new(config, args.openapi_file.as_deref()).await {
        Ok(state) => Arc::new(state),
        Err(err) => {
            error!("failed to initialize application state: {err:#}");
            std::process::exit(1);
        }
    };

    // debug server, binds to localhost
    if args.debug_port > 0 {
        let debug_router = build_debug_router(state.clone());
        let debug_addr = SocketAddr::from(([127, 0, 0, 1], args.debug_port as u16));
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(debug_addr)
                .await
                .expect("failed to bind debug server");
            info!("debug server listening on {debug_addr}");
            if let Err(err) = axum::serve(listener, debug_router).await {
                error!("debug server failed: {err}");
            }
        });
    }

    // main server
    let router = build_router(state.clone())?;
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("main server listening on {addr}");

    let (shutdown_started_tx, shutdown_started_rx) = oneshot::channel();
    let shutdown = shutdown_signal(state.clone(), args.shutdown_delay, shutdown_started_tx);

    if args.allow_trailing_slash {
        let app = NormalizePathLayer::trim_trailing_slash().layer(router);
        let serve = axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
            .with_graceful_shutdown(shutdown);
        run_until_shutdown(serve.into_future(), shutdown_started_rx).await
    } else {
        let serve = axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(shutdown);
        run_until_shutdown(serve.into_future(), shutdown_started_rx).await
    }
}

/// Wait for a stop signal, honor the configured delay, then run the
/// registered shutdown hooks and let the server drain.
async fn shutdown_signal(state: Arc<AppState>, shutdown_delay: u64, started: oneshot::Sender<()>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut quit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate.recv() => {},
            _ = quit.recv() => {},
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await;

    if shutdown_delay > 0 {
        info!("stop signal received, initiating shutdown after {shutdown_delay} seconds delay");
        tokio::time::sleep(Duration::from_secs(shutdown_delay)).await;
    }
    info!("shutting down gracefully");

    state.run_shutdown_hooks();
    let _ = started.send(());
}

/// Drive the server future, capping connection draining at
/// [`SHUTDOWN_TIMEOUT`] once shutdown has started.
async fn run_until_shutdown<F>(serve: F, shutdown_started: oneshot::Receiver<()>) -> Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(serve);
    tokio::select! {
        result = &mut serve => result.map_err(Into::into),
        _ = async {
            let _ = shutdown_started.await;
            tokio::time::sleep(SHUTDOWN_TIMEOUT).await;
        } => {
            warn!("graceful shutdown deadline exceeded, exiting");
            Ok(())
        }
    }
}
