//! mcp-context-server: MCP server speaking stdio, HTTP, SSE or streamable HTTP
//!
//! Loads the configuration, selects one transport and serves until SIGINT
//! or SIGTERM.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use mcp_context_server::config::{self, Config};
use mcp_context_server::mcp::transport::{self, TransportKind};
use mcp_context_server::mcp::{McpServer, ServerInfo, SharedHandler};
use mcp_context_server::security::StaticTokenAuthenticator;

/// MCP server exposing project context to AI assistants.
///
/// Serves JSON-RPC 2.0 over exactly one transport: stdio (default), plain
/// HTTP, server-sent events, or streamable HTTP.
#[derive(Parser, Debug)]
#[command(name = "mcp-context-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Transport to serve (stdio, http, sse, streamable)
    #[arg(short, long, value_name = "KIND")]
    transport: Option<TransportKind>,

    /// Port for the HTTP-family transports
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind for the HTTP-family transports
    #[arg(long)]
    host: Option<String>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber. Always stderr: stdout may carry the protocol.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Applies command-line overrides on top of the loaded configuration.
fn apply_overrides(cfg: &mut Config, args: &Args) {
    if let Some(kind) = args.transport {
        cfg.transport.kind = kind;
    }
    if let Some(port) = args.port {
        cfg.transport.port = port;
    }
    if let Some(host) = &args.host {
        cfg.transport.host.clone_from(host);
    }
}

/// Cancels `shutdown` on the first SIGINT or SIGTERM.
#[cfg(unix)]
async fn wait_for_signal(shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigint, mut sigterm) =
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to install signal handlers");
                return;
            }
        };

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
        _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
    }
    shutdown.cancel();
}

/// Cancels `shutdown` on Ctrl+C.
#[cfg(windows)]
async fn wait_for_signal(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown.cancel();
        }
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
    }
}

/// Entry point for the mcp-context-server.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.config.as_deref();
    let mut cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    apply_overrides(&mut cfg, &args);
    if let Err(e) = cfg.validate() {
        eprintln!("Configuration error: {e}");
        return ExitCode::FAILURE;
    }

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = %cfg.transport.kind,
        "Starting mcp-context-server"
    );

    let info = ServerInfo::default();
    let mut server = McpServer::new(info.clone());
    if let Some(authenticator) = StaticTokenAuthenticator::from_config(&cfg.security.auth) {
        info!("Bearer token authentication enabled");
        server = server.with_authenticator(Arc::new(authenticator));
    }
    let handler: SharedHandler = Arc::new(server);
    let transport = transport::from_config(&cfg);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let result = runtime.block_on(async {
        tokio::spawn(wait_for_signal(shutdown.clone()));
        transport.start(shutdown, info, handler).await
    });

    // Abandoned blocking reads on stdin must not hold the process open.
    runtime.shutdown_timeout(Duration::from_secs(1));

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}
