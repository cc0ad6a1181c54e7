//! connkit - Tick-Driven Connection Server
//!
//! This is the main entry point for the connkit server.
//! It sets up the TCP listener, the shared compression workspace and the
//! connection pool, then drives the pool from a fixed-rate tick.

use connkit::compression::{CompressMode, Deflate, WorkspaceManager};
use connkit::config::ConnectionConfig;
use connkit::connection::ConnectionPool;
use connkit::protocol::{EchoHandler, FramedProtocol, Protocol};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Compression applied to accepted connections
    compress: CompressMode,
    /// Milliseconds between pool ticks
    tick_ms: u64,
    /// Connection slots
    capacity: usize,
    /// Log workspace statistics on shutdown
    log_compress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: connkit::DEFAULT_HOST.to_string(),
            port: connkit::DEFAULT_PORT,
            compress: CompressMode::None,
            tick_ms: 10,
            capacity: 1024,
            log_compress: false,
        }
    }
}

/// Returns the value following option `name`, or exits.
fn option_value<'a>(args: &'a [String], i: usize, name: &str) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} requires a value", name);
            std::process::exit(1);
        }
    }
}

fn parse_or_exit<T: std::str::FromStr>(value: &str, what: &str) -> T {
    value.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid {}: {}", what, value);
        std::process::exit(1);
    })
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = option_value(&args, i, "--host").to_string();
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = parse_or_exit(option_value(&args, i, "--port"), "port number");
                    i += 2;
                }
                "--compress" | "-c" => {
                    config.compress =
                        parse_or_exit(option_value(&args, i, "--compress"), "compress mode");
                    i += 2;
                }
                "--tick-ms" => {
                    config.tick_ms = parse_or_exit(option_value(&args, i, "--tick-ms"), "tick");
                    if config.tick_ms == 0 {
                        eprintln!("Error: --tick-ms must be at least 1");
                        std::process::exit(1);
                    }
                    i += 2;
                }
                "--capacity" => {
                    config.capacity =
                        parse_or_exit(option_value(&args, i, "--capacity"), "capacity");
                    i += 2;
                }
                "--log-compress" => {
                    config.log_compress = true;
                    i += 1;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("connkit version {}", connkit::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn print_help() {
    println!(
        r#"
connkit - Tick-Driven Connection Server

USAGE:
    connkit [OPTIONS]

OPTIONS:
    -h, --host <HOST>        Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>        Port to listen on (default: 7400)
    -c, --compress <MODE>    none | input | output | all (default: none)
        --tick-ms <MS>       Milliseconds between ticks (default: 10)
        --capacity <N>       Connection slots (default: 1024)
        --log-compress       Report compression totals on shutdown
    -v, --version            Print version information
        --help               Print this help message

ENVIRONMENT:
    RUST_LOG                 Log filter (default: info)

EXAMPLES:
    connkit                          # Start on 127.0.0.1:7400
    connkit --compress all           # Compress both directions
    connkit --host 0.0.0.0 -p 9000   # Listen on all interfaces
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("connkit v{} starting", connkit::VERSION);

    // Shared compression workspace
    let workspace = Arc::new(WorkspaceManager::new(Arc::new(Deflate::default())));
    workspace.init();
    workspace.log_enable(config.log_compress);

    let protocol: Arc<dyn Protocol> = Arc::new(FramedProtocol::new(
        Arc::new(EchoHandler),
        Arc::clone(&workspace),
    ));

    let mut pool = ConnectionPool::new(config.capacity, protocol, ConnectionConfig::default());
    pool.set_compress_mode(config.compress);
    info!(
        capacity = pool.capacity(),
        compress = %config.compress,
        tick_ms = config.tick_ms,
        "Connection pool ready"
    );

    // Bind the TCP listener
    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("Listening on {}", config.bind_address());

    let mut ticker = tokio::time::interval(Duration::from_millis(config.tick_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // Set up graceful shutdown
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => match stream.into_std() {
                    Ok(stream) => {
                        if let Err(e) = pool.add_tcp(stream) {
                            warn!(peer = %addr, error = %e, "Rejected connection");
                        }
                    }
                    Err(e) => error!(peer = %addr, error = %e, "Failed to detach socket"),
                },
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            _ = ticker.tick() => {
                let dropped = pool.tick();
                if dropped > 0 {
                    debug!(dropped, active = pool.len(), "Tick dropped connections");
                }
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Shutdown signal received, stopping server...");
                break;
            }
        }
    }

    pool.disconnect_all();
    let stats = pool.stats().snapshot();
    info!(
        accepted = stats.connections_accepted,
        bytes_read = stats.bytes_read,
        bytes_written = stats.bytes_written,
        "Connections closed"
    );
    if workspace.is_log_enabled() {
        info!(
            plain = workspace.uncompress_size(),
            compressed = workspace.compress_size(),
            slots = workspace.slots_used(),
            "Compression totals"
        );
    }
    workspace.destroy();

    info!("Server shutdown complete");
    Ok(())
}
