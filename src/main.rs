//! carrier-router: Carrier and least-cost routing daemon
//!
//! This is the main entry point. It loads the daemon configuration, builds
//! the route engine over the configured route file, publishes the first
//! snapshot and serves the IPC control socket until it is told to stop.
//!
//! # Usage
//!
//! ```bash
//! # Run with custom configuration
//! carrier-router -c /path/to/config.json
//!
//! # Talk to a running daemon
//! carrier-router ctl reload
//! carrier-router ctl deactivate_host -d proxy -p 49 -h gw1 -t a
//!
//! # Run with environment overrides
//! CARRIER_ROUTER_LOG_LEVEL=debug carrier-router
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use carrier_router::config::{load_config_with_env, Config, SourceType};
use carrier_router::ipc::{IpcClient, IpcCommand, IpcHandler, IpcResponse, IpcServer};
use carrier_router::routing::RouteEngine;
use carrier_router::source::{FileSource, RouteSource};

/// What the binary was asked to do
enum Mode {
    /// Run the daemon
    Serve,
    /// Write a default configuration and exit
    GenerateConfig,
    /// Validate the configuration and the route file, then exit
    Check,
    /// Send one command to a running daemon
    Control(Vec<String>),
}

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Selected mode
    mode: Mode,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/carrier-router/config.json");
        let mut mode = Mode::Serve;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    mode = Mode::GenerateConfig;
                }
                "--check" => {
                    mode = Mode::Check;
                }
                "ctl" => {
                    mode = Mode::Control(args.by_ref().collect());
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("carrier-router v{}", carrier_router::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self { config_path, mode }
    }
}

fn print_help() {
    println!(
        r#"carrier-router v{}

Carrier / least-cost routing engine for SIP proxies.

USAGE:
    carrier-router [OPTIONS]
    carrier-router [OPTIONS] ctl <COMMAND> [ARGS...]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/carrier-router/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and route file, then exit
    -h, --help              Print help information
    -v, --version           Print version information

CONTROL COMMANDS:
    status                  Show engine status
    reload                  Reload routes from the route file
    dump                    Print all routes
    add_host <OPTS>         -d domain -p prefix -h host -w weight [-P -S -i]
    delete_host <OPTS>      -d domain -p prefix -h host [-w]
    replace_host <OPTS>     -h host -t new_host [-d -p -w]
    activate_host <OPTS>    -d domain -p prefix -h host [-w]
    deactivate_host <OPTS>  -d domain -p prefix -h host [-w] [-t backup]
    shutdown                Stop the daemon

ENVIRONMENT:
    CARRIER_ROUTER_ROUTES_FILE   Override the route file path
    CARRIER_ROUTER_LOG_LEVEL     Override log level (trace, debug, info, warn, error)
    CARRIER_ROUTER_IPC_SOCKET    Override IPC socket path
"#,
        carrier_router::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Build the route source named by the configuration
fn build_source(config: &Config) -> Arc<dyn RouteSource> {
    match config.source.source_type {
        SourceType::File => Arc::new(
            FileSource::new(&config.source.path).with_backup(config.source.backup),
        ),
    }
}

/// Build the route engine from configuration
fn build_engine(config: &Config) -> Result<RouteEngine> {
    let mut engine = RouteEngine::new(build_source(config))
        .with_match_mode(config.routing.mode()?)
        .with_options(config.routing.lookup_options())
        .with_drain_policy(config.reload.drain_policy());
    if let Some(name) = &config.routing.default_carrier {
        engine = engine.with_default_carrier(name.clone());
    }
    Ok(engine)
}

/// Map a control command line to an IPC command
fn control_command(words: &[String]) -> Result<IpcCommand> {
    let Some((name, rest)) = words.split_first() else {
        bail!("ctl needs a command, see --help");
    };
    let args = rest.to_vec();
    let command = match name.as_str() {
        "status" => IpcCommand::Status,
        "ping" => IpcCommand::Ping,
        "reload" => IpcCommand::ReloadRoutes,
        "dump" => IpcCommand::DumpRoutes,
        "shutdown" => IpcCommand::Shutdown,
        "add_host" => IpcCommand::AddHost { args },
        "delete_host" => IpcCommand::DeleteHost { args },
        "replace_host" => IpcCommand::ReplaceHost { args },
        "activate_host" => IpcCommand::ActivateHost { args },
        "deactivate_host" => IpcCommand::DeactivateHost { args },
        other => bail!("Unknown control command: {other}"),
    };
    Ok(command)
}

/// Send one control command to a running daemon and print the answer
async fn run_control(config: &Config, words: &[String]) -> Result<()> {
    let command = control_command(words)?;
    let client = IpcClient::new(&config.ipc.socket_path)
        .with_max_response_size(config.ipc.max_message_size.max(64 * 1024 * 1024));
    let response = client
        .send(command)
        .await
        .with_context(|| format!("Cannot reach daemon at {:?}", config.ipc.socket_path))?;

    match response {
        IpcResponse::Dump { text, .. } => print!("{text}"),
        IpcResponse::Admin(outcome) => println!(
            "{}: {} rule(s) updated, generation {}",
            outcome.command, outcome.updated, outcome.generation
        ),
        IpcResponse::Error(err) if err.status == 200 => print!("{}", err.message),
        IpcResponse::Error(err) => bail!("{} (status {})", err.message, err.status),
        other => println!("{}", serde_json::to_string_pretty(&other)?),
    }
    Ok(())
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();

    if matches!(args.mode, Mode::GenerateConfig) {
        carrier_router::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    let config = load_config_with_env(&args.config_path).with_context(|| {
        format!("Failed to load configuration from {:?}", args.config_path)
    })?;

    if let Mode::Control(words) = &args.mode {
        return run_control(&config, words).await;
    }

    let engine = build_engine(&config)?;

    if matches!(args.mode, Mode::Check) {
        let snapshot = engine
            .load_snapshot()
            .with_context(|| format!("Invalid routes in {}", engine.source().describe()))?;
        let stats = snapshot.stats();
        println!(
            "Configuration is valid: {} domains, {} prefixes, {} rules",
            stats.domains, stats.prefixes, stats.rules
        );
        return Ok(());
    }

    init_logging(&config);

    info!("carrier-router v{}", carrier_router::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    let engine = Arc::new(engine);
    let report = engine
        .reload()
        .with_context(|| format!("Initial route load from {} failed", engine.source().describe()))?;
    info!(
        generation = report.generation,
        domains = report.stats.domains,
        rules = report.stats.rules,
        "Routes loaded in {}us",
        report.load_time_us
    );

    let ipc_handler = Arc::new(IpcHandler::new(Arc::clone(&engine)));
    let mut ipc_shutdown_requested = ipc_handler.subscribe_shutdown();

    let ipc_server = IpcServer::new(config.ipc.clone(), Arc::clone(&ipc_handler));
    let ipc_shutdown = ipc_server.shutdown_sender();

    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server.run().await {
            error!("IPC server error: {}", e);
        }
    });

    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received SIGINT, initiating shutdown...");
                break;
            }
            _ = wait_for_signal(SignalKind::Terminate) => {
                info!("Received SIGTERM, initiating shutdown...");
                break;
            }
            _ = ipc_shutdown_requested.recv() => {
                info!("Shutdown requested over IPC");
                break;
            }
            _ = wait_for_signal(SignalKind::Hangup) => {
                info!("Received SIGHUP, reloading routes");
                if let IpcResponse::Error(e) = ipc_handler.reload().await {
                    warn!("Reload failed, keeping current routes: {}", e.message);
                }
            }
        }
    }

    info!("Shutting down...");

    let _ = ipc_shutdown.send(());
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), ipc_handle).await;

    if let Some(stats) = engine.stats() {
        info!(
            "Final snapshot: generation {}, {} rules in {} domains",
            stats.generation, stats.rules, stats.domains
        );
    }
    info!("Shutdown complete");

    Ok(())
}

/// Signals the daemon reacts to besides SIGINT
#[derive(Clone, Copy)]
enum SignalKind {
    Terminate,
    Hangup,
}

/// Wait for a Unix signal
#[cfg(unix)]
async fn wait_for_signal(kind: SignalKind) {
    use tokio::signal::unix::{signal, SignalKind as UnixSignal};
    let unix_kind = match kind {
        SignalKind::Terminate => UnixSignal::terminate(),
        SignalKind::Hangup => UnixSignal::hangup(),
    };
    match signal(unix_kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            warn!("Failed to register signal handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal(_kind: SignalKind) {
    // On non-Unix platforms, just wait forever
    std::future::pending::<()>().await
}
