//! Lumo RPC Daemon - serves registered methods over a Unix socket.

use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lumo_rpc::auth::{load_keys_file, KeyStore, ServerAssistant, SharedKeyStore};
use lumo_rpc::config::{LoggingConfig, Settings};
use lumo_rpc::dispatch::MethodRegistry;
use lumo_rpc::protocol::ProtocolCodec;
use lumo_rpc::transport::{ServerTransport, UnixServerTransport};
use lumo_rpc::Server;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = "lumo-rpcd";
const DEFAULT_CONFIG_PATH: &str = "/etc/lumo/rpc.toml";

/// What the command line asks for.
#[derive(Debug, PartialEq, Eq)]
enum Invocation {
    Help,
    Version,
    Serve { config_path: String },
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    let config_path = match parse_args(&args) {
        Ok(Invocation::Help) => {
            print_help();
            return ExitCode::SUCCESS;
        }
        Ok(Invocation::Version) => {
            println!("{} {}", NAME, VERSION);
            return ExitCode::SUCCESS;
        }
        Ok(Invocation::Serve { config_path }) => config_path,
        Err(message) => {
            eprintln!("{}", message);
            eprintln!("Try '{} --help' for more information.", NAME);
            return ExitCode::FAILURE;
        }
    };

    let settings = match Settings::load(&config_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Cannot load {}: {}", config_path, e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&settings.logging);

    info!(version = VERSION, config = %config_path, "Starting {}", NAME);
    info!(
        socket = %settings.server.socket_path.display(),
        format = %settings.protocol.format,
        serializer = %settings.protocol.serializer,
        "Protocol configured"
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(settings)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "RPC daemon exited with an error");
            ExitCode::FAILURE
        }
    }
}

/// Build the server from `settings` and serve until stopped.
async fn async_main(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let codec = ProtocolCodec::with_counter(settings.protocol.format, settings.protocol.initial_counter);
    let serializer = settings.protocol.serializer.build();
    let registry = Arc::new(MethodRegistry::with_builtins());

    let mut server = Server::new(codec, serializer, registry);

    // Keys live in a shared store so SIGHUP can swap them in place
    let keys = Arc::new(SharedKeyStore::default());
    if let Some(keys_path) = &settings.security.keys_path {
        keys.replace(load_keys_file(keys_path)?);
        info!(clients = keys.len(), path = %keys_path.display(), "Client keys loaded");
    }

    if settings.protocol.format.is_signed() {
        let key_store: Arc<dyn KeyStore> = keys.clone();
        let assistant = Arc::new(
            ServerAssistant::new(key_store)
                .with_window(settings.security.timestamp_window_seconds)
                .with_nonce_limit(settings.security.max_nonces_per_client),
        );
        assistant.start_cleanup_task(Duration::from_secs(
            settings.security.nonce_cleanup_interval_seconds,
        ));
        server = server.with_assistant(assistant)?;
    }

    let server = Arc::new(server);
    let transport = UnixServerTransport::new(settings.server.unix_server_config());
    server.start(&transport).await?;
    info!("Listening for requests");

    loop {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("Stop requested, draining connections");
                transport.stop().await?;
                break;
            }
            _ = reload_signal() => {
                info!("Reload signal received, reloading client keys...");
                reload_keys(&keys, settings.security.keys_path.as_deref());
            }
        }
    }

    info!("Daemon stopped");
    Ok(())
}

/// Reload the keys file into the shared store, keeping the old keys on failure.
fn reload_keys(keys: &SharedKeyStore, keys_path: Option<&Path>) {
    let Some(keys_path) = keys_path else {
        warn!("No keys file configured, nothing to reload");
        return;
    };

    match load_keys_file(keys_path) {
        Ok(new_keys) => {
            keys.replace(new_keys);
            info!(clients = keys.len(), "Client keys reloaded successfully");
        }
        Err(e) => {
            error!(error = %e, "Failed to reload client keys, keeping existing keys");
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Wait for a reload signal (SIGHUP).
#[cfg(unix)]
async fn reload_signal() {
    match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGHUP handler");
            std::future::pending::<()>().await;
        }
    }
}

/// No-op reload signal for non-Unix platforms.
#[cfg(not(unix))]
async fn reload_signal() {
    std::future::pending::<()>().await;
}

/// Print help message.
fn print_help() {
    println!(
        r#"{name} {version}
Serve authenticated RPC calls over a Unix socket.

USAGE:
    {name} [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Configuration file [default: {config}]
    -h, --help             Print help information
    -V, --version          Print version information

SIGNALS:
    SIGTERM, SIGINT        Stop accepting connections and drain
    SIGHUP                 Reload the client keys file
"#,
        name = NAME,
        version = VERSION,
        config = DEFAULT_CONFIG_PATH,
    );
}

/// Interpret the arguments that follow the program name.
fn parse_args(args: &[String]) -> Result<Invocation, String> {
    let mut config_path = None;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Invocation::Help),
            "-V" | "--version" => return Ok(Invocation::Version),
            "-c" | "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| format!("Option '{}' requires a path", arg))?;
                config_path = Some(path.clone());
            }
            other => match other.strip_prefix("--config=") {
                Some(path) => config_path = Some(path.to_string()),
                None => return Err(format!("Unknown argument '{}'", other)),
            },
        }
    }

    Ok(Invocation::Serve {
        config_path: config_path.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string()),
    })
}

/// Initialize logging. `RUST_LOG` overrides the configured level.
fn init_logging(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(env_filter);

    if logging.format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().pretty()).init();
    }
}
