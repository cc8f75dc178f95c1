use std::path::{Path, PathBuf};

use clap::Parser;
use scim_ldap_bridge::{AppState, build_app, config::BridgeConfig, observability};

/// Config file used when `--config` is not given.
const DEFAULT_CONFIG_PATH: &str = "bridge.toml";

/// CLI arguments for the SCIM bridge
#[derive(Parser, Debug)]
#[command(version, about = "SCIM 2.0 to LDAP bridge", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./bridge.toml if it exists)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the SCIM server (default)
    Serve,
    /// Validate the configuration and mapping, then exit
    Check,
}

fn load_config(path: Option<&Path>) -> BridgeConfig {
    let result = match path {
        Some(path) => BridgeConfig::from_file(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            BridgeConfig::from_file(DEFAULT_CONFIG_PATH)
        }
        None => {
            eprintln!(
                "No config file given and {} not found; serving no resource types",
                DEFAULT_CONFIG_PATH
            );
            Ok(BridgeConfig::default())
        }
    };
    result.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    })
}

fn build_state(config: BridgeConfig) -> AppState {
    AppState::from_config(config).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    })
}

fn run_check(config_path: Option<&Path>) {
    let state = build_state(load_config(config_path));
    for rt in state.engine.schema().resource_types() {
        println!(
            "{:<12} {:<12} {} ({} attributes)",
            rt.name,
            rt.endpoint,
            rt.base_dn,
            rt.attributes().len()
        );
    }
    println!("Configuration OK");
}

async fn run_server(config_path: Option<&Path>) {
    let config = load_config(config_path);

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let state = build_state(config);
    let server = state.config.server.clone();
    tracing::info!(
        resource_types = state.engine.schema().resource_types().len(),
        public_url = %state.engine.base_url(),
        "SCIM bridge configured"
    );

    let app = build_app(state);

    let bind_addr = format!("{}:{}", server.host, server.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %bind_addr, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on http://{}{}", bind_addr, server.base_path);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
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

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Check) => run_check(args.config.as_deref()),
        Some(Command::Serve) | None => run_server(args.config.as_deref()).await,
    }
}
