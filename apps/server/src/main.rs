//! Pulselog Server
//!
//! Serves the health-tracking API:
//! - Account registration and token login
//! - Blood pressure and glucose readings with derived categories
//! - Alerts on abnormal readings
//!
//! Operators provision reviewers with the `create-superuser` and `grant`
//! subcommands.

use std::net::SocketAddr;

use anyhow::Context;
use clap::{Parser, Subcommand};
use entities::Permission;
use pulselog_server::{AppState, ServerConfig, admin, create_app, init_tracing};
use tokio::{net::TcpListener, signal};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "pulselog-server")]
#[command(about = "Pulselog health-tracking API server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,

    /// Create an administrator who can review every user's readings
    CreateSuperuser {
        /// Login email of the new account
        #[arg(long)]
        email: String,

        /// Password of the new account
        #[arg(long, env = "PULSELOG_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Grant a permission to an existing user
    Grant {
        /// Email of the user
        #[arg(long)]
        email: String,

        /// Permission to grant
        #[arg(long, default_value = "view_all_readings", value_parser = parse_permission)]
        permission: Permission,
    },
}

fn parse_permission(value: &str) -> Result<Permission, String> {
    Permission::parse(value).ok_or_else(|| format!("unknown permission {value:?}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = ServerConfig::load().context("Failed to load configuration")?;

    init_tracing(&config.log_level, config.log_format);

    // Initialize application state
    let state = AppState::new(config.clone())
        .await
        .context("Failed to initialize application state")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, state).await,
        Command::CreateSuperuser { email, password } => {
            let user = admin::create_superuser(&state, &email, &password)
                .await
                .context("Failed to create superuser")?;
            info!(user_id = %user.id, email = %user.email, "Superuser created");
            Ok(())
        }
        Command::Grant { email, permission } => {
            let user = admin::grant_permission(&state, &email, permission)
                .await
                .context("Failed to grant permission")?;
            info!(
                user_id = %user.id,
                permission = permission.as_str(),
                "Permission granted"
            );
            Ok(())
        }
    }
}

async fn serve(config: ServerConfig, state: AppState) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        database = %config.database_url,
        smtp = config.smtp.is_some(),
        num_proxies = config.num_proxies,
        "Starting Pulselog server"
    );

    let app = create_app(state);

    // Bind and serve
    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!(address = %config.bind_address, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
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
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        }
    }
}
