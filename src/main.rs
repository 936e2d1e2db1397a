use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use comet_hub::{
    auth::{generate_jwt, Keys},
    config::Config,
    logging::{init_logging, LogFormat},
    AppState,
};
use envconfig::Envconfig;
use tokio::signal::ctrl_c;
use tracing::info;

/// COMET community platform API server
#[derive(Parser, Debug)]
#[command(name = "comet_hub")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Mint an admin token signed with JWT_SECRET
    Token {
        /// Admin email embedded in the token
        #[arg(long)]
        email: String,
        /// Hours until the token expires
        #[arg(long, default_value_t = 24)]
        hours: u64,
    },
}

#[derive(Envconfig)]
struct TokenConfig {
    #[envconfig(from = "JWT_SECRET")]
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    match Cli::parse().command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Token { email, hours } => {
            let config = TokenConfig::init_from_env().context("failed to read JWT_SECRET")?;
            let keys = Keys::new(&config.jwt_secret)?;
            let token = generate_jwt(&keys, &email, Duration::from_secs(hours * 60 * 60))?;
            println!("{token}");
            Ok(())
        }
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = Config::init_from_env().context("failed to read configuration")?;
    init_logging(LogFormat::parse(&config.log_format));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_version = %config.api_version,
        "starting comet hub"
    );

    let state = AppState::from_config(&config)?;
    if let Err(e) = state.db.warm_up().await {
        tracing::warn!(error = %e, "database is not reachable yet, will retry on demand");
    }
    state.limiter.clone().spawn_pruner();

    let app = comet_hub::app(&state);
    let address = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%address, "server listening");

    axum::Server::bind(&address)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    state.db.shutdown().await;
    info!("database connection closed, bye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("received ctrl-c, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install terminate handler");
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
