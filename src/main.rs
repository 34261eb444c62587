use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fuel_api_rust::auth::{generate_jwt, Claims};
use fuel_api_rust::config::AppConfig;
use fuel_api_rust::database::{DatabaseManager, MemoryDatabase, PgAccessTokenStore, PgUserStore};
use fuel_api_rust::routes;
use fuel_api_rust::services::MemoryBackend;
use fuel_api_rust::state::AppState;

#[derive(Parser)]
#[command(name = "fuel-api")]
#[command(about = "Asset hosting HTTP API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the HTTP server (default)")]
    Serve {
        #[arg(long, help = "Override SERVER_PORT")]
        port: Option<u16>,

        #[arg(long, help = "Seed a user into the in-memory store (no DATABASE_URL only)")]
        dev_user: Option<String>,
    },

    #[command(about = "Print a bearer token for an identity, signed with the configured secret")]
    Token {
        #[arg(help = "Identity claim (sub) of the user")]
        identity: String,

        #[arg(long, help = "Lifetime in hours, defaults to SECURITY_JWT_EXPIRY_HOURS")]
        hours: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, SECURITY_JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve {
        port: None,
        dev_user: None,
    }) {
        Commands::Serve { port, dev_user } => serve(config, port, dev_user).await,
        Commands::Token { identity, hours } => {
            let hours = hours.unwrap_or(config.security.jwt_expiry_hours);
            let token = generate_jwt(&Claims::new(identity, hours), &config.security.jwt_secret)?;
            println!("{}", token);
            Ok(())
        }
    }
}

async fn serve(mut config: AppConfig, port: Option<u16>, dev_user: Option<String>) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    tracing::info!("Starting fuel API in {:?} mode", config.environment);

    let state = match config.database.url.is_some() {
        true => {
            let manager = DatabaseManager::connect(&config.database)
                .await
                .context("connecting to DATABASE_URL")?;
            let directory = Arc::new(PgUserStore::new(&manager));
            let tokens = Arc::new(PgAccessTokenStore::new(&manager));
            let backend = MemoryBackend::with_directory(&config.storage, &config.competition, directory);
            AppState::new(config.clone(), Arc::new(manager), tokens, Arc::new(backend))?
        }
        false => {
            let backend = MemoryBackend::new(&config.storage, &config.competition);
            if let Some(username) = dev_user {
                let user = backend.add_user(&username, &format!("dev|{}", username)).await;
                let token = generate_jwt(
                    &Claims::new(user.identity.clone(), config.security.jwt_expiry_hours),
                    &config.security.jwt_secret,
                )?;
                tracing::info!("Seeded user {}; bearer token: {}", user.username, token);
            }
            AppState::in_memory(config.clone(), MemoryDatabase::new(), backend)?
        }
    };

    let bind_addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("Listening on http://{}{}", bind_addr, routes::API_PREFIX);

    axum::serve(listener, routes::app(state)).await?;
    Ok(())
}
