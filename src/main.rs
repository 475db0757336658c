//! Throne Server
//!
//! Authoritative server for the throne auction: one seat, an escalating
//! price, and a moderated photo on the current ruler's record.
//!
//! Configuration comes from the environment:
//! - `THRONE_BIND_ADDR` - WebSocket listen address (default 0.0.0.0:8080)
//! - `THRONE_DB` - SQLite ledger path (default throne.db)
//! - `MODERATION_URL` - image moderation endpoint (required)
//! - `FILE_API_BASE` - messaging platform file API base
//! - `FILE_API_TOKEN` - bot token for the file API (required)
//! - `ADMIN_PASSWORD` - admin console shared secret (required)
//! - `AUTH_SECRET` / `AUTH_PUBLIC_KEY_PEM` - peer JWT verification

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use throne::game::admin::{AdminConfig, AdminConsole};
use throne::game::ledger::ThroneLedger;
use throne::game::pipeline::SubmissionPipeline;
use throne::moderation::gate::ModerationGate;
use throne::moderation::provider::HttpModerator;
use throne::network::auth::AuthConfig;
use throne::network::files::HttpPhotoStore;
use throne::network::server::{ServerConfig, ThroneServer};
use throne::VERSION;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_DB_PATH: &str = "throne.db";
const DEFAULT_FILE_API_BASE: &str = "https://api.telegram.org";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Throne Server v{}", VERSION);

    let bind_addr = std::env::var("THRONE_BIND_ADDR")
        .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
        .parse()
        .context("THRONE_BIND_ADDR is not a valid socket address")?;

    let db_path = std::env::var("THRONE_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    let ledger = Arc::new(ThroneLedger::open(&db_path).context("failed to open the ledger")?);
    info!(db_path, records = ledger.record_count()?, "ledger open");

    let moderation_url =
        std::env::var("MODERATION_URL").context("MODERATION_URL must be set")?;
    let gate = ModerationGate::new(HttpModerator::new(moderation_url));

    let file_api_base = std::env::var("FILE_API_BASE")
        .unwrap_or_else(|_| DEFAULT_FILE_API_BASE.to_string());
    let file_api_token =
        std::env::var("FILE_API_TOKEN").context("FILE_API_TOKEN must be set")?;
    let photos = Arc::new(HttpPhotoStore::new(file_api_base, file_api_token));

    let admin_config =
        AdminConfig::from_env().context("ADMIN_PASSWORD must be set")?;
    let console = AdminConsole::new(admin_config, ledger.clone());

    let auth = AuthConfig::from_env();
    if !auth.is_configured() {
        anyhow::bail!("set AUTH_SECRET or AUTH_PUBLIC_KEY_PEM to authenticate peers");
    }

    let pipeline = SubmissionPipeline::new(ledger, gate, photos);
    let server = ThroneServer::new(
        ServerConfig {
            bind_addr,
            auth,
            ..Default::default()
        },
        pipeline,
        console,
    );

    tokio::select! {
        result = server.run() => result.context("server terminated")?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            server.shutdown();
        }
    }

    Ok(())
}
