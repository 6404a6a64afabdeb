use minesweeper_server::{ServerError, config::LobbyConfig, open};
use tracing::info;

#[rocket::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt::init();
    info!("🚀 Starting minesweeper lobby");

    let config = LobbyConfig::load()?;
    info!(
        "📊 Up to {} players, frames capped at {} bytes",
        config.client_limit, config.max_frame_payload
    );

    let server = open(config).await?;
    info!("📡 Endpoints: GET /status, /socket/status, /health-check, /socket");
    info!("🌐 Share {} with the other players", server.base_url());

    server.wait().await
}
