use minesweeper_client::LobbyClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let base_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:8000".to_string());
    let client = LobbyClient::new(&base_url)?;

    if !client.is_healthy().await? {
        println!("❌ {} is not answering", base_url);
        return Ok(());
    }

    let status = client.socket_status().await?;
    println!("📊 {}", client.summary().await?);
    println!(
        "🪑 {} of {} seats taken, {}",
        status.joined,
        status.limit,
        if status.has_seat() {
            "come in"
        } else {
            "no room"
        }
    );

    Ok(())
}
