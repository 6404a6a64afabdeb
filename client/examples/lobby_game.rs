use minesweeper_client::{
    ButtonKind, ClientEngine, Engine, EngineCommand, GameParams, Paced, Pos, paced_channel,
};
use tokio::time::{Duration, sleep};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let base_url = args
        .next()
        .unwrap_or_else(|| "http://localhost:8000".to_string());
    let username = args.next().unwrap_or_else(|| "guest".to_string());

    let mut engine = ClientEngine::connect(&base_url, &username).await?;
    let (sender, mut receiver) = paced_channel();
    engine.set_channels(sender);

    // Only the host's resize is honoured, guests just watch it happen
    engine.resize(GameParams {
        width: 9,
        height: 9,
        mines: 10,
    });
    sleep(Duration::from_millis(200)).await;

    engine.send_text(format!("{} is here", username));
    engine.on_position_action(Pos::new(4, 4), ButtonKind::Primary);

    loop {
        tokio::select! {
            next = receiver.next() => match next {
                Some(Paced::Cell(delivery)) => {
                    let cell = delivery.cell();
                    println!("📋 ({}, {}) -> {}", cell.pos.x, cell.pos.y, cell.value);
                    // Draw at a visible pace
                    sleep(Duration::from_millis(20)).await;
                    delivery.ack();
                }
                Some(Paced::Command(EngineCommand::AfterClickWin)) => {
                    println!("🎉 Board cleared!");
                }
                Some(Paced::Command(EngineCommand::AfterClickLose)) => {
                    println!("💣 {} mines were left", engine.remaining_mines().len());
                }
                Some(Paced::Command(EngineCommand::GoBack)) | None => {
                    println!("🔌 Connection lost!");
                    break;
                }
                Some(Paced::Command(command)) => println!("🔄 {:?}", command),
            },
            _ = sleep(Duration::from_secs(2)) => {
                let status = engine.status();
                println!(
                    "⏸️ {:?} on {}x{}, {} marked, {} players",
                    status.state,
                    status.width,
                    status.height,
                    status.marked,
                    engine.server_status().joined
                );
                break;
            }
        }
    }

    engine.disconnect().await;
    Ok(())
}
