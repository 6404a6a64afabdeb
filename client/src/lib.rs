//! Minesweeper Lobby Client
//!
//! Joins a minesweeper session hosted by another player and exposes it through
//! the same [`Engine`] trait as a local game, so a renderer can drive either
//! without knowing where the board lives.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use minesweeper_client::{ButtonKind, ClientEngine, Engine, Pos, paced_channel};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let mut engine = ClientEngine::connect("http://192.168.0.10:8000", "guest").await?;
//!
//!     let (sender, mut receiver) = paced_channel();
//!     engine.set_channels(sender);
//!
//!     engine.on_position_action(Pos::new(3, 3), ButtonKind::Primary);
//!
//!     // Each cell is handed over only after the previous one was drawn
//!     while let Some(delivery) = receiver.recv().await {
//!         println!("{:?}", delivery.cell());
//!         delivery.ack();
//!     }
//!
//!     engine.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! [`LobbyClient`] and [`LobbySocket`] are the lower level pieces: the HTTP
//! status endpoints and the raw binary frame connection.

mod client;
mod engine;
mod websocket;

pub use client::{LobbyClient, SocketStatus};
pub use engine::{ClientEngine, Mirror};
pub use websocket::LobbySocket;

// Re-export common types for convenience
pub use minesweeper_common::{
    engine::{Engine, EngineStatus, LocalEngine},
    models::*,
    pacing::{Delivery, EngineCommand, Paced, PacedReceiver, PacedSender, paced_channel},
    protocol::*,
};

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
