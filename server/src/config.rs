use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};

use rocket::figment::Figment;
use serde::Deserialize;
use tracing::debug;

use minesweeper_common::protocol::MAX_FRAME_PAYLOAD;

use crate::ServerError;

/// Lobby settings, read from `Rocket.toml` and `ROCKET_*` variables next to
/// Rocket's own keys.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LobbyConfig {
    pub address: IpAddr,
    pub port: u16,
    pub client_limit: u32,
    pub port_retries: u16,
    pub animation_ms: u64,
    pub broadcast_timeout_ms: u64,
    pub max_frame_payload: usize,
    pub allowed_origins: Vec<String>,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8000,
            client_limit: 4,
            port_retries: 5,
            animation_ms: 0,
            broadcast_timeout_ms: 500,
            max_frame_payload: MAX_FRAME_PAYLOAD,
            allowed_origins: vec!["http://localhost:5173".to_string()],
        }
    }
}

impl LobbyConfig {
    pub fn from_figment(figment: &Figment) -> Result<Self, ServerError> {
        let config: Self = figment.extract()?;
        debug!("Loaded lobby configuration: {:?}", config);
        Ok(config)
    }

    /// Configuration from Rocket's default providers.
    pub fn load() -> Result<Self, ServerError> {
        Self::from_figment(&rocket::Config::figment())
    }

    pub fn animation(&self) -> Duration {
        Duration::from_millis(self.animation_ms)
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }
}
