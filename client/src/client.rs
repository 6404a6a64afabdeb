use reqwest::Client;
use url::Url;

use crate::Result;

/// The three bytes served by `/socket/status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketStatus {
    pub joined: u8,
    pub limit: u8,
    pub can_join: bool,
}

impl SocketStatus {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [joined, limit, can_join] => Some(Self {
                joined: *joined,
                limit: *limit,
                can_join: *can_join == 1,
            }),
            _ => None,
        }
    }

    /// Whether a new player would be admitted right now.
    pub fn has_seat(&self) -> bool {
        self.can_join && self.joined < self.limit
    }
}

/// HTTP client for a lobby's status endpoints
pub struct LobbyClient {
    client: Client,
    base_url: Url,
}

impl LobbyClient {
    /// Create a new client for the lobby at `base_url`, e.g. `http://192.168.0.10:8000`
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        let client = Client::new();

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Fetch `[joined, limit, can_join]`
    pub async fn socket_status(&self) -> Result<SocketStatus> {
        let url = self.base_url.join("/socket/status")?;
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(format!("Failed to fetch lobby status: {}", response.status()).into());
        }

        let bytes = response.bytes().await?;
        SocketStatus::from_bytes(&bytes)
            .ok_or_else(|| format!("Malformed lobby status of {} bytes", bytes.len()).into())
    }

    /// Human readable `joined/limit | Can join (bool)` line
    pub async fn summary(&self) -> Result<String> {
        let url = self.base_url.join("/status")?;
        Ok(self.client.get(url).send().await?.text().await?)
    }

    pub async fn is_healthy(&self) -> Result<bool> {
        let url = self.base_url.join("/health-check")?;
        let response = self.client.get(url).send().await?;
        Ok(response.status().is_success() && response.text().await? == "good")
    }

    /// Get the WebSocket URL of the lobby
    pub fn websocket_url(&self) -> Result<String> {
        let mut ws_url = self.base_url.clone();
        ws_url
            .set_scheme(match self.base_url.scheme() {
                "https" => "wss",
                _ => "ws",
            })
            .map_err(|_| "Failed to set WebSocket scheme")?;
        ws_url.set_path("/socket");
        ws_url.set_query(None);

        Ok(ws_url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;

    #[test]
    fn websocket_url_swaps_scheme_and_path() {
        let client = assert_ok!(LobbyClient::new("http://127.0.0.1:8123/whatever?x=1"));
        assert_eq!(assert_ok!(client.websocket_url()), "ws://127.0.0.1:8123/socket");

        let secure = assert_ok!(LobbyClient::new("https://lobby.example"));
        assert_eq!(assert_ok!(secure.websocket_url()), "wss://lobby.example/socket");
    }

    #[test]
    fn socket_status_needs_exactly_three_bytes() {
        let status = SocketStatus::from_bytes(&[2, 4, 1]).unwrap();
        assert!(status.has_seat());
        assert!(!SocketStatus::from_bytes(&[4, 4, 1]).unwrap().has_seat());
        assert!(!SocketStatus::from_bytes(&[0, 4, 0]).unwrap().has_seat());
        assert_eq!(SocketStatus::from_bytes(&[1, 2]), None);
    }
}
