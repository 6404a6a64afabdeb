use std::convert::Infallible;

use rocket::{
    State,
    futures::StreamExt,
    get,
    http::Status,
    request::{self, FromRequest, Request},
};
use rocket_ws::{Channel, Message, WebSocket};
use tracing::{debug, error, info, instrument, warn};

use minesweeper_common::protocol::Frame;

use crate::logic::{JoinRejection, SharedLobby};

/// Display name sent in the `User-Name` upgrade header. Empty when missing.
pub struct UserName(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for UserName {
    type Error = Infallible;

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let name = req.headers().get_one("User-Name").unwrap_or_default();
        request::Outcome::Success(UserName(name.trim().to_string()))
    }
}

#[get("/status")]
pub async fn status(lobby: &State<SharedLobby>) -> String {
    lobby.summary().await
}

#[get("/socket/status")]
pub async fn socket_status(lobby: &State<SharedLobby>) -> Vec<u8> {
    lobby.socket_status().await.to_vec()
}

#[get("/health-check")]
pub fn health_check() -> &'static str {
    "good"
}

fn rejection_message(rejection: &JoinRejection) -> &'static str {
    match rejection {
        JoinRejection::Locked => "Lobby is locked",
        JoinRejection::Full => "Lobby is full",
    }
}

#[get("/socket")]
#[instrument(level = "trace", skip(ws, lobby, user), fields(user = %user.0))]
pub async fn socket(
    ws: WebSocket,
    lobby: &State<SharedLobby>,
    user: UserName,
) -> Result<Channel<'static>, (Status, &'static str)> {
    if let Err(rejection) = lobby.check_admission().await {
        warn!("Rejecting {}: {:?}", user.0, rejection);
        return Err((Status::Locked, rejection_message(&rejection)));
    }

    let lobby = lobby.inner().clone();
    let username = user.0;

    Ok(ws.channel(move |stream| {
        Box::pin(async move {
            let (write, mut read) = stream.split();

            let (id, mut evicted) = match lobby.join(username.clone(), write).await {
                Ok(joined) => joined,
                Err(rejection) => {
                    warn!("{} lost the race for a seat: {:?}", username, rejection);
                    return Ok(());
                }
            };

            loop {
                let message = tokio::select! {
                    message = read.next() => message,
                    _ = lobby.wait_closed() => None,
                    _ = &mut evicted => {
                        info!("{} ({}) was dropped from the roster", username, id);
                        None
                    }
                };
                let Some(message) = message else {
                    break;
                };

                match message {
                    Ok(Message::Binary(bytes)) => {
                        let frame = Frame::from_bytes(&bytes);
                        debug!("{:?} frame from {} ({} bytes)", frame.kind, id, bytes.len());
                        lobby.submit(id, frame);
                    }
                    Ok(Message::Close(_)) => {
                        info!("{} ({}) closed the connection", username, id);
                        break;
                    }
                    Err(e) => {
                        error!("Connection error from {} ({}): {}", username, id, e);
                        break;
                    }
                    Ok(other) => {
                        debug!("Ignoring non-binary message from {}: {:?}", id, other);
                    }
                }
            }

            lobby.leave(id).await;
            Ok(())
        })
    }))
}
