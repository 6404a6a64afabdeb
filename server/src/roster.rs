use std::{fmt::Display, time::Duration};

use rocket::futures::{Sink, SinkExt};
use rocket_ws::{
    Message,
    frame::{CloseCode, CloseFrame},
};
use tokio::{sync::oneshot, time};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use minesweeper_common::{models::ServerStatus, protocol::Frame};

pub struct Peer<S> {
    pub id: Uuid,
    pub username: String,
    sink: S,
    // Dropped together with the peer, which resolves its `Evicted`
    _membership: oneshot::Sender<()>,
}

/// Resolves once the peer is no longer in the roster.
pub type Evicted = oneshot::Receiver<()>;

/// A peer that is no longer part of the roster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Departed {
    pub id: Uuid,
    pub username: String,
    pub was_host: bool,
}

/// Connected peers in join order. The first peer to join is the host.
pub struct Roster<S> {
    peers: Vec<Peer<S>>,
    host: Option<Uuid>,
    limit: u32,
}

impl<S> Roster<S>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    pub fn new(limit: u32) -> Self {
        Self {
            peers: Vec::new(),
            host: None,
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn is_full(&self) -> bool {
        self.peers.len() >= self.limit as usize
    }

    pub fn is_host(&self, id: Uuid) -> bool {
        self.host == Some(id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.peers.iter().any(|peer| peer.id == id)
    }

    /// Add a peer, or hand the sink back when the roster is full.
    #[instrument(level = "trace", skip(self, sink))]
    pub fn join(&mut self, username: String, sink: S) -> Result<(Uuid, Evicted), S> {
        if self.is_full() {
            warn!("Roster full ({}), refusing {}", self.limit, username);
            return Err(sink);
        }

        let id = Uuid::new_v4();
        if self.host.is_none() {
            info!("{} ({}) is hosting", username, id);
            self.host = Some(id);
        }
        info!(
            "Peer {} ({}) joined, {} of {} connected",
            username,
            id,
            self.peers.len() + 1,
            self.limit
        );
        let (membership, evicted) = oneshot::channel();
        self.peers.push(Peer {
            id,
            username,
            sink,
            _membership: membership,
        });
        Ok((id, evicted))
    }

    #[instrument(level = "trace", skip(self))]
    pub fn leave(&mut self, id: Uuid) -> Option<Departed> {
        let index = self.peers.iter().position(|peer| peer.id == id)?;
        let peer = self.peers.remove(index);
        info!(
            "Peer {} ({}) left, {} remaining",
            peer.username,
            id,
            self.peers.len()
        );

        Some(Departed {
            id,
            username: peer.username,
            was_host: self.is_host(id),
        })
    }

    pub fn status(&self, can_join: bool) -> ServerStatus {
        ServerStatus {
            joined: self.peers.len() as u32,
            limit: self.limit,
            can_join,
            player_names: self.peers.iter().map(|peer| peer.username.clone()).collect(),
        }
    }

    /// Write `frames` to every peer in order, each write bounded by `deadline`.
    ///
    /// Peers whose write fails or times out stop receiving the remaining
    /// frames and are removed once every peer has been visited.
    pub async fn broadcast(&mut self, frames: &[Frame], deadline: Duration) -> Vec<Departed> {
        let mut failed = Vec::new();

        for peer in &mut self.peers {
            for frame in frames {
                let write = peer.sink.send(Message::Binary(frame.to_bytes()));
                match time::timeout(deadline, write).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("Write to {} ({}) failed: {}", peer.username, peer.id, e);
                        failed.push(peer.id);
                        break;
                    }
                    Err(_) => {
                        warn!(
                            "Write to {} ({}) exceeded {:?}",
                            peer.username, peer.id, deadline
                        );
                        failed.push(peer.id);
                        break;
                    }
                }
            }
        }

        if !failed.is_empty() {
            debug!("Removing {} peers after broadcast", failed.len());
        }
        failed.into_iter().filter_map(|id| self.leave(id)).collect()
    }

    /// Send a normal-closure frame to every peer and empty the roster.
    pub async fn close_all(&mut self, reason: &str, deadline: Duration) {
        for mut peer in self.peers.drain(..) {
            let close = Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: reason.to_string().into(),
            }));
            if time::timeout(deadline, peer.sink.send(close)).await.is_err() {
                debug!("Close frame to {} timed out", peer.id);
            }
        }
    }
}
