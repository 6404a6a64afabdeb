mod engine;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use rocket::futures::stream::SplitSink;
use rocket_ws::{Message, stream::DuplexStream};
use tokio::{
    sync::{Mutex, mpsc, watch},
    time,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use minesweeper_common::{
    engine::Engine,
    models::{GameParams, ServerStatus},
    protocol::{ClientMessage, Frame, FrameType, ServerMessage},
    session::Session,
};

pub use engine::{Outbound, ServerEngine};

use crate::{
    config::LobbyConfig,
    roster::{Departed, Evicted, Roster},
};

pub type PeerSink = SplitSink<DuplexStream, Message>;
pub type SharedLobby = Arc<Lobby>;

/// Everything the processing task consumes, in arrival order.
#[derive(Debug)]
pub enum Inbound {
    Peer { id: Uuid, frame: Frame },
    FloodSettled { epoch: u64 },
}

#[derive(Debug, PartialEq, Eq)]
pub enum JoinRejection {
    Locked,
    Full,
}

/// One hosted game: the roster of peers plus the queue feeding its session.
pub struct Lobby {
    config: LobbyConfig,
    roster: Mutex<Roster<PeerSink>>,
    can_join: AtomicBool,
    inbound: mpsc::UnboundedSender<Inbound>,
    closed: watch::Sender<bool>,
}

impl Lobby {
    /// Create the lobby and spawn its processing and broadcast tasks.
    pub fn start(config: LobbyConfig, session: Session) -> SharedLobby {
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let epoch = Arc::new(AtomicU64::new(0));

        let mut engine = ServerEngine::new(
            session,
            config.max_frame_payload,
            epoch.clone(),
            outbound,
        );
        engine.set_animation_duration(config.animation());

        let lobby = Arc::new(Self {
            roster: Mutex::new(Roster::new(config.client_limit)),
            config,
            can_join: AtomicBool::new(true),
            inbound,
            closed,
        });

        tokio::spawn(process(lobby.clone(), engine, inbound_rx));
        tokio::spawn(broadcast_loop(lobby.clone(), epoch, outbound_rx));

        info!(
            "Lobby open for {} players, animation {:?}",
            lobby.config.client_limit,
            lobby.config.animation()
        );
        lobby
    }

    pub fn config(&self) -> &LobbyConfig {
        &self.config
    }

    pub fn can_join(&self) -> bool {
        self.can_join.load(Ordering::SeqCst)
    }

    pub fn disable_join(&self) {
        info!("Lobby locked, no further joins");
        self.can_join.store(false, Ordering::SeqCst);
    }

    pub async fn status(&self) -> ServerStatus {
        self.roster.lock().await.status(self.can_join())
    }

    /// `[joined, limit, can_join]` as single bytes.
    pub async fn socket_status(&self) -> [u8; 3] {
        let status = self.status().await;
        [
            status.joined.min(255) as u8,
            status.limit.min(255) as u8,
            u8::from(status.can_join),
        ]
    }

    pub async fn summary(&self) -> String {
        let status = self.status().await;
        format!(
            "{}/{} | Can join ({})",
            status.joined, status.limit, status.can_join
        )
    }

    pub async fn check_admission(&self) -> Result<(), JoinRejection> {
        if !self.can_join() {
            return Err(JoinRejection::Locked);
        }
        if self.roster.lock().await.is_full() {
            return Err(JoinRejection::Full);
        }
        Ok(())
    }

    /// Register a peer and announce the new roster to everyone.
    #[instrument(level = "trace", skip(self, sink))]
    pub async fn join(
        &self,
        username: String,
        sink: PeerSink,
    ) -> Result<(Uuid, Evicted), JoinRejection> {
        if !self.can_join() {
            return Err(JoinRejection::Locked);
        }

        let mut roster = self.roster.lock().await;
        let (id, evicted) = roster.join(username, sink).map_err(|_| JoinRejection::Full)?;
        let status = roster.status(self.can_join());
        self.broadcast_locked(&mut roster, ServerMessage::Status(status).encode(self.max_payload()))
            .await;
        Ok((id, evicted))
    }

    #[instrument(level = "trace", skip(self))]
    pub async fn leave(&self, id: Uuid) {
        let mut roster = self.roster.lock().await;
        let Some(departed) = roster.leave(id) else {
            return;
        };

        if departed.was_host {
            drop(roster);
            self.teardown(&departed);
            return;
        }

        let status = roster.status(self.can_join());
        self.broadcast_locked(&mut roster, ServerMessage::Status(status).encode(self.max_payload()))
            .await;
    }

    pub async fn is_member(&self, id: Uuid) -> bool {
        self.roster.lock().await.contains(id)
    }

    pub async fn is_host(&self, id: Uuid) -> bool {
        self.roster.lock().await.is_host(id)
    }

    /// Queue a frame from `id` for the processing task.
    pub fn submit(&self, id: Uuid, frame: Frame) {
        if self.inbound.send(Inbound::Peer { id, frame }).is_err() {
            warn!("Processing stopped, dropping frame from {}", id);
        }
    }

    pub async fn broadcast(&self, frames: &[Frame]) {
        let mut roster = self.roster.lock().await;
        self.broadcast_locked(&mut roster, frames.to_vec()).await;
    }

    /// Broadcast, then keep announcing the shrunken roster until a pass
    /// completes without losing anyone.
    async fn broadcast_locked(&self, roster: &mut Roster<PeerSink>, mut frames: Vec<Frame>) {
        loop {
            let departed = roster
                .broadcast(&frames, self.config.broadcast_timeout())
                .await;
            if departed.is_empty() {
                return;
            }
            if let Some(host) = departed.iter().find(|peer| peer.was_host) {
                self.teardown(host);
                return;
            }
            frames = ServerMessage::Status(roster.status(self.can_join())).encode(self.max_payload());
        }
    }

    fn max_payload(&self) -> usize {
        self.config.max_frame_payload
    }

    fn teardown(&self, host: &Departed) {
        warn!("Host {} ({}) left, closing the lobby", host.username, host.id);
        self.closed.send_replace(true);
    }

    /// Resolves once the lobby has been torn down.
    pub async fn wait_closed(&self) {
        let mut closed = self.closed.subscribe();
        while !*closed.borrow_and_update() {
            if closed.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Close every peer with a normal-closure frame.
    pub async fn close(&self) {
        self.closed.send_replace(true);
        self.roster
            .lock()
            .await
            .close_all("Server is closing...", self.config.broadcast_timeout())
            .await;
    }
}

async fn process(
    lobby: SharedLobby,
    mut engine: ServerEngine,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
) {
    loop {
        let next = tokio::select! {
            next = inbound.recv() => next,
            _ = lobby.wait_closed() => None,
        };
        let Some(next) = next else {
            break;
        };

        match next {
            Inbound::FloodSettled { epoch } => engine.finish_loading(epoch),
            Inbound::Peer { id, frame } => handle_frame(&lobby, &mut engine, id, frame).await,
        }
    }

    debug!("Processing task finished");
}

async fn handle_frame(lobby: &Lobby, engine: &mut ServerEngine, id: Uuid, frame: Frame) {
    if frame.kind == FrameType::Unknown {
        warn!("Dropping frame with unknown tag from {}", id);
        return;
    }
    // Frames queued before the peer was removed
    if !lobby.is_member(id).await {
        debug!("Dropping {:?} frame from departed peer {}", frame.kind, id);
        return;
    }

    let message = match ClientMessage::decode(&frame) {
        Ok(message) => message,
        Err(e) => {
            warn!("Malformed {:?} frame from {}: {}", frame.kind, id, e);
            return;
        }
    };
    debug!("Peer {} sent {:?}", id, message);

    match message {
        ClientMessage::Position { button, pos } => engine.on_position_action(pos, button),
        ClientMessage::Resize(params) => {
            if !lobby.is_host(id).await {
                warn!("Ignoring resize from non-host {}", id);
                return;
            }
            engine.resize(sanitize(params));
        }
        ClientMessage::Restart => engine.restart(),
        ClientMessage::Text(text) => {
            lobby
                .broadcast(&ServerMessage::Text(text).encode(lobby.max_payload()))
                .await;
        }
    }
}

fn sanitize(params: GameParams) -> GameParams {
    GameParams {
        width: params.width.max(1),
        height: params.height.max(1),
        mines: params.mines,
    }
}

async fn broadcast_loop(
    lobby: SharedLobby,
    epoch: Arc<AtomicU64>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(next) = outbound.recv().await {
        match next {
            Outbound::Now(frames) => lobby.broadcast(&frames).await,
            Outbound::Paced {
                epoch: round,
                frames,
                delay,
            } => {
                if replay(&lobby, &epoch, round, &frames, delay).await {
                    let _ = lobby.inbound.send(Inbound::FloodSettled { epoch: round });
                } else {
                    debug!("Flood of round {} cut short by a new round", round);
                }
            }
        }
    }

    debug!("Broadcast task finished");
}

/// Send `frames` one by one while `round` is current. Returns whether all went out.
async fn replay(
    lobby: &Lobby,
    epoch: &AtomicU64,
    round: u64,
    frames: &[Frame],
    delay: Duration,
) -> bool {
    let current = || epoch.load(Ordering::SeqCst) == round;

    for frame in frames {
        if !current() {
            return false;
        }
        lobby.broadcast(std::slice::from_ref(frame)).await;
        if !current() {
            return false;
        }
        time::sleep(delay).await;
    }

    true
}
