use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use minesweeper_common::{
    engine::{Engine, EngineStatus},
    models::{ButtonKind, Cell, GameParams, GameState, Pos, ServerStatus},
    pacing::{EngineCommand, PacedSender},
    protocol::{ClientMessage, Frame, Reassembler, ServerMessage},
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{LobbyClient, LobbySocket, Result};

/// Local copy of the hosted session's fields
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Mirror {
    pub width: u16,
    pub height: u16,
    pub max_mines: u16,
    pub mines: u16,
    pub marked: u16,
    pub revealed: u32,
    pub state: GameState,
    pub server_status: ServerStatus,
    pub remaining: Vec<Cell>,
}

type SharedMirror = Arc<RwLock<Mirror>>;
type RendererSlot = Arc<RwLock<Option<PacedSender>>>;

fn current_renderer(slot: &RendererSlot) -> Option<PacedSender> {
    slot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn update<T>(mirror: &SharedMirror, apply: impl FnOnce(&mut Mirror) -> T) -> T {
    let mut guard = mirror.write().unwrap_or_else(PoisonError::into_inner);
    apply(&mut guard)
}

/// Engine for a joined player: actions go to the host, outcomes come back as
/// frames and are replayed into the renderer at its own pace.
pub struct ClientEngine {
    username: String,
    mirror: SharedMirror,
    renderer: RendererSlot,
    outgoing: mpsc::UnboundedSender<Frame>,
    reader_task: JoinHandle<()>,
    dispatcher_task: JoinHandle<()>,
}

impl ClientEngine {
    /// Join the lobby at `base_url` as `username`
    pub async fn connect(base_url: &str, username: &str) -> Result<Self> {
        let client = LobbyClient::new(base_url)?;

        let status = client.socket_status().await?;
        if !status.has_seat() {
            return Err(format!(
                "Lobby refuses new players ({}/{}, can join: {})",
                status.joined, status.limit, status.can_join
            )
            .into());
        }

        let socket = LobbySocket::connect(&client.websocket_url()?, username).await?;
        info!("Joined lobby at {} as {:?}", base_url, username);

        Ok(Self::from_socket(socket, username))
    }

    /// Drive an already connected socket
    pub fn from_socket(socket: LobbySocket, username: &str) -> Self {
        let mirror = SharedMirror::default();
        let renderer = RendererSlot::default();
        let outgoing = socket.get_sender();
        let (frames, queue) = mpsc::unbounded_channel();

        let reader_task = tokio::spawn(read_frames(socket, mirror.clone(), frames));
        let dispatcher_task = tokio::spawn(dispatch(queue, mirror.clone(), renderer.clone()));

        Self {
            username: username.to_string(),
            mirror,
            renderer,
            outgoing,
            reader_task,
            dispatcher_task,
        }
    }

    fn send(&self, message: ClientMessage) {
        debug!("{} sends {:?}", self.username, message);
        if self.outgoing.send(message.encode()).is_err() {
            warn!("Connection closed, dropping {:?}", message);
        }
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.send(ClientMessage::Text(text.into()));
    }

    /// Snapshot of the mirrored session
    pub fn mirror(&self) -> Mirror {
        self.mirror
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn server_status(&self) -> ServerStatus {
        self.mirror().server_status
    }

    pub fn is_connected(&self) -> bool {
        !self.outgoing.is_closed() && !self.dispatcher_task.is_finished()
    }

    /// Stop reading and drop the connection
    pub async fn disconnect(mut self) {
        self.reader_task.abort();
        let _ = (&mut self.reader_task).await;
        let _ = (&mut self.dispatcher_task).await;
        info!("{} left the lobby", self.username);
    }
}

impl Engine for ClientEngine {
    fn resize(&mut self, params: GameParams) {
        self.send(ClientMessage::Resize(params));
    }

    fn restart(&mut self) {
        self.send(ClientMessage::Restart);
    }

    fn on_position_action(&mut self, pos: Pos, button: ButtonKind) {
        let (width, height) = {
            let mirror = self.mirror.read().unwrap_or_else(PoisonError::into_inner);
            (usize::from(mirror.width), usize::from(mirror.height))
        };
        // An unsized mirror leaves validation to the host
        if width > 0 && (pos.x >= width || pos.y >= height) {
            warn!("Position ({}, {}) is outside the {}x{} board", pos.x, pos.y, width, height);
            return;
        }

        self.send(ClientMessage::Position { button, pos });
    }

    fn remaining_mines(&mut self) -> Vec<Cell> {
        update(&self.mirror, |mirror| std::mem::take(&mut mirror.remaining))
    }

    fn set_animation_duration(&mut self, _duration: Duration) {
        debug!("Client engine follows the host's pacing");
    }

    fn set_channels(&mut self, sender: PacedSender) {
        *self.renderer.write().unwrap_or_else(PoisonError::into_inner) = Some(sender);
    }

    fn status(&self) -> EngineStatus {
        let mirror = self.mirror.read().unwrap_or_else(PoisonError::into_inner);
        EngineStatus {
            width: mirror.width,
            height: mirror.height,
            max_mines: mirror.max_mines,
            mines: mirror.mines,
            marked: mirror.marked,
            revealed: mirror.revealed,
            state: mirror.state,
        }
    }
}

impl Drop for ClientEngine {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Socket read loop. Roster updates are applied here, everything else is
/// queued for the dispatcher.
async fn read_frames(
    mut socket: LobbySocket,
    mirror: SharedMirror,
    frames: mpsc::UnboundedSender<ServerMessage>,
) {
    loop {
        let frame = match socket.receive_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!("Error receiving frame: {}", e);
                break;
            }
        };

        let message = match ServerMessage::decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping {:?} frame: {}", frame.kind, e);
                continue;
            }
        };

        match message {
            ServerMessage::Status(status) => {
                debug!("Roster now {:?}", status.player_names);
                update(&mirror, |mirror| mirror.server_status = status);
            }
            message => {
                if frames.send(message).is_err() {
                    break;
                }
            }
        }
    }

    // Lets the dispatcher finish and raise GoBack
    drop(frames);
    let _ = socket.close().await;
}

async fn deliver(renderer: &RendererSlot, mirror: &SharedMirror, cell: Cell) {
    if !cell.is_hidden() {
        update(mirror, |mirror| mirror.revealed += 1);
    }

    let Some(sender) = current_renderer(renderer) else {
        return;
    };
    if sender.deliver(cell).await.is_err() {
        debug!("Renderer went away, cell updates dropped");
    }
}

fn command(renderer: &RendererSlot, command: EngineCommand) {
    debug!("Raising {:?}", command);
    if let Some(sender) = current_renderer(renderer)
        && sender.command(command).is_err()
    {
        debug!("Renderer went away, {:?} dropped", command);
    }
}

/// Apply frames in order, waiting for the renderer on every cell.
async fn dispatch(
    mut frames: mpsc::UnboundedReceiver<ServerMessage>,
    mirror: SharedMirror,
    renderer: RendererSlot,
) {
    let mut reassembler = Reassembler::default();

    while let Some(message) = frames.recv().await {
        let Some(message) = reassembler.push(message) else {
            continue;
        };

        match message {
            ServerMessage::Resize {
                state,
                marked,
                width,
                height,
                mines,
            } => {
                update(&mirror, |mirror| {
                    mirror.state = state;
                    mirror.marked = marked;
                    mirror.width = width;
                    mirror.height = height;
                    mirror.mines = mines;
                    mirror.max_mines = mines;
                    mirror.revealed = 0;
                    mirror.remaining.clear();
                });
                command(&renderer, EngineCommand::Resize);
            }
            ServerMessage::Restart { state, marked } => {
                update(&mirror, |mirror| {
                    mirror.state = state;
                    mirror.marked = marked;
                    mirror.revealed = 0;
                    mirror.remaining.clear();
                });
                command(&renderer, EngineCommand::Restart);
            }
            ServerMessage::Started {
                width,
                height,
                max_mines,
            } => update(&mirror, |mirror| {
                mirror.state = GameState::Start;
                mirror.width = width;
                mirror.height = height;
                mirror.max_mines = max_mines;
                mirror.mines = max_mines;
            }),
            ServerMessage::Progress {
                state,
                marked,
                cells,
            } => {
                update(&mirror, |mirror| {
                    mirror.state = state;
                    mirror.marked = marked;
                });
                for cell in cells {
                    deliver(&renderer, &mirror, cell).await;
                }
            }
            ServerMessage::Position {
                state,
                marked,
                cell,
            } => {
                update(&mirror, |mirror| {
                    mirror.state = state;
                    mirror.marked = marked;
                });
                deliver(&renderer, &mirror, cell).await;
            }
            ServerMessage::EndOfGame {
                state,
                marked,
                cells,
            } => {
                info!("Round over: {:?}, {} cells exposed", state, cells.len());
                update(&mirror, |mirror| {
                    mirror.state = state;
                    mirror.marked = marked;
                    mirror.remaining = cells;
                });
                if state == GameState::Win {
                    command(&renderer, EngineCommand::AfterClickWin);
                } else {
                    command(&renderer, EngineCommand::AfterClickLose);
                }
            }
            ServerMessage::Text(text) => info!("Message from the lobby: {}", text),
            ServerMessage::Status(status) => {
                update(&mirror, |mirror| mirror.server_status = status);
            }
        }
    }

    info!("Connection to the lobby lost");
    command(&renderer, EngineCommand::GoBack);
}
