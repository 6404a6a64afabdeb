use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use minesweeper_common::{
    engine::{Engine, EngineStatus},
    models::{ButtonKind, Cell, GameParams, GameState, Pos},
    pacing::PacedSender,
    protocol::{Frame, ServerMessage},
    session::{Session, SessionEvent},
};

/// Frames queued for the broadcaster.
#[derive(Debug)]
pub enum Outbound {
    Now(Vec<Frame>),
    /// Flood frames sent one at a time with `delay` between them while
    /// `epoch` is still the current round.
    Paced {
        epoch: u64,
        frames: Vec<Frame>,
        delay: Duration,
    },
}

/// Authoritative engine: resolves actions on the hosted session and turns
/// every outcome into frames for all peers.
pub struct ServerEngine {
    session: Session,
    animation: Duration,
    max_payload: usize,
    epoch: Arc<AtomicU64>,
    outbound: mpsc::UnboundedSender<Outbound>,
    remaining: Vec<Cell>,
}

impl ServerEngine {
    pub fn new(
        session: Session,
        max_payload: usize,
        epoch: Arc<AtomicU64>,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        epoch.store(session.epoch(), Ordering::SeqCst);
        Self {
            session,
            animation: Duration::ZERO,
            max_payload,
            epoch,
            outbound,
            remaining: Vec::new(),
        }
    }

    fn send(&self, message: ServerMessage) {
        let frames = message.encode(self.max_payload);
        if self.outbound.send(Outbound::Now(frames)).is_err() {
            warn!("Broadcaster stopped, dropping {:?}", message);
        }
    }

    fn publish_epoch(&self) {
        self.epoch.store(self.session.epoch(), Ordering::SeqCst);
    }

    /// Close a paced flood of round `epoch` once every frame went out.
    pub fn finish_loading(&mut self, epoch: u64) {
        if self.session.finish_loading(epoch) {
            debug!("Flood of round {} settled", epoch);
            self.send(ServerMessage::Progress {
                state: GameState::Running,
                marked: self.session.marked(),
                cells: Vec::new(),
            });
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn flood(&mut self, cells: Vec<Cell>) {
        let marked = self.session.marked();

        if self.animation.is_zero() {
            self.send(ServerMessage::Progress {
                state: GameState::Running,
                marked,
                cells,
            });
            return;
        }

        let frames = cells
            .into_iter()
            .flat_map(|cell| {
                ServerMessage::Progress {
                    state: GameState::Loading,
                    marked,
                    cells: vec![cell],
                }
                .encode(self.max_payload)
            })
            .collect();
        let paced = Outbound::Paced {
            epoch: self.session.epoch(),
            frames,
            delay: self.animation,
        };
        if self.outbound.send(paced).is_err() {
            warn!("Broadcaster stopped, dropping flood");
        }
    }
}

impl Engine for ServerEngine {
    #[instrument(level = "trace", skip(self))]
    fn resize(&mut self, params: GameParams) {
        self.session.resize(params.width, params.height, params.mines);
        self.publish_epoch();
        self.remaining.clear();
        self.send(ServerMessage::Resize {
            state: GameState::Start,
            marked: self.session.marked(),
            width: params.width,
            height: params.height,
            mines: params.mines,
        });
    }

    #[instrument(level = "trace", skip(self))]
    fn restart(&mut self) {
        self.session.restart();
        self.publish_epoch();
        self.remaining.clear();
        self.send(ServerMessage::Restart {
            state: GameState::Start,
            marked: self.session.marked(),
        });
    }

    #[instrument(level = "trace", skip(self), fields(x = pos.x, y = pos.y))]
    fn on_position_action(&mut self, pos: Pos, button: ButtonKind) {
        for event in self.session.on_position_action(pos, button) {
            let marked = self.session.marked();
            match event {
                SessionEvent::Started {
                    width,
                    height,
                    max_mines,
                } => self.send(ServerMessage::Started {
                    width,
                    height,
                    max_mines,
                }),
                SessionEvent::MarkToggled(cell) => self.send(ServerMessage::Position {
                    state: GameState::Running,
                    marked,
                    cell,
                }),
                SessionEvent::Revealed(cell) => self.send(ServerMessage::Position {
                    state: GameState::Running,
                    marked,
                    cell,
                }),
                SessionEvent::Flooded(cells) => self.flood(cells),
                SessionEvent::Lost(cells) => {
                    info!("Round lost, exposing {} cells", cells.len());
                    self.remaining = cells.clone();
                    self.send(ServerMessage::EndOfGame {
                        state: GameState::Lose,
                        marked,
                        cells,
                    });
                }
                SessionEvent::Won(cells) => {
                    info!("Round won");
                    self.remaining = cells.clone();
                    self.send(ServerMessage::EndOfGame {
                        state: GameState::Win,
                        marked,
                        cells,
                    });
                }
            }
        }
    }

    fn remaining_mines(&mut self) -> Vec<Cell> {
        std::mem::take(&mut self.remaining)
    }

    fn set_animation_duration(&mut self, duration: Duration) {
        self.animation = duration;
        self.session.set_paced(!duration.is_zero());
    }

    fn set_channels(&mut self, _sender: PacedSender) {
        debug!("Server engine broadcasts to peers, ignoring renderer channel");
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            width: self.session.width(),
            height: self.session.height(),
            max_mines: self.session.max_mines(),
            mines: self.session.planted(),
            marked: self.session.marked(),
            revealed: self.session.revealed(),
            state: self.session.state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use minesweeper_common::protocol::{FrameType, MAX_FRAME_PAYLOAD};

    use super::*;

    fn engine(seed: u64) -> (ServerEngine, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = ServerEngine::new(
            Session::with_seed(seed),
            MAX_FRAME_PAYLOAD,
            Arc::new(AtomicU64::new(0)),
            tx,
        );
        (engine, rx)
    }

    fn decoded(outbound: Outbound) -> Vec<ServerMessage> {
        let frames = match outbound {
            Outbound::Now(frames) => frames,
            Outbound::Paced { frames, .. } => frames,
        };
        frames
            .iter()
            .map(|frame| ServerMessage::decode(frame).unwrap())
            .collect()
    }

    #[test]
    fn resize_announces_start_and_bumps_epoch() {
        let (mut engine, mut rx) = engine(1);

        engine.resize(GameParams {
            width: 9,
            height: 9,
            mines: 10,
        });

        assert_eq!(engine.epoch.load(Ordering::SeqCst), engine.session().epoch());
        assert_eq!(
            decoded(rx.try_recv().unwrap()),
            vec![ServerMessage::Resize {
                state: GameState::Start,
                marked: 0,
                width: 9,
                height: 9,
                mines: 10,
            }]
        );
    }

    #[test]
    fn instant_flood_is_one_running_batch_after_start() {
        let (mut engine, mut rx) = engine(2);
        engine.resize(GameParams {
            width: 3,
            height: 3,
            mines: 0,
        });
        rx.try_recv().unwrap();

        engine.on_position_action(Pos::new(1, 1), ButtonKind::Primary);

        assert!(matches!(
            decoded(rx.try_recv().unwrap())[..],
            [ServerMessage::Started {
                width: 3,
                height: 3,
                max_mines: 0
            }]
        ));
        let flood = decoded(rx.try_recv().unwrap());
        assert!(matches!(
            &flood[..],
            [ServerMessage::Progress { state: GameState::Running, cells, .. }] if cells.len() == 9
        ));
        let end = decoded(rx.try_recv().unwrap());
        assert!(matches!(
            &end[..],
            [ServerMessage::EndOfGame { state: GameState::Win, .. }]
        ));
    }

    #[test]
    fn animated_flood_is_paced_per_cell_and_settles() {
        let (mut engine, mut rx) = engine(3);
        engine.set_animation_duration(Duration::from_millis(5));
        engine.resize(GameParams {
            width: 30,
            height: 30,
            mines: 60,
        });
        rx.try_recv().unwrap();

        engine.on_position_action(Pos::new(0, 0), ButtonKind::Primary);
        rx.try_recv().unwrap();

        match rx.try_recv().unwrap() {
            Outbound::Paced {
                epoch,
                frames,
                delay,
            } => {
                assert_eq!(delay, Duration::from_millis(5));
                assert_eq!(frames.len() as u32, engine.session().revealed());
                assert!(frames.iter().all(|frame| frame.kind == FrameType::State
                    && frame.payload[0] == GameState::Loading as u8));

                if engine.session().state() == GameState::Loading {
                    engine.finish_loading(epoch);
                    assert_eq!(
                        decoded(rx.try_recv().unwrap()),
                        vec![ServerMessage::Progress {
                            state: GameState::Running,
                            marked: 0,
                            cells: Vec::new(),
                        }]
                    );
                }
            }
            Outbound::Now(frames) => {
                // The corner held a number, so there was nothing to pace.
                assert_eq!(frames[0].kind, FrameType::Position);
            }
        }
    }

    #[test]
    fn restart_clears_remaining_and_broadcasts() {
        let (mut engine, mut rx) = engine(4);
        engine.resize(GameParams::default());
        engine.on_position_action(Pos::new(0, 0), ButtonKind::Primary);
        while rx.try_recv().is_ok() {}

        engine.restart();

        assert!(engine.remaining_mines().is_empty());
        assert_eq!(
            decoded(rx.try_recv().unwrap()),
            vec![ServerMessage::Restart {
                state: GameState::Start,
                marked: 0,
            }]
        );
        assert_eq!(engine.status().state, GameState::Start);
    }
}
