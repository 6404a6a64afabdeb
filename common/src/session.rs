use rand::{SeedableRng, rngs::SmallRng};
use tracing::{debug, info, instrument, warn};

use crate::{
    logic::{plant_mines, reveal_flood},
    models::{Board, ButtonKind, Cell, GameState, MINE, Pos},
};

/// What a single call into the [`Session`] changed, in the order it happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// Mines were planted by the first click of a round.
    Started {
        width: u16,
        height: u16,
        max_mines: u16,
    },
    MarkToggled(Cell),
    Revealed(Cell),
    /// Cells opened by a flood, in visitation order.
    Flooded(Vec<Cell>),
    /// A mine was hit; carries every cell that was still hidden.
    Lost(Vec<Cell>),
    /// All safe cells are open; carries the remaining (mine) cells.
    Won(Vec<Cell>),
}

/// Authoritative state of one game: the board plus its counters.
#[derive(Debug)]
pub struct Session {
    width: u16,
    height: u16,
    max_mines: u16,
    planted: u16,
    state: GameState,
    revealed: u32,
    marked: u16,
    board: Board,
    paced: bool,
    epoch: u64,
    rng: SmallRng,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_rng(&mut rand::rng()))
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    fn with_rng(rng: SmallRng) -> Self {
        Self {
            width: 0,
            height: 0,
            max_mines: 0,
            planted: 0,
            state: GameState::Waiting,
            revealed: 0,
            marked: 0,
            board: Board::default(),
            paced: false,
            epoch: 0,
            rng,
        }
    }

    /// When paced, a flood leaves the session in `LOADING` until
    /// [`Session::finish_loading`] is called for the same round.
    pub fn set_paced(&mut self, paced: bool) {
        self.paced = paced;
    }

    #[instrument(level = "trace", skip(self))]
    pub fn resize(&mut self, width: u16, height: u16, mines: u16) {
        info!(
            "Resizing session to {}x{} with {} mines",
            width, height, mines
        );
        self.width = width;
        self.height = height;
        self.board = Board::new(usize::from(width), usize::from(height));
        self.max_mines = mines;
        self.begin_round();
    }

    #[instrument(level = "trace", skip(self))]
    pub fn restart(&mut self) {
        info!("Restarting session on the {}x{} board", self.width, self.height);
        self.board.reset();
        self.begin_round();
    }

    fn begin_round(&mut self) {
        self.planted = self.max_mines;
        self.revealed = 0;
        self.marked = 0;
        self.epoch += 1;
        self.state = if self.board.is_empty() {
            GameState::Waiting
        } else {
            GameState::Start
        };
    }

    /// Resolve a click at `pos`. Only `START` and `RUNNING` accept actions.
    #[instrument(level = "trace", skip(self), fields(x = pos.x, y = pos.y))]
    pub fn on_position_action(&mut self, pos: Pos, button: ButtonKind) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        if !self.board.contains(pos) {
            warn!("Position ({}, {}) is outside the board", pos.x, pos.y);
            return events;
        }

        match self.state {
            GameState::Start => {
                self.planted = plant_mines(&mut self.rng, &mut self.board, pos, self.max_mines);
                self.state = GameState::Running;
                info!("Round started with {} mines", self.planted);
                events.push(SessionEvent::Started {
                    width: self.width,
                    height: self.height,
                    max_mines: self.max_mines,
                });
            }
            GameState::Running => {}
            state => {
                debug!("Ignoring click while session is {:?}", state);
                return events;
            }
        }

        let Some(cell) = self.board.get(pos).copied() else {
            return events;
        };

        if button == ButtonKind::Secondary {
            if cell.is_hidden() {
                self.toggle_mark(pos, &mut events);
            }
            return events;
        }

        if !cell.is_hidden() || cell.is_marked() {
            debug!("Ignoring click on open or marked cell ({}, {})", pos.x, pos.y);
            return events;
        }

        match cell.value {
            MINE => {
                warn!("Mine hit at ({}, {})", pos.x, pos.y);
                self.state = GameState::Lose;
                events.push(SessionEvent::Lost(self.remaining_mines()));
                return events;
            }
            0 => {
                let flooded: Vec<Cell> = reveal_flood(&mut self.board, pos)
                    .into_iter()
                    .filter_map(|around| self.board.get(around).copied())
                    .collect();
                self.revealed += flooded.len() as u32;
                self.state = if self.paced {
                    GameState::Loading
                } else {
                    GameState::Running
                };
                debug!("Flood opened {} cells", flooded.len());
                events.push(SessionEvent::Flooded(flooded));
            }
            _ => {
                if let Some(cell) = self.board.get_mut(pos) {
                    cell.reveal();
                    self.revealed += 1;
                    events.push(SessionEvent::Revealed(*cell));
                }
            }
        }

        if matches!(self.state, GameState::Running | GameState::Loading)
            && self.revealed as usize >= self.safe_cells()
        {
            info!("All safe cells revealed, session won");
            self.state = GameState::Win;
            self.marked = self.planted;
            events.push(SessionEvent::Won(self.remaining_mines()));
        }

        events
    }

    fn toggle_mark(&mut self, pos: Pos, events: &mut Vec<SessionEvent>) {
        let Some(cell) = self.board.get_mut(pos) else {
            return;
        };

        if self.marked >= self.planted && !cell.is_marked() {
            debug!("Mark refused: {} of {} marks used", self.marked, self.planted);
            return;
        }

        cell.toggle_mark();
        if cell.is_marked() {
            self.marked += 1;
        } else {
            self.marked -= 1;
        }
        events.push(SessionEvent::MarkToggled(*cell));
    }

    /// Move a paced flood of round `epoch` back to `RUNNING`.
    pub fn finish_loading(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch || self.state != GameState::Loading {
            return false;
        }
        self.state = GameState::Running;
        true
    }

    /// Reveal every still-hidden cell and return them.
    pub fn remaining_mines(&mut self) -> Vec<Cell> {
        let mut remaining = Vec::with_capacity(usize::from(self.planted));
        for cell in self.board.cells_mut().filter(|cell| cell.is_hidden()) {
            cell.reveal();
            remaining.push(*cell);
        }
        remaining
    }

    fn safe_cells(&self) -> usize {
        self.board.len() - usize::from(self.planted)
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn max_mines(&self) -> u16 {
        self.max_mines
    }

    pub fn planted(&self) -> u16 {
        self.planted
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn revealed(&self) -> u32 {
        self.revealed
    }

    pub fn marked(&self) -> u16 {
        self.marked
    }

    /// Round counter, bumped by every resize and restart.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn board(&self) -> &Board {
        &self.board
    }
}
