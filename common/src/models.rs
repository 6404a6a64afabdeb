use serde::{Deserialize, Serialize};

/// Value stored in a mine cell.
pub const MINE: i8 = -1;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Pos {
    pub x: usize,
    pub y: usize,
}

impl Pos {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// Hidden/marked properties of a cell, packed the same way they travel on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct CellFlags(u8);

impl CellFlags {
    pub const HIDDEN: Self = Self(0b01);
    pub const MARKED: Self = Self(0b10);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn toggle(&mut self, other: Self) {
        self.0 ^= other.0;
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

/// One grid position: its neighbor count (or [`MINE`]) and its flags.
///
/// This is also the `MineElement` unit of the wire protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Cell {
    pub pos: Pos,
    pub flags: CellFlags,
    pub value: i8,
}

impl Cell {
    pub fn hidden(pos: Pos) -> Self {
        Self {
            pos,
            flags: CellFlags::HIDDEN,
            value: 0,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.flags.contains(CellFlags::HIDDEN)
    }

    pub fn is_marked(&self) -> bool {
        self.flags.contains(CellFlags::MARKED)
    }

    pub fn is_mine(&self) -> bool {
        self.value == MINE
    }

    pub fn toggle_mark(&mut self) {
        self.flags.toggle(CellFlags::MARKED);
    }

    pub fn reveal(&mut self) {
        self.flags.remove(CellFlags::HIDDEN);
    }
}

/// Fixed `width x height` grid of cells, stored row-major.
#[derive(Clone, Debug, Default)]
pub struct Board {
    width: usize,
    height: usize,
    cells: Vec<Cell>,
}

impl Board {
    pub fn new(width: usize, height: usize) -> Self {
        let cells = (0..height)
            .flat_map(|y| (0..width).map(move |x| Cell::hidden(Pos { x, y })))
            .collect();

        Self {
            width,
            height,
            cells,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, pos: Pos) -> bool {
        pos.x < self.width && pos.y < self.height
    }

    pub fn get(&self, pos: Pos) -> Option<&Cell> {
        if self.contains(pos) {
            self.cells.get(pos.x + pos.y * self.width)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, pos: Pos) -> Option<&mut Cell> {
        if self.contains(pos) {
            self.cells.get_mut(pos.x + pos.y * self.width)
        } else {
            None
        }
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter()
    }

    pub fn cells_mut(&mut self) -> impl Iterator<Item = &mut Cell> {
        self.cells.iter_mut()
    }

    /// In-bounds positions around `pos`, excluding `pos` itself.
    pub fn neighbors(&self, pos: Pos) -> impl Iterator<Item = Pos> + use<> {
        let (width, height) = (self.width as i64, self.height as i64);
        let (x, y) = (pos.x as i64, pos.y as i64);

        (-1..=1i64)
            .flat_map(move |dy| (-1..=1i64).map(move |dx| (x + dx, y + dy)))
            .filter(move |&(nx, ny)| {
                (nx, ny) != (x, y) && nx >= 0 && ny >= 0 && nx < width && ny < height
            })
            .map(|(nx, ny)| Pos {
                x: nx as usize,
                y: ny as usize,
            })
    }

    /// Hide every cell and zero its value, keeping the dimensions.
    pub fn reset(&mut self) {
        for cell in &mut self.cells {
            *cell = Cell::hidden(cell.pos);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum GameState {
    #[default]
    Undefined = 0,
    Waiting = 1,
    Start = 2,
    Running = 3,
    Lose = 4,
    Win = 5,
    End = 6,
    Loading = 7,
}

impl GameState {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::Undefined,
            1 => Self::Waiting,
            2 => Self::Start,
            3 => Self::Running,
            4 => Self::Lose,
            5 => Self::Win,
            6 => Self::End,
            7 => Self::Loading,
            _ => return None,
        })
    }

    pub fn is_finished(self) -> bool {
        matches!(self, Self::Lose | Self::Win | Self::End)
    }
}

/// Pointer button that triggered a position action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ButtonKind {
    Primary = 1,
    Secondary = 2,
    Tertiary = 4,
}

impl ButtonKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Primary),
            2 => Some(Self::Secondary),
            4 => Some(Self::Tertiary),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct GameParams {
    pub width: u16,
    pub height: u16,
    pub mines: u16,
}

impl Default for GameParams {
    fn default() -> Self {
        Self {
            width: 8,
            height: 12,
            mines: 12,
        }
    }
}

/// Snapshot of the connection roster, broadcast whenever it changes.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerStatus {
    pub joined: u32,
    pub limit: u32,
    pub can_join: bool,
    pub player_names: Vec<String>,
}
