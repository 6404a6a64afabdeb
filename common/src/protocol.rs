//! Binary wire protocol between the host and its clients.
//!
//! Every frame is a one-byte type tag followed by a type-specific payload.
//! Integers are fixed-width little-endian. Cell lists (flood batches and the
//! end-of-game mine list) are split into chunks that each repeat a 3-byte
//! `[state][marked]` header; a chunk holding fewer than the maximum number of
//! cells ends the logical message.

use derive_more::{Display, Error};
use tracing::warn;

use crate::models::{ButtonKind, Cell, CellFlags, GameParams, GameState, Pos, ServerStatus};

pub const MAX_FRAME_PAYLOAD: usize = 16_384;
pub const MINE_ELEMENT_SIZE: usize = 10;
pub const LIST_HEADER_SIZE: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum FrameType {
    #[default]
    Unknown = 0,
    Position = 1,
    State = 2,
    Text = 3,
    Resize = 4,
    Restart = 5,
    EndOfGame = 6,
    ServerStatus = 7,
}

impl From<u8> for FrameType {
    fn from(tag: u8) -> Self {
        match tag {
            1 => Self::Position,
            2 => Self::State,
            3 => Self::Text,
            4 => Self::Resize,
            5 => Self::Restart,
            6 => Self::EndOfGame,
            7 => Self::ServerStatus,
            _ => Self::Unknown,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: FrameType, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.payload.len() + 1);
        bytes.push(self.kind as u8);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Split a raw message into tag and payload. An empty message is `UNKNOWN`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match bytes.split_first() {
            Some((tag, payload)) => Self {
                kind: FrameType::from(*tag),
                payload: payload.to_vec(),
            },
            None => Self::default(),
        }
    }
}

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[display("{kind:?} payload truncated: needed {needed} bytes, got {got}")]
    Truncated {
        kind: FrameType,
        needed: usize,
        got: usize,
    },
    #[display("unknown game state byte {byte}")]
    InvalidState { byte: u8 },
    #[display("unknown button byte {byte}")]
    InvalidButton { byte: u8 },
    #[display("{kind:?} frames are not accepted here")]
    Unexpected { kind: FrameType },
    #[display("cell list of {len} bytes is not a whole number of elements")]
    Misaligned { len: usize },
    #[display("player name is not valid UTF-8")]
    InvalidName,
}

struct Reader<'a> {
    kind: FrameType,
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(frame: &'a Frame) -> Self {
        Self {
            kind: frame.kind,
            bytes: &frame.payload,
            offset: 0,
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.offset + len;
        let slice = self.bytes.get(self.offset..end).ok_or(DecodeError::Truncated {
            kind: self.kind,
            needed: end,
            got: self.bytes.len(),
        })?;
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut array = [0; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn state(&mut self) -> Result<GameState, DecodeError> {
        let byte = self.u8()?;
        GameState::from_byte(byte).ok_or(DecodeError::InvalidState { byte })
    }

    fn pos(&mut self) -> Result<Pos, DecodeError> {
        let x = self.u32()? as usize;
        let y = self.u32()? as usize;
        Ok(Pos { x, y })
    }

    fn cell(&mut self) -> Result<Cell, DecodeError> {
        let pos = self.pos()?;
        let flags = CellFlags::from_bits(self.u8()?);
        let value = self.u8()? as i8;
        Ok(Cell { pos, flags, value })
    }

    fn cells(&mut self) -> Result<Vec<Cell>, DecodeError> {
        let len = self.bytes.len() - self.offset;
        if len % MINE_ELEMENT_SIZE != 0 {
            return Err(DecodeError::Misaligned { len });
        }
        (0..len / MINE_ELEMENT_SIZE).map(|_| self.cell()).collect()
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.bytes[self.offset..];
        self.offset = self.bytes.len();
        rest
    }
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_pos(buf: &mut Vec<u8>, pos: Pos) {
    put_u32(buf, pos.x as u32);
    put_u32(buf, pos.y as u32);
}

fn put_cell(buf: &mut Vec<u8>, cell: &Cell) {
    put_pos(buf, cell.pos);
    buf.push(cell.flags.bits());
    buf.push(cell.value as u8);
}

fn list_header(state: GameState, marked: u16, capacity: usize) -> Vec<u8> {
    let mut payload = Vec::with_capacity(LIST_HEADER_SIZE + capacity);
    payload.push(state as u8);
    put_u16(&mut payload, marked);
    payload
}

/// Whole cells that fit in one chunk under `max_payload`.
pub fn cells_per_chunk(max_payload: usize) -> usize {
    (max_payload.saturating_sub(LIST_HEADER_SIZE) / MINE_ELEMENT_SIZE).max(1)
}

fn encode_cell_list(
    kind: FrameType,
    state: GameState,
    marked: u16,
    cells: &[Cell],
    max_payload: usize,
) -> Vec<Frame> {
    let per_chunk = cells_per_chunk(max_payload);
    let mut frames: Vec<Frame> = cells
        .chunks(per_chunk)
        .map(|chunk| {
            let mut payload = list_header(state, marked, chunk.len() * MINE_ELEMENT_SIZE);
            for cell in chunk {
                put_cell(&mut payload, cell);
            }
            Frame::new(kind, payload)
        })
        .collect();

    if cells.len() % per_chunk == 0 {
        frames.push(Frame::new(kind, list_header(state, marked, 0)));
    }

    frames
}

/// Messages a client sends to the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    Position { button: ButtonKind, pos: Pos },
    Resize(GameParams),
    Restart,
    Text(String),
}

impl ClientMessage {
    pub fn encode(&self) -> Frame {
        match self {
            Self::Position { button, pos } => {
                let mut payload = Vec::with_capacity(9);
                payload.push(*button as u8);
                put_pos(&mut payload, *pos);
                Frame::new(FrameType::Position, payload)
            }
            Self::Resize(params) => {
                let mut payload = Vec::with_capacity(6);
                put_u16(&mut payload, params.width);
                put_u16(&mut payload, params.height);
                put_u16(&mut payload, params.mines);
                Frame::new(FrameType::Resize, payload)
            }
            Self::Restart => Frame::new(FrameType::Restart, Vec::new()),
            Self::Text(text) => Frame::new(FrameType::Text, text.as_bytes().to_vec()),
        }
    }

    pub fn decode(frame: &Frame) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(frame);
        match frame.kind {
            FrameType::Position => {
                let byte = reader.u8()?;
                let button = ButtonKind::from_byte(byte).ok_or(DecodeError::InvalidButton { byte })?;
                let pos = reader.pos()?;
                Ok(Self::Position { button, pos })
            }
            FrameType::Resize => Ok(Self::Resize(GameParams {
                width: reader.u16()?,
                height: reader.u16()?,
                mines: reader.u16()?,
            })),
            FrameType::Restart => Ok(Self::Restart),
            FrameType::Text => Ok(Self::Text(
                String::from_utf8_lossy(reader.rest()).into_owned(),
            )),
            kind => Err(DecodeError::Unexpected { kind }),
        }
    }
}

/// Messages the host broadcasts to every client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerMessage {
    Resize {
        state: GameState,
        marked: u16,
        width: u16,
        height: u16,
        mines: u16,
    },
    Restart {
        state: GameState,
        marked: u16,
    },
    /// `STATE` frame announcing the first click of a round.
    Started {
        width: u16,
        height: u16,
        max_mines: u16,
    },
    /// `STATE` frame for any other state, optionally carrying revealed cells.
    Progress {
        state: GameState,
        marked: u16,
        cells: Vec<Cell>,
    },
    Position {
        state: GameState,
        marked: u16,
        cell: Cell,
    },
    EndOfGame {
        state: GameState,
        marked: u16,
        cells: Vec<Cell>,
    },
    Status(ServerStatus),
    Text(String),
}

impl ServerMessage {
    /// Encode into one or more frames, chunking cell lists under `max_payload`.
    pub fn encode(&self, max_payload: usize) -> Vec<Frame> {
        match self {
            Self::Resize {
                state,
                marked,
                width,
                height,
                mines,
            } => {
                let mut payload = list_header(*state, *marked, 6);
                put_u16(&mut payload, *width);
                put_u16(&mut payload, *height);
                put_u16(&mut payload, *mines);
                vec![Frame::new(FrameType::Resize, payload)]
            }
            Self::Restart { state, marked } => {
                vec![Frame::new(FrameType::Restart, list_header(*state, *marked, 0))]
            }
            Self::Started {
                width,
                height,
                max_mines,
            } => {
                let mut payload = Vec::with_capacity(7);
                payload.push(GameState::Start as u8);
                put_u16(&mut payload, *width);
                put_u16(&mut payload, *height);
                put_u16(&mut payload, *max_mines);
                vec![Frame::new(FrameType::State, payload)]
            }
            Self::Progress {
                state,
                marked,
                cells,
            } => encode_cell_list(FrameType::State, *state, *marked, cells, max_payload),
            Self::Position {
                state,
                marked,
                cell,
            } => {
                let mut payload = list_header(*state, *marked, MINE_ELEMENT_SIZE);
                put_cell(&mut payload, cell);
                vec![Frame::new(FrameType::Position, payload)]
            }
            Self::EndOfGame {
                state,
                marked,
                cells,
            } => encode_cell_list(FrameType::EndOfGame, *state, *marked, cells, max_payload),
            Self::Status(status) => vec![Frame::new(FrameType::ServerStatus, encode_status(status))],
            Self::Text(text) => vec![Frame::new(FrameType::Text, text.as_bytes().to_vec())],
        }
    }

    /// Decode a single frame. Cell-list messages hold only this frame's chunk;
    /// feed them through a [`Reassembler`] to get the whole list.
    pub fn decode(frame: &Frame) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(frame);
        match frame.kind {
            FrameType::Resize => Ok(Self::Resize {
                state: reader.state()?,
                marked: reader.u16()?,
                width: reader.u16()?,
                height: reader.u16()?,
                mines: reader.u16()?,
            }),
            FrameType::Restart => Ok(Self::Restart {
                state: reader.state()?,
                marked: reader.u16()?,
            }),
            FrameType::State => match reader.state()? {
                GameState::Start => Ok(Self::Started {
                    width: reader.u16()?,
                    height: reader.u16()?,
                    max_mines: reader.u16()?,
                }),
                state => Ok(Self::Progress {
                    state,
                    marked: reader.u16()?,
                    cells: reader.cells()?,
                }),
            },
            FrameType::Position => Ok(Self::Position {
                state: reader.state()?,
                marked: reader.u16()?,
                cell: reader.cell()?,
            }),
            FrameType::EndOfGame => Ok(Self::EndOfGame {
                state: reader.state()?,
                marked: reader.u16()?,
                cells: reader.cells()?,
            }),
            FrameType::ServerStatus => Ok(Self::Status(decode_status(&mut reader)?)),
            FrameType::Text => Ok(Self::Text(
                String::from_utf8_lossy(reader.rest()).into_owned(),
            )),
            FrameType::Unknown => Err(DecodeError::Unexpected {
                kind: FrameType::Unknown,
            }),
        }
    }
}

fn encode_status(status: &ServerStatus) -> Vec<u8> {
    let names_len: usize = status.player_names.iter().map(|name| 4 + name.len()).sum();
    let mut payload = Vec::with_capacity(13 + names_len);
    put_u32(&mut payload, status.joined);
    put_u32(&mut payload, status.limit);
    payload.push(u8::from(status.can_join));
    put_u32(&mut payload, status.player_names.len() as u32);
    for name in &status.player_names {
        put_u32(&mut payload, name.len() as u32);
        payload.extend_from_slice(name.as_bytes());
    }
    payload
}

fn decode_status(reader: &mut Reader<'_>) -> Result<ServerStatus, DecodeError> {
    let joined = reader.u32()?;
    let limit = reader.u32()?;
    let can_join = reader.u8()? == 1;
    let count = reader.u32()? as usize;

    let mut player_names = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        let len = reader.u32()? as usize;
        let bytes = reader.take(len)?;
        let name = String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidName)?;
        player_names.push(name);
    }

    Ok(ServerStatus {
        joined,
        limit,
        can_join,
        player_names,
    })
}

/// Joins chunked cell lists back into whole messages.
#[derive(Debug)]
pub struct Reassembler {
    per_chunk: usize,
    pending: Option<ServerMessage>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(MAX_FRAME_PAYLOAD)
    }
}

impl Reassembler {
    pub fn new(max_payload: usize) -> Self {
        Self {
            per_chunk: cells_per_chunk(max_payload),
            pending: None,
        }
    }

    /// Returns a message once it is complete. Non-list messages pass straight through.
    pub fn push(&mut self, message: ServerMessage) -> Option<ServerMessage> {
        let chunk_len = match &message {
            ServerMessage::Progress { cells, .. } | ServerMessage::EndOfGame { cells, .. } => {
                cells.len()
            }
            _ => return Some(message),
        };

        let merged = match (self.pending.take(), message) {
            (
                Some(ServerMessage::Progress { mut cells, .. }),
                ServerMessage::Progress {
                    state,
                    marked,
                    cells: chunk,
                },
            ) => {
                cells.extend(chunk);
                ServerMessage::Progress {
                    state,
                    marked,
                    cells,
                }
            }
            (
                Some(ServerMessage::EndOfGame { mut cells, .. }),
                ServerMessage::EndOfGame {
                    state,
                    marked,
                    cells: chunk,
                },
            ) => {
                cells.extend(chunk);
                ServerMessage::EndOfGame {
                    state,
                    marked,
                    cells,
                }
            }
            (Some(stale), message) => {
                warn!("Dropping unfinished chunked message {:?}", stale);
                message
            }
            (None, message) => message,
        };

        if chunk_len < self.per_chunk {
            Some(merged)
        } else {
            self.pending = Some(merged);
            None
        }
    }
}
