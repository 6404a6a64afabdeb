//! The capability every game variant exposes to input handling and rendering.

mod local;

use std::time::Duration;

pub use local::LocalEngine;

use crate::{
    models::{ButtonKind, Cell, GameParams, GameState, Pos},
    pacing::PacedSender,
};

/// Counters and dimensions of the game an engine drives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStatus {
    pub width: u16,
    pub height: u16,
    pub max_mines: u16,
    pub mines: u16,
    pub marked: u16,
    pub revealed: u32,
    pub state: GameState,
}

/// One game as seen by the renderer.
///
/// The local variant resolves actions in process, the server variant
/// resolves them and broadcasts the outcome, and the client variant forwards
/// them to a host and mirrors what comes back.
pub trait Engine: Send {
    fn resize(&mut self, params: GameParams);

    fn restart(&mut self);

    fn on_position_action(&mut self, pos: Pos, button: ButtonKind);

    /// Cells exposed by the last finished round, taken by the caller.
    fn remaining_mines(&mut self) -> Vec<Cell>;

    fn set_animation_duration(&mut self, duration: Duration);

    /// Route cell updates and commands to a renderer.
    fn set_channels(&mut self, sender: PacedSender);

    fn status(&self) -> EngineStatus;
}
