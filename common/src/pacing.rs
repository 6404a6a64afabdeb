//! One-in-flight delivery of cell updates to a renderer.
//!
//! The producer hands over a single [`Delivery`] and waits until the consumer
//! acknowledges it before producing the next one, so the consumer controls
//! the pace of reveal animations. Control signals travel on a separate,
//! unpaced command channel.

use derive_more::{Display, Error};
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::models::Cell;

/// Signals for the renderer that are not cell data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EngineCommand {
    Restart,
    Resize,
    Rerender,
    GoBack,
    AfterClickWin,
    AfterClickLose,
}

#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum PacingError {
    #[display("renderer side of the pacing channel is closed")]
    Closed,
}

/// A cell update awaiting acknowledgment.
///
/// Dropping a delivery acknowledges it.
#[derive(Debug)]
pub struct Delivery {
    cell: Cell,
    ack: oneshot::Sender<()>,
}

impl Delivery {
    pub fn cell(&self) -> Cell {
        self.cell
    }

    pub fn ack(self) {
        let _ = self.ack.send(());
    }
}

#[derive(Clone, Debug)]
pub struct PacedSender {
    cells: mpsc::Sender<Delivery>,
    commands: mpsc::UnboundedSender<EngineCommand>,
}

impl PacedSender {
    /// Hand `cell` to the renderer and wait for its acknowledgment.
    pub async fn deliver(&self, cell: Cell) -> Result<(), PacingError> {
        let (ack, acked) = oneshot::channel();
        self.cells
            .send(Delivery { cell, ack })
            .await
            .map_err(|_| PacingError::Closed)?;
        let _ = acked.await;
        trace!("Cell ({}, {}) acknowledged", cell.pos.x, cell.pos.y);
        Ok(())
    }

    pub fn command(&self, command: EngineCommand) -> Result<(), PacingError> {
        self.commands.send(command).map_err(|_| PacingError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.cells.is_closed()
    }
}

/// Whatever the renderer should handle next.
#[derive(Debug)]
pub enum Paced {
    Cell(Delivery),
    Command(EngineCommand),
}

#[derive(Debug)]
pub struct PacedReceiver {
    cells: mpsc::Receiver<Delivery>,
    commands: mpsc::UnboundedReceiver<EngineCommand>,
}

impl PacedReceiver {
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.cells.recv().await
    }

    pub async fn recv_command(&mut self) -> Option<EngineCommand> {
        self.commands.recv().await
    }

    pub fn try_recv_command(&mut self) -> Option<EngineCommand> {
        self.commands.try_recv().ok()
    }

    /// Wait on both channels. `None` once the producer side is gone.
    ///
    /// A pending command always wins over a pending cell.
    pub async fn next(&mut self) -> Option<Paced> {
        tokio::select! {
            biased;
            Some(command) = self.commands.recv() => Some(Paced::Command(command)),
            Some(delivery) = self.cells.recv() => Some(Paced::Cell(delivery)),
            else => None,
        }
    }
}

pub fn paced_channel() -> (PacedSender, PacedReceiver) {
    let (cells_tx, cells_rx) = mpsc::channel(1);
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    (
        PacedSender {
            cells: cells_tx,
            commands: commands_tx,
        },
        PacedReceiver {
            cells: cells_rx,
            commands: commands_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::models::Pos;

    #[derive(Debug, PartialEq, Eq)]
    enum Step {
        Push(usize),
        Received(usize),
        Acked(usize),
    }

    #[tokio::test]
    async fn every_push_is_acked_before_the_next() {
        const CELLS: usize = 64;
        let (sender, mut receiver) = paced_channel();
        let log = Arc::new(Mutex::new(Vec::new()));

        let producer_log = log.clone();
        let producer = tokio::spawn(async move {
            for i in 0..CELLS {
                producer_log.lock().unwrap().push(Step::Push(i));
                sender.deliver(Cell::hidden(Pos::new(i, 0))).await.unwrap();
                producer_log.lock().unwrap().push(Step::Acked(i));
            }
        });

        for _ in 0..CELLS {
            let delivery = receiver.recv().await.unwrap();
            log.lock().unwrap().push(Step::Received(delivery.cell().pos.x));
            tokio::task::yield_now().await;
            delivery.ack();
        }
        producer.await.unwrap();

        let log = log.lock().unwrap();
        let expected: Vec<Step> = (0..CELLS)
            .flat_map(|i| [Step::Push(i), Step::Received(i), Step::Acked(i)])
            .collect();
        assert_eq!(*log, expected);
    }

    #[tokio::test]
    async fn dropped_receiver_reports_closed() {
        let (sender, receiver) = paced_channel();
        drop(receiver);

        assert_eq!(
            sender.deliver(Cell::hidden(Pos::new(0, 0))).await,
            Err(PacingError::Closed)
        );
        assert_eq!(sender.command(EngineCommand::GoBack), Err(PacingError::Closed));
        assert!(sender.is_closed());
    }

    #[tokio::test]
    async fn commands_bypass_cell_pacing() {
        let (sender, mut receiver) = paced_channel();

        sender.command(EngineCommand::AfterClickWin).unwrap();
        sender.command(EngineCommand::Resize).unwrap();

        assert_eq!(receiver.recv_command().await, Some(EngineCommand::AfterClickWin));
        assert_eq!(receiver.try_recv_command(), Some(EngineCommand::Resize));
        assert_eq!(receiver.try_recv_command(), None);
    }

    #[tokio::test]
    async fn command_comes_out_before_a_later_cell() {
        let (sender, mut receiver) = paced_channel();

        for i in 0..200 {
            sender.command(EngineCommand::Resize).unwrap();
            let cells = sender.clone();
            let producer = tokio::spawn(async move {
                cells.deliver(Cell::hidden(Pos::new(i, 0))).await.unwrap();
            });
            // Let the producer queue its cell so both channels are ready
            while receiver.cells.is_empty() {
                tokio::task::yield_now().await;
            }

            assert!(matches!(
                receiver.next().await,
                Some(Paced::Command(EngineCommand::Resize))
            ));
            match receiver.next().await {
                Some(Paced::Cell(delivery)) => {
                    assert_eq!(delivery.cell().pos, Pos::new(i, 0));
                    delivery.ack();
                }
                other => panic!("expected a cell, got {other:?}"),
            }
            producer.await.unwrap();
        }
    }

    #[tokio::test]
    async fn next_drains_both_channels_then_ends() {
        let (sender, mut receiver) = paced_channel();

        let producer = tokio::spawn(async move {
            sender.deliver(Cell::hidden(Pos::new(2, 1))).await.unwrap();
            sender.command(EngineCommand::Rerender).unwrap();
        });

        match receiver.next().await {
            Some(Paced::Cell(delivery)) => {
                assert_eq!(delivery.cell().pos, Pos::new(2, 1));
                delivery.ack();
            }
            other => panic!("expected a cell, got {other:?}"),
        }
        assert!(matches!(
            receiver.next().await,
            Some(Paced::Command(EngineCommand::Rerender))
        ));

        producer.await.unwrap();
        assert!(receiver.next().await.is_none());
    }
}
