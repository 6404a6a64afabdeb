use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{sync::mpsc, task::JoinHandle, time};
use tracing::{debug, info, instrument, trace, warn};

use super::{Engine, EngineStatus};
use crate::{
    models::{ButtonKind, Cell, GameParams, Pos},
    pacing::{EngineCommand, PacedSender},
    session::{Session, SessionEvent},
};

type SharedSession = Arc<Mutex<Session>>;

fn lock(session: &SharedSession) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cells to hand to the renderer for one round, followed by an optional command.
#[derive(Debug)]
struct PaceJob {
    epoch: u64,
    cells: Vec<Cell>,
    delay: Duration,
    settles_flood: bool,
    then: Option<EngineCommand>,
}

struct Pacer {
    jobs: mpsc::UnboundedSender<PaceJob>,
    task: JoinHandle<()>,
}

/// Single-process engine: the session lives here and every reveal is paced
/// straight into the renderer's channel.
pub struct LocalEngine {
    session: SharedSession,
    animation: Duration,
    pacer: Option<Pacer>,
    remaining: Vec<Cell>,
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEngine {
    pub fn new() -> Self {
        Self::with_session(Session::new())
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            animation: Duration::ZERO,
            pacer: None,
            remaining: Vec::new(),
        }
    }

    fn enqueue(&self, job: PaceJob) {
        let Some(pacer) = &self.pacer else {
            trace!("No renderer attached, dropping {} cell updates", job.cells.len());
            return;
        };

        if pacer.jobs.send(job).is_err() {
            warn!("Pacer stopped, renderer will miss updates");
        }
    }

    fn job(&self, epoch: u64, cells: Vec<Cell>) -> PaceJob {
        PaceJob {
            epoch,
            cells,
            delay: Duration::ZERO,
            settles_flood: false,
            then: None,
        }
    }
}

impl Engine for LocalEngine {
    fn resize(&mut self, params: GameParams) {
        lock(&self.session).resize(params.width, params.height, params.mines);
        self.remaining.clear();
    }

    fn restart(&mut self) {
        lock(&self.session).restart();
        self.remaining.clear();
    }

    #[instrument(level = "trace", skip(self), fields(x = pos.x, y = pos.y))]
    fn on_position_action(&mut self, pos: Pos, button: ButtonKind) {
        let (epoch, events) = {
            let mut session = lock(&self.session);
            let events = session.on_position_action(pos, button);
            (session.epoch(), events)
        };

        for event in events {
            match event {
                SessionEvent::Started { .. } => {
                    debug!("Local round started at ({}, {})", pos.x, pos.y);
                }
                SessionEvent::MarkToggled(cell) | SessionEvent::Revealed(cell) => {
                    self.enqueue(self.job(epoch, vec![cell]));
                }
                SessionEvent::Flooded(cells) => {
                    let mut job = self.job(epoch, cells);
                    job.delay = self.animation;
                    job.settles_flood = true;
                    self.enqueue(job);
                }
                SessionEvent::Lost(cells) => {
                    info!("Local round lost");
                    self.remaining = cells;
                    let mut job = self.job(epoch, Vec::new());
                    job.then = Some(EngineCommand::AfterClickLose);
                    self.enqueue(job);
                }
                SessionEvent::Won(cells) => {
                    info!("Local round won");
                    self.remaining = cells;
                    let mut job = self.job(epoch, Vec::new());
                    job.then = Some(EngineCommand::AfterClickWin);
                    self.enqueue(job);
                }
            }
        }
    }

    fn remaining_mines(&mut self) -> Vec<Cell> {
        std::mem::take(&mut self.remaining)
    }

    fn set_animation_duration(&mut self, duration: Duration) {
        self.animation = duration;
    }

    fn set_channels(&mut self, sender: PacedSender) {
        if let Some(previous) = self.pacer.take() {
            previous.task.abort();
        }

        let (jobs, queue) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_pacer(self.session.clone(), sender, queue));
        lock(&self.session).set_paced(true);
        self.pacer = Some(Pacer { jobs, task });
    }

    fn status(&self) -> EngineStatus {
        let session = lock(&self.session);
        EngineStatus {
            width: session.width(),
            height: session.height(),
            max_mines: session.max_mines(),
            mines: session.planted(),
            marked: session.marked(),
            revealed: session.revealed(),
            state: session.state(),
        }
    }
}

impl Drop for LocalEngine {
    fn drop(&mut self) {
        if let Some(pacer) = self.pacer.take() {
            pacer.task.abort();
        }
    }
}

fn is_current(session: &SharedSession, epoch: u64) -> bool {
    lock(session).epoch() == epoch
}

async fn run_pacer(
    session: SharedSession,
    sender: PacedSender,
    mut jobs: mpsc::UnboundedReceiver<PaceJob>,
) {
    while let Some(job) = jobs.recv().await {
        let mut aborted = false;

        for cell in job.cells {
            if !is_current(&session, job.epoch) {
                aborted = true;
                break;
            }
            if sender.deliver(cell).await.is_err() {
                debug!("Renderer went away, stopping pacer");
                let mut session = lock(&session);
                session.set_paced(false);
                session.finish_loading(job.epoch);
                return;
            }
            if !job.delay.is_zero() {
                if !is_current(&session, job.epoch) {
                    aborted = true;
                    break;
                }
                time::sleep(job.delay).await;
            }
        }

        if aborted || !is_current(&session, job.epoch) {
            debug!("Dropping paced updates of round {}", job.epoch);
            continue;
        }

        if job.settles_flood {
            lock(&session).finish_loading(job.epoch);
        }

        if let Some(command) = job.then
            && sender.command(command).is_err()
        {
            lock(&session).set_paced(false);
            return;
        }
    }
}
