//! Routing of local input lines to a pending file-offer prompt.
//!
//! The receiver role owns an [`OfferPrompt`] and is the only writer of the
//! prompt stage. The sender role owns an [`InputDiverter`] and only reads the
//! stage: while it is not [`Stage::Idle`], every input line is handed to the
//! prompt instead of being interpreted as a command or chat text.
//!
//! The prompt is a two-step sub-protocol driven by consuming handles:
//!
//! ```text
//! Idle --begin--> AwaitingAnswer --accepted--> AwaitingPath --path--> Idle
//!                              \--rejected------------------------> Idle
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};

use tokio::sync::{mpsc, oneshot};

/// The only answer treated as accepting an offered file.
pub const ACCEPT_TOKEN: &str = "y";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Stage {
    Idle = 0,
    AwaitingAnswer = 1,
    AwaitingPath = 2,
}

impl Stage {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Stage::AwaitingAnswer,
            2 => Stage::AwaitingPath,
            _ => Stage::Idle,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("file offer prompt is no longer listening")]
pub struct DiversionClosed;

struct Forwarded {
    line: String,
    consumed: oneshot::Sender<()>,
}

#[derive(Default)]
struct StageCell(AtomicU8);

impl StageCell {
    fn load(&self) -> Stage {
        Stage::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, stage: Stage) {
        self.0.store(stage as u8, Ordering::Release);
    }
}

/// Creates the two ends of the diversion for one session.
pub fn channel() -> (InputDiverter, OfferPrompt) {
    let stage = Arc::new(StageCell::default());
    // Capacity one plus the `consumed` acknowledgement gives rendezvous
    // semantics: `forward` returns only after the prompt took the line.
    let (tx, rx) = mpsc::channel(1);
    (
        InputDiverter {
            stage: Arc::clone(&stage),
            tx,
        },
        OfferPrompt { stage, rx },
    )
}

/// Sender-side handle.
#[derive(Clone)]
pub struct InputDiverter {
    stage: Arc<StageCell>,
    tx: mpsc::Sender<Forwarded>,
}

impl InputDiverter {
    pub fn stage(&self) -> Stage {
        self.stage.load()
    }

    pub fn is_active(&self) -> bool {
        self.stage() != Stage::Idle
    }

    /// Hands `line` to the open prompt and waits until the prompt has consumed
    /// it and moved to its next stage.
    pub async fn forward(&self, line: String) -> Result<(), DiversionClosed> {
        let (consumed, done) = oneshot::channel();
        self.tx
            .send(Forwarded { line, consumed })
            .await
            .map_err(|_| DiversionClosed)?;
        done.await.map_err(|_| DiversionClosed)
    }
}

/// Receiver-side handle.
pub struct OfferPrompt {
    stage: Arc<StageCell>,
    rx: mpsc::Receiver<Forwarded>,
}

impl OfferPrompt {
    pub fn stage(&self) -> Stage {
        self.stage.load()
    }

    /// Opens the prompt. From here on every input line is diverted until the
    /// returned handle (or its successor) finishes or is dropped.
    pub fn begin(&mut self) -> AnswerStage<'_> {
        self.stage.store(Stage::AwaitingAnswer);
        AnswerStage {
            guard: StageGuard { prompt: self },
        }
    }

    // The next stage is stored before the sender is released, so the sender's
    // following line is already judged against it.
    async fn next_line(
        &mut self,
        next: impl FnOnce(&str) -> Stage,
    ) -> Result<String, DiversionClosed> {
        let forwarded = self.rx.recv().await.ok_or(DiversionClosed)?;
        self.stage.store(next(&forwarded.line));
        let _ = forwarded.consumed.send(());
        Ok(forwarded.line)
    }
}

// Resets the stage to idle if a prompt handle is dropped mid-protocol.
struct StageGuard<'a> {
    prompt: &'a mut OfferPrompt,
}

impl Drop for StageGuard<'_> {
    fn drop(&mut self) {
        self.prompt.stage.store(Stage::Idle);
    }
}

pub struct AnswerStage<'a> {
    guard: StageGuard<'a>,
}

pub enum Decision<'a> {
    Accepted(PathStage<'a>),
    Rejected { answer: String },
}

fn is_accept(line: &str) -> bool {
    line.trim_end_matches(['\r', '\n']) == ACCEPT_TOKEN
}

impl<'a> AnswerStage<'a> {
    /// Waits for the accept/reject answer.
    pub async fn answer(self) -> Result<Decision<'a>, DiversionClosed> {
        let line = self
            .guard
            .prompt
            .next_line(|line| {
                if is_accept(line) {
                    Stage::AwaitingPath
                } else {
                    Stage::Idle
                }
            })
            .await?;
        if is_accept(&line) {
            Ok(Decision::Accepted(PathStage { guard: self.guard }))
        } else {
            Ok(Decision::Rejected { answer: line })
        }
    }
}

pub struct PathStage<'a> {
    guard: StageGuard<'a>,
}

impl PathStage<'_> {
    /// Waits for the destination path. The prompt is idle again afterwards.
    pub async fn destination(self) -> Result<String, DiversionClosed> {
        self.guard.prompt.next_line(|_| Stage::Idle).await
    }
}
