//! Terminal rendering of chat and status lines.
//!
//! Reports are pushed onto an unbounded channel and printed by a background
//! task, so emitting never waits on the terminal.

use chrono::Local;
use crossterm::style::Stylize;
use tokio::{
    io::{self, AsyncWriteExt},
    sync::mpsc,
    task::JoinHandle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
    SendFailed,
    SystemInfo,
    SystemError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub direction: Direction,
    pub message: String,
}

/// Consumer of user-facing reports. Implementations must not block.
pub trait Sink: Send + Sync {
    fn emit(&self, direction: Direction, message: String);
}

impl Sink for mpsc::UnboundedSender<Report> {
    fn emit(&self, direction: Direction, message: String) {
        let _ = self.send(Report { direction, message });
    }
}

pub struct TerminalSink {
    tx: mpsc::UnboundedSender<Report>,
}

impl TerminalSink {
    /// Spawns the printer task. It exits once every sender is dropped.
    pub fn spawn(color: bool) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Report>();
        let printer = tokio::spawn(async move {
            let mut stdout = io::stdout();
            while let Some(report) = rx.recv().await {
                let line = render(&report, &Local::now().format("%H:%M:%S").to_string(), color);
                if stdout.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                let _ = stdout.flush().await;
            }
        });
        (Self { tx }, printer)
    }
}

impl Sink for TerminalSink {
    fn emit(&self, direction: Direction, message: String) {
        self.tx.emit(direction, message);
    }
}

fn marker(direction: Direction) -> &'static str {
    match direction {
        Direction::Sent => "<<",
        Direction::Received => ">>",
        Direction::SendFailed => "X<",
        Direction::SystemInfo | Direction::SystemError => "**",
    }
}

/// Formats one report as a newline-terminated terminal line.
pub fn render(report: &Report, timestamp: &str, color: bool) -> String {
    let plain = format!("{} [{timestamp}] {}", marker(report.direction), report.message);
    if !color {
        return plain + "\n";
    }
    let styled = match report.direction {
        Direction::Sent | Direction::Received => plain,
        Direction::SendFailed | Direction::SystemError => plain.red().to_string(),
        Direction::SystemInfo => plain.blue().to_string(),
    };
    styled + "\n"
}
