//! The duplex chat session over one established connection.
//!
//! The sender role runs on the caller's task and reads local input lines; the
//! receiver role runs on a spawned task and decodes frames from the peer. The
//! connection is split so each role owns exactly one direction of I/O. The
//! only state shared between them is the [`diversion`](crate::diversion)
//! used to answer an incoming file offer.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use tokio::{
    fs,
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
};
use tracing::{debug, info, warn};

use crate::{
    command::{HELP_TEXT, LocalCommand},
    diversion::{self, ACCEPT_TOKEN, Decision, InputDiverter, OfferPrompt},
    frame::{
        FileFrame, Frame, FrameError, FrameLimits, file_extension, read_frame, strip_quotes,
        write_frame,
    },
    sink::{Direction, Sink},
};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub limits: FrameLimits,
    /// Base directory for relative destination paths of received files.
    pub download_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            limits: FrameLimits::default(),
            download_dir: PathBuf::from("."),
        }
    }
}

/// What was known about the peer when the local side left.
#[derive(Debug)]
pub enum PeerState {
    /// The receiver was still waiting for frames.
    Connected,
    /// The peer sent the exit sentinel.
    Departed,
    /// The stream closed without the exit sentinel.
    Closed,
    /// The receiver stopped on a protocol or I/O error.
    Failed(FrameError),
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub peer: PeerState,
}

/// Runs one session until the local user leaves.
///
/// `input` supplies local lines; end of input counts as the exit command.
pub async fn run<S, I>(
    stream: S,
    input: &mut I,
    sink: Arc<dyn Sink>,
    config: SessionConfig,
) -> Result<SessionOutcome>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    I: AsyncBufRead + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let (diverter, prompt) = diversion::channel();

    sink.emit(Direction::SystemInfo, format!("connected. {HELP_TEXT}"));
    info!("session started");

    let receiver = tokio::spawn(receive_loop(
        BufReader::new(reader),
        prompt,
        Arc::clone(&sink),
        config.clone(),
    ));

    let sent = send_loop(&mut writer, input, &diverter, sink.as_ref(), &config).await;

    if !receiver.is_finished() {
        receiver.abort();
    }
    let peer = match receiver.await {
        Ok(state) => state,
        Err(err) if err.is_cancelled() => PeerState::Connected,
        Err(err) => return Err(err).context("receiver task panicked"),
    };
    info!(?peer, "session finished");

    sent?;
    Ok(SessionOutcome { peer })
}

async fn send_loop<W, I>(
    writer: &mut W,
    input: &mut I,
    diverter: &InputDiverter,
    sink: &dyn Sink,
    config: &SessionConfig,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    I: AsyncBufRead + Unpin,
{
    loop {
        let Some(line) = read_input_line(input).await? else {
            info!("local input closed; leaving session");
            leave(writer).await;
            return Ok(());
        };

        if diverter.is_active() {
            divert(diverter, line).await;
            continue;
        }

        match LocalCommand::parse(&line) {
            LocalCommand::Exit => {
                leave(writer).await;
                return Ok(());
            }
            LocalCommand::SendFile(Some(path)) => send_file(writer, &path, sink, config).await,
            LocalCommand::SendFile(None) => {
                sink.emit(
                    Direction::SystemInfo,
                    "enter the path of the file to send".to_string(),
                );
                let Some(path) = read_input_line(input).await? else {
                    leave(writer).await;
                    return Ok(());
                };
                // An offer may have arrived while we waited for the path.
                if diverter.is_active() {
                    sink.emit(Direction::SystemError, "file transfer cancelled".to_string());
                    divert(diverter, path).await;
                    continue;
                }
                send_file(writer, &path, sink, config).await;
            }
            LocalCommand::Help => sink.emit(Direction::SystemInfo, HELP_TEXT.to_string()),
            LocalCommand::Chat(text) => send_text(writer, text, sink).await,
            LocalCommand::Empty => {}
        }
    }
}

async fn read_input_line<I>(input: &mut I) -> Result<Option<String>>
where
    I: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes = input
        .read_line(&mut line)
        .await
        .context("failed to read local input")?;
    if bytes == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn divert(diverter: &InputDiverter, line: String) {
    if let Err(err) = diverter.forward(line).await {
        debug!(%err, "dropping input meant for a closed prompt");
    }
}

async fn leave<W>(writer: &mut W)
where
    W: AsyncWrite + Unpin,
{
    if let Err(error) = write_frame(writer, &Frame::Goodbye).await {
        warn!(?error, "failed to notify peer about exit");
    }
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown connection cleanly");
    }
}

async fn send_text<W>(writer: &mut W, text: String, sink: &dyn Sink)
where
    W: AsyncWrite + Unpin,
{
    match write_frame(writer, &Frame::Text(text.clone())).await {
        Ok(()) => {
            debug!(bytes = text.len(), "sent text frame");
            sink.emit(Direction::Sent, text);
        }
        Err(FrameError::Io(error)) => {
            warn!(?error, "failed to send text frame");
            sink.emit(Direction::SendFailed, text);
        }
        Err(error) => sink.emit(Direction::SendFailed, format!("message not sent: {error}")),
    }
}

async fn send_file<W>(writer: &mut W, raw_path: &str, sink: &dyn Sink, config: &SessionConfig)
where
    W: AsyncWrite + Unpin,
{
    let path = strip_quotes(raw_path);
    let payload = match load_file(&path, config.limits.max_file_size).await {
        Ok(payload) => payload,
        Err(err) => {
            sink.emit(Direction::SystemError, format!("{err:#}"));
            return;
        }
    };

    let size = payload.len();
    let frame = Frame::file(file_extension(&path), payload);
    match write_frame(writer, &frame).await {
        Ok(()) => {
            debug!(%path, size, "sent file frame");
            sink.emit(Direction::Sent, format!("file {path} sent ({size} bytes)"));
        }
        Err(error) => {
            warn!(%path, ?error, "failed to send file frame");
            sink.emit(Direction::SendFailed, format!("file {path}: {error}"));
        }
    }
}

async fn load_file(path: &str, max_size: u64) -> Result<Vec<u8>> {
    let metadata = fs::metadata(path)
        .await
        .with_context(|| format!("cannot find file {path}"))?;
    if !metadata.is_file() {
        anyhow::bail!("{path} is not a regular file");
    }
    if metadata.len() > max_size {
        anyhow::bail!(
            "{path} is {} bytes, larger than the {max_size} byte limit",
            metadata.len()
        );
    }
    fs::read(path)
        .await
        .with_context(|| format!("cannot read file {path}"))
}

async fn receive_loop<R>(
    mut reader: R,
    mut prompt: OfferPrompt,
    sink: Arc<dyn Sink>,
    config: SessionConfig,
) -> PeerState
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_frame(&mut reader, &config.limits).await {
            Ok(Some(Frame::Text(body))) => {
                debug!(bytes = body.len(), "received text frame");
                sink.emit(Direction::Received, body);
            }
            Ok(Some(Frame::File(file))) => {
                debug!(size = file.payload.len(), extension = %file.extension, "received file frame");
                receive_file(file, &mut prompt, sink.as_ref(), &config).await;
            }
            Ok(Some(Frame::Goodbye)) => {
                info!("peer left the session");
                sink.emit(
                    Direction::SystemInfo,
                    "peer disconnected. type !exit to leave".to_string(),
                );
                return PeerState::Departed;
            }
            Ok(None) => {
                info!("peer closed the connection");
                sink.emit(
                    Direction::SystemError,
                    "connection closed by peer. type !exit to leave".to_string(),
                );
                return PeerState::Closed;
            }
            Err(error) => {
                warn!(?error, "stopping receiver");
                sink.emit(Direction::SystemError, format!("protocol error: {error}"));
                return PeerState::Failed(error);
            }
        }
    }
}

async fn receive_file(
    file: FileFrame,
    prompt: &mut OfferPrompt,
    sink: &dyn Sink,
    config: &SessionConfig,
) {
    let FileFrame { extension, payload } = file;
    let described = if extension.is_empty() {
        format!("{} bytes", payload.len())
    } else {
        format!("{} bytes, {extension}", payload.len())
    };
    // Input is diverted before the offer is announced.
    let answer_stage = prompt.begin();
    sink.emit(
        Direction::SystemInfo,
        format!("received a file ({described}). type {ACCEPT_TOKEN} to save it"),
    );

    let path_stage = match answer_stage.answer().await {
        Ok(Decision::Accepted(path_stage)) => path_stage,
        Ok(Decision::Rejected { .. }) => {
            sink.emit(Direction::SystemError, "file rejected".to_string());
            return;
        }
        Err(err) => {
            debug!(%err, "file offer abandoned");
            return;
        }
    };

    sink.emit(
        Direction::SystemInfo,
        "enter the path to save the file to".to_string(),
    );
    let raw = match path_stage.destination().await {
        Ok(raw) => raw,
        Err(err) => {
            debug!(%err, "file offer abandoned");
            return;
        }
    };

    let Some(destination) = destination_path(&raw, &extension, &config.download_dir) else {
        sink.emit(
            Direction::SystemError,
            "no destination given; file discarded".to_string(),
        );
        return;
    };
    match fs::write(&destination, &payload).await {
        Ok(()) => {
            info!(path = %destination.display(), size = payload.len(), "saved received file");
            sink.emit(
                Direction::SystemInfo,
                format!("file saved to {}", destination.display()),
            );
        }
        Err(error) => {
            warn!(path = %destination.display(), ?error, "failed to save received file");
            sink.emit(
                Direction::SystemError,
                format!("failed to save {}: {error}", destination.display()),
            );
        }
    }
}

/// Builds the save location for a received file.
///
/// Quotes are removed and the sender's extension is forced onto the name,
/// whatever extension the user typed. Relative paths land in `download_dir`.
pub fn destination_path(raw: &str, extension: &str, download_dir: &Path) -> Option<PathBuf> {
    let cleaned = strip_quotes(raw);
    let stem = cleaned.strip_suffix(extension).unwrap_or(&cleaned);
    if stem.is_empty() {
        return None;
    }
    let path = PathBuf::from(format!("{stem}{extension}"));
    if path.is_absolute() {
        Some(path)
    } else {
        Some(download_dir.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Report;
    use tokio::sync::mpsc;

    #[test]
    fn destination_forces_received_extension() {
        let dir = Path::new("/downloads");
        assert_eq!(
            destination_path("out", ".txt", dir),
            Some(PathBuf::from("/downloads/out.txt"))
        );
        assert_eq!(
            destination_path("\"out.txt\"", ".txt", dir),
            Some(PathBuf::from("/downloads/out.txt"))
        );
        assert_eq!(
            destination_path("out.png", ".txt", dir),
            Some(PathBuf::from("/downloads/out.png.txt"))
        );
        assert_eq!(
            destination_path("/tmp/report", ".pdf", dir),
            Some(PathBuf::from("/tmp/report.pdf"))
        );
        assert_eq!(
            destination_path("notes", "", dir),
            Some(PathBuf::from("/downloads/notes"))
        );
        assert_eq!(destination_path(" \"\" ", ".txt", dir), None);
    }

    #[tokio::test]
    async fn sentinel_from_peer_is_never_shown_as_text() {
        let (mut peer, local) = tokio::io::duplex(1024);
        let (tx, mut rx) = mpsc::unbounded_channel::<Report>();
        let (_diverter, prompt) = diversion::channel();

        write_frame(&mut peer, &Frame::text("before")).await.unwrap();
        write_frame(&mut peer, &Frame::Goodbye).await.unwrap();

        let state = receive_loop(
            BufReader::new(local),
            prompt,
            Arc::new(tx),
            SessionConfig::default(),
        )
        .await;

        assert!(matches!(state, PeerState::Departed));
        let mut reports = Vec::new();
        while let Ok(report) = rx.try_recv() {
            reports.push(report);
        }
        assert_eq!(reports[0].direction, Direction::Received);
        assert_eq!(reports[0].message, "before");
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].direction, Direction::SystemInfo);
        assert!(reports.iter().all(|r| !r.message.contains("SENDEREXIT")));
    }

    #[tokio::test]
    async fn unknown_tag_stops_receiver_with_error() {
        let (mut peer, local) = tokio::io::duplex(1024);
        let (tx, mut rx) = mpsc::unbounded_channel::<Report>();
        let (_diverter, prompt) = diversion::channel();

        peer.write_all(b"zgarbage").await.unwrap();

        let state = receive_loop(
            BufReader::new(local),
            prompt,
            Arc::new(tx),
            SessionConfig::default(),
        )
        .await;

        assert!(matches!(state, PeerState::Failed(FrameError::UnknownTag(b'z'))));
        let report = rx.try_recv().unwrap();
        assert_eq!(report.direction, Direction::SystemError);
        assert!(report.message.starts_with("protocol error"));
    }

    #[tokio::test]
    async fn missing_file_is_reported_locally_without_a_frame() {
        let (mut local, mut peer) = tokio::io::duplex(1024);
        let (tx, mut rx) = mpsc::unbounded_channel::<Report>();

        send_file(
            &mut local,
            "\"/definitely/not/here.bin\"",
            &tx,
            &SessionConfig::default(),
        )
        .await;
        drop(local);

        let report = rx.try_recv().unwrap();
        assert_eq!(report.direction, Direction::SystemError);
        assert!(report.message.contains("/definitely/not/here.bin"));

        let mut reader = BufReader::new(&mut peer);
        let next = read_frame(&mut reader, &FrameLimits::default()).await.unwrap();
        assert_eq!(next, None);
    }
}
