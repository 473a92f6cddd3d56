use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use p2p_chat::{
    cli::Cli,
    session,
    sink::{Direction, Sink, TerminalSink},
    transport::{Establisher, LISTEN_TOKEN, Target},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    // Chat lines own stdout; diagnostics go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let (terminal, printer) = TerminalSink::spawn(!cli.no_color);
    let sink: Arc<dyn Sink> = Arc::new(terminal);

    let establisher = Establisher::new(cli.establisher_config());
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut preset = cli.peer.clone();

    // Every failed attempt starts over at the address prompt; a finished
    // session ends the program.
    loop {
        let token = match preset.take() {
            Some(token) => token,
            None => match prompt_for_target(&mut stdin, sink.as_ref()).await? {
                Some(token) => token,
                None => break,
            },
        };

        let target = match Target::parse(&token) {
            Ok(target) => target,
            Err(err) => {
                sink.emit(Direction::SystemError, err.to_string());
                continue;
            }
        };

        let announce = Arc::clone(&sink);
        let connected = establisher
            .establish_with(&target, move |addr| {
                announce.emit(
                    Direction::SystemInfo,
                    format!("waiting for a peer to connect on {addr}"),
                );
            })
            .await;
        let stream = match connected {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = ?err, "connection attempt failed");
                sink.emit(Direction::SystemError, err.to_string());
                continue;
            }
        };

        let outcome =
            session::run(stream, &mut stdin, Arc::clone(&sink), cli.session_config()).await?;
        info!(peer = ?outcome.peer, "chat finished");
        break;
    }

    drop(sink);
    let _ = printer.await;
    Ok(())
}

async fn prompt_for_target<I>(input: &mut I, sink: &dyn Sink) -> Result<Option<String>>
where
    I: AsyncBufRead + Unpin,
{
    sink.emit(
        Direction::SystemInfo,
        format!("enter the peer's IP address or host name, or {LISTEN_TOKEN} to wait for a connection"),
    );
    let mut line = String::new();
    if input.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}
