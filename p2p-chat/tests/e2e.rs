use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin("p2p-chat");
    let port = std::net::TcpListener::bind("127.0.0.1:0")?
        .local_addr()?
        .port()
        .to_string();

    // Alice waits for a connection; Bob dials once Alice is listening.
    let mut alice = spawn_peer(&binary, "s", &port).await?;
    alice
        .read_until_contains("waiting for a peer to connect")
        .await?;
    let mut bob = spawn_peer(&binary, "127.0.0.1", &port).await?;

    alice.read_until_contains("connected.").await?;
    bob.read_until_contains("connected.").await?;

    bob.send_line("Hello from Bob").await?;
    let echo = bob.read_until_contains("Hello from Bob").await?;
    assert!(echo.starts_with("<< ["), "unexpected sent line: {echo}");
    let heard = alice.read_until_contains("Hello from Bob").await?;
    assert!(heard.starts_with(">> ["), "unexpected received line: {heard}");

    alice.send_line("Hi Bob!").await?;
    let heard = bob.read_until_contains("Hi Bob!").await?;
    assert!(heard.starts_with(">> ["));

    // Bob leaves; Alice is told but stays in the chat until she leaves too.
    bob.send_line("!exit").await?;
    ensure_success(&mut bob.child, "bob").await?;
    alice.read_until_contains("peer disconnected").await?;

    alice.send_line("!exit").await?;
    ensure_success(&mut alice.child, "alice").await?;

    Ok(())
}

struct PeerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl PeerProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn read_until_contains(&mut self, needle: &str) -> Result<String> {
        loop {
            let mut line = String::new();
            let bytes = timeout(READ_TIMEOUT, self.stdout.read_line(&mut line))
                .await
                .map_err(|_| anyhow!("timed out waiting for '{needle}'"))??;
            if bytes == 0 {
                return Err(anyhow!("stdout closed waiting for '{needle}'"));
            }
            if line.contains(needle) {
                return Ok(line.trim_end_matches(['\r', '\n']).to_string());
            }
        }
    }
}

async fn spawn_peer(binary: &Path, peer: &str, port: &str) -> Result<PeerProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("--peer")
        .arg(peer)
        .arg("--port")
        .arg(port)
        .arg("--bind")
        .arg("127.0.0.1")
        .arg("--no-color")
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn peer {peer}"))?;
    let stdin = child.stdin.take().context("stdin missing after spawn")?;
    let stdout = child.stdout.take().context("stdout missing after spawn")?;

    Ok(PeerProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    })
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = timeout(READ_TIMEOUT, child.wait())
        .await
        .map_err(|_| anyhow!("{name} did not exit"))?
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
