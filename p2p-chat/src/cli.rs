use std::{
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
};

use clap::Parser;

use crate::{
    frame::{DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_TEXT_LEN, FrameLimits},
    session::SessionConfig,
    transport::{DEFAULT_PORT, EstablisherConfig},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Peer to connect to: a host name or IP address, or `s` to wait for the
    /// peer to connect. Prompted for interactively when omitted.
    #[arg(long)]
    pub peer: Option<String>,

    /// TCP port used both to listen and to dial.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Local address to listen on.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Largest file, in bytes, that will be sent or accepted.
    #[arg(long, default_value_t = DEFAULT_MAX_FILE_SIZE)]
    pub max_file_size: u64,

    /// Longest chat line, in bytes, accepted from the peer.
    #[arg(long, default_value_t = DEFAULT_MAX_TEXT_LEN)]
    pub max_text_len: u64,

    /// Directory that relative save paths of received files resolve against.
    #[arg(long, default_value = ".")]
    pub download_dir: PathBuf,

    /// Print report lines without ANSI colors.
    #[arg(long)]
    pub no_color: bool,
}

impl Cli {
    pub fn establisher_config(&self) -> EstablisherConfig {
        EstablisherConfig {
            port: self.port,
            bind: self.bind,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            limits: FrameLimits {
                max_file_size: self.max_file_size,
                max_text_len: self.max_text_len,
            },
            download_dir: self.download_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol() {
        let cli = Cli::parse_from(["p2p-chat"]);
        assert_eq!(cli.peer, None);
        assert_eq!(cli.port, 65329);
        assert_eq!(cli.establisher_config().bind, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(cli.session_config().limits.max_file_size, DEFAULT_MAX_FILE_SIZE);
        assert_eq!(cli.session_config().limits.max_text_len, DEFAULT_MAX_TEXT_LEN);
        assert!(!cli.no_color);
    }

    #[test]
    fn overrides_flow_into_configs() {
        let cli = Cli::parse_from([
            "p2p-chat",
            "--peer",
            "s",
            "--port",
            "7000",
            "--bind",
            "127.0.0.1",
            "--max-file-size",
            "10",
            "--max-text-len",
            "80",
            "--download-dir",
            "/tmp/in",
            "--no-color",
        ]);
        assert_eq!(cli.peer.as_deref(), Some("s"));
        assert_eq!(cli.establisher_config().port, 7000);
        assert_eq!(cli.establisher_config().bind, IpAddr::V4(Ipv4Addr::LOCALHOST));
        let session = cli.session_config();
        assert_eq!(session.limits.max_file_size, 10);
        assert_eq!(session.limits.max_text_len, 80);
        assert_eq!(session.download_dir, PathBuf::from("/tmp/in"));
        assert!(cli.no_color);
    }
}
