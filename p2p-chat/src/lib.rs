//! Peer-to-peer chat and file transfer over a single TCP connection.
//!
//! There is no server: one side listens, the other dials, and both end up in
//! the same duplex session. Each module focuses on one responsibility:
//!
//! - [`transport`] turns an address token into one connected stream, falling
//!   back from dialing to listening when the peer is not up yet.
//! - [`frame`] is the wire codec for text and file frames plus the exit
//!   sentinel.
//! - [`session`] runs the sender and receiver roles over the connection.
//! - [`diversion`] routes local input to a pending file-offer prompt.
//! - [`command`] interprets lines typed by the local user.
//! - [`sink`] renders timestamped report lines on the terminal.
//! - [`cli`] parses the command-line interface.

pub mod cli;
pub mod command;
pub mod diversion;
pub mod frame;
pub mod session;
pub mod sink;
pub mod transport;
