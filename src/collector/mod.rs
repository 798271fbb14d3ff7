//! Sampling client for a remote actor runtime's debug console.
//!
//! Layers, bottom up:
//! - `transport` - one TCP connection with a dedicated read thread
//! - `frame` - splits the byte stream into complete replies
//! - `parser` - turns reply bodies into labels, samples and values
//! - `session` - protocol state machine driving `list`/`stat`/`mem`/`cmem`
//! - `actor` - single-owner thread that owns the session and serves
//!   start/stop/report requests over a channel

mod actor;
mod frame;
pub mod parser;
mod protocol;
mod session;
mod traits;
mod transport;

pub use actor::{SamplerConfig, SessionHandle, spawn_session};
pub use frame::FrameDecoder;
pub use protocol::{Command, REPLY_ERROR, REPLY_OK};
pub use session::Session;
pub use traits::CommandSink;
pub use transport::{ReadEvent, Transport};

use std::io;

/// Error type for sampling failures.
///
/// Every variant is fatal for the session: the protocol cannot be resumed
/// once the outstanding command is ambiguous.
#[derive(Debug)]
pub enum CollectError {
    /// Could not connect to the remote console.
    Connect { addr: String, source: io::Error },
    /// Read or write on the connection failed.
    Io(io::Error),
    /// The remote side closed the connection.
    Disconnected,
    /// The remote side sent an error frame; carries the buffered prefix.
    Remote(String),
    /// A reply arrived that does not fit the command sequence.
    Protocol(String),
    /// A reply record has an unexpected shape.
    Malformed { command: Command, line: String },
    /// The session thread is gone.
    SessionClosed,
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::Connect { addr, source } => {
                write!(f, "connect {} failed: {}", addr, source)
            }
            CollectError::Io(e) => write!(f, "socket error: {}", e),
            CollectError::Disconnected => write!(f, "socket read EOF"),
            CollectError::Remote(prefix) => write!(f, "remote command error: {}", prefix),
            CollectError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            CollectError::Malformed { command, line } => {
                write!(f, "malformed {} reply line: {:?}", command, line)
            }
            CollectError::SessionClosed => write!(f, "sampling session is closed"),
        }
    }
}

impl std::error::Error for CollectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectError::Connect { source, .. } => Some(source),
            CollectError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CollectError {
    fn from(e: io::Error) -> Self {
        CollectError::Io(e)
    }
}
