//! Debug console wire protocol: commands and reply markers.
//!
//! Commands are single ASCII words terminated by `\n`. Every reply body is
//! terminated by [`REPLY_OK`]; [`REPLY_ERROR`] anywhere in the stream is a
//! fatal error frame. The protocol carries no request ids, so at most one
//! command may be outstanding at a time and each reply belongs to the last
//! command sent.

use std::fmt;

/// Marker terminating a successful reply.
pub const REPLY_OK: &[u8] = b"<CMD OK>";

/// Marker reported by the remote side when a command failed.
pub const REPLY_ERROR: &[u8] = b"<CMD Error>";

/// Field separator within a reply record.
pub const FIELD_SEPARATOR: char = '\t';

/// Keyword reported instead of a value when an actor did not answer in time.
pub const TIMEOUT_KEYWORD: &str = "TIMEOUT";

/// Keyword reported instead of a value when querying an actor failed.
pub const ERROR_KEYWORD: &str = "ERROR";

/// Commands understood by the remote debug console.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    /// Directory of actors with their labels.
    List,
    /// Per-actor cpu time, message count and queue length.
    Stat,
    /// Per-actor managed memory.
    Mem,
    /// Per-actor native memory.
    CMem,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::List => "list",
            Command::Stat => "stat",
            Command::Mem => "mem",
            Command::CMem => "cmem",
        }
    }

    /// Bytes put on the wire for this command.
    pub fn wire(self) -> String {
        format!("{}\n", self.as_str())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
