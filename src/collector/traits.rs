//! Abstraction for the outbound side of the connection.
//!
//! The `CommandSink` trait lets the session state machine run against the
//! real [`Transport`](super::Transport) or against an in-memory recorder in
//! tests.

use super::CollectError;
use super::protocol::Command;

/// Destination for outbound console commands.
pub trait CommandSink {
    /// Writes one command to the remote console.
    ///
    /// # Returns
    /// An error if the write failed; the session treats it as fatal.
    fn send(&mut self, command: Command) -> Result<(), CollectError>;
}

/// Records sent commands in order.
#[cfg(test)]
impl CommandSink for Vec<Command> {
    fn send(&mut self, command: Command) -> Result<(), CollectError> {
        self.push(command);
        Ok(())
    }
}
