//! TCP transport to the remote debug console.
//!
//! Writes happen synchronously on the caller's thread. Reads run on a
//! dedicated thread that hands every chunk to a registered callback; a chunk
//! may hold part of a reply or several replies. There is no reconnection: a
//! read error or end of stream is delivered once as [`ReadEvent::Closed`] and
//! the read thread exits.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

use super::CollectError;
use super::protocol::Command;
use super::traits::CommandSink;

/// Size of the read buffer handed to each `read` call.
const READ_BUFFER_LEN: usize = 4096;

/// Event delivered by the read thread.
#[derive(Debug)]
pub enum ReadEvent {
    /// Raw bytes as returned by one read.
    Data(Vec<u8>),
    /// The connection failed or reached end of stream.
    Closed(CollectError),
}

/// A single outbound connection.
#[derive(Debug, Default)]
pub struct Transport {
    stream: Option<TcpStream>,
    /// Set when this side closes the connection, so the read thread does not
    /// report its own shutdown as a failure.
    closing: Arc<AtomicBool>,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects to `addr` and starts the read thread.
    ///
    /// Any previous connection is closed first. `on_event` is called on the
    /// read thread for every event; returning `false` stops the thread.
    pub fn connect<F>(
        &mut self,
        addr: &str,
        timeout: Duration,
        on_event: F,
    ) -> Result<(), CollectError>
    where
        F: FnMut(ReadEvent) -> bool + Send + 'static,
    {
        self.close();

        let connect_err = |source| CollectError::Connect {
            addr: addr.to_string(),
            source,
        };

        let mut last_err = None;
        let mut connected = None;
        for sock_addr in addr.to_socket_addrs().map_err(connect_err)? {
            match TcpStream::connect_timeout(&sock_addr, timeout) {
                Ok(stream) => {
                    connected = Some(stream);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let stream = match connected {
            Some(stream) => stream,
            None => {
                let source = last_err.unwrap_or_else(|| {
                    std::io::Error::new(ErrorKind::NotFound, "address resolved to nothing")
                });
                return Err(connect_err(source));
            }
        };
        stream.set_nodelay(true)?;

        let reader = stream.try_clone()?;
        let closing = Arc::new(AtomicBool::new(false));
        let closing_reader = closing.clone();
        thread::Builder::new()
            .name("actop-read".to_string())
            .spawn(move || read_loop(reader, closing_reader, on_event))?;

        debug!(addr, "transport connected");
        self.stream = Some(stream);
        self.closing = closing;
        Ok(())
    }

    /// Returns `true` while a connection is open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Closes the connection; the read thread exits without reporting.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.closing.store(true, Ordering::SeqCst);
            let _ = stream.shutdown(Shutdown::Both);
            debug!("transport closed");
        }
    }
}

impl CommandSink for Transport {
    fn send(&mut self, command: Command) -> Result<(), CollectError> {
        let stream = self.stream.as_mut().ok_or(CollectError::Disconnected)?;
        stream.write_all(command.wire().as_bytes())?;
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_loop<F>(mut stream: TcpStream, closing: Arc<AtomicBool>, mut on_event: F)
where
    F: FnMut(ReadEvent) -> bool,
{
    let mut buf = [0u8; READ_BUFFER_LEN];
    loop {
        let event = match stream.read(&mut buf) {
            Ok(0) => ReadEvent::Closed(CollectError::Disconnected),
            Ok(n) => {
                trace!(bytes = n, "socket read");
                ReadEvent::Data(buf[..n].to_vec())
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => ReadEvent::Closed(CollectError::Io(e)),
        };

        let closed = matches!(event, ReadEvent::Closed(_));
        if closed && closing.load(Ordering::SeqCst) {
            debug!("read loop finished after local close");
            return;
        }
        if !on_event(event) || closed {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use std::io::BufReader;
    use std::net::TcpListener;
    use std::sync::mpsc;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn connect_with_channel(addr: &str) -> (Transport, mpsc::Receiver<ReadEvent>) {
        let (tx, rx) = mpsc::channel();
        let mut transport = Transport::new();
        transport
            .connect(addr, TIMEOUT, move |event| tx.send(event).is_ok())
            .unwrap();
        (transport, rx)
    }

    #[test]
    fn test_send_and_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (mut transport, rx) = connect_with_channel(&addr);
        assert!(transport.is_connected());

        let (server, _) = listener.accept().unwrap();
        transport.send(Command::List).unwrap();

        let mut reader = BufReader::new(server.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "list\n");

        (&server).write_all(b"a1\tsnlua foo\n<CMD OK>").unwrap();
        let mut received = Vec::new();
        while received.len() < 21 {
            match rx.recv_timeout(TIMEOUT).unwrap() {
                ReadEvent::Data(bytes) => received.extend(bytes),
                ReadEvent::Closed(e) => panic!("unexpected close: {}", e),
            }
        }
        assert_eq!(received, b"a1\tsnlua foo\n<CMD OK>");
    }

    #[test]
    fn test_remote_close_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (_transport, rx) = connect_with_channel(&addr);
        let (server, _) = listener.accept().unwrap();
        drop(server);

        match rx.recv_timeout(TIMEOUT).unwrap() {
            ReadEvent::Closed(CollectError::Disconnected) | ReadEvent::Closed(CollectError::Io(_)) => {}
            other => panic!("expected close, got {:?}", other),
        }
    }

    #[test]
    fn test_local_close_is_silent() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (mut transport, rx) = connect_with_channel(&addr);
        let (_server, _) = listener.accept().unwrap();
        transport.close();
        assert!(!transport.is_connected());

        // The read thread exits and drops its sender without sending.
        assert!(matches!(
            rx.recv_timeout(TIMEOUT),
            Err(mpsc::RecvTimeoutError::Disconnected)
        ));
        assert!(matches!(
            transport.send(Command::Stat),
            Err(CollectError::Disconnected)
        ));
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut transport = Transport::new();
        let result = transport.connect(&addr, TIMEOUT, |_| true);
        assert!(matches!(result, Err(CollectError::Connect { .. })));
    }
}
