//! Single-owner session thread.
//!
//! One thread owns the [`Session`] and its [`Transport`]. Socket data, start,
//! stop and report requests all arrive as messages on one channel and are
//! handled strictly one at a time, so the sample store needs no locking.
//! The pause between rounds is a deadline on that channel rather than a
//! sleep, which keeps start/stop/report responsive while waiting.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::CollectError;
use super::session::Session;
use super::transport::{ReadEvent, Transport};
use crate::report::Report;

/// Connection and pacing settings of a sampling session.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Debug console address, `host:port`.
    pub remote: String,
    pub dial_timeout: Duration,
    /// Pause between the end of one round and the next `stat`.
    pub interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            remote: "127.0.0.1:8031".to_string(),
            dial_timeout: Duration::from_secs(5),
            interval: Duration::from_secs(1),
        }
    }
}

enum SessionEvent {
    Received(Vec<u8>),
    Closed(CollectError),
    Start(Sender<bool>),
    StopAndReport {
        top: usize,
        reply: Sender<Option<Report>>,
    },
    Report { top: usize, reply: Sender<Report> },
    Shutdown,
}

/// Cloneable handle to the session thread.
#[derive(Clone)]
pub struct SessionHandle {
    tx: Sender<SessionEvent>,
}

impl SessionHandle {
    /// Starts sampling. Returns `false` if already running.
    pub fn start(&self) -> Result<bool, CollectError> {
        self.request(SessionEvent::Start)
    }

    /// Stops sampling and builds the report of the stopped run in the same
    /// step, so a concurrent start cannot reset the data in between.
    ///
    /// Returns `None` if not running.
    pub fn stop_and_report(&self, top: usize) -> Result<Option<Report>, CollectError> {
        self.request(|reply| SessionEvent::StopAndReport { top, reply })
    }

    /// Builds a report of the current run with `top` actors per metric.
    pub fn report(&self, top: usize) -> Result<Report, CollectError> {
        self.request(|reply| SessionEvent::Report { top, reply })
    }

    /// Asks the session thread to exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(SessionEvent::Shutdown);
    }

    fn request<T>(&self, event: impl FnOnce(Sender<T>) -> SessionEvent) -> Result<T, CollectError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(event(reply_tx))
            .map_err(|_| CollectError::SessionClosed)?;
        reply_rx.recv().map_err(|_| CollectError::SessionClosed)
    }
}

/// Connects to the console, sends `list` and spawns the session thread.
///
/// The join handle yields the fatal error that ended the session, or `Ok`
/// after [`SessionHandle::shutdown`].
pub fn spawn_session(
    config: SamplerConfig,
) -> Result<(SessionHandle, JoinHandle<Result<(), CollectError>>), CollectError> {
    let (tx, rx) = mpsc::channel();

    let mut transport = Transport::new();
    let reader_tx = tx.clone();
    transport.connect(&config.remote, config.dial_timeout, move |event| {
        let event = match event {
            ReadEvent::Data(bytes) => SessionEvent::Received(bytes),
            ReadEvent::Closed(e) => SessionEvent::Closed(e),
        };
        reader_tx.send(event).is_ok()
    })?;
    info!(remote = %config.remote, "connected to debug console");

    let mut session = Session::new();
    session.bootstrap(&mut transport)?;

    let interval = config.interval;
    let join = thread::Builder::new()
        .name("actop-session".to_string())
        .spawn(move || run(session, transport, rx, interval))?;

    Ok((SessionHandle { tx }, join))
}

fn run(
    mut session: Session,
    mut transport: Transport,
    rx: Receiver<SessionEvent>,
    interval: Duration,
) -> Result<(), CollectError> {
    let mut next_round: Option<Instant> = None;

    loop {
        let event = match next_round {
            Some(at) => match rx.recv_timeout(at.saturating_duration_since(Instant::now())) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => {
                    next_round = None;
                    session.begin_round(&mut transport)?;
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            },
            None => match rx.recv() {
                Ok(event) => event,
                Err(_) => return Ok(()),
            },
        };

        match event {
            SessionEvent::Received(bytes) => {
                if session.on_bytes(&bytes, &mut transport)? {
                    debug!(?interval, "next round scheduled");
                    next_round = Some(Instant::now() + interval);
                }
            }
            SessionEvent::Closed(e) => return Err(e),
            SessionEvent::Start(reply) => {
                let started = session.start(&mut transport)?;
                if started {
                    next_round = None;
                }
                let _ = reply.send(started);
            }
            SessionEvent::StopAndReport { top, reply } => {
                let report = session.stop().then(|| Report::build(&session, top));
                if report.is_some() {
                    next_round = None;
                }
                let _ = reply.send(report);
            }
            SessionEvent::Report { top, reply } => {
                let _ = reply.send(Report::build(&session, top));
            }
            SessionEvent::Shutdown => {
                info!("session shut down");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Metric, Value};
    use std::io::{BufRead, BufReader, Write};
    use std::net::{TcpListener, TcpStream};

    const LIST_REPLY: &str = ":01\tsnlua bootstrap\n:02\tsnlua gate\n<CMD OK>\n";

    /// Minimal debug console: answers each command line with a canned reply.
    ///
    /// After `rounds` complete rounds the next `stat` is left unanswered and
    /// reported on `parked`; the console then waits for the client to hang up.
    fn fake_console(
        listener: TcpListener,
        rounds: usize,
        parked: mpsc::Sender<()>,
    ) -> thread::JoinHandle<Vec<String>> {
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            let mut seen = Vec::new();
            let mut stats = 0;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                let command = line.trim_end().to_string();
                seen.push(command.clone());
                let reply = match command.as_str() {
                    "list" => LIST_REPLY.to_string(),
                    "stat" if stats == rounds => {
                        let _ = parked.send(());
                        continue;
                    }
                    "stat" => {
                        stats += 1;
                        format!(
                            ":01\tcpu:0.{}\tmessage:{}\tmqlen:0\ttask:0\n:02\tTIMEOUT\n<CMD OK>\n",
                            stats,
                            stats * 10
                        )
                    }
                    "mem" => ":01\t64.4 Kb (snlua bootstrap)\n:02\tTIMEOUT\n<CMD OK>\n".to_string(),
                    "cmem" => ":01\t2048\n:02\t4096\ntotal\t6144\n<CMD OK>\n".to_string(),
                    other => format!("Invalid command {}\n<CMD Error>\n", other),
                };
                // Split replies to exercise reassembly.
                let (head, tail) = reply.as_bytes().split_at(reply.len() / 2);
                writer.write_all(head).unwrap();
                writer.flush().unwrap();
                writer.write_all(tail).unwrap();
            }
            seen
        })
    }

    fn config(listener: &TcpListener) -> SamplerConfig {
        SamplerConfig {
            remote: listener.local_addr().unwrap().to_string(),
            dial_timeout: Duration::from_secs(5),
            interval: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_session_samples_rounds_until_stopped() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let cfg = config(&listener);
        let (parked_tx, parked_rx) = mpsc::channel();
        let console = fake_console(listener, 3, parked_tx);

        let (handle, join) = spawn_session(cfg).unwrap();
        assert!(handle.start().unwrap());
        assert!(!handle.start().unwrap());

        // The fourth stat only goes out once the third round is complete.
        parked_rx.recv_timeout(Duration::from_secs(10)).unwrap();

        let stopped = handle.stop_and_report(10).unwrap().unwrap();
        assert_eq!(stopped.rounds.len(), 4);
        assert!(handle.stop_and_report(10).unwrap().is_none());

        let report = handle.report(1).unwrap();
        assert_eq!(report.rounds, stopped.rounds);
        let cpu = report.chart(Metric::Cpu).unwrap();
        assert_eq!(cpu.series.len(), 1);
        assert_eq!(cpu.series[0].name, ":02<timeout>");
        let msg = report.chart(Metric::MsgNum).unwrap();
        assert_eq!(msg.series[0].values, vec![Some(Value::Timeout); 3]);
        let cmem = report.chart(Metric::CMem).unwrap();
        assert_eq!(cmem.series[0].actor, ":02");
        assert_eq!(cmem.series[0].values, vec![Some(Value::Measured(4)); 3]);

        let report = handle.report(10).unwrap();
        let lua = report.chart(Metric::LuaMem).unwrap();
        let a1 = lua.series.iter().find(|s| s.actor == ":01").unwrap();
        assert_eq!(a1.values, vec![Some(Value::Measured(64)); 3]);
        assert_eq!(a1.label.as_deref(), Some("snlua bootstrap"));

        handle.shutdown();
        assert!(join.join().unwrap().is_ok());
        assert!(matches!(handle.start(), Err(CollectError::SessionClosed)));

        let seen = console.join().unwrap();
        assert_eq!(seen.len(), 11);
        assert_eq!(seen[0], "list");
        for round in seen[1..10].chunks(3) {
            assert_eq!(round, ["stat", "mem", "cmem"]);
        }
        assert_eq!(seen[10], "stat");
    }

    #[test]
    fn test_stop_and_report_survives_restart() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let cfg = config(&listener);
        let (parked_tx, parked_rx) = mpsc::channel();
        let console = fake_console(listener, 2, parked_tx);

        let (handle, join) = spawn_session(cfg).unwrap();
        assert!(handle.start().unwrap());
        parked_rx.recv_timeout(Duration::from_secs(10)).unwrap();

        // A start right after stop must not reach the stopped run's data.
        let stopped = handle.stop_and_report(10).unwrap().unwrap();
        assert!(handle.start().unwrap());

        assert_eq!(stopped.rounds.len(), 3);
        let cpu = stopped.chart(Metric::Cpu).unwrap();
        assert_eq!(cpu.series.len(), 2);
        let a1 = cpu.series.iter().find(|s| s.actor == ":01").unwrap();
        assert_eq!(
            a1.values,
            vec![Some(Value::Measured(100)), Some(Value::Measured(200))]
        );

        // The new run waits for the unanswered stat and has no data yet.
        let fresh = handle.report(10).unwrap();
        assert!(fresh.rounds.is_empty());
        assert!(fresh.chart(Metric::Cpu).unwrap().series.is_empty());

        handle.shutdown();
        assert!(join.join().unwrap().is_ok());
        let seen = console.join().unwrap();
        assert_eq!(seen.len(), 8);
        assert_eq!(seen[7], "stat");
    }

    #[test]
    fn test_shutdown_ends_session() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let cfg = config(&listener);
        let accept = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer: TcpStream = stream.try_clone().unwrap();
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).unwrap();
            writer.write_all(LIST_REPLY.as_bytes()).unwrap();
            (line, writer)
        });

        let (handle, join) = spawn_session(cfg).unwrap();
        // Holding the server side open keeps the session alive.
        let (line, _server) = accept.join().unwrap();
        assert_eq!(line, "list\n");

        let report = handle.report(5).unwrap();
        assert!(report.rounds.is_empty());
        handle.shutdown();
        assert!(join.join().unwrap().is_ok());
    }

    #[test]
    fn test_error_frame_ends_session() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let cfg = config(&listener);
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"Invalid command\n<CMD Error>\n").unwrap();
            // Keep the socket open until the client hangs up.
            let mut line = String::new();
            let _ = BufReader::new(stream).read_line(&mut line);
        });

        let (_handle, join) = spawn_session(cfg).unwrap();
        match join.join().unwrap() {
            Err(CollectError::Remote(prefix)) => assert_eq!(prefix, "Invalid command\n"),
            other => panic!("expected remote error, got {:?}", other),
        }
        server.join().unwrap();
    }
}
