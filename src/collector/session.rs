//! Protocol state machine for one sampling session.
//!
//! The session bootstraps once with `list`, then while running drives rounds
//! of `stat` → `mem` → `cmem`. Replies carry no request id, so every reply is
//! attributed to the single outstanding command and no command is sent while
//! another one is outstanding.
//!
//! The session does no I/O and no timing of its own: bytes are pushed in via
//! [`Session::on_bytes`], commands leave through a [`CommandSink`], and the
//! caller schedules the next round when a round completes.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Local};
use tracing::{debug, info};

use super::CollectError;
use super::frame::FrameDecoder;
use super::parser::{parse_cmem, parse_labels, parse_mem, parse_stat};
use super::protocol::Command;
use super::traits::CommandSink;
use crate::storage::{SampleStore, Value};

/// Protocol phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// Waiting for the `list` reply.
    Bootstrapping,
    /// Labels are known; sampling may run.
    Ready,
}

/// Session state and the data collected by the current run.
#[derive(Debug)]
pub struct Session {
    phase: Phase,
    running: bool,
    /// Start was requested while a reply was still owed; the first `stat`
    /// goes out once nothing is outstanding.
    start_pending: bool,
    round: u32,
    outstanding: Option<Command>,
    labels: HashMap<String, String>,
    store: SampleStore,
    /// Actors present in the current round's `stat` reply.
    round_actors: HashSet<String>,
    round_times: Vec<DateTime<Local>>,
    decoder: FrameDecoder,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            phase: Phase::Bootstrapping,
            running: false,
            start_pending: false,
            round: 0,
            outstanding: None,
            labels: HashMap::new(),
            store: SampleStore::new(),
            round_actors: HashSet::new(),
            round_times: Vec::new(),
            decoder: FrameDecoder::new(),
        }
    }

    /// Sends the `list` command that resolves actor labels.
    pub fn bootstrap<S: CommandSink>(&mut self, sink: &mut S) -> Result<(), CollectError> {
        if self.phase != Phase::Bootstrapping {
            return Err(CollectError::Protocol("session already bootstrapped".into()));
        }
        self.send(sink, Command::List)
    }

    /// Starts a sampling run, discarding all data of the previous run.
    ///
    /// Returns `false` if already running.
    pub fn start<S: CommandSink>(&mut self, sink: &mut S) -> Result<bool, CollectError> {
        if self.running {
            return Ok(false);
        }

        self.store.clear();
        self.round_times.clear();
        self.round_actors.clear();
        self.round = 1;
        self.running = true;
        info!("sampling started");

        if self.phase == Phase::Ready && self.outstanding.is_none() {
            self.send_stat(sink)?;
        } else {
            debug!(outstanding = ?self.outstanding, phase = ?self.phase, "first round deferred");
            self.start_pending = true;
        }
        Ok(true)
    }

    /// Stops sampling after the exchange in flight.
    ///
    /// Returns `false` if not running.
    pub fn stop(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        self.start_pending = false;
        info!(
            rounds = self.round_times.len(),
            actors = self.store.len(),
            "sampling stopped"
        );
        true
    }

    /// Sends the `stat` command opening the next round.
    ///
    /// Does nothing unless running, ready and idle on the wire.
    pub fn begin_round<S: CommandSink>(&mut self, sink: &mut S) -> Result<bool, CollectError> {
        if !self.running || self.phase != Phase::Ready || self.outstanding.is_some() {
            return Ok(false);
        }
        self.send_stat(sink)?;
        Ok(true)
    }

    /// Feeds raw bytes from the connection and handles every reply completed.
    ///
    /// Returns `true` if a round completed and the next one should be
    /// scheduled.
    pub fn on_bytes<S: CommandSink>(
        &mut self,
        chunk: &[u8],
        sink: &mut S,
    ) -> Result<bool, CollectError> {
        let mut round_done = false;
        for reply in self.decoder.feed(chunk)? {
            round_done |= self.on_reply(&reply, sink)?;
        }
        Ok(round_done)
    }

    fn on_reply<S: CommandSink>(&mut self, reply: &[u8], sink: &mut S) -> Result<bool, CollectError> {
        let Some(command) = self.outstanding.take() else {
            return Err(CollectError::Protocol(
                "reply received with no command outstanding".into(),
            ));
        };
        let body = String::from_utf8_lossy(reply);

        if self.phase == Phase::Bootstrapping {
            if command != Command::List {
                return Err(CollectError::Protocol(format!(
                    "bootstrap reply attributed to {}, expected list",
                    command
                )));
            }
            self.labels = parse_labels(&body);
            self.phase = Phase::Ready;
            info!(actors = self.labels.len(), "observer ready");
            self.resume_pending(sink)?;
            return Ok(false);
        }

        if !self.running || self.start_pending {
            debug!(%command, "discarding reply from a previous run");
            self.resume_pending(sink)?;
            return Ok(false);
        }

        match command {
            Command::Stat => {
                let samples = parse_stat(&body)?;
                debug!(actors = samples.len(), round = self.round, "stat reply");
                for (actor, sample) in samples {
                    self.store.push(&actor, sample);
                    self.round_actors.insert(actor);
                }
                self.send(sink, Command::Mem)?;
                Ok(false)
            }
            Command::Mem => {
                let values = parse_mem(&body)?;
                debug!(actors = values.len(), round = self.round, "mem reply");
                self.apply(values, |sample, v| sample.lua_mem = Some(v));
                self.send(sink, Command::CMem)?;
                Ok(false)
            }
            Command::CMem => {
                let values = parse_cmem(&body)?;
                debug!(actors = values.len(), round = self.round, "cmem reply");
                self.apply(values, |sample, v| sample.c_mem = Some(v));
                info!(round = self.round, actors = self.round_actors.len(), "sampling round done");
                self.round += 1;
                Ok(self.running)
            }
            Command::List => Err(CollectError::Protocol(
                "list reply received after bootstrap".into(),
            )),
        }
    }

    /// Completes the current round's samples; actors absent from this
    /// round's `stat` reply are ignored.
    fn apply<F>(&mut self, values: Vec<(String, Value)>, mut set: F)
    where
        F: FnMut(&mut crate::storage::Sample, Value),
    {
        for (actor, value) in values {
            if !self.round_actors.contains(&actor) {
                debug!(%actor, "ignoring value for actor missing from stat");
                continue;
            }
            if let Some(sample) = self.store.latest_mut(&actor) {
                set(sample, value);
            }
        }
    }

    fn resume_pending<S: CommandSink>(&mut self, sink: &mut S) -> Result<(), CollectError> {
        if self.start_pending && self.running {
            self.start_pending = false;
            self.send_stat(sink)?;
        }
        Ok(())
    }

    fn send_stat<S: CommandSink>(&mut self, sink: &mut S) -> Result<(), CollectError> {
        self.round_actors.clear();
        self.send(sink, Command::Stat)?;
        self.round_times.push(Local::now());
        Ok(())
    }

    fn send<S: CommandSink>(&mut self, sink: &mut S, command: Command) -> Result<(), CollectError> {
        if let Some(outstanding) = self.outstanding {
            return Err(CollectError::Protocol(format!(
                "cannot send {} while {} is outstanding",
                command, outstanding
            )));
        }
        sink.send(command)?;
        debug!(%command, "command sent");
        self.outstanding = Some(command);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Current round number; 1 for the first round of a run.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// The command whose reply is awaited, if any.
    pub fn outstanding(&self) -> Option<Command> {
        self.outstanding
    }

    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    /// Local time at which each round's `stat` was sent.
    pub fn round_times(&self) -> &[DateTime<Local>] {
        &self.round_times
    }
}
