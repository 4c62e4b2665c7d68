//! Session and process supervisor
//!
//! A single task owns the [`Session`] and every engine process. Control
//! connections, engine reader/waiter tasks and timers never touch that state
//! directly: they post messages into the supervisor's inbox and the
//! supervisor handles them one at a time, each to completion.
//!
//! Timers (auto-start, forced kill, relaunch) are spawned sleeps that post a
//! message back. Each carries an epoch or process generation, so a timer
//! that fires after the situation changed is recognized and ignored.
//!
//! At most one engine child exists at any time. A process being stopped is
//! moved to the retiring set and a relaunch waits until that set is empty.

mod dispatch;
pub mod engine;
pub mod engine_output;
pub mod session;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kara_common::protocol::Envelope;
use kara_common::song::SongRef;
use kara_common::{EventBus, RelayEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::{Config, EngineConfig, Timing};
use crate::error::{Error, Result};
use crate::param_channel::ParamChannel;

use engine::{EngineEvent, EngineProcess, OutputStream};
use engine_output::EngineSignal;
pub use session::{ConnectionId, Session, SessionSnapshot, SessionState, Transport};

/// Inbox messages
#[derive(Debug)]
enum Message {
    Open {
        conn: ConnectionId,
        tx: mpsc::UnboundedSender<RelayEvent>,
    },
    Command {
        conn: ConnectionId,
        envelope: Envelope,
    },
    Close {
        conn: ConnectionId,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    AutoStart {
        epoch: u64,
    },
    ForceKill {
        generation: u64,
    },
    RelaunchDue {
        epoch: u64,
    },
}

/// Launch waiting for the settling delay and for retired processes to exit
#[derive(Debug, Clone, Copy)]
struct PendingLaunch {
    epoch: u64,
    due: bool,
}

/// Cloneable handle used by connections to talk to the supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl SupervisorHandle {
    /// Register a control connection
    ///
    /// The receiver gets every event addressed to this connection, starting
    /// with the current `songs_list`.
    pub fn open_connection(&self) -> Result<(ConnectionId, mpsc::UnboundedReceiver<RelayEvent>)> {
        let conn = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.send(Message::Open { conn, tx })?;
        Ok((conn, rx))
    }

    /// Submit a decoded inbound envelope
    pub fn submit(&self, conn: ConnectionId, envelope: Envelope) -> Result<()> {
        self.send(Message::Command { conn, envelope })
    }

    /// Unregister a connection
    pub fn close_connection(&self, conn: ConnectionId) {
        let _ = self.send(Message::Close { conn });
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Message::Snapshot { reply })?;
        rx.await.map_err(|_| Error::SupervisorGone)
    }

    /// Halt any engine process and stop the supervisor task
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Message::Shutdown { reply })?;
        rx.await.map_err(|_| Error::SupervisorGone)
    }

    fn send(&self, message: Message) -> Result<()> {
        self.tx.send(message).map_err(|_| Error::SupervisorGone)
    }
}

/// The supervisor task state
pub struct Supervisor {
    catalog: Arc<Catalog>,
    params: ParamChannel,
    engine: EngineConfig,
    timing: Timing,
    bus: EventBus,

    inbox: mpsc::UnboundedReceiver<Message>,
    /// Timers hold weak senders so dropping every handle ends the task
    timer_tx: mpsc::WeakUnboundedSender<Message>,
    engine_tx: mpsc::UnboundedSender<EngineEvent>,
    engine_rx: mpsc::UnboundedReceiver<EngineEvent>,

    connections: HashMap<ConnectionId, mpsc::UnboundedSender<RelayEvent>>,
    session: Option<Session>,
    retiring: HashMap<u64, EngineProcess>,
    pending_launch: Option<PendingLaunch>,

    next_generation: u64,
    autostart_epoch: u64,
    relaunch_epoch: u64,
    launches: u64,
}

impl Supervisor {
    /// Start the supervisor task
    pub fn spawn(config: &Config, catalog: Arc<Catalog>, bus: EventBus) -> SupervisorHandle {
        let (tx, inbox) = mpsc::unbounded_channel();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();

        let supervisor = Supervisor {
            catalog,
            params: ParamChannel::new(&config.engine.param_file),
            engine: config.engine.clone(),
            timing: config.timing,
            bus,
            inbox,
            timer_tx: tx.downgrade(),
            engine_tx,
            engine_rx,
            connections: HashMap::new(),
            session: None,
            retiring: HashMap::new(),
            pending_launch: None,
            next_generation: 0,
            autostart_epoch: 0,
            relaunch_epoch: 0,
            launches: 0,
        };

        tokio::spawn(supervisor.run());
        SupervisorHandle { tx }
    }

    async fn run(mut self) {
        info!(
            "Supervisor started (engine root {}, param file {})",
            self.engine.root.display(),
            self.params.path().display()
        );

        let mut ticker = self.timing.tick_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        let reply = loop {
            tokio::select! {
                message = self.inbox.recv() => match message {
                    Some(Message::Shutdown { reply }) => break Some(reply),
                    Some(message) => self.handle_message(message).await,
                    None => break None,
                },
                Some(event) = self.engine_rx.recv() => self.handle_engine_event(event).await,
                _ = next_tick(&mut ticker) => self.emit_tick(),
            }
        };

        self.shutdown().await;
        if let Some(reply) = reply {
            let _ = reply.send(());
        }
        info!("Supervisor stopped");
    }

    async fn handle_message(&mut self, message: Message) {
        match message {
            Message::Open { conn, tx } => {
                info!(%conn, "Control connection opened");
                let songs = self.catalog.songs().await;
                self.connections.insert(conn, tx);
                self.reply(
                    conn,
                    RelayEvent::SongsList {
                        songs: songs.as_ref().clone(),
                    },
                );
            }
            Message::Command { conn, envelope } => self.dispatch(conn, envelope).await,
            Message::Close { conn } => self.connection_closed(conn),
            Message::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Message::Shutdown { .. } => {}
            Message::AutoStart { epoch } => self.auto_start(epoch).await,
            Message::ForceKill { generation } => {
                if let Some(process) = self.retiring.get(&generation) {
                    warn!(
                        generation,
                        pid = ?process.pid,
                        "Engine did not exit within {:?}, killing",
                        self.timing.grace_period
                    );
                    process.kill();
                }
            }
            Message::RelaunchDue { epoch } => {
                if let Some(pending) = self.pending_launch.as_mut() {
                    if pending.epoch == epoch {
                        pending.due = true;
                        self.try_pending_launch().await;
                    }
                }
            }
        }
    }

    async fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Output {
                generation,
                stream,
                line,
            } => {
                match stream {
                    OutputStream::Stdout => debug!(generation, "engine: {}", line),
                    OutputStream::Stderr => warn!(generation, "engine stderr: {}", line),
                }
                if self.current_generation() != Some(generation) {
                    return;
                }
                if let Some(signal) = engine_output::translate(stream, &line) {
                    self.handle_signal(signal);
                }
            }
            EngineEvent::Exited {
                generation,
                code,
                description,
            } => {
                if self.current_generation() == Some(generation) {
                    info!(generation, ?code, "Engine exited: {}", description);
                    if let Some(session) = self.session.as_mut() {
                        session.process = None;
                        session.state = SessionState::Loaded;
                    }
                    self.notify_owner(RelayEvent::stopped());
                } else if self.retiring.remove(&generation).is_some() {
                    debug!(generation, ?code, "Retired engine exited: {}", description);
                    if let Some(session) = self.session.as_mut() {
                        if session.process.is_none() && session.state == SessionState::Stopping {
                            session.state = SessionState::Loaded;
                        }
                    }
                    self.try_pending_launch().await;
                } else {
                    debug!(generation, "Exit of unknown engine generation ignored");
                }
            }
        }
    }

    fn handle_signal(&mut self, signal: EngineSignal) {
        match signal {
            EngineSignal::Started => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if let Some(process) = session.process.as_mut() {
                    process.reported_started = true;
                }
                info!("Engine started playing {}", session.song.id);
                let song = session.song.clone();
                let song_ref = SongRef::from(&song);
                self.notify_owner(RelayEvent::Meta { song });
                self.notify_owner(RelayEvent::State {
                    playing: true,
                    position_sec: 0.0,
                    song: Some(song_ref),
                });
            }
            EngineSignal::Recording => {
                info!("Engine is recording");
                self.notify_owner(RelayEvent::BackendStatus {
                    status: "recording".to_string(),
                    message: "Engine is now recording and processing audio".to_string(),
                });
            }
            EngineSignal::Fatal(line) => {
                warn!("Engine reported a fatal error: {}", line);
                self.notify_owner(RelayEvent::error(format!("Karaoke failed to start: {}", line)));
                self.halt_process();
            }
        }
    }

    fn emit_tick(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let started = session
            .process
            .as_ref()
            .map_or(false, |process| process.reported_started);
        if started && session.transport == Transport::Playing {
            let position_sec = session.position_sec();
            self.notify_owner(RelayEvent::Tick { position_sec });
        }
    }

    fn connection_closed(&mut self, conn: ConnectionId) {
        self.connections.remove(&conn);
        info!(%conn, "Control connection closed");

        let owned = self
            .session
            .as_ref()
            .map_or(false, |session| session.owner == Some(conn));
        if !owned {
            return;
        }

        // Nobody is listening any more: halt the engine but keep the song
        self.autostart_epoch += 1;
        self.pending_launch = None;
        self.halt_process();
        if let Some(session) = self.session.as_mut() {
            session.owner = None;
        }
    }

    /// Generation of the session's current process
    fn current_generation(&self) -> Option<u64> {
        self.session
            .as_ref()
            .and_then(|session| session.process.as_ref())
            .map(|process| process.generation)
    }

    /// Terminate the current process, keeping the session
    ///
    /// The process moves to the retiring set; a forced kill follows after the
    /// grace period unless it exits first.
    fn halt_process(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(process) = session.process.take() else {
            return;
        };
        session.state = SessionState::Stopping;

        info!(generation = process.generation, pid = ?process.pid, "Stopping engine");
        process.terminate();
        self.schedule(
            self.timing.grace_period,
            Message::ForceKill {
                generation: process.generation,
            },
        );
        self.retiring.insert(process.generation, process);
    }

    /// Post `message` to the inbox after `delay`
    fn schedule(&self, delay: Duration, message: Message) {
        let tx = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(message);
            }
        });
    }

    /// Send to one connection and publish on the bus
    fn reply(&self, conn: ConnectionId, event: RelayEvent) {
        if let Some(tx) = self.connections.get(&conn) {
            let _ = tx.send(event.clone());
        }
        self.bus.emit_lossy(event);
    }

    /// Send to the session owner (if connected) and publish on the bus
    fn notify_owner(&self, event: RelayEvent) {
        match self.session.as_ref().and_then(|session| session.owner) {
            Some(owner) => self.reply(owner, event),
            None => self.bus.emit_lossy(event),
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let mut snapshot = SessionSnapshot::idle();
        snapshot.retiring = self.retiring.len();
        snapshot.launches = self.launches;

        if let Some(session) = self.session.as_ref() {
            snapshot.state = session.state;
            snapshot.song = Some(session.song_ref());
            snapshot.effects = Some(session.effects);
            if let Some(process) = session.process.as_ref() {
                snapshot.generation = Some(process.generation);
                snapshot.pid = process.pid;
                snapshot.uptime_sec = Some(process.started_at.elapsed().as_secs_f64());
            }
        }
        snapshot
    }

    /// Stop every engine process, waiting up to the grace period
    async fn shutdown(&mut self) {
        self.pending_launch = None;
        self.halt_process();
        self.session = None;

        if self.retiring.is_empty() {
            return;
        }
        info!("Waiting for {} engine process(es) to exit", self.retiring.len());

        let grace = self.timing.grace_period;
        let drained = tokio::time::timeout(grace, async {
            while !self.retiring.is_empty() {
                match self.engine_rx.recv().await {
                    Some(EngineEvent::Exited { generation, .. }) => {
                        self.retiring.remove(&generation);
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        })
        .await;

        if drained.is_err() {
            for process in self.retiring.values() {
                warn!(generation = process.generation, "Killing engine at shutdown");
                process.kill();
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
