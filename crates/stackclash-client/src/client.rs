//! The reconnecting client.
//!
//! [`ResilientClient::start`] spawns one background task that owns the
//! connection. The caller talks to it through the returned handle and
//! listens on the event channel; everything else (redialing, queueing,
//! heartbeats, sequence checks) happens inside the task.
//!
//! ```text
//!   Disconnected ─→ Connecting ─→ Connected ─(drop)─→ Reconnecting ─→ Connected
//!                                                          │
//!                                                          └─(retries spent)─→ Failed
//! ```

use std::time::Duration;

use stackclash_protocol::{
    ClientMessage, Codec, JsonCodec, SequenceCheck, SequenceGuard, ServerMessage, SessionToken,
};
use stackclash_transport::{Connection, Connector, HeartbeatMonitor, HeartbeatStatus};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use crate::{Backoff, ClientConfig, ClientError, OfflineQueue};

/// Connection state, published through a `watch` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    /// First dial in progress.
    Connecting,
    Connected,
    /// Waiting to redial. `attempt` counts backoff attempts so far; it is
    /// 0 for the immediate retry after a heartbeat loss.
    Reconnecting { attempt: u32 },
    /// Retries exhausted. Terminal.
    Failed,
}

/// What the client reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    /// A server message that passed the sequence check.
    Message(ServerMessage),
    /// The offline queue overflowed and lost this many messages.
    MessagesDropped(usize),
    /// The event channel was full and this many events were discarded
    /// before this one could be delivered.
    EventsLagged(u64),
    /// A room message arrived out of order and was discarded. A resync has
    /// been requested.
    SequenceGap { expected: u64, got: u64 },
    Failed,
}

enum Command {
    Send(ClientMessage),
    Shutdown,
}

/// Handle to the background connection task.
pub struct ResilientClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ClientState>,
    task: JoinHandle<()>,
}

impl ResilientClient {
    /// Starts dialing through `connector` and returns the handle plus the
    /// event stream.
    pub fn start<C: Connector>(
        connector: C,
        config: ClientConfig,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ClientState::Disconnected);
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));

        let driver = Driver {
            queue: OfflineQueue::new(config.queue_capacity),
            backoff: Backoff::new(config.backoff, config.retry),
            config,
            codec: JsonCodec,
            commands: cmd_rx,
            state: state_tx,
            events: event_tx,
            guard: SequenceGuard::new(),
            session_token: None,
            resync_pending: false,
            lagged: 0,
        };
        let task = tokio::spawn(driver.run(connector));

        let client = Self {
            commands: cmd_tx,
            state: state_rx,
            task,
        };
        (client, event_rx)
    }

    /// Sends `msg` now if connected, otherwise queues it.
    pub fn send(&self, msg: ClientMessage) -> Result<(), ClientError> {
        self.commands
            .send(Command::Send(msg))
            .map_err(|_| ClientError::Closed)
    }

    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.state.clone()
    }

    /// Says goodbye to the server (if connected) and stops the task.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "client task ended abnormally");
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Why a connected session ended.
enum Exit {
    Shutdown,
    Lost,
    HeartbeatLost,
}

enum Offline {
    Continue,
    Shutdown,
}

struct Driver {
    config: ClientConfig,
    codec: JsonCodec,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ClientState>,
    events: mpsc::Sender<ClientEvent>,
    queue: OfflineQueue,
    backoff: Backoff,
    guard: SequenceGuard,
    /// From the last `login_ok`; replayed first on every reconnect.
    session_token: Option<SessionToken>,
    resync_pending: bool,
    /// Events discarded since the owner last had room in the channel.
    lagged: u64,
}

impl Driver {
    async fn run<C: Connector>(mut self, connector: C) {
        self.set_state(ClientState::Connecting);
        let mut immediate = false;

        loop {
            let dialed = {
                let connect = connector.connect();
                tokio::pin!(connect);
                loop {
                    tokio::select! {
                        result = &mut connect => break Some(result),
                        cmd = self.commands.recv() => {
                            if let Offline::Shutdown = self.offline_command(cmd) {
                                break None;
                            }
                        }
                    }
                }
            };
            let Some(dialed) = dialed else {
                return self.finish();
            };

            match dialed {
                Ok(conn) => {
                    self.backoff.reset();
                    tracing::info!(conn = %conn.id(), "connected");
                    self.set_state(ClientState::Connected);
                    self.emit(ClientEvent::Connected);

                    let exit = self.serve(&conn).await;
                    let _ = conn.close().await;
                    match exit {
                        Exit::Shutdown => return self.finish(),
                        Exit::Lost => {}
                        Exit::HeartbeatLost => immediate = true,
                    }
                    tracing::info!(conn = %conn.id(), queued = self.queue.len(), "connection lost");
                    self.emit(ClientEvent::Disconnected);
                }
                Err(err) => {
                    tracing::warn!(error = %err, attempt = self.backoff.attempts(), "connect failed");
                }
            }

            if immediate {
                immediate = false;
                self.set_state(ClientState::Reconnecting { attempt: 0 });
                continue;
            }

            let Some(delay) = self.backoff.next_delay() else {
                tracing::error!(attempts = self.backoff.attempts(), "reconnect attempts exhausted");
                self.set_state(ClientState::Failed);
                self.emit(ClientEvent::Failed);
                return;
            };
            let attempt = self.backoff.attempts();
            self.set_state(ClientState::Reconnecting { attempt });
            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            if let Offline::Shutdown = self.wait(delay).await {
                return self.finish();
            }
        }
    }

    /// Drives one live connection until it ends.
    async fn serve<T: Connection>(&mut self, conn: &T) -> Exit {
        if let Some(token) = self.session_token.clone() {
            let resume = ClientMessage::Reconnect {
                session_token: token,
            };
            if self.transmit(conn, &resume).await.is_err() {
                return Exit::Lost;
            }
        }
        while let Some(msg) = self.queue.pop_front() {
            if self.transmit(conn, &msg).await.is_err() {
                self.queue.push_front(msg);
                return Exit::Lost;
            }
        }

        let mut heartbeat = HeartbeatMonitor::new(self.config.heartbeat, Instant::now());
        loop {
            tokio::select! {
                incoming = conn.recv() => match incoming {
                    Ok(Some(bytes)) => {
                        if self.on_frame(conn, &bytes, &mut heartbeat).await.is_err() {
                            return Exit::Lost;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("server closed the connection");
                        return Exit::Lost;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "receive failed");
                        return Exit::Lost;
                    }
                },
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Send(msg)) => {
                        if self.transmit(conn, &msg).await.is_err() {
                            self.enqueue(msg);
                            return Exit::Lost;
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        let bye = ClientMessage::Disconnect {
                            reason: Some("client shutdown".into()),
                        };
                        let _ = self.transmit(conn, &bye).await;
                        return Exit::Shutdown;
                    }
                },
                _ = sleep_until(heartbeat.next_deadline()) => {
                    if let HeartbeatStatus::SendPing(nonce) = heartbeat.poll(Instant::now()) {
                        let ping = ClientMessage::HeartbeatPing { nonce };
                        if self.transmit(conn, &ping).await.is_err() {
                            return Exit::Lost;
                        }
                    }
                    if heartbeat.missed() >= self.config.missed_heartbeats_before_reconnect {
                        tracing::warn!(missed = heartbeat.missed(), "server stopped answering heartbeats");
                        return Exit::HeartbeatLost;
                    }
                }
            }
        }
    }

    async fn on_frame<T: Connection>(
        &mut self,
        conn: &T,
        bytes: &[u8],
        heartbeat: &mut HeartbeatMonitor,
    ) -> Result<(), ClientError> {
        let msg: ServerMessage = match self.codec.decode(bytes) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(error = %err, "undecodable server message, dropped");
                return Ok(());
            }
        };

        match &msg {
            ServerMessage::HeartbeatPing { nonce } => {
                let pong = ClientMessage::HeartbeatPong { nonce: *nonce };
                return self.transmit(conn, &pong).await;
            }
            ServerMessage::HeartbeatPong { nonce } => {
                if !heartbeat.record_pong(*nonce) {
                    tracing::debug!(nonce, "stale heartbeat pong");
                }
                return Ok(());
            }
            ServerMessage::LoginOk { session_token, .. } => {
                self.session_token = Some(session_token.clone());
            }
            ServerMessage::LoginError { .. } | ServerMessage::ResyncError { .. } => {
                self.session_token = None;
            }
            ServerMessage::MatchFound { .. } | ServerMessage::Resync { .. } => {
                self.resync_pending = false;
            }
            _ => {}
        }

        if let SequenceCheck::Gap { expected, got } = self.guard.check(&msg) {
            self.emit(ClientEvent::SequenceGap { expected, got });
            if !self.resync_pending {
                self.resync_pending = true;
                return self.transmit(conn, &ClientMessage::RequestResync).await;
            }
            return Ok(());
        }
        self.emit(ClientEvent::Message(msg));
        Ok(())
    }

    async fn transmit<T: Connection>(&self, conn: &T, msg: &ClientMessage) -> Result<(), ClientError> {
        let bytes = self.codec.encode(msg)?;
        conn.send(&bytes).await?;
        tracing::debug!(kind = msg.kind(), "sent");
        Ok(())
    }

    /// Sleeps before a redial while still accepting commands.
    async fn wait(&mut self, delay: Duration) -> Offline {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return Offline::Continue,
                cmd = self.commands.recv() => {
                    if let Offline::Shutdown = self.offline_command(cmd) {
                        return Offline::Shutdown;
                    }
                }
            }
        }
    }

    fn offline_command(&mut self, cmd: Option<Command>) -> Offline {
        match cmd {
            Some(Command::Send(msg)) => {
                self.enqueue(msg);
                Offline::Continue
            }
            Some(Command::Shutdown) | None => Offline::Shutdown,
        }
    }

    fn enqueue(&mut self, msg: ClientMessage) {
        if self.queue.push(msg).is_some() {
            self.emit(ClientEvent::MessagesDropped(1));
        }
    }

    /// Never waits: a slow owner must not stall heartbeats.
    fn emit(&mut self, event: ClientEvent) {
        if self.lagged > 0 {
            match self.events.try_send(ClientEvent::EventsLagged(self.lagged)) {
                Ok(()) => self.lagged = 0,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.lagged += 1;
                    return;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        }
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.lagged += 1;
                tracing::warn!(lagged = self.lagged, ?event, "event channel full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    fn set_state(&self, state: ClientState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(?previous, ?state, "client state changed");
        }
    }

    fn finish(&self) {
        tracing::info!(queued = self.queue.len(), "client shut down");
        self.set_state(ClientState::Disconnected);
    }
}
