//! Per-connection handler: authentication, heartbeats, and message routing.
//!
//! Each accepted connection gets its own Tokio task running this handler,
//! plus a writer task that drains the connection's outbox to the socket.
//! Every reply, including room messages, goes through that one outbox so
//! the client sees them in the order they were produced.
//!
//! The flow is:
//!   1. Pre-auth: `register`, `login`, or `reconnect`, each with a timeout
//!   2. Loop: receive frames, answer heartbeats, dispatch to the registry
//!   3. On exit: the session enters grace unless the client said goodbye

use std::sync::Arc;

use stackclash_protocol::{
    ClientMessage, Codec, ErrorKind, JsonCodec, ProtocolError, ServerMessage, SessionToken,
};
use stackclash_room::{BoardRules, RoomError};
use stackclash_session::AccountStore;
use stackclash_transport::{Connection, ConnectionId, HeartbeatMonitor, HeartbeatStatus};
use tokio::sync::mpsc::{self, UnboundedSender, WeakUnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};

use crate::{Registry, StackClashError};

/// Drop guard that suspends the session when the handler exits.
///
/// Runs even if the handler panics. `Drop` is synchronous, so the async
/// work goes to a fire-and-forget task.
struct SessionGuard<R: BoardRules, A: AccountStore> {
    token: SessionToken,
    connection: ConnectionId,
    registry: Arc<Registry<R, A>>,
}

impl<R: BoardRules, A: AccountStore> Drop for SessionGuard<R, A> {
    fn drop(&mut self) {
        let token = self.token.clone();
        let connection = self.connection;
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            registry.suspend_session(&token, connection).await;
        });
    }
}

/// What the main loop should do after a message.
enum Flow {
    Continue,
    Close,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<T, R, A>(conn: T, registry: Arc<Registry<R, A>>)
where
    T: Connection,
    R: BoardRules,
    A: AccountStore,
{
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(conn = %conn_id, "handling new connection");

    let (outbox, rx) = mpsc::unbounded_channel();
    let writer = spawn_writer(Arc::clone(&conn), rx);

    match authenticate(conn.as_ref(), &registry, outbox).await {
        Some((token, outbox)) => {
            let _guard = SessionGuard {
                token: token.clone(),
                connection: conn_id,
                registry: Arc::clone(&registry),
            };
            serve(conn.as_ref(), &registry, &token, &outbox, writer).await;
        }
        // Every sender is gone; let the writer flush the last replies.
        None => {
            let _ = writer.await;
        }
    }

    let _ = conn.close().await;
    tracing::debug!(conn = %conn_id, "connection finished");
}

/// Writes every message pushed to the outbox until all senders are gone.
fn spawn_writer<T: Connection>(
    conn: Arc<T>,
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let bytes = match JsonCodec.encode(&msg) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(kind = msg.kind(), error = %err, "failed to encode server message");
                    continue;
                }
            };
            if let Err(err) = conn.send(&bytes).await {
                tracing::debug!(conn = %conn.id(), error = %err, "write failed, writer stopping");
                break;
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Pre-auth
// ---------------------------------------------------------------------------

/// Runs the pre-auth exchange. Returns the session token once the
/// connection is logged in, or `None` if it went away first.
///
/// The strong `outbox` is handed to the session on success and the caller
/// gets a weak one back: from then on only the session (and its room) keep
/// the writer alive, so a takeover by another connection ends it.
async fn authenticate<T, R, A>(
    conn: &T,
    registry: &Registry<R, A>,
    outbox: UnboundedSender<ServerMessage>,
) -> Option<(SessionToken, WeakUnboundedSender<ServerMessage>)>
where
    T: Connection,
    R: BoardRules,
    A: AccountStore,
{
    let conn_id = conn.id();
    let weak = outbox.downgrade();
    let auth_timeout = registry.session_config().auth_timeout;

    loop {
        let bytes = match timeout(auth_timeout, conn.recv()).await {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => {
                tracing::debug!(conn = %conn_id, "closed before login");
                return None;
            }
            Ok(Err(err)) => {
                tracing::debug!(conn = %conn_id, error = %err, "receive failed before login");
                return None;
            }
            Err(_) => {
                tracing::info!(conn = %conn_id, "login timed out");
                return None;
            }
        };

        let msg: ClientMessage = match JsonCodec.decode(&bytes) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(conn = %conn_id, error = %err, "undecodable frame before login");
                let _ = outbox.send(error_reply(&err.into()));
                continue;
            }
        };

        match msg {
            ClientMessage::Register { username, password } => {
                let reply = match registry.register(&username, &password).await {
                    Ok(user) => ServerMessage::RegisterOk { user },
                    Err(err) => ServerMessage::RegisterError {
                        reason: err.to_string(),
                    },
                };
                let _ = outbox.send(reply);
            }
            ClientMessage::Login { username, password } => {
                match registry
                    .login(&username, &password, conn_id, outbox.clone())
                    .await
                {
                    Ok((token, user)) => {
                        tracing::info!(conn = %conn_id, user_id = %user.user_id, "logged in");
                        let _ = outbox.send(ServerMessage::LoginOk {
                            session_token: token.clone(),
                            user,
                        });
                        // A takeover may land in a match already in progress.
                        registry.rejoin_room(&token, outbox).await;
                        return Some((token, weak));
                    }
                    Err(err) => {
                        let _ = outbox.send(ServerMessage::LoginError {
                            reason: err.to_string(),
                        });
                    }
                }
            }
            ClientMessage::Reconnect { session_token } => {
                match registry
                    .reconnect(&session_token, conn_id, outbox.clone())
                    .await
                {
                    Ok(user) => {
                        tracing::info!(conn = %conn_id, user_id = %user.user_id, "session resumed");
                        if !registry.rejoin_room(&session_token, outbox.clone()).await {
                            let _ = outbox.send(ServerMessage::LoginOk {
                                session_token: session_token.clone(),
                                user,
                            });
                        }
                        return Some((session_token, weak));
                    }
                    Err(err) => {
                        let _ = outbox.send(ServerMessage::ResyncError {
                            reason: err.to_string(),
                        });
                    }
                }
            }
            other => {
                tracing::warn!(conn = %conn_id, kind = other.kind(), "message before login");
                let _ = outbox.send(ServerMessage::error(
                    401,
                    ErrorKind::Auth,
                    "log in or reconnect first",
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Authenticated loop
// ---------------------------------------------------------------------------

async fn serve<T, R, A>(
    conn: &T,
    registry: &Registry<R, A>,
    token: &SessionToken,
    outbox: &WeakUnboundedSender<ServerMessage>,
    mut writer: JoinHandle<()>,
) where
    T: Connection,
    R: BoardRules,
    A: AccountStore,
{
    let conn_id = conn.id();
    let config = registry.session_config();
    let mut heartbeat = HeartbeatMonitor::new(config.heartbeat, Instant::now());

    loop {
        tokio::select! {
            incoming = conn.recv() => {
                let bytes = match incoming {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => {
                        tracing::info!(conn = %conn_id, "connection closed by client");
                        break;
                    }
                    Err(err) => {
                        tracing::info!(conn = %conn_id, error = %err, "connection lost");
                        break;
                    }
                };
                registry.touch(token).await;
                let msg: ClientMessage = match JsonCodec.decode(&bytes) {
                    Ok(msg) => msg,
                    Err(err) => {
                        tracing::warn!(conn = %conn_id, error = %err, "undecodable frame");
                        reply(outbox, error_reply(&err.into()));
                        continue;
                    }
                };
                if let Flow::Close = dispatch(registry, token, outbox, &mut heartbeat, msg).await {
                    break;
                }
            }
            _ = sleep_until(heartbeat.next_deadline()) => {
                if let HeartbeatStatus::SendPing(nonce) = heartbeat.poll(Instant::now()) {
                    reply(outbox, ServerMessage::HeartbeatPing { nonce });
                }
                if heartbeat.missed() >= config.missed_pongs_before_grace {
                    tracing::warn!(conn = %conn_id, missed = heartbeat.missed(), "client stopped answering heartbeats");
                    break;
                }
            }
            // The session was taken over by another connection, or the
            // socket stopped accepting writes.
            _ = &mut writer => {
                tracing::info!(conn = %conn_id, "writer stopped");
                return;
            }
        }
    }
    writer.abort();
}

async fn dispatch<R, A>(
    registry: &Registry<R, A>,
    token: &SessionToken,
    outbox: &WeakUnboundedSender<ServerMessage>,
    heartbeat: &mut HeartbeatMonitor,
    msg: ClientMessage,
) -> Flow
where
    R: BoardRules,
    A: AccountStore,
{
    tracing::debug!(%token, kind = msg.kind(), "dispatch");
    match msg {
        ClientMessage::HeartbeatPing { nonce } => {
            reply(outbox, ServerMessage::HeartbeatPong { nonce });
        }
        ClientMessage::HeartbeatPong { nonce } => {
            if !heartbeat.record_pong(nonce) {
                tracing::debug!(%token, nonce, "stale heartbeat pong");
            }
        }
        ClientMessage::FindMatch { map_preference } => {
            // Success is reported by the registry as `matchmaking_status`.
            if let Err(err) = registry.find_match(token, map_preference).await {
                reply(outbox, error_reply(&err));
            }
        }
        ClientMessage::CancelMatch => match registry.cancel_match(token).await {
            Ok(()) => reply(outbox, ServerMessage::MatchmakingCancelled),
            Err(err) => reply(outbox, error_reply(&err.into())),
        },
        ClientMessage::Ready => {
            let result = async { registry.route(token).await?.ready(token.clone()).await }.await;
            reply_on_room_error(outbox, result);
        }
        ClientMessage::Move { seq, action } => {
            let result = async {
                let room = registry.route(token).await?;
                room.submit_move(token.clone(), seq, action).await
            }
            .await;
            reply_on_room_error(outbox, result);
        }
        ClientMessage::RequestResync => {
            let result = async {
                let room = registry.route(token).await?;
                room.request_resync(token.clone()).await
            }
            .await;
            reply_on_room_error(outbox, result);
        }
        ClientMessage::AckResult => {
            let result = async { registry.route(token).await?.ack_result(token.clone()).await }.await;
            reply_on_room_error(outbox, result);
        }
        ClientMessage::Disconnect { reason } => {
            tracing::info!(%token, reason = reason.as_deref().unwrap_or(""), "client said goodbye");
            registry.close_session(token).await;
            return Flow::Close;
        }
        ClientMessage::Register { .. } | ClientMessage::Login { .. } | ClientMessage::Reconnect { .. } => {
            let err = ProtocolError::InvalidMessage("already logged in".into());
            tracing::warn!(%token, error = %err, "auth message after login");
            reply(outbox, error_reply(&err.into()));
        }
    }
    Flow::Continue
}

fn reply_on_room_error(outbox: &WeakUnboundedSender<ServerMessage>, result: Result<(), RoomError>) {
    if let Err(err) = result {
        reply(outbox, error_reply(&err.into()));
    }
}

/// Pushes `msg` if the session still owns this connection's writer.
fn reply(outbox: &WeakUnboundedSender<ServerMessage>, msg: ServerMessage) {
    if let Some(outbox) = outbox.upgrade() {
        let _ = outbox.send(msg);
    }
}

/// The `error` message sent for a rejected request.
fn error_reply(err: &StackClashError) -> ServerMessage {
    let (code, kind) = match err {
        StackClashError::Protocol(_) => (400, ErrorKind::Protocol),
        StackClashError::Session(_) => (401, ErrorKind::Auth),
        StackClashError::Queue(_) => (409, ErrorKind::Queue),
        StackClashError::Room(_) => (409, ErrorKind::Room),
        StackClashError::Transport(_) => (500, ErrorKind::Internal),
    };
    ServerMessage::error(code, kind, err.to_string())
}
