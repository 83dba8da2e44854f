//! `StackClashServer` builder and accept loop.
//!
//! This is the entry point for running a StackClash match server. It ties
//! together all the layers: transport → protocol → session → matchmaking →
//! room.

use std::future::{Future, pending};
use std::sync::Arc;
use std::time::Duration;

use stackclash_room::{BoardRules, RoomConfig, RoomNotice};
use stackclash_session::{AccountStore, SessionConfig};
use stackclash_transport::{Transport, WebSocketTransport};
use tokio::sync::mpsc;

use crate::handler::handle_connection;
use crate::{Registry, StackClashError};

/// Everything the server needs besides its rules and account store.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Where the WebSocket listener binds.
    pub bind_addr: String,
    pub session: SessionConfig,
    pub room: RoomConfig,
    /// How often the reaper closes sessions whose grace ran out.
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8765".to_string(),
            session: SessionConfig::default(),
            room: RoomConfig::default(),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// Builder for configuring and starting a StackClash server.
///
/// # Example
///
/// ```rust,ignore
/// use stackclash::prelude::*;
///
/// let server = StackClashServerBuilder::new()
///     .bind("0.0.0.0:8765")
///     .build(StandardRules, MemoryAccountStore::new())
///     .await?;
/// server.run().await
/// ```
#[derive(Debug, Default)]
pub struct StackClashServerBuilder {
    config: ServerConfig,
}

impl StackClashServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    pub fn room_config(mut self, config: RoomConfig) -> Self {
        self.config.room = config;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Binds a WebSocket listener and builds the server around it.
    pub async fn build<R, A>(
        self,
        rules: R,
        accounts: A,
    ) -> Result<StackClashServer<WebSocketTransport, R, A>, StackClashError>
    where
        R: BoardRules,
        A: AccountStore,
    {
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;
        Ok(self.build_with_transport(transport, rules, accounts))
    }

    /// Builds the server around an already bound transport.
    pub fn build_with_transport<T, R, A>(
        self,
        transport: T,
        rules: R,
        accounts: A,
    ) -> StackClashServer<T, R, A>
    where
        T: Transport,
        R: BoardRules,
        A: AccountStore,
    {
        let ServerConfig {
            session,
            room,
            sweep_interval,
            ..
        } = self.config;
        let (registry, notices) = Registry::new(rules, accounts, session, room);
        StackClashServer {
            transport,
            registry: Arc::new(registry),
            notices,
            sweep_interval,
        }
    }
}

/// A StackClash match server, ready to accept connections. Built by
/// [`StackClashServerBuilder`].
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start.
pub struct StackClashServer<T: Transport, R: BoardRules, A: AccountStore> {
    transport: T,
    registry: Arc<Registry<R, A>>,
    notices: mpsc::UnboundedReceiver<RoomNotice>,
    sweep_interval: Duration,
}

impl<R: BoardRules, A: AccountStore> StackClashServer<WebSocketTransport, R, A> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }
}

impl<T, R, A> StackClashServer<T, R, A>
where
    T: Transport,
    R: BoardRules,
    A: AccountStore,
{
    /// The shared state, for diagnostics and tests.
    pub fn registry(&self) -> Arc<Registry<R, A>> {
        Arc::clone(&self.registry)
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), StackClashError> {
        self.run_until(pending()).await
    }

    /// Runs the accept loop until `shutdown` resolves, then closes every
    /// room and stops the transport.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<(), StackClashError> {
        let reaper = self
            .registry
            .spawn_reaper(self.notices, self.sweep_interval);
        tracing::info!("StackClash server running");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let registry = Arc::clone(&self.registry);
                        tokio::spawn(handle_connection(conn, registry));
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                    }
                },
                _ = &mut shutdown => break,
            }
        }

        tracing::info!("StackClash server shutting down");
        self.registry.shutdown().await;
        reaper.abort();
        self.transport.shutdown().await?;
        Ok(())
    }
}
