//! Transport session: authentication plus the single live socket.
//!
//! A [`TransportSession`] owns at most one [`Connection`] at a time. Each
//! connection carries a generation number; a pump task forwards its socket
//! events into the dispatch queue tagged with that generation, so a close
//! reported by a replaced socket is recognised as stale and ignored.
//!
//! Opening a connection is serialized: `connect` and `reconnect_socket` hold
//! the connect gate from authentication until the new socket is installed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use ttt_config::{LAST_HOST_KEY, Prefs};

use crate::backend::{Backend, Session, Socket, SocketEvent, SocketLink};
use crate::dispatch::DispatchHandle;
use crate::error::{NetError, NetResult};
use crate::events::{ClientEvent, EventSink};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Authenticating or opening a socket.
    Connecting,
    /// A socket is live.
    Connected,
    /// No socket.
    Disconnected,
}

/// Observable connection state backed by a [`watch`] channel.
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
    rx: watch::Receiver<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx, rx }
    }

    /// Set the current state, notifying all subscribers.
    pub fn set(&self, state: ConnectionState) {
        let _ = self.tx.send(state);
    }

    /// Return a new subscriber receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.rx.clone()
    }

    /// Return the current state without blocking.
    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }
}

/// Callback run on the logic thread for every socket event, with the
/// generation of the connection that produced it.
pub type InboundRouter = Arc<dyn Fn(u64, SocketEvent) + Send + Sync>;

/// One live socket plus the task forwarding its events.
struct Connection {
    generation: u64,
    socket: Arc<dyn Socket>,
    pump: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    host: Option<String>,
    session: Option<Session>,
    connection: Option<Connection>,
}

/// Authenticated session and its realtime connection.
pub struct TransportSession {
    backend: Arc<dyn Backend>,
    prefs: Arc<Prefs>,
    events: EventSink,
    dispatcher: DispatchHandle,
    state: ConnectionStateWatch,
    inner: Mutex<Inner>,
    router: Arc<Mutex<Option<InboundRouter>>>,
    generation: AtomicU64,
    connect_gate: AsyncMutex<()>,
}

impl TransportSession {
    /// Create a disconnected session.
    pub fn new(
        backend: Arc<dyn Backend>,
        prefs: Arc<Prefs>,
        dispatcher: DispatchHandle,
        events: EventSink,
    ) -> Self {
        Self {
            backend,
            prefs,
            events,
            dispatcher,
            state: ConnectionStateWatch::new(),
            inner: Mutex::new(Inner::default()),
            router: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
            connect_gate: AsyncMutex::new(()),
        }
    }

    /// Install the handler that receives socket events on the logic thread.
    pub fn set_router(&self, router: InboundRouter) {
        *self.router.lock().unwrap_or_else(|p| p.into_inner()) = Some(router);
    }

    /// Authenticate and open a fresh connection to `host`.
    ///
    /// On failure emits [`ClientEvent::ConnectionError`] and tears down any
    /// partial connection. A session obtained before a socket failure is kept
    /// so [`reconnect_socket`](Self::reconnect_socket) can reuse it.
    pub async fn connect(&self, host: &str) -> NetResult<()> {
        let _gate = self.connect_gate.lock().await;
        let result = self.establish(host).await;
        if let Err(e) = &result {
            tracing::warn!("Connect to {host} failed: {e}");
            self.events.emit(ClientEvent::ConnectionError(e.to_string()));
            self.disconnect().await;
        }
        result
    }

    async fn establish(&self, host: &str) -> NetResult<()> {
        let device_id = self
            .prefs
            .device_id()
            .map_err(|e| NetError::Auth(format!("device id unavailable: {e}")))?;

        self.state.set(ConnectionState::Connecting);
        let session = self.backend.authenticate_device(host, &device_id).await?;
        {
            let mut inner = self.lock();
            inner.host = Some(host.to_string());
            inner.session = Some(session.clone());
        }

        let link = self.backend.connect_socket(host, &session).await?;
        self.install(link).await;

        if let Err(e) = self.prefs.set(LAST_HOST_KEY, host) {
            tracing::warn!("Failed to remember last host: {e}");
        }
        self.state.set(ConnectionState::Connected);
        tracing::info!(user_id = %session.user_id, "Connected to {host}");
        self.events.emit(ClientEvent::Connected);
        Ok(())
    }

    /// Open a new connection with the stored session.
    ///
    /// A no-op when already connected, including when a concurrent
    /// `connect` finished while this call waited for the gate.
    pub async fn reconnect_socket(&self) -> NetResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        let _gate = self.connect_gate.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        let (host, session) = {
            let inner = self.lock();
            match (inner.host.clone(), inner.session.clone()) {
                (Some(host), Some(session)) => (host, session),
                _ => return Err(NetError::NoSession),
            }
        };

        self.state.set(ConnectionState::Connecting);
        match self.backend.connect_socket(&host, &session).await {
            Ok(link) => {
                self.install(link).await;
                self.state.set(ConnectionState::Connected);
                tracing::info!("Socket reconnected to {host}");
                self.events.emit(ClientEvent::Connected);
                Ok(())
            }
            Err(e) => {
                self.state.set(ConnectionState::Disconnected);
                let reason = match e {
                    NetError::Socket(reason) => reason,
                    other => other.to_string(),
                };
                tracing::debug!("Socket reconnect failed: {reason}");
                self.events.emit(ClientEvent::ConnectionError(reason.clone()));
                Err(NetError::Socket(reason))
            }
        }
    }

    /// Close the live connection, if any. Always emits
    /// [`ClientEvent::Disconnected`].
    pub async fn disconnect(&self) {
        let connection = self.lock().connection.take();
        if let Some(connection) = connection {
            connection.pump.abort();
            connection.socket.close().await;
            tracing::info!(generation = connection.generation, "Disconnected");
        }
        self.state.set(ConnectionState::Disconnected);
        self.events.emit(ClientEvent::Disconnected);
    }

    /// React to a socket close reported on the logic thread.
    ///
    /// Returns `true` when `generation` is the live connection and it was
    /// torn down; stale generations are ignored.
    pub fn handle_closed(&self, generation: u64) -> bool {
        let connection = {
            let mut inner = self.lock();
            match &inner.connection {
                Some(live) if live.generation == generation => inner.connection.take(),
                _ => None,
            }
        };
        let Some(connection) = connection else {
            tracing::debug!(generation, "Ignoring close from a replaced socket");
            return false;
        };

        connection.pump.abort();
        self.state.set(ConnectionState::Disconnected);
        tracing::warn!(generation, "Connection lost");
        self.events.emit(ClientEvent::Disconnected);
        true
    }

    /// Whether a live, connected socket exists.
    pub fn is_connected(&self) -> bool {
        self.connected_socket().is_some()
    }

    /// The live socket, when connected.
    pub fn connected_socket(&self) -> Option<Arc<dyn Socket>> {
        self.lock()
            .connection
            .as_ref()
            .filter(|c| c.socket.is_connected())
            .map(|c| Arc::clone(&c.socket))
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Host of the last successful authentication.
    pub fn host(&self) -> Option<String> {
        self.lock().host.clone()
    }

    /// Whether a session has been obtained.
    pub fn has_session(&self) -> bool {
        self.lock().session.is_some()
    }

    /// Replace the live connection with `link`, then close the one it
    /// displaced.
    async fn install(&self, link: SocketLink) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let pump = self.spawn_pump(generation, link.events);
        let previous = self.lock().connection.replace(Connection {
            generation,
            socket: link.socket,
            pump,
        });
        if let Some(previous) = previous {
            previous.pump.abort();
            previous.socket.close().await;
            tracing::debug!(generation = previous.generation, "Replaced previous connection");
        }
    }

    /// Forward socket events into the dispatch queue until the socket's
    /// stream ends or the pump is aborted.
    fn spawn_pump(
        &self,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<SocketEvent>,
    ) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        let router = Arc::clone(&self.router);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let route = router.lock().unwrap_or_else(|p| p.into_inner()).clone();
                let Some(route) = route else {
                    tracing::trace!("No router installed, dropping {event:?}");
                    continue;
                };
                if !dispatcher.enqueue(move || route(generation, event)) {
                    break;
                }
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}
