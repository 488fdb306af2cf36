//! TCP implementation of [`Backend`] and [`Socket`].
//!
//! Authentication runs over a short-lived connection. A realtime socket is a
//! second connection that sends `Hello` and waits for `Welcome`, then splits
//! into a reader task (replies and pushes) and a heartbeat task. Requests
//! resolve through oneshot channels keyed by correlation id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::time::Instant;
use ttt_config::ServerConfig;

use crate::backend::{
    Backend, JoinTarget, MatchDescriptor, MatchHandle, MatchmakingTicket, Session, Socket,
    SocketEvent, SocketLink,
};
use crate::error::{NetError, NetResult};
use crate::framing::{FrameConfig, FrameError, read_json, write_json};
use crate::protocol::{ClientFrame, ServerFrame};
use crate::session::{ConnectionState, ConnectionStateWatch};

type Pending = Arc<Mutex<HashMap<u32, oneshot::Sender<ServerFrame>>>>;

fn lock_pending(pending: &Pending) -> MutexGuard<'_, HashMap<u32, oneshot::Sender<ServerFrame>>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unexpected(frame: ServerFrame) -> NetError {
    NetError::Socket(format!("unexpected reply: {frame:?}"))
}

/// Connects to a match server over length-prefixed JSON frames.
pub struct TcpBackend {
    server: ServerConfig,
    frame: FrameConfig,
}

impl TcpBackend {
    /// Create a backend using the given server settings.
    pub fn new(server: ServerConfig) -> Self {
        Self {
            server,
            frame: FrameConfig::default(),
        }
    }

    async fn dial(&self, host: &str) -> NetResult<TcpStream> {
        let addr = format!("{host}:{}", self.server.port);
        let stream = tokio::time::timeout(self.server.connect_timeout(), TcpStream::connect(&addr))
            .await
            .map_err(|_| NetError::Socket(format!("connect to {addr} timed out")))??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn read_reply(&self, stream: &mut TcpStream) -> NetResult<ServerFrame> {
        tokio::time::timeout(self.server.request_timeout(), read_json(stream, &self.frame))
            .await
            .map_err(|_| NetError::Socket("server did not reply in time".to_string()))?
            .map_err(NetError::from)
    }
}

#[async_trait]
impl Backend for TcpBackend {
    async fn authenticate_device(&self, host: &str, device_id: &str) -> NetResult<Session> {
        let mut stream = self.dial(host).await?;
        let request = ClientFrame::AuthenticateDevice {
            device_id: device_id.to_string(),
            server_key: self.server.server_key.clone(),
            create: true,
        };
        write_json(&mut stream, &request, &self.frame).await?;

        match self.read_reply(&mut stream).await? {
            ServerFrame::Session {
                token,
                user_id,
                created,
            } => {
                tracing::info!(%user_id, created, "Device authenticated");
                Ok(Session {
                    token,
                    user_id,
                    device_id: device_id.to_string(),
                })
            }
            ServerFrame::Error { code, message, .. } => {
                Err(NetError::Auth(format!("{code}: {message}")))
            }
            other => Err(NetError::Auth(format!("unexpected reply: {other:?}"))),
        }
    }

    async fn connect_socket(&self, host: &str, session: &Session) -> NetResult<SocketLink> {
        let mut stream = self.dial(host).await?;
        let hello = ClientFrame::Hello {
            token: session.token.clone(),
        };
        write_json(&mut stream, &hello, &self.frame).await?;

        match self.read_reply(&mut stream).await? {
            ServerFrame::Welcome { user_id } => {
                tracing::debug!(%user_id, "Socket bound to session");
            }
            ServerFrame::Error { code, message, .. } => {
                return Err(NetError::Socket(format!("{code}: {message}")));
            }
            other => return Err(unexpected(other)),
        }

        Ok(TcpSocket::start(stream, self.frame.clone(), &self.server))
    }
}

/// A live realtime connection to the match server.
pub struct TcpSocket {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    state: Arc<ConnectionStateWatch>,
    pending: Pending,
    next_cid: AtomicU32,
    frame: FrameConfig,
    request_timeout: Duration,
    /// Wakes the reader so it reports the socket as closed.
    dead: Arc<Notify>,
    /// Sending `true` stops the reader and heartbeat without a close event.
    shutdown_tx: watch::Sender<bool>,
}

impl TcpSocket {
    fn start(stream: TcpStream, frame: FrameConfig, server: &ServerConfig) -> SocketLink {
        let state = Arc::new(ConnectionStateWatch::new());
        state.set(ConnectionState::Connected);

        let (reader, writer) = stream.into_split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let last_seen = Arc::new(Mutex::new(Instant::now()));
        let dead = Arc::new(Notify::new());

        let socket = Arc::new(Self {
            writer: tokio::sync::Mutex::new(writer),
            state: Arc::clone(&state),
            pending: Arc::clone(&pending),
            next_cid: AtomicU32::new(1),
            frame: frame.clone(),
            request_timeout: server.request_timeout(),
            dead: Arc::clone(&dead),
            shutdown_tx,
        });

        let reader_ctx = ReaderContext {
            frame,
            pending,
            events: events_tx,
            state,
            last_seen: Arc::clone(&last_seen),
            dead,
        };
        tokio::spawn(reader_ctx.run(reader, shutdown_rx.clone()));

        tokio::spawn(heartbeat_loop(
            Arc::downgrade(&socket),
            server.heartbeat_interval(),
            server.heartbeat_timeout(),
            last_seen,
            shutdown_rx,
        ));

        SocketLink {
            socket,
            events: events_rx,
        }
    }

    fn next_cid(&self) -> u32 {
        self.next_cid.fetch_add(1, Ordering::Relaxed)
    }

    async fn send(&self, frame: &ClientFrame) -> NetResult<()> {
        let mut writer = self.writer.lock().await;
        write_json(&mut *writer, frame, &self.frame).await?;
        Ok(())
    }

    async fn request(&self, build: impl FnOnce(u32) -> ClientFrame) -> NetResult<ServerFrame> {
        if !self.is_connected() {
            return Err(NetError::NotConnected);
        }

        let cid = self.next_cid();
        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(cid, tx);

        if let Err(e) = self.send(&build(cid)).await {
            lock_pending(&self.pending).remove(&cid);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(ServerFrame::Error { code, message, .. })) => {
                Err(NetError::Rejected(format!("{code}: {message}")))
            }
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(NetError::Socket("connection closed before reply".to_string())),
            Err(_) => {
                lock_pending(&self.pending).remove(&cid);
                Err(NetError::Socket(format!("request {cid} timed out")))
            }
        }
    }

    fn mark_dead(&self) {
        self.state.set(ConnectionState::Disconnected);
        self.dead.notify_one();
    }
}

#[async_trait]
impl Socket for TcpSocket {
    fn is_connected(&self) -> bool {
        self.state.current() == ConnectionState::Connected
    }

    async fn add_matchmaker(
        &self,
        query: &str,
        min_count: u32,
        max_count: u32,
        properties: &HashMap<String, String>,
    ) -> NetResult<MatchmakingTicket> {
        let reply = self
            .request(|cid| ClientFrame::AddMatchmaker {
                cid,
                query: query.to_string(),
                min_count,
                max_count,
                properties: properties.clone(),
            })
            .await?;
        match reply {
            ServerFrame::Ticket { ticket, .. } => Ok(MatchmakingTicket { id: ticket }),
            other => Err(unexpected(other)),
        }
    }

    async fn remove_matchmaker(&self, ticket: &MatchmakingTicket) -> NetResult<()> {
        let reply = self
            .request(|cid| ClientFrame::RemoveMatchmaker {
                cid,
                ticket: ticket.id.clone(),
            })
            .await?;
        match reply {
            ServerFrame::Ok { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn join_match(&self, target: &JoinTarget) -> NetResult<MatchHandle> {
        let (match_id, token) = match target {
            JoinTarget::Matched(descriptor) => {
                (descriptor.match_id.clone(), Some(descriptor.token.clone()))
            }
            JoinTarget::Id(id) => (Some(id.clone()), None),
        };
        let reply = self
            .request(|cid| ClientFrame::JoinMatch {
                cid,
                match_id,
                token,
            })
            .await?;
        match reply {
            ServerFrame::Match {
                match_id,
                self_user_id,
                ..
            } => Ok(MatchHandle {
                match_id,
                self_user_id,
            }),
            other => Err(unexpected(other)),
        }
    }

    async fn leave_match(&self, match_id: &str) -> NetResult<()> {
        let reply = self
            .request(|cid| ClientFrame::LeaveMatch {
                cid,
                match_id: match_id.to_string(),
            })
            .await?;
        match reply {
            ServerFrame::Ok { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn send_match_state(&self, match_id: &str, op_code: i64, data: &[u8]) -> NetResult<()> {
        if !self.is_connected() {
            return Err(NetError::NotConnected);
        }
        let data = std::str::from_utf8(data)
            .map_err(|e| NetError::Decode(e.to_string()))?
            .to_string();
        self.send(&ClientFrame::MatchData {
            match_id: match_id.to_string(),
            op_code,
            data,
        })
        .await
    }

    async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        self.state.set(ConnectionState::Disconnected);
        lock_pending(&self.pending).clear();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// State owned by the reader task.
struct ReaderContext {
    frame: FrameConfig,
    pending: Pending,
    events: mpsc::UnboundedSender<SocketEvent>,
    state: Arc<ConnectionStateWatch>,
    last_seen: Arc<Mutex<Instant>>,
    dead: Arc<Notify>,
}

impl ReaderContext {
    /// Read frames until the peer goes away, the heartbeat gives up, or a
    /// local close. Only the first two report [`SocketEvent::Closed`].
    async fn run(self, mut reader: OwnedReadHalf, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                result = read_json::<ServerFrame, _>(&mut reader, &self.frame) => {
                    match result {
                        Ok(frame) => {
                            *self.last_seen.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
                            self.route(frame);
                        }
                        Err(FrameError::Json(e)) => {
                            tracing::warn!("Dropping malformed frame: {e}");
                        }
                        Err(e) => {
                            tracing::info!("Socket closed by peer: {e}");
                            break;
                        }
                    }
                }
                _ = self.dead.notified() => {
                    tracing::warn!("Socket declared dead");
                    break;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        return;
                    }
                }
            }
        }

        self.state.set(ConnectionState::Disconnected);
        lock_pending(&self.pending).clear();
        let _ = self.events.send(SocketEvent::Closed);
    }

    fn route(&self, frame: ServerFrame) {
        if let Some(cid) = frame.reply_cid() {
            match lock_pending(&self.pending).remove(&cid) {
                Some(waiter) => {
                    let _ = waiter.send(frame);
                }
                None => tracing::trace!("Reply for untracked request {cid}"),
            }
            return;
        }

        let event = match frame {
            ServerFrame::MatchData {
                match_id,
                op_code,
                data,
            } => SocketEvent::MatchData {
                match_id,
                op_code,
                data: data.into_bytes(),
            },
            ServerFrame::MatchmakerMatched {
                ticket,
                token,
                match_id,
                users,
            } => SocketEvent::MatchmakerMatched(MatchDescriptor {
                ticket,
                token,
                match_id,
                users,
            }),
            ServerFrame::Error { code, message, .. } => {
                tracing::warn!("Unsolicited server error {code}: {message}");
                return;
            }
            other => {
                tracing::debug!("Ignoring unexpected frame {other:?}");
                return;
            }
        };
        let _ = self.events.send(event);
    }
}

/// Ping every `interval`. Any inbound frame counts as a sign of life; after
/// `timeout` of silence the socket is declared dead.
async fn heartbeat_loop(
    socket: Weak<TcpSocket>,
    interval: Duration,
    timeout: Duration,
    last_seen: Arc<Mutex<Instant>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(socket) = socket.upgrade() else {
                    break;
                };
                if !socket.is_connected() {
                    break;
                }

                let silence = last_seen.lock().unwrap_or_else(|p| p.into_inner()).elapsed();
                if silence > timeout {
                    tracing::warn!("Heartbeat timeout, no traffic for {silence:?}");
                    socket.mark_dead();
                    break;
                }

                let ping = ClientFrame::Ping { cid: socket.next_cid() };
                if let Err(e) = socket.send(&ping).await {
                    tracing::warn!("Heartbeat send failed: {e}");
                    socket.mark_dead();
                    break;
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}
