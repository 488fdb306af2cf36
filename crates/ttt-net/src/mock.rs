//! Scripted in-process backend for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use ttt_config::{Config, Prefs};

use crate::backend::{
    Backend, JoinTarget, MatchDescriptor, MatchHandle, MatchmakingTicket, Session, Socket,
    SocketEvent, SocketLink,
};
use crate::dispatch::DispatchQueue;
use crate::error::{NetError, NetResult};
use crate::events::{ClientEvent, EventSink};
use crate::shell::ClientShell;

#[derive(Default)]
struct Script {
    auth_failures: VecDeque<String>,
    connect_failures: VecDeque<String>,
    add_failures: VecDeque<NetError>,
    remove_failures: VecDeque<NetError>,
    join_failures: VecDeque<NetError>,
    send_failures: VecDeque<NetError>,
    devices: Vec<String>,
    calls: Vec<String>,
    sent: Vec<(String, i64, Vec<u8>)>,
    sockets: Vec<Arc<MockSocket>>,
    connect_times: Vec<Instant>,
    close_delay: Duration,
    /// Push a pairing for the new ticket, then hold the reply this long.
    matched_during_add: Option<Duration>,
    /// Push this state for the joined match, then hold the reply this long.
    state_during_join: Option<(Vec<u8>, Duration)>,
}

#[derive(Default)]
struct Shared {
    script: Mutex<Script>,
    auth_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    tickets: AtomicUsize,
}

impl Shared {
    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }
}

/// Backend whose failures are queued up front by the test.
#[derive(Default)]
pub struct MockBackend {
    shared: Arc<Shared>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_auth(&self, reason: &str) {
        self.shared.script().auth_failures.push_back(reason.to_string());
    }

    pub fn fail_connects(&self, count: usize, reason: &str) {
        let mut script = self.shared.script();
        for _ in 0..count {
            script.connect_failures.push_back(reason.to_string());
        }
    }

    pub fn fail_add_matchmaker(&self, error: NetError) {
        self.shared.script().add_failures.push_back(error);
    }

    pub fn fail_remove_matchmaker(&self, error: NetError) {
        self.shared.script().remove_failures.push_back(error);
    }

    pub fn fail_joins(&self, count: usize, error: NetError) {
        let mut script = self.shared.script();
        for _ in 0..count {
            script.join_failures.push_back(error.clone());
        }
    }

    pub fn fail_send(&self, error: NetError) {
        self.shared.script().send_failures.push_back(error);
    }

    /// Make every `close()` take `delay`.
    pub fn delay_close(&self, delay: Duration) {
        self.shared.script().close_delay = delay;
    }

    /// `add_matchmaker` pushes the pairing for its ticket before replying
    /// `delay` later.
    pub fn match_during_add(&self, delay: Duration) {
        self.shared.script().matched_during_add = Some(delay);
    }

    /// `join_match` pushes `state` (op code 1) for the joined match before
    /// replying `delay` later.
    pub fn state_during_join(&self, state: &str, delay: Duration) {
        self.shared.script().state_during_join = Some((state.as_bytes().to_vec(), delay));
    }

    pub fn auth_calls(&self) -> usize {
        self.shared.auth_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.shared.connect_calls.load(Ordering::SeqCst)
    }

    pub fn authenticated_devices(&self) -> Vec<String> {
        self.shared.script().devices.clone()
    }

    /// Socket operations in call order, e.g. `join:M1`.
    pub fn calls(&self) -> Vec<String> {
        self.shared.script().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn sent(&self) -> Vec<(String, i64, Vec<u8>)> {
        self.shared.script().sent.clone()
    }

    /// Sockets opened and not yet closed by either side.
    pub fn live_sockets(&self) -> usize {
        self.shared
            .script()
            .sockets
            .iter()
            .filter(|s| s.is_connected())
            .count()
    }

    /// When each `connect_socket` call arrived, failed ones included.
    pub fn connect_times(&self) -> Vec<Instant> {
        self.shared.script().connect_times.clone()
    }

    pub fn last_socket(&self) -> Arc<MockSocket> {
        Arc::clone(self.shared.script().sockets.last().expect("no socket opened"))
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn authenticate_device(&self, _host: &str, device_id: &str) -> NetResult<Session> {
        self.shared.auth_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.shared.script();
        if let Some(reason) = script.auth_failures.pop_front() {
            return Err(NetError::Auth(reason));
        }
        script.devices.push(device_id.to_string());
        Ok(Session {
            token: format!("tok-{device_id}"),
            user_id: format!("user-{device_id}"),
            device_id: device_id.to_string(),
        })
    }

    async fn connect_socket(&self, _host: &str, _session: &Session) -> NetResult<SocketLink> {
        self.shared.connect_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.shared.script();
        script.connect_times.push(Instant::now());
        if let Some(reason) = script.connect_failures.pop_front() {
            return Err(NetError::Socket(reason));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let socket = Arc::new(MockSocket {
            shared: Arc::clone(&self.shared),
            connected: AtomicBool::new(true),
            events: tx,
        });
        script.sockets.push(Arc::clone(&socket));
        Ok(SocketLink {
            socket,
            events: rx,
        })
    }
}

/// Socket half of [`MockBackend`].
pub struct MockSocket {
    shared: Arc<Shared>,
    connected: AtomicBool,
    events: mpsc::UnboundedSender<SocketEvent>,
}

impl MockSocket {
    /// Deliver a push as if it came from the server.
    pub fn push(&self, event: SocketEvent) {
        let _ = self.events.send(event);
    }

    /// Simulate the server dropping the connection.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.push(SocketEvent::Closed);
    }

    fn ensure_connected(&self) -> NetResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(NetError::NotConnected)
        }
    }

    fn record(&self, call: String) {
        self.shared.script().calls.push(call);
    }
}

#[async_trait]
impl Socket for MockSocket {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn add_matchmaker(
        &self,
        _query: &str,
        _min_count: u32,
        _max_count: u32,
        _properties: &HashMap<String, String>,
    ) -> NetResult<MatchmakingTicket> {
        self.ensure_connected()?;
        self.record("add_matchmaker".to_string());
        if let Some(error) = self.shared.script().add_failures.pop_front() {
            return Err(error);
        }
        let n = self.shared.tickets.fetch_add(1, Ordering::SeqCst) + 1;
        let ticket = MatchmakingTicket {
            id: format!("T{n}"),
        };
        let matched_during_add = self.shared.script().matched_during_add;
        if let Some(delay) = matched_during_add {
            self.push(SocketEvent::MatchmakerMatched(MatchDescriptor {
                ticket: ticket.id.clone(),
                token: "mm-token".to_string(),
                match_id: None,
                users: vec!["user-self".to_string(), "user-other".to_string()],
            }));
            tokio::time::sleep(delay).await;
        }
        Ok(ticket)
    }

    async fn remove_matchmaker(&self, ticket: &MatchmakingTicket) -> NetResult<()> {
        self.ensure_connected()?;
        self.record(format!("remove_matchmaker:{}", ticket.id));
        match self.shared.script().remove_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn join_match(&self, target: &JoinTarget) -> NetResult<MatchHandle> {
        self.ensure_connected()?;
        let match_id = match target {
            JoinTarget::Matched(descriptor) => descriptor
                .match_id
                .clone()
                .unwrap_or_else(|| "M-matched".to_string()),
            JoinTarget::Id(id) => id.clone(),
        };
        self.record(format!("join:{match_id}"));
        let state_during_join = self.shared.script().state_during_join.clone();
        if let Some((data, delay)) = state_during_join {
            self.push(SocketEvent::MatchData {
                match_id: match_id.clone(),
                op_code: 1,
                data,
            });
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.shared.script().join_failures.pop_front() {
            return Err(error);
        }
        Ok(MatchHandle {
            match_id,
            self_user_id: "user-self".to_string(),
        })
    }

    async fn leave_match(&self, match_id: &str) -> NetResult<()> {
        self.ensure_connected()?;
        self.record(format!("leave:{match_id}"));
        Ok(())
    }

    async fn send_match_state(&self, match_id: &str, op_code: i64, data: &[u8]) -> NetResult<()> {
        self.ensure_connected()?;
        let mut script = self.shared.script();
        if let Some(error) = script.send_failures.pop_front() {
            return Err(error);
        }
        script.sent.push((match_id.to_string(), op_code, data.to_vec()));
        Ok(())
    }

    async fn close(&self) {
        let delay = self.shared.script().close_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.record("close".to_string());
    }
}

/// A fully wired shell over [`MockBackend`].
pub struct Harness {
    pub shell: ClientShell,
    pub backend: Arc<MockBackend>,
    pub prefs: Arc<Prefs>,
    pub queue: DispatchQueue,
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_prefs(config, Arc::new(Prefs::in_memory()))
    }

    pub fn with_prefs(config: Config, prefs: Arc<Prefs>) -> Self {
        let backend = Arc::new(MockBackend::new());
        let queue = DispatchQueue::new();
        let (sink, events) = EventSink::channel();
        let shell = ClientShell::new(
            backend.clone(),
            Arc::clone(&prefs),
            &config,
            queue.handle(),
            sink,
        );
        Self {
            shell,
            backend,
            prefs,
            queue,
            events,
        }
    }

    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    /// Let I/O tasks run, then run one logic tick.
    pub async fn pump(&mut self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.queue.drain();
    }
}
