//! The seam between the client core and a concrete match server.
//!
//! A [`Backend`] authenticates devices and opens sockets; a [`Socket`] is one
//! live connection. Inbound pushes from a socket arrive on the
//! [`SocketLink::events`] channel, from the socket's own I/O task.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::NetResult;

/// Authenticated credential tied to a device identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Opaque bearer token presented when opening sockets.
    pub token: String,
    /// Account id the device maps to.
    pub user_id: String,
    /// Device identity used to authenticate.
    pub device_id: String,
}

/// One outstanding matchmaking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchmakingTicket {
    /// Server-assigned ticket id.
    pub id: String,
}

/// Pairing result pushed by the matchmaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchDescriptor {
    /// Ticket this result answers.
    pub ticket: String,
    /// Join token for the matched game.
    pub token: String,
    /// Match id, when the server already created the match.
    pub match_id: Option<String>,
    /// User ids paired together.
    pub users: Vec<String>,
}

/// A joined match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchHandle {
    /// Match id.
    pub match_id: String,
    /// Local participant's user id within the match.
    pub self_user_id: String,
}

/// What to join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinTarget {
    /// A match handed over by the matchmaker.
    Matched(MatchDescriptor),
    /// A known match id (rejoin).
    Id(String),
}

/// Inbound push from a live socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Match-channel payload.
    MatchData {
        /// Match the payload belongs to.
        match_id: String,
        /// Message-type code.
        op_code: i64,
        /// UTF-8 JSON body.
        data: Vec<u8>,
    },
    /// The matchmaker paired this client.
    MatchmakerMatched(MatchDescriptor),
    /// The socket closed without a local `close()`.
    Closed,
}

/// A freshly opened socket and its inbound event stream.
pub struct SocketLink {
    /// The socket itself.
    pub socket: Arc<dyn Socket>,
    /// Pushes from the socket's I/O task.
    pub events: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Authenticates devices and opens sockets against a match server.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Authenticate by device id, creating the account on first use.
    ///
    /// Repeating the call with the same device id yields the same account.
    async fn authenticate_device(&self, host: &str, device_id: &str) -> NetResult<Session>;

    /// Open a new realtime socket bound to `session`.
    async fn connect_socket(&self, host: &str, session: &Session) -> NetResult<SocketLink>;
}

/// One live realtime connection.
#[async_trait]
pub trait Socket: Send + Sync {
    /// Whether the connection is still up.
    fn is_connected(&self) -> bool;

    /// Open a matchmaking ticket.
    async fn add_matchmaker(
        &self,
        query: &str,
        min_count: u32,
        max_count: u32,
        properties: &HashMap<String, String>,
    ) -> NetResult<MatchmakingTicket>;

    /// Retract a matchmaking ticket.
    async fn remove_matchmaker(&self, ticket: &MatchmakingTicket) -> NetResult<()>;

    /// Join a match.
    async fn join_match(&self, target: &JoinTarget) -> NetResult<MatchHandle>;

    /// Leave a match.
    async fn leave_match(&self, match_id: &str) -> NetResult<()>;

    /// Send a match-channel payload.
    async fn send_match_state(&self, match_id: &str, op_code: i64, data: &[u8]) -> NetResult<()>;

    /// Close the connection. Does not produce [`SocketEvent::Closed`].
    async fn close(&self);
}
