//! Notifications consumed by the presentation layer.

use tokio::sync::mpsc;

use crate::backend::{MatchDescriptor, MatchHandle};
use crate::messages::{ErrorMessage, StateMessage};

/// Everything the core reports to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A connection was established.
    Connected,
    /// The connection ended (local disconnect or remote close).
    Disconnected,
    /// Connect or reconnect failed.
    ConnectionError(String),
    /// A matchmaking ticket is open.
    SearchStarted,
    /// Searching stopped without a match.
    SearchCancelled,
    /// Starting a search failed.
    SearchError(String),
    /// The matchmaker paired us; the descriptor still needs joining.
    MatchFound(MatchDescriptor),
    /// A match was joined.
    Joined(MatchHandle),
    /// The joined match was left.
    Left,
    /// A board snapshot arrived.
    StateReceived(StateMessage),
    /// The terminal board snapshot arrived.
    GameOver(StateMessage),
    /// The server reported an error.
    ServerError(ErrorMessage),
    /// A local match operation failed.
    ClientError(String),
    /// A rejoin attempt finished.
    RejoinResult(bool),
}

/// Sending half of the event stream, cloned into every component.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl EventSink {
    /// Create a sink and the receiver the consumer reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit an event. Dropped silently once the consumer is gone.
    pub fn emit(&self, event: ClientEvent) {
        tracing::trace!(?event, "emit");
        let _ = self.tx.send(event);
    }
}
