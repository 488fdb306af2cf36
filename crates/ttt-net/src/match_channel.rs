//! The joined match: membership, outbound actions and inbound decoding.
//!
//! The last joined match id is persisted so a later session can rejoin it.
//! Only an explicit leave or a finished game erases it; a dropped connection
//! keeps it.
//!
//! Payloads can arrive before the join reply does. While a join is in
//! flight they are held, then replayed for the match the join landed in.

use std::sync::{Arc, Mutex, MutexGuard};

use ttt_config::{LAST_MATCH_ID_KEY, OpCodes, Prefs};

use crate::backend::{JoinTarget, MatchDescriptor, MatchHandle};
use crate::error::{NetError, NetResult};
use crate::events::{ClientEvent, EventSink};
use crate::messages::{InboundMessage, StateMessage, decode_inbound, encode_action};
use crate::session::TransportSession;

/// Payloads held per in-flight join before they are dropped.
const MAX_HELD_PAYLOADS: usize = 32;

#[derive(Debug)]
struct HeldPayload {
    match_id: String,
    op_code: i64,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct ChannelState {
    current: Option<MatchHandle>,
    last_match_id: Option<String>,
    last_state: Option<StateMessage>,
    /// Joins awaiting their reply.
    joins_in_flight: usize,
    held: Vec<HeldPayload>,
}

/// Tracks the current match and translates its traffic into events.
pub struct MatchChannel {
    session: Arc<TransportSession>,
    prefs: Arc<Prefs>,
    events: EventSink,
    opcodes: OpCodes,
    state: Mutex<ChannelState>,
}

impl MatchChannel {
    /// Create a channel, restoring the last match id from `prefs`.
    pub fn new(
        session: Arc<TransportSession>,
        prefs: Arc<Prefs>,
        opcodes: OpCodes,
        events: EventSink,
    ) -> Self {
        let last_match_id = prefs.get(LAST_MATCH_ID_KEY).filter(|id| !id.is_empty());
        if let Some(id) = &last_match_id {
            tracing::debug!("Restored last match id {id}");
        }
        Self {
            session,
            prefs,
            events,
            opcodes,
            state: Mutex::new(ChannelState {
                last_match_id,
                ..Default::default()
            }),
        }
    }

    /// Join the match the matchmaker paired us into.
    pub async fn join_from_matchmaking(&self, descriptor: MatchDescriptor) -> NetResult<MatchHandle> {
        self.join(JoinTarget::Matched(descriptor)).await
    }

    /// Join a known match by id.
    pub async fn join_by_id(&self, match_id: &str) -> NetResult<MatchHandle> {
        self.join(JoinTarget::Id(match_id.to_string())).await
    }

    async fn join(&self, target: JoinTarget) -> NetResult<MatchHandle> {
        let Some(socket) = self.session.connected_socket() else {
            self.events
                .emit(ClientEvent::ClientError("Socket is not connected.".to_string()));
            return Err(NetError::NotConnected);
        };

        self.lock().joins_in_flight += 1;
        let result = socket.join_match(&target).await;
        let held = {
            let mut state = self.lock();
            state.joins_in_flight = state.joins_in_flight.saturating_sub(1);
            if state.joins_in_flight == 0 {
                std::mem::take(&mut state.held)
            } else {
                Vec::new()
            }
        };

        match result {
            Ok(handle) => {
                self.set_current_match(handle.clone());
                for payload in held {
                    if payload.match_id == handle.match_id {
                        self.deliver(payload.op_code, &payload.data);
                    }
                }
                Ok(handle)
            }
            Err(e) => {
                tracing::warn!("Join failed: {e}");
                self.events
                    .emit(ClientEvent::ClientError(format!("join failed: {e}")));
                Err(e)
            }
        }
    }

    fn set_current_match(&self, handle: MatchHandle) {
        {
            let mut state = self.lock();
            state.current = Some(handle.clone());
            state.last_match_id = Some(handle.match_id.clone());
            state.last_state = None;
        }
        if let Err(e) = self.prefs.set(LAST_MATCH_ID_KEY, &handle.match_id) {
            tracing::warn!("Failed to persist last match id: {e}");
        }
        tracing::info!(match_id = %handle.match_id, "Joined match");
        self.events.emit(ClientEvent::Joined(handle));
    }

    /// Leave the current match. A no-op when not in one.
    pub async fn leave(&self) {
        let Some(handle) = self.lock().current.take() else {
            tracing::debug!("Leave requested while not in a match");
            return;
        };

        match self.session.connected_socket() {
            Some(socket) => {
                if let Err(e) = socket.leave_match(&handle.match_id).await {
                    tracing::warn!("Leave of {} failed: {e}", handle.match_id);
                }
            }
            None => tracing::debug!("Not connected, leaving {} locally", handle.match_id),
        }

        self.lock().last_state = None;
        self.clear_last_match_cache();
        tracing::info!(match_id = %handle.match_id, "Left match");
        self.events.emit(ClientEvent::Left);
    }

    /// Mark cell `index` in the current match. Sent once, never retried.
    pub async fn send_action(&self, index: u8) -> NetResult<()> {
        let Some(handle) = self.current_match() else {
            self.events
                .emit(ClientEvent::ClientError("Not in a match.".to_string()));
            return Err(NetError::NotInMatch);
        };
        let Some(socket) = self.session.connected_socket() else {
            self.events.emit(ClientEvent::ClientError(
                "send action failed: socket is not connected".to_string(),
            ));
            return Err(NetError::NotConnected);
        };

        let body = encode_action(index)?;
        if let Err(e) = socket
            .send_match_state(&handle.match_id, self.opcodes.action, &body)
            .await
        {
            tracing::warn!("Action {index} not sent: {e}");
            self.events
                .emit(ClientEvent::ClientError(format!("send action failed: {e}")));
            return Err(e);
        }
        tracing::debug!(index, "Action sent");
        Ok(())
    }

    /// Decode a match-channel payload and emit the matching event.
    pub fn handle_inbound(&self, match_id: &str, op_code: i64, data: &[u8]) {
        {
            let mut state = self.lock();
            let joined = state
                .current
                .as_ref()
                .is_some_and(|handle| handle.match_id == match_id);
            if !joined {
                if state.joins_in_flight > 0 && state.held.len() < MAX_HELD_PAYLOADS {
                    tracing::debug!("Holding data for {match_id} until the join lands");
                    state.held.push(HeldPayload {
                        match_id: match_id.to_string(),
                        op_code,
                        data: data.to_vec(),
                    });
                } else {
                    tracing::debug!("Ignoring data for match {match_id}");
                }
                return;
            }
        }
        self.deliver(op_code, data);
    }

    fn deliver(&self, op_code: i64, data: &[u8]) {
        let message = match decode_inbound(op_code, data, &self.opcodes) {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::trace!(op_code, "Ignoring unknown op code");
                return;
            }
            Err(e) => {
                tracing::warn!(op_code, "Dropping undecodable payload: {e}");
                return;
            }
        };

        match message {
            InboundMessage::State(state) => {
                self.lock().last_state = Some(state.clone());
                self.events.emit(ClientEvent::StateReceived(state));
            }
            InboundMessage::GameOver(state) => {
                tracing::info!(winner = state.winner, "Game over");
                self.lock().last_state = Some(state.clone());
                self.events.emit(ClientEvent::GameOver(state));
            }
            InboundMessage::Error(error) => {
                tracing::warn!("Server error {}: {}", error.code, error.message);
                self.events.emit(ClientEvent::ServerError(error));
            }
        }
    }

    /// Forget the last match id, in memory and on disk.
    pub fn clear_last_match_cache(&self) {
        self.lock().last_match_id = None;
        if let Err(e) = self.prefs.remove(LAST_MATCH_ID_KEY) {
            tracing::warn!("Failed to clear last match id: {e}");
        }
    }

    /// The connection dropped: the membership is gone, the cache stays.
    pub fn handle_connection_lost(&self) {
        if let Some(handle) = self.lock().current.take() {
            tracing::info!(match_id = %handle.match_id, "Lost match membership with the connection");
        }
    }

    pub fn current_match(&self) -> Option<MatchHandle> {
        self.lock().current.clone()
    }

    pub fn last_match_id(&self) -> Option<String> {
        self.lock().last_match_id.clone()
    }

    pub fn last_state(&self) -> Option<StateMessage> {
        self.lock().last_state.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}
