//! Matchmaking queue: one open ticket at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use ttt_config::MatchmakingConfig;

use crate::backend::{MatchDescriptor, MatchmakingTicket};
use crate::error::{NetError, NetResult};
use crate::events::{ClientEvent, EventSink};
use crate::session::TransportSession;

/// Parameters for a matchmaking ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub min_count: u32,
    pub max_count: u32,
    pub properties: HashMap<String, String>,
}

impl SearchRequest {
    pub fn from_config(config: &MatchmakingConfig) -> Self {
        Self {
            query: config.query.clone(),
            min_count: config.min_count,
            max_count: config.max_count,
            properties: config.properties.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    ticket: Option<MatchmakingTicket>,
    searching: bool,
    /// An `add_matchmaker` call is in flight.
    starting: bool,
    /// `cancel` ran while a start was in flight.
    cancel_pending: bool,
    /// The matched listener is armed. Set as soon as a start begins, so a
    /// pairing pushed ahead of the ticket reply is not lost.
    listening: bool,
    /// Pairing accepted before `add_matchmaker` returned.
    early_match: Option<MatchDescriptor>,
}

/// How a finished ticket request resolves.
enum Started {
    Open,
    Retract,
    Paired(MatchDescriptor),
    Failed,
}

/// Opens, tracks and retracts the matchmaking ticket.
pub struct MatchmakingQueue {
    session: Arc<TransportSession>,
    events: EventSink,
    state: Mutex<QueueState>,
}

impl MatchmakingQueue {
    pub fn new(session: Arc<TransportSession>, events: EventSink) -> Self {
        Self {
            session,
            events,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Open a ticket and arm the matched listener.
    ///
    /// Does nothing while a search is open or being opened.
    pub async fn start_search(&self, request: &SearchRequest) -> NetResult<()> {
        let Some(socket) = self.session.connected_socket() else {
            self.events
                .emit(ClientEvent::SearchError("Socket is not connected.".to_string()));
            return Err(NetError::NotConnected);
        };

        {
            let mut state = self.lock();
            if state.searching || state.starting {
                tracing::debug!("Search already in progress");
                return Ok(());
            }
            state.starting = true;
            state.cancel_pending = false;
            state.listening = true;
            state.early_match = None;
        }

        let result = socket
            .add_matchmaker(
                &request.query,
                request.min_count,
                request.max_count,
                &request.properties,
            )
            .await;

        let outcome = {
            let mut state = self.lock();
            state.starting = false;
            let early_match = state.early_match.take();
            match &result {
                Ok(_) if state.cancel_pending => {
                    state.cancel_pending = false;
                    state.listening = false;
                    Started::Retract
                }
                Ok(ticket) => match early_match {
                    Some(descriptor) => Started::Paired(descriptor),
                    None => {
                        state.ticket = Some(ticket.clone());
                        state.searching = true;
                        Started::Open
                    }
                },
                Err(_) => {
                    state.listening = false;
                    Started::Failed
                }
            }
        };

        match (result, outcome) {
            (Ok(ticket), Started::Retract) => {
                tracing::debug!(ticket = %ticket.id, "Search cancelled while starting, retracting");
                if let Err(e) = socket.remove_matchmaker(&ticket).await {
                    tracing::warn!("Failed to retract ticket {}: {e}", ticket.id);
                }
                Ok(())
            }
            (Ok(ticket), Started::Paired(descriptor)) => {
                tracing::info!(ticket = %ticket.id, "Matchmaking started and already paired");
                self.events.emit(ClientEvent::SearchStarted);
                self.emit_found(descriptor);
                Ok(())
            }
            (Ok(ticket), _) => {
                tracing::info!(ticket = %ticket.id, "Matchmaking started");
                self.events.emit(ClientEvent::SearchStarted);
                Ok(())
            }
            (Err(e), _) => {
                tracing::warn!("Failed to start matchmaking: {e}");
                self.events.emit(ClientEvent::SearchError(e.to_string()));
                Err(e)
            }
        }
    }

    /// Stop searching. Always emits [`ClientEvent::SearchCancelled`].
    pub async fn cancel(&self) {
        let ticket = {
            let mut state = self.lock();
            if state.starting {
                state.cancel_pending = true;
            }
            state.searching = false;
            state.listening = false;
            state.early_match = None;
            state.ticket.take()
        };

        if let Some(ticket) = ticket {
            match self.session.connected_socket() {
                Some(socket) => {
                    if let Err(e) = socket.remove_matchmaker(&ticket).await {
                        tracing::warn!("Failed to remove ticket {}: {e}", ticket.id);
                    }
                }
                None => tracing::debug!("Not connected, ticket {} left to expire", ticket.id),
            }
        }

        tracing::info!("Matchmaking cancelled");
        self.events.emit(ClientEvent::SearchCancelled);
    }

    /// Handle a matchmaker pairing. Returns `true` if it was accepted.
    ///
    /// A pairing that lands while the ticket request is still in flight is
    /// held and reported right after [`ClientEvent::SearchStarted`].
    pub fn handle_matched(&self, descriptor: MatchDescriptor) -> bool {
        {
            let mut state = self.lock();
            if !state.listening {
                tracing::debug!("Ignoring matchmaker result while not searching");
                return false;
            }
            if let Some(ticket) = &state.ticket
                && !descriptor.ticket.is_empty()
                && ticket.id != descriptor.ticket
            {
                tracing::debug!("Ignoring result for stale ticket {}", descriptor.ticket);
                return false;
            }
            state.listening = false;
            if state.starting {
                tracing::debug!("Pairing arrived before the ticket reply");
                state.early_match = Some(descriptor);
                return true;
            }
            state.searching = false;
            state.ticket = None;
        }

        self.emit_found(descriptor);
        true
    }

    fn emit_found(&self, descriptor: MatchDescriptor) {
        tracing::info!(users = descriptor.users.len(), "Match found");
        self.events.emit(ClientEvent::MatchFound(descriptor));
    }

    /// The connection dropped and took the ticket with it.
    pub fn handle_connection_lost(&self) {
        let was_searching = {
            let mut state = self.lock();
            let was = state.searching;
            state.searching = false;
            state.listening = false;
            state.early_match = None;
            state.ticket = None;
            was
        };
        if was_searching {
            tracing::info!("Connection lost during matchmaking");
            self.events.emit(ClientEvent::SearchCancelled);
        }
    }

    pub fn is_searching(&self) -> bool {
        self.lock().searching
    }

    pub fn ticket(&self) -> Option<MatchmakingTicket> {
        self.lock().ticket.clone()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}
