//! Wires the session, matchmaking queue, match channel and rejoin
//! coordinator into one client and routes socket events between them.

use std::sync::{Arc, Weak};

use ttt_config::{Config, Prefs};

use crate::backend::{Backend, SocketEvent};
use crate::dispatch::DispatchHandle;
use crate::error::NetResult;
use crate::events::{ClientEvent, EventSink};
use crate::match_channel::MatchChannel;
use crate::matchmaking::{MatchmakingQueue, SearchRequest};
use crate::rejoin::RejoinCoordinator;
use crate::session::TransportSession;

/// The client core. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ClientShell {
    session: Arc<TransportSession>,
    matchmaking: Arc<MatchmakingQueue>,
    channel: Arc<MatchChannel>,
    rejoin: Arc<RejoinCoordinator>,
    search: SearchRequest,
}

impl ClientShell {
    /// Build every component and install the inbound router.
    pub fn new(
        backend: Arc<dyn Backend>,
        prefs: Arc<Prefs>,
        config: &Config,
        dispatcher: DispatchHandle,
        events: EventSink,
    ) -> Self {
        let session = Arc::new(TransportSession::new(
            backend,
            Arc::clone(&prefs),
            dispatcher,
            events.clone(),
        ));
        let matchmaking = Arc::new(MatchmakingQueue::new(Arc::clone(&session), events.clone()));
        let channel = Arc::new(MatchChannel::new(
            Arc::clone(&session),
            prefs,
            config.opcodes,
            events.clone(),
        ));
        let rejoin = Arc::new(RejoinCoordinator::new(
            Arc::clone(&session),
            Arc::clone(&channel),
            config.rejoin.clone(),
            events,
        ));

        let shell = Self {
            session,
            matchmaking,
            channel,
            rejoin,
            search: SearchRequest::from_config(&config.matchmaking),
        };
        shell.install_router(config.rejoin.enabled && config.rejoin.on_drop);
        shell
    }

    /// The session holds the router, so the router only holds weak
    /// references back to the components.
    fn install_router(&self, rejoin_on_drop: bool) {
        let session = Arc::downgrade(&self.session);
        let matchmaking = Arc::downgrade(&self.matchmaking);
        let channel = Arc::downgrade(&self.channel);
        let rejoin = Arc::downgrade(&self.rejoin);

        self.session.set_router(Arc::new(move |generation, event| {
            route(
                generation,
                event,
                &session,
                &matchmaking,
                &channel,
                &rejoin,
                rejoin_on_drop,
            );
        }));
    }

    /// Connect to `host`, then try to rejoin the last match.
    pub async fn connect(&self, host: &str) -> NetResult<()> {
        self.session.connect(host).await?;
        self.rejoin.try_rejoin().await;
        Ok(())
    }

    /// Open a matchmaking ticket with the configured request.
    pub async fn start_search(&self) -> NetResult<()> {
        self.matchmaking.start_search(&self.search).await
    }

    pub async fn cancel_search(&self) {
        self.matchmaking.cancel().await;
    }

    /// Leave the current match.
    pub async fn leave(&self) {
        self.channel.leave().await;
    }

    /// Mark a cell in the current match.
    pub async fn send_action(&self, index: u8) -> NetResult<()> {
        self.channel.send_action(index).await
    }

    pub async fn try_rejoin(&self) -> bool {
        self.rejoin.try_rejoin().await
    }

    /// Stop any rejoin attempt and close the connection.
    pub async fn disconnect(&self) {
        self.rejoin.cancel();
        self.matchmaking.handle_connection_lost();
        self.channel.handle_connection_lost();
        self.session.disconnect().await;
    }

    /// Follow-up work for an event the consumer received: join a found match,
    /// and leave a finished one without keeping it for rejoin.
    pub async fn react(&self, event: &ClientEvent) {
        match event {
            ClientEvent::MatchFound(descriptor) => {
                // Failures are reported as events.
                let _ = self.channel.join_from_matchmaking(descriptor.clone()).await;
            }
            ClientEvent::GameOver(_) => {
                self.channel.clear_last_match_cache();
                self.channel.leave().await;
            }
            _ => {}
        }
    }

    pub fn session(&self) -> Arc<TransportSession> {
        Arc::clone(&self.session)
    }

    pub fn matchmaking(&self) -> Arc<MatchmakingQueue> {
        Arc::clone(&self.matchmaking)
    }

    pub fn channel(&self) -> Arc<MatchChannel> {
        Arc::clone(&self.channel)
    }

    pub fn rejoin(&self) -> Arc<RejoinCoordinator> {
        Arc::clone(&self.rejoin)
    }
}

fn route(
    generation: u64,
    event: SocketEvent,
    session: &Weak<TransportSession>,
    matchmaking: &Weak<MatchmakingQueue>,
    channel: &Weak<MatchChannel>,
    rejoin: &Weak<RejoinCoordinator>,
    rejoin_on_drop: bool,
) {
    match event {
        SocketEvent::MatchData {
            match_id,
            op_code,
            data,
        } => {
            if let Some(channel) = channel.upgrade() {
                channel.handle_inbound(&match_id, op_code, &data);
            }
        }
        SocketEvent::MatchmakerMatched(descriptor) => {
            if let Some(matchmaking) = matchmaking.upgrade() {
                matchmaking.handle_matched(descriptor);
            }
        }
        SocketEvent::Closed => {
            let Some(session) = session.upgrade() else {
                return;
            };
            if !session.handle_closed(generation) {
                return;
            }
            if let Some(matchmaking) = matchmaking.upgrade() {
                matchmaking.handle_connection_lost();
            }
            if let Some(channel) = channel.upgrade() {
                channel.handle_connection_lost();
            }
            if rejoin_on_drop && let Some(rejoin) = rejoin.upgrade() {
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn(async move {
                            rejoin.try_rejoin().await;
                        });
                    }
                    Err(_) => tracing::warn!("No runtime available, skipping rejoin"),
                }
            }
        }
    }
}
