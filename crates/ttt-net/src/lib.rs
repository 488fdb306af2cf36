//! Realtime tic-tac-toe client core: connection, matchmaking, match channel
//! and rejoin, plus a TCP backend speaking length-prefixed JSON frames.

pub mod backend;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod framing;
pub mod match_channel;
pub mod matchmaking;
pub mod messages;
pub mod protocol;
pub mod rejoin;
pub mod session;
pub mod shell;
pub mod tcp_client;

#[cfg(test)]
mod mock;

pub use backend::{
    Backend, JoinTarget, MatchDescriptor, MatchHandle, MatchmakingTicket, Session, Socket,
    SocketEvent, SocketLink,
};
pub use dispatch::{DispatchHandle, DispatchQueue};
pub use error::{NetError, NetResult};
pub use events::{ClientEvent, EventSink};
pub use framing::{FrameConfig, FrameError, read_frame, write_frame};
pub use match_channel::MatchChannel;
pub use matchmaking::{MatchmakingQueue, SearchRequest};
pub use messages::{
    ActionMessage, ErrorMessage, InboundMessage, Mark, Outcome, StateMessage, WINNER_DRAW,
};
pub use rejoin::RejoinCoordinator;
pub use session::{ConnectionState, ConnectionStateWatch, InboundRouter, TransportSession};
pub use shell::ClientShell;
pub use tcp_client::{TcpBackend, TcpSocket};
