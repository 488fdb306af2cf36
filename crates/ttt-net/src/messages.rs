//! Match-channel message types.
//!
//! Every match-channel message is an integer op code plus a UTF-8 JSON body.
//! The op code values come from [`OpCodes`]; decoding dispatches on exact
//! code match and ignores codes it does not know.

use serde::{Deserialize, Serialize};
use ttt_config::OpCodes;

use crate::error::NetResult;

/// Winner value the server uses for a drawn game.
pub const WINNER_DRAW: u8 = 3;

/// A player's mark on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    /// Cell value 1, seat 0.
    X,
    /// Cell value 2, seat 1.
    O,
}

impl Mark {
    /// Decode a board/turn value (1 or 2).
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(Mark::X),
            2 => Some(Mark::O),
            _ => None,
        }
    }

    /// Board/turn value for this mark.
    pub fn value(self) -> u8 {
        match self {
            Mark::X => 1,
            Mark::O => 2,
        }
    }
}

/// Result of a match as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No winner yet.
    InProgress,
    /// The given mark won.
    Won(Mark),
    /// Board filled without a winner.
    Draw,
}

/// Authoritative board snapshot pushed by the server.
///
/// Each message replaces the previous one entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMessage {
    /// Cell marks, row-major: 0 empty, 1 X, 2 O.
    pub board: [u8; 9],
    /// Mark whose turn is next.
    #[serde(default)]
    pub next: u8,
    /// 0 none, 1 X, 2 O, 3 draw.
    #[serde(default)]
    pub winner: u8,
    /// Winning cell indices, when the server sends them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winning_line: Option<Vec<u8>>,
    /// Turn deadline in server ticks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_tick: Option<i64>,
    /// Seat of the local participant (0 or 1).
    #[serde(default)]
    pub seat_you: u8,
}

impl StateMessage {
    /// Decode the winner field.
    pub fn outcome(&self) -> Outcome {
        match self.winner {
            WINNER_DRAW => Outcome::Draw,
            value => Mark::from_value(value).map_or(Outcome::InProgress, Outcome::Won),
        }
    }

    /// Mark owned by the local participant: seat 0 plays X, seat 1 plays O.
    pub fn local_mark(&self) -> Option<Mark> {
        match self.seat_you {
            0 => Some(Mark::X),
            1 => Some(Mark::O),
            _ => None,
        }
    }

    /// Whether the game is still running and the next move is ours.
    pub fn is_local_turn(&self) -> bool {
        self.outcome() == Outcome::InProgress
            && self.local_mark().is_some_and(|mark| mark.value() == self.next)
    }

    /// The three cells to highlight, only when the server sent a full line.
    pub fn highlight_line(&self) -> Option<[u8; 3]> {
        match self.winning_line.as_deref() {
            Some(&[a, b, c]) => Some([a, b, c]),
            _ => None,
        }
    }
}

/// Application-level error reported by the server. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Machine-readable error code.
    #[serde(default)]
    pub code: String,
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
}

/// Client action: mark a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMessage {
    /// Board cell index (0-8).
    pub index: u8,
}

/// A decoded inbound match-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Board snapshot.
    State(StateMessage),
    /// Terminal board snapshot with the winner set.
    GameOver(StateMessage),
    /// Server error report.
    Error(ErrorMessage),
}

/// Encode a player action body.
pub fn encode_action(index: u8) -> NetResult<Vec<u8>> {
    Ok(serde_json::to_vec(&ActionMessage { index })?)
}

/// Decode a player action body, as the server does.
pub fn decode_action(data: &[u8]) -> NetResult<ActionMessage> {
    Ok(serde_json::from_slice(data)?)
}

/// Decode an inbound body by its op code.
///
/// Returns `Ok(None)` for codes this client does not know.
pub fn decode_inbound(op_code: i64, data: &[u8], codes: &OpCodes) -> NetResult<Option<InboundMessage>> {
    let message = if op_code == codes.state {
        InboundMessage::State(serde_json::from_slice(data)?)
    } else if op_code == codes.game_over {
        InboundMessage::GameOver(serde_json::from_slice(data)?)
    } else if op_code == codes.error {
        InboundMessage::Error(serde_json::from_slice(data)?)
    } else {
        return Ok(None);
    };
    Ok(Some(message))
}
