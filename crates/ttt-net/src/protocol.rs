//! Frames exchanged with the match server over TCP.
//!
//! Each frame is a JSON object tagged by `type`. Requests carry a client
//! chosen correlation id (`cid`) which the server echoes in its reply;
//! server pushes carry none.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Authenticate a device id; sent on a short-lived connection.
    AuthenticateDevice {
        /// Stable device identity.
        device_id: String,
        /// Deployment server key.
        server_key: String,
        /// Create the account when unknown.
        create: bool,
    },
    /// First frame on a realtime socket: bind it to a session.
    Hello {
        /// Session token from authentication.
        token: String,
    },
    /// Liveness probe.
    Ping {
        /// Correlation id.
        cid: u32,
    },
    /// Open a matchmaking ticket.
    AddMatchmaker {
        /// Correlation id.
        cid: u32,
        /// Matchmaker query.
        query: String,
        /// Minimum players.
        min_count: u32,
        /// Maximum players.
        max_count: u32,
        /// Ticket properties.
        properties: HashMap<String, String>,
    },
    /// Retract a matchmaking ticket.
    RemoveMatchmaker {
        /// Correlation id.
        cid: u32,
        /// Ticket to retract.
        ticket: String,
    },
    /// Join a match by id or matchmaker token.
    JoinMatch {
        /// Correlation id.
        cid: u32,
        /// Match id, for direct joins.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        match_id: Option<String>,
        /// Matchmaker token, for matched joins.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    /// Leave a match.
    LeaveMatch {
        /// Correlation id.
        cid: u32,
        /// Match to leave.
        match_id: String,
    },
    /// Match-channel payload. Fire and forget.
    MatchData {
        /// Target match.
        match_id: String,
        /// Message-type code.
        op_code: i64,
        /// UTF-8 JSON body.
        data: String,
    },
}

/// Server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Successful device authentication.
    Session {
        /// Bearer token.
        token: String,
        /// Account id.
        user_id: String,
        /// Whether the account was created by this call.
        #[serde(default)]
        created: bool,
    },
    /// The socket is bound to the session.
    Welcome {
        /// Account id.
        user_id: String,
    },
    /// Generic success reply.
    Ok {
        /// Correlation id.
        cid: u32,
    },
    /// Matchmaking ticket opened.
    Ticket {
        /// Correlation id.
        cid: u32,
        /// Ticket id.
        ticket: String,
    },
    /// Match joined.
    Match {
        /// Correlation id.
        cid: u32,
        /// Match id.
        match_id: String,
        /// Local participant's user id.
        self_user_id: String,
    },
    /// Failure reply, or an unsolicited error when `cid` is absent.
    Error {
        /// Correlation id of the failed request.
        #[serde(default)]
        cid: Option<u32>,
        /// Machine-readable code.
        code: String,
        /// Human-readable description.
        message: String,
    },
    /// Match-channel payload push.
    MatchData {
        /// Source match.
        match_id: String,
        /// Message-type code.
        op_code: i64,
        /// UTF-8 JSON body.
        data: String,
    },
    /// Matchmaker pairing push.
    MatchmakerMatched {
        /// Ticket that matched.
        ticket: String,
        /// Join token.
        token: String,
        /// Match id, if already created.
        #[serde(default)]
        match_id: Option<String>,
        /// Paired user ids.
        #[serde(default)]
        users: Vec<String>,
    },
}

impl ServerFrame {
    /// Correlation id of a reply, `None` for pushes.
    pub fn reply_cid(&self) -> Option<u32> {
        match self {
            ServerFrame::Ok { cid }
            | ServerFrame::Ticket { cid, .. }
            | ServerFrame::Match { cid, .. } => Some(*cid),
            ServerFrame::Error { cid, .. } => *cid,
            ServerFrame::Session { .. }
            | ServerFrame::Welcome { .. }
            | ServerFrame::MatchData { .. }
            | ServerFrame::MatchmakerMatched { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_are_tagged_snake_case() {
        let json = serde_json::to_string(&ClientFrame::Ping { cid: 7 }).unwrap();
        assert_eq!(json, r#"{"type":"ping","cid":7}"#);
    }

    #[test]
    fn test_join_by_id_omits_token() {
        let frame = ClientFrame::JoinMatch {
            cid: 1,
            match_id: Some("M1".to_string()),
            token: None,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""match_id":"M1""#));
        assert!(!json.contains("token"));
    }

    #[test]
    fn test_reply_cid_distinguishes_pushes() {
        let reply: ServerFrame =
            serde_json::from_str(r#"{"type":"error","cid":3,"code":"x","message":"y"}"#).unwrap();
        assert_eq!(reply.reply_cid(), Some(3));

        let push: ServerFrame = serde_json::from_str(
            r#"{"type":"match_data","match_id":"M1","op_code":1,"data":"{}"}"#,
        )
        .unwrap();
        assert_eq!(push.reply_cid(), None);

        let unsolicited: ServerFrame =
            serde_json::from_str(r#"{"type":"error","code":"x","message":"y"}"#).unwrap();
        assert_eq!(unsolicited.reply_cid(), None);
    }
}
