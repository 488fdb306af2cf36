//! Plain-text presentation of client events.

use ttt_net::{ClientEvent, Mark, Outcome, StateMessage};

fn symbol(value: u8) -> char {
    match Mark::from_value(value) {
        Some(Mark::X) => 'X',
        Some(Mark::O) => 'O',
        None => '.',
    }
}

/// Three text rows; cells of the winning line are bracketed.
pub fn board(state: &StateMessage) -> String {
    let line = state.highlight_line();
    let rows: Vec<String> = state
        .board
        .chunks(3)
        .enumerate()
        .map(|(row, cells)| {
            cells
                .iter()
                .enumerate()
                .map(|(col, &value)| {
                    let index = (row * 3 + col) as u8;
                    if line.is_some_and(|l| l.contains(&index)) {
                        format!("[{}]", symbol(value))
                    } else {
                        format!(" {} ", symbol(value))
                    }
                })
                .collect::<Vec<_>>()
                .join("|")
        })
        .collect();
    rows.join("\n")
}

/// One-line status for a snapshot, from the local player's point of view.
pub fn status(state: &StateMessage) -> String {
    let mine = state.local_mark();
    match state.outcome() {
        Outcome::Draw => "Draw.".to_string(),
        Outcome::Won(mark) if Some(mark) == mine => "You win!".to_string(),
        Outcome::Won(_) => "You lose.".to_string(),
        Outcome::InProgress if state.is_local_turn() => {
            let deadline = state
                .deadline_tick
                .map(|tick| format!(" (deadline tick {tick})"))
                .unwrap_or_default();
            format!("Your turn as {}{deadline}.", symbol(state.next))
        }
        Outcome::InProgress => "Waiting for the opponent.".to_string(),
    }
}

/// Text printed for an event.
pub fn describe(event: &ClientEvent) -> String {
    match event {
        ClientEvent::Connected => "Connected.".to_string(),
        ClientEvent::Disconnected => "Disconnected.".to_string(),
        ClientEvent::ConnectionError(reason) => format!("Connection failed: {reason}"),
        ClientEvent::SearchStarted => "Searching for an opponent...".to_string(),
        ClientEvent::SearchCancelled => "Search stopped.".to_string(),
        ClientEvent::SearchError(reason) => format!("Search failed: {reason}"),
        ClientEvent::MatchFound(found) => {
            format!("Opponent found ({} players), joining.", found.users.len())
        }
        ClientEvent::Joined(handle) => format!("Joined match {}.", handle.match_id),
        ClientEvent::Left => "Left the match.".to_string(),
        ClientEvent::StateReceived(state) | ClientEvent::GameOver(state) => {
            format!("{}\n{}", board(state), status(state))
        }
        ClientEvent::ServerError(error) => format!("Server: {} ({})", error.message, error.code),
        ClientEvent::ClientError(reason) => format!("Error: {reason}"),
        ClientEvent::RejoinResult(true) => "Rejoined the previous match.".to_string(),
        ClientEvent::RejoinResult(false) => "No match to rejoin.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(board: [u8; 9], next: u8, winner: u8, seat_you: u8) -> StateMessage {
        StateMessage {
            board,
            next,
            winner,
            winning_line: None,
            deadline_tick: None,
            seat_you,
        }
    }

    #[test]
    fn test_board_layout() {
        let s = state([1, 0, 2, 0, 1, 0, 0, 0, 0], 2, 0, 1);
        assert_eq!(board(&s), " X | . | O \n . | X | . \n . | . | . ");
    }

    #[test]
    fn test_winning_line_is_bracketed() {
        let mut s = state([1, 1, 1, 2, 2, 0, 0, 0, 0], 0, 1, 0);
        s.winning_line = Some(vec![0, 1, 2]);
        assert!(board(&s).starts_with("[X]|[X]|[X]\n"));
        assert_eq!(status(&s), "You win!");
    }

    #[test]
    fn test_partial_line_is_not_highlighted() {
        let mut s = state([1, 1, 1, 2, 2, 0, 0, 0, 0], 0, 1, 1);
        s.winning_line = Some(vec![0, 1]);
        assert!(!board(&s).contains('['));
        assert_eq!(status(&s), "You lose.");
    }

    #[test]
    fn test_turn_status() {
        let mut s = state([0; 9], 1, 0, 0);
        s.deadline_tick = Some(50);
        assert_eq!(status(&s), "Your turn as X (deadline tick 50).");
        assert_eq!(status(&state([0; 9], 2, 0, 0)), "Waiting for the opponent.");
        assert_eq!(status(&state([1; 9], 0, 3, 0)), "Draw.");
    }
}
