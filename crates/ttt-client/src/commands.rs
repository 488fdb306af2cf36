//! Parsing of interactive stdin commands.

/// A command typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `connect [host]`
    Connect(Option<String>),
    /// `play`: start matchmaking.
    Play,
    /// `cancel`: stop matchmaking.
    Cancel,
    /// `move <0-8>`
    Move(u8),
    Leave,
    Rejoin,
    Disconnect,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}', type 'help'")]
    Unknown(String),
    #[error("usage: move <0-8>")]
    MissingCell,
    #[error("'{0}' is not a cell, expected 0-8")]
    BadCell(String),
}

pub const HELP: &str = "\
commands:
  connect [host]   connect (and rejoin the last match)
  play             search for an opponent
  cancel           stop searching
  move <0-8>       mark a cell, row-major from the top left
  leave            leave the current match
  rejoin           try to rejoin the last match
  disconnect       close the connection
  quit             exit";

/// Parse one input line.
pub fn parse(line: &str) -> Result<Command, CommandError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err(CommandError::Empty);
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "connect" | "c" => Command::Connect(words.next().map(str::to_string)),
        "play" | "p" => Command::Play,
        "cancel" => Command::Cancel,
        "move" | "m" => {
            let cell = words.next().ok_or(CommandError::MissingCell)?;
            match cell.parse::<u8>() {
                Ok(index) if index <= 8 => Command::Move(index),
                _ => return Err(CommandError::BadCell(cell.to_string())),
            }
        }
        "leave" => Command::Leave,
        "rejoin" => Command::Rejoin,
        "disconnect" => Command::Disconnect,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(command)
}
