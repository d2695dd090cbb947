use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Frames larger than this are dropped without a response.
pub const MAX_FRAME_SIZE: usize = 65536;
pub const MAX_NICK_LEN: usize = 24;
/// Separates the nickname from the optional trip password in a join request.
pub const PASSWORD_DELIMITER: char = '#';

/// Messages sent from the server to clients.
///
/// Serialized as a JSON object whose `cmd` field names the variant. The
/// server adds a `time` field at send time, see [`Stamped`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum ServerMessage {
    Warn {
        text: String,
    },
    Info {
        text: String,
    },
    Chat {
        nick: String,
        text: String,
        #[serde(default, skip_serializing_if = "is_false")]
        admin: bool,
        #[serde(default, rename = "mod", skip_serializing_if = "is_false")]
        moderator: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trip: Option<String>,
    },
    OnlineAdd {
        nick: String,
    },
    OnlineRemove {
        nick: String,
    },
    OnlineSet {
        nicks: Vec<String>,
    },
}

impl ServerMessage {
    pub fn warn(text: impl Into<String>) -> Self {
        ServerMessage::Warn { text: text.into() }
    }

    pub fn info(text: impl Into<String>) -> Self {
        ServerMessage::Info { text: text.into() }
    }

    /// Stamps the message with a millisecond epoch timestamp.
    pub fn stamp(self, time: u64) -> Stamped {
        Stamped {
            message: self,
            time,
        }
    }
}

/// A [`ServerMessage`] as it goes over the wire.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Stamped {
    #[serde(flatten)]
    pub message: ServerMessage,
    pub time: u64,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Nicknames are 1 to 24 ASCII letters, digits or underscores.
pub fn nickname_valid(nick: &str) -> bool {
    !nick.is_empty()
        && nick.len() <= MAX_NICK_LEN
        && nick.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Blank lines at either end of a message, or a message that is all whitespace
static EDGE_BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A\s+\z|\A\s*\n|\n\s*\z").unwrap_or_else(|_| unreachable!()));

static NEWLINE_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").unwrap_or_else(|_| unreachable!()));

/// Normalizes chat text before it is scored and broadcast.
///
/// Leading and trailing blank lines are removed and runs of three or more
/// newlines collapse to two. Indentation of the first non-blank line and
/// trailing spaces on the last line are kept. Text that is all whitespace
/// normalizes to an empty string.
pub fn normalize_chat_text(text: &str) -> String {
    let trimmed = EDGE_BLANK_LINES.replace_all(text, "");
    NEWLINE_RUNS.replace_all(&trimmed, "\n\n").into_owned()
}
