//! Session log record parsing.
//!
//! A record is one whitespace-separated line:
//! `<user>.<session> <ACTION> [ignored...]`.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::cache::is_valid_key;

/// Action keyword carried by a record. Matched case-sensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionAction {
    Connected,
    Disconnected,
}

impl SessionAction {
    /// Signed change this action applies to the user's counter.
    pub fn delta(self) -> i64 {
        match self {
            SessionAction::Connected => 1,
            SessionAction::Disconnected => -1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionAction::Connected => "CONNECTED",
            SessionAction::Disconnected => "DISCONNECTED",
        }
    }
}

impl fmt::Display for SessionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    /// Cache key: the part of the composite id before the first `.`.
    pub user: String,
    /// Everything after the first `.`.
    pub session: String,
    pub action: SessionAction,
}

/// Why a record was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("malformed record: {reason}")]
    Malformed { reason: &'static str },

    #[error("unknown action {action:?} for user {user:?}")]
    UnknownAction { user: String, action: String },
}

impl SessionEvent {
    /// Parse one record line.
    pub fn parse(line: &str) -> Result<Self, RecordError> {
        let mut tokens = line.split_whitespace();
        let (Some(composite), Some(action)) = (tokens.next(), tokens.next()) else {
            return Err(RecordError::Malformed {
                reason: "fewer than two tokens",
            });
        };

        let Some((user, session)) = composite.split_once('.') else {
            return Err(RecordError::Malformed {
                reason: "identifier has no '.' separator",
            });
        };
        if user.is_empty() {
            return Err(RecordError::Malformed {
                reason: "empty user",
            });
        }
        if !is_valid_key(user) {
            return Err(RecordError::Malformed {
                reason: "user is not a valid cache key",
            });
        }

        let action = match action {
            "CONNECTED" => SessionAction::Connected,
            "DISCONNECTED" => SessionAction::Disconnected,
            other => {
                return Err(RecordError::UnknownAction {
                    user: user.to_string(),
                    action: other.to_string(),
                })
            }
        };

        Ok(Self {
            user: user.to_string(),
            session: session.to_string(),
            action,
        })
    }
}
