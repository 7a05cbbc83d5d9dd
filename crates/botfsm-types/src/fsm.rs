//! FSM context identity and payload types.
//!
//! A `StorageKey` names one conversational context (bot, chat, user). Every
//! read and write path derives the row key through [`StorageKey::derive`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Separator between the identifier fields of a derived key.
///
/// Decimal integers never contain it, so the derived key is injective.
pub const KEY_SEPARATOR: char = ':';

/// Structured data payload attached to an FSM context.
pub type StateData = serde_json::Map<String, serde_json::Value>;

/// Identifies one FSM context: a user inside a chat, as seen by a bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageKey {
    pub bot_id: i64,
    pub chat_id: i64,
    pub user_id: i64,
}

impl StorageKey {
    pub fn new(bot_id: i64, chat_id: i64, user_id: i64) -> Self {
        Self {
            bot_id,
            chat_id,
            user_id,
        }
    }

    /// Build the row key `"{bot_id}:{chat_id}:{user_id}"`.
    pub fn derive(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{}",
            self.bot_id, self.chat_id, self.user_id
        )
    }
}

/// Error returned when a string is not a derived storage key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid storage key '{0}': expected '<bot_id>:<chat_id>:<user_id>'")]
pub struct ParseStorageKeyError(pub String);

impl FromStr for StorageKey {
    type Err = ParseStorageKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseStorageKeyError(s.to_string());

        let mut parts = s.split(KEY_SEPARATOR);
        let mut next_id = || -> Result<i64, ParseStorageKeyError> {
            parts
                .next()
                .ok_or_else(invalid)?
                .parse::<i64>()
                .map_err(|_| invalid())
        };

        let bot_id = next_id()?;
        let chat_id = next_id()?;
        let user_id = next_id()?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self::new(bot_id, chat_id, user_id))
    }
}
