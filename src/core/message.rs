use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::character::CharacterId;

pub type ChatId = u64;
pub type MessageId = u64;

/// Rejected swipe transitions. The message is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwipeError {
    #[error("Already at the beginning")]
    AtBeginning,
    #[error("Already at the end")]
    AtEnd,
    #[error("Version {index} does not exist (message has {count})")]
    NoSuchVersion { index: usize, count: usize },
}

/// A chat message with its alternative versions ("swipes").
///
/// Versions are append-only and `active_index` always points at one of
/// them. Both are private so every transition goes through the methods below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MessageRecord", into = "MessageRecord")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub character_id: CharacterId,
    /// Produced by the model rather than typed by the user
    pub generated: bool,
    pub created_at: DateTime<Utc>,
    versions: Vec<String>,
    active_index: usize,
}

/// Serialized shape of [`Message`], validated on the way in.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageRecord {
    id: MessageId,
    chat_id: ChatId,
    character_id: CharacterId,
    generated: bool,
    created_at: DateTime<Utc>,
    versions: Vec<String>,
    active_index: usize,
}

impl TryFrom<MessageRecord> for Message {
    type Error = String;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        if record.active_index >= record.versions.len() {
            return Err(format!(
                "message {}: active index {} out of range for {} versions",
                record.id,
                record.active_index,
                record.versions.len()
            ));
        }
        Ok(Message {
            id: record.id,
            chat_id: record.chat_id,
            character_id: record.character_id,
            generated: record.generated,
            created_at: record.created_at,
            versions: record.versions,
            active_index: record.active_index,
        })
    }
}

impl From<Message> for MessageRecord {
    fn from(message: Message) -> Self {
        MessageRecord {
            id: message.id,
            chat_id: message.chat_id,
            character_id: message.character_id,
            generated: message.generated,
            created_at: message.created_at,
            versions: message.versions,
            active_index: message.active_index,
        }
    }
}

impl Message {
    /// A message with a single version holding `text`.
    pub fn new(
        id: MessageId,
        chat_id: ChatId,
        character_id: CharacterId,
        text: impl Into<String>,
        generated: bool,
    ) -> Self {
        Self {
            id,
            chat_id,
            character_id,
            generated,
            created_at: Utc::now(),
            versions: vec![text.into()],
            active_index: 0,
        }
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn active_text(&self) -> &str {
        &self.versions[self.active_index]
    }

    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    /// Append an empty version and make it active. Returns the new index.
    pub fn new_swipe(&mut self) -> usize {
        self.versions.push(String::new());
        self.active_index = self.versions.len() - 1;
        self.active_index
    }

    pub fn swipe_left(&mut self) -> Result<usize, SwipeError> {
        if self.active_index == 0 {
            return Err(SwipeError::AtBeginning);
        }
        self.active_index -= 1;
        Ok(self.active_index)
    }

    pub fn swipe_right(&mut self) -> Result<usize, SwipeError> {
        if self.active_index + 1 >= self.versions.len() {
            return Err(SwipeError::AtEnd);
        }
        self.active_index += 1;
        Ok(self.active_index)
    }

    pub fn set_active_index(&mut self, index: usize) -> Result<(), SwipeError> {
        if index >= self.versions.len() {
            return Err(SwipeError::NoSuchVersion {
                index,
                count: self.versions.len(),
            });
        }
        self.active_index = index;
        Ok(())
    }

    /// Overwrite the active version in place. Used both for user edits and
    /// for progressive writes while a generation streams in.
    pub fn set_active_text(&mut self, text: impl Into<String>) {
        self.versions[self.active_index] = text.into();
    }

    /// Overwrite one version by index, whether or not it is active.
    pub fn set_version_text(
        &mut self,
        index: usize,
        text: impl Into<String>,
    ) -> Result<(), SwipeError> {
        let count = self.versions.len();
        let version = self
            .versions
            .get_mut(index)
            .ok_or(SwipeError::NoSuchVersion { index, count })?;
        *version = text.into();
        Ok(())
    }
}
