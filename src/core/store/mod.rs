//! Storage boundary for chats, characters, messages, templates and presets.
//!
//! Every operation is a point read or write keyed by id. Implementations
//! must make `set_active_*` atomic: no reader ever sees zero or two active
//! templates (or presets).

mod fixtures;
mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fixtures::{load_fixtures, Fixtures};
pub use memory::InMemoryStore;

use crate::character::{Character, CharacterId};
use crate::core::message::{ChatId, Message, MessageId, SwipeError};
use crate::core::preset::{GeneratePreset, PresetId};
use crate::core::prompt::TemplateError;
use crate::core::template::{PromptTemplate, TemplateId};

/// Template and preset with this id can never be deleted.
pub const DEFAULT_ID: u64 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },
    #[error("The default {kind} cannot be deleted")]
    ProtectedDefault { kind: &'static str },
    #[error("No {kind} is marked active")]
    NoActive { kind: &'static str },
    #[error(transparent)]
    Swipe(#[from] SwipeError),
    #[error("A chat needs at least one character")]
    EmptyRoster,
    #[error("Character {character_id} is not part of chat {chat_id}")]
    NotInChat {
        chat_id: ChatId,
        character_id: CharacterId,
    },
    #[error("Invalid prompt template: {0}")]
    Template(#[from] TemplateError),
    #[error("Could not load built-in fixtures: {0}")]
    Fixtures(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub created_at: DateTime<Utc>,
    /// Participants, sorted by id
    pub character_ids: Vec<CharacterId>,
}

/// A chat with its participants and history loaded in one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSnapshot {
    pub chat: Chat,
    pub characters: Vec<Character>,
    /// Chronological
    pub messages: Vec<Message>,
}

impl ChatSnapshot {
    pub fn character(&self, id: CharacterId) -> Option<&Character> {
        self.characters.iter().find(|character| character.id == id)
    }

    pub fn user(&self) -> Option<&Character> {
        self.characters.iter().find(|character| character.is_user())
    }

    /// Everything before `message_id` in the history.
    pub fn history_before(&self, message_id: MessageId) -> &[Message] {
        let end = self
            .messages
            .iter()
            .position(|message| message.id == message_id)
            .unwrap_or(self.messages.len());
        &self.messages[..end]
    }
}

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Insert a character; its `id` is assigned by the store.
    async fn create_character(&self, character: Character) -> Result<Character, StoreError>;
    async fn get_character(&self, id: CharacterId) -> Result<Character, StoreError>;
    async fn list_characters(&self) -> Result<Vec<Character>, StoreError>;
    async fn update_character(&self, character: Character) -> Result<Character, StoreError>;
    /// Removes the character from every chat along with its messages.
    async fn delete_character(&self, id: CharacterId) -> Result<(), StoreError>;

    /// New chat with the given participants. Each participant's first
    /// message, if any, is added to the history.
    async fn create_chat(&self, character_ids: &[CharacterId]) -> Result<ChatSnapshot, StoreError>;
    async fn get_chat(&self, id: ChatId) -> Result<ChatSnapshot, StoreError>;
    async fn list_chats(&self) -> Result<Vec<Chat>, StoreError>;
    async fn delete_chat(&self, id: ChatId) -> Result<(), StoreError>;

    async fn create_message(
        &self,
        chat_id: ChatId,
        character_id: CharacterId,
        text: String,
        generated: bool,
    ) -> Result<Message, StoreError>;
    async fn get_message(&self, id: MessageId) -> Result<Message, StoreError>;
    /// Overwrite the active version's text.
    async fn set_message_text(&self, id: MessageId, text: String) -> Result<Message, StoreError>;
    /// Overwrite the version at `index`, leaving the active index alone.
    async fn set_version_text(
        &self,
        id: MessageId,
        index: usize,
        text: String,
    ) -> Result<Message, StoreError>;
    async fn delete_message(&self, id: MessageId) -> Result<(), StoreError>;
    async fn new_swipe(&self, id: MessageId) -> Result<Message, StoreError>;
    async fn swipe_left(&self, id: MessageId) -> Result<Message, StoreError>;
    async fn swipe_right(&self, id: MessageId) -> Result<Message, StoreError>;
    async fn set_swipe_index(&self, id: MessageId, index: usize) -> Result<Message, StoreError>;

    /// Insert a template after checking that it parses.
    async fn create_template(&self, name: String, content: String)
        -> Result<PromptTemplate, StoreError>;
    async fn get_template(&self, id: TemplateId) -> Result<PromptTemplate, StoreError>;
    async fn list_templates(&self) -> Result<Vec<PromptTemplate>, StoreError>;
    async fn update_template(&self, template: PromptTemplate)
        -> Result<PromptTemplate, StoreError>;
    async fn delete_template(&self, id: TemplateId) -> Result<(), StoreError>;
    async fn set_active_template(&self, id: TemplateId) -> Result<(), StoreError>;
    async fn active_template(&self) -> Result<PromptTemplate, StoreError>;

    /// Insert a preset; its `id` is assigned by the store.
    async fn create_preset(&self, preset: GeneratePreset) -> Result<GeneratePreset, StoreError>;
    async fn get_preset(&self, id: PresetId) -> Result<GeneratePreset, StoreError>;
    async fn list_presets(&self) -> Result<Vec<GeneratePreset>, StoreError>;
    async fn update_preset(&self, preset: GeneratePreset) -> Result<GeneratePreset, StoreError>;
    async fn delete_preset(&self, id: PresetId) -> Result<(), StoreError>;
    async fn set_active_preset(&self, id: PresetId) -> Result<(), StoreError>;
    async fn active_preset(&self) -> Result<GeneratePreset, StoreError>;
}
