use std::collections::BTreeMap;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{load_fixtures, Chat, ChatSnapshot, Store, StoreError, DEFAULT_ID};
use crate::character::{Character, CharacterId};
use crate::core::message::{ChatId, Message, MessageId, SwipeError};
use crate::core::preset::{GeneratePreset, PresetId};
use crate::core::prompt::Template;
use crate::core::template::{PromptTemplate, TemplateId};

#[derive(Debug, Default)]
struct Tables {
    characters: BTreeMap<CharacterId, Character>,
    chats: BTreeMap<ChatId, Chat>,
    messages: BTreeMap<MessageId, Message>,
    templates: BTreeMap<TemplateId, PromptTemplate>,
    presets: BTreeMap<PresetId, GeneratePreset>,
    next_id: u64,
}

impl Tables {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn bump_past(&mut self, id: u64) {
        self.next_id = self.next_id.max(id);
    }

    fn message_mut(&mut self, id: MessageId) -> Result<&mut Message, StoreError> {
        self.messages
            .get_mut(&id)
            .ok_or(StoreError::NotFound { kind: "Message", id })
    }

    fn snapshot(&self, id: ChatId) -> Result<ChatSnapshot, StoreError> {
        let chat = self
            .chats
            .get(&id)
            .ok_or(StoreError::NotFound { kind: "Chat", id })?
            .clone();
        let characters = chat
            .character_ids
            .iter()
            .filter_map(|character_id| self.characters.get(character_id).cloned())
            .collect();
        let messages = self
            .messages
            .values()
            .filter(|message| message.chat_id == id)
            .cloned()
            .collect();
        Ok(ChatSnapshot {
            chat,
            characters,
            messages,
        })
    }

    fn swipe<F>(&mut self, id: MessageId, transition: F) -> Result<Message, StoreError>
    where
        F: FnOnce(&mut Message) -> Result<(), SwipeError>,
    {
        let message = self.message_mut(id)?;
        transition(&mut *message)?;
        Ok(message.clone())
    }
}

/// Store kept entirely in memory behind one async mutex.
///
/// Message ids grow monotonically, so id order is chronological order.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the built-in characters, chat, templates and preset.
    pub fn with_fixtures() -> Result<Self, StoreError> {
        let fixtures = load_fixtures()?;
        let mut tables = Tables::default();

        for character in fixtures.characters {
            tables.bump_past(character.id);
            tables.characters.insert(character.id, character);
        }
        for chat in fixtures.chats {
            tables.bump_past(chat.id);
            let mut character_ids = chat.characters;
            character_ids.sort_unstable();
            character_ids.dedup();
            tables.chats.insert(
                chat.id,
                Chat {
                    id: chat.id,
                    created_at: Utc::now(),
                    character_ids,
                },
            );
        }
        for message in fixtures.messages {
            tables.bump_past(message.id);
            tables.messages.insert(
                message.id,
                Message::new(
                    message.id,
                    message.chat,
                    message.character,
                    message.text,
                    message.generated,
                ),
            );
        }
        for template in fixtures.templates {
            tables.bump_past(template.id);
            tables.templates.insert(template.id, template);
        }
        for preset in fixtures.presets {
            tables.bump_past(preset.id);
            tables.presets.insert(preset.id, preset);
        }

        debug!(
            characters = tables.characters.len(),
            templates = tables.templates.len(),
            "Seeded in-memory store"
        );
        Ok(Self {
            tables: Mutex::new(tables),
        })
    }
}

#[async_trait::async_trait]
impl Store for InMemoryStore {
    async fn create_character(&self, mut character: Character) -> Result<Character, StoreError> {
        let mut tables = self.tables.lock().await;
        character.id = tables.allocate_id();
        tables.characters.insert(character.id, character.clone());
        Ok(character)
    }

    async fn get_character(&self, id: CharacterId) -> Result<Character, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .characters
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "Character", id })
    }

    async fn list_characters(&self) -> Result<Vec<Character>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.characters.values().cloned().collect())
    }

    async fn update_character(&self, character: Character) -> Result<Character, StoreError> {
        let mut tables = self.tables.lock().await;
        let slot = tables
            .characters
            .get_mut(&character.id)
            .ok_or(StoreError::NotFound {
                kind: "Character",
                id: character.id,
            })?;
        *slot = character.clone();
        Ok(character)
    }

    async fn delete_character(&self, id: CharacterId) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.characters.remove(&id).is_none() {
            return Err(StoreError::NotFound { kind: "Character", id });
        }
        for chat in tables.chats.values_mut() {
            chat.character_ids.retain(|character_id| *character_id != id);
        }
        tables.messages.retain(|_, message| message.character_id != id);
        Ok(())
    }

    async fn create_chat(&self, character_ids: &[CharacterId]) -> Result<ChatSnapshot, StoreError> {
        if character_ids.is_empty() {
            return Err(StoreError::EmptyRoster);
        }
        let mut tables = self.tables.lock().await;
        for id in character_ids {
            if !tables.characters.contains_key(id) {
                return Err(StoreError::NotFound {
                    kind: "Character",
                    id: *id,
                });
            }
        }

        let mut roster = character_ids.to_vec();
        roster.sort_unstable();
        roster.dedup();

        let chat_id = tables.allocate_id();
        let greetings: Vec<(CharacterId, String)> = roster
            .iter()
            .filter_map(|id| tables.characters.get(id))
            .filter_map(|character| {
                character
                    .first_message
                    .clone()
                    .map(|text| (character.id, text))
            })
            .collect();
        tables.chats.insert(
            chat_id,
            Chat {
                id: chat_id,
                created_at: Utc::now(),
                character_ids: roster,
            },
        );
        for (character_id, text) in greetings {
            let message_id = tables.allocate_id();
            tables.messages.insert(
                message_id,
                Message::new(message_id, chat_id, character_id, text, false),
            );
        }

        tables.snapshot(chat_id)
    }

    async fn get_chat(&self, id: ChatId) -> Result<ChatSnapshot, StoreError> {
        self.tables.lock().await.snapshot(id)
    }

    async fn list_chats(&self) -> Result<Vec<Chat>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.chats.values().cloned().collect())
    }

    async fn delete_chat(&self, id: ChatId) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.chats.remove(&id).is_none() {
            return Err(StoreError::NotFound { kind: "Chat", id });
        }
        tables.messages.retain(|_, message| message.chat_id != id);
        Ok(())
    }

    async fn create_message(
        &self,
        chat_id: ChatId,
        character_id: CharacterId,
        text: String,
        generated: bool,
    ) -> Result<Message, StoreError> {
        let mut tables = self.tables.lock().await;
        let chat = tables.chats.get(&chat_id).ok_or(StoreError::NotFound {
            kind: "Chat",
            id: chat_id,
        })?;
        if !chat.character_ids.contains(&character_id) {
            return Err(StoreError::NotInChat {
                chat_id,
                character_id,
            });
        }
        if !tables.characters.contains_key(&character_id) {
            return Err(StoreError::NotFound {
                kind: "Character",
                id: character_id,
            });
        }
        let id = tables.allocate_id();
        let message = Message::new(id, chat_id, character_id, text, generated);
        tables.messages.insert(id, message.clone());
        Ok(message)
    }

    async fn get_message(&self, id: MessageId) -> Result<Message, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .messages
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "Message", id })
    }

    async fn set_message_text(&self, id: MessageId, text: String) -> Result<Message, StoreError> {
        let mut tables = self.tables.lock().await;
        let message = tables.message_mut(id)?;
        message.set_active_text(text);
        Ok(message.clone())
    }

    async fn set_version_text(
        &self,
        id: MessageId,
        index: usize,
        text: String,
    ) -> Result<Message, StoreError> {
        let mut tables = self.tables.lock().await;
        let message = tables.message_mut(id)?;
        message.set_version_text(index, text)?;
        Ok(message.clone())
    }

    async fn delete_message(&self, id: MessageId) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables
            .messages
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { kind: "Message", id })
    }

    async fn new_swipe(&self, id: MessageId) -> Result<Message, StoreError> {
        self.tables.lock().await.swipe(id, |message| {
            message.new_swipe();
            Ok(())
        })
    }

    async fn swipe_left(&self, id: MessageId) -> Result<Message, StoreError> {
        self.tables
            .lock()
            .await
            .swipe(id, |message| message.swipe_left().map(|_| ()))
    }

    async fn swipe_right(&self, id: MessageId) -> Result<Message, StoreError> {
        self.tables
            .lock()
            .await
            .swipe(id, |message| message.swipe_right().map(|_| ()))
    }

    async fn set_swipe_index(&self, id: MessageId, index: usize) -> Result<Message, StoreError> {
        self.tables
            .lock()
            .await
            .swipe(id, |message| message.set_active_index(index))
    }

    async fn create_template(
        &self,
        name: String,
        content: String,
    ) -> Result<PromptTemplate, StoreError> {
        Template::parse(&content)?;
        let mut tables = self.tables.lock().await;
        let template = PromptTemplate::new(tables.allocate_id(), name, content);
        tables.templates.insert(template.id, template.clone());
        Ok(template)
    }

    async fn get_template(&self, id: TemplateId) -> Result<PromptTemplate, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .templates
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "Template", id })
    }

    async fn list_templates(&self) -> Result<Vec<PromptTemplate>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.templates.values().cloned().collect())
    }

    async fn update_template(
        &self,
        template: PromptTemplate,
    ) -> Result<PromptTemplate, StoreError> {
        Template::parse(&template.content)?;
        let mut tables = self.tables.lock().await;
        let slot = tables
            .templates
            .get_mut(&template.id)
            .ok_or(StoreError::NotFound {
                kind: "Template",
                id: template.id,
            })?;
        // The active flag only moves through set_active_template.
        slot.name = template.name;
        slot.content = template.content;
        Ok(slot.clone())
    }

    async fn delete_template(&self, id: TemplateId) -> Result<(), StoreError> {
        if id == DEFAULT_ID {
            return Err(StoreError::ProtectedDefault { kind: "template" });
        }
        let mut tables = self.tables.lock().await;
        let removed = tables
            .templates
            .remove(&id)
            .ok_or(StoreError::NotFound { kind: "Template", id })?;
        if removed.active {
            if let Some(default) = tables.templates.get_mut(&DEFAULT_ID) {
                default.active = true;
            }
        }
        Ok(())
    }

    async fn set_active_template(&self, id: TemplateId) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.templates.contains_key(&id) {
            return Err(StoreError::NotFound { kind: "Template", id });
        }
        for template in tables.templates.values_mut() {
            template.active = template.id == id;
        }
        Ok(())
    }

    async fn active_template(&self) -> Result<PromptTemplate, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .templates
            .values()
            .find(|template| template.active)
            .cloned()
            .ok_or(StoreError::NoActive { kind: "template" })
    }

    async fn create_preset(&self, mut preset: GeneratePreset) -> Result<GeneratePreset, StoreError> {
        let mut tables = self.tables.lock().await;
        preset.id = tables.allocate_id();
        preset.active = false;
        tables.presets.insert(preset.id, preset.clone());
        Ok(preset)
    }

    async fn get_preset(&self, id: PresetId) -> Result<GeneratePreset, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .presets
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "Preset", id })
    }

    async fn list_presets(&self) -> Result<Vec<GeneratePreset>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.presets.values().cloned().collect())
    }

    async fn update_preset(&self, mut preset: GeneratePreset) -> Result<GeneratePreset, StoreError> {
        let mut tables = self.tables.lock().await;
        let slot = tables
            .presets
            .get_mut(&preset.id)
            .ok_or(StoreError::NotFound {
                kind: "Preset",
                id: preset.id,
            })?;
        preset.active = slot.active;
        *slot = preset.clone();
        Ok(preset)
    }

    async fn delete_preset(&self, id: PresetId) -> Result<(), StoreError> {
        if id == DEFAULT_ID {
            return Err(StoreError::ProtectedDefault { kind: "preset" });
        }
        let mut tables = self.tables.lock().await;
        let removed = tables
            .presets
            .remove(&id)
            .ok_or(StoreError::NotFound { kind: "Preset", id })?;
        if removed.active {
            if let Some(default) = tables.presets.get_mut(&DEFAULT_ID) {
                default.active = true;
            }
        }
        Ok(())
    }

    async fn set_active_preset(&self, id: PresetId) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.presets.contains_key(&id) {
            return Err(StoreError::NotFound { kind: "Preset", id });
        }
        for preset in tables.presets.values_mut() {
            preset.active = preset.id == id;
        }
        Ok(())
    }

    async fn active_preset(&self) -> Result<GeneratePreset, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .presets
            .values()
            .find(|preset| preset.active)
            .cloned()
            .ok_or(StoreError::NoActive { kind: "preset" })
    }
}
