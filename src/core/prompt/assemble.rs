use std::collections::HashMap;

use thiserror::Error;

use super::{CharacterView, MessageView, PromptView, Template, TemplateError};
use crate::character::{Character, CharacterId};
use crate::core::message::{Message, MessageId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("Message {message_id} is attributed to character {character_id}, who is not in this chat")]
    UnknownSpeaker {
        message_id: MessageId,
        character_id: CharacterId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssemblyMode {
    /// Render the whole history; the reply becomes a new message.
    #[default]
    Fresh,
    /// Leave out the last message, which the caller is extending.
    Continue,
}

/// Renders chat history through the active prompt template.
#[derive(Debug, Clone)]
pub struct ConversationAssembler {
    template: Template,
}

impl ConversationAssembler {
    pub fn new(template: Template) -> Self {
        Self { template }
    }

    pub fn from_source(source: &str) -> Result<Self, TemplateError> {
        Template::parse(source).map(Self::new)
    }

    /// Reduce messages to their active text and resolve speaker names.
    pub fn build_view(
        messages: &[Message],
        characters: &[Character],
        mode: AssemblyMode,
    ) -> Result<PromptView, AssemblyError> {
        let history = match mode {
            AssemblyMode::Fresh => messages,
            AssemblyMode::Continue => &messages[..messages.len().saturating_sub(1)],
        };

        let names: HashMap<CharacterId, &str> = characters
            .iter()
            .map(|character| (character.id, character.name.as_str()))
            .collect();
        let user_name = characters
            .iter()
            .find(|character| character.is_user())
            .map(|character| character.name.as_str());

        let mut rendered_messages = Vec::with_capacity(history.len());
        for message in history {
            if message.active_text().is_empty() {
                continue;
            }
            let name = names.get(&message.character_id).ok_or(AssemblyError::UnknownSpeaker {
                message_id: message.id,
                character_id: message.character_id,
            })?;
            rendered_messages.push(MessageView {
                text: message.active_text().to_string(),
                generated: message.generated,
                character_name: (*name).to_string(),
            });
        }

        Ok(PromptView {
            messages: rendered_messages,
            characters: characters
                .iter()
                .map(|character| CharacterView::from_character(character, user_name))
                .collect(),
        })
    }

    pub fn render_view(&self, view: &PromptView) -> Result<String, AssemblyError> {
        Ok(self.template.render(view)?)
    }

    pub fn assemble(
        &self,
        messages: &[Message],
        characters: &[Character],
        mode: AssemblyMode,
    ) -> Result<String, AssemblyError> {
        let view = Self::build_view(messages, characters, mode)?;
        self.render_view(&view)
    }
}

/// Prompt that asks the model to speak as `speaker`.
pub fn generation_prompt(rendered: &str, speaker: &str) -> String {
    format!("{rendered}{speaker}: ")
}

/// Prompt that resumes `partial` as if the model had produced it in one go.
pub fn continuation_prompt(rendered: &str, speaker: &str, partial: &str) -> String {
    format!("{rendered}{speaker}: {partial}")
}
