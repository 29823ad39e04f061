//! Generation pipeline: assemble the prompt, pick a speaker, open the
//! stream and relay it into the chat.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{CompletionBackend, CompletionError, CompletionRequest};
use crate::character::{Character, CharacterId};
use crate::core::message::{ChatId, MessageId};
use crate::core::preset::GeneratePreset;
use crate::core::prompt::{
    continuation_prompt, generation_prompt, AssemblyError, AssemblyMode, ConversationAssembler,
    PromptView, TemplateError,
};
use crate::core::relay::{GenerationEvent, PersistTarget, RelayOutcome, StreamRelay};
use crate::core::respondent::{RespondentSelector, SelectionError};
use crate::core::store::{ChatSnapshot, Store, StoreError};

pub type EventSink = mpsc::UnboundedSender<GenerationEvent>;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Another generation is already running")]
    Busy,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

impl From<TemplateError> for GenerateError {
    fn from(err: TemplateError) -> Self {
        GenerateError::Assembly(AssemblyError::Template(err))
    }
}

/// `"<Name>:"` for every participant, so the model stops before speaking
/// for someone else.
pub fn stop_sequences(characters: &[Character]) -> Vec<String> {
    characters
        .iter()
        .map(|character| format!("{}:", character.name))
        .collect()
}

/// Drives generations against one inference backend. Only one runs at a
/// time; a second caller gets [`GenerateError::Busy`] instead of queueing.
#[derive(Clone)]
pub struct Generator {
    backend: Arc<dyn CompletionBackend>,
    store: Arc<dyn Store>,
    gate: Arc<Semaphore>,
}

struct Prepared {
    request: CompletionRequest,
    target: Option<PersistTarget>,
}

impl Generator {
    pub fn new(backend: Arc<dyn CompletionBackend>, store: Arc<dyn Store>) -> Self {
        Self {
            backend,
            store,
            gate: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Plain completion of `prompt` with the active preset.
    pub async fn generate_text(
        &self,
        prompt: String,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Result<RelayOutcome, GenerateError> {
        self.run(sink, cancel, |_| async move {
            let preset = self.store.active_preset().await?;
            Ok(Prepared {
                request: preset.request(prompt),
                target: None,
            })
        })
        .await
    }

    /// Let the model choose who speaks next and stream the reply into a new
    /// message.
    pub async fn generate_message(
        &self,
        chat_id: ChatId,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Result<RelayOutcome, GenerateError> {
        self.run(sink, cancel, |sink| async move {
            let chat = self.store.get_chat(chat_id).await?;
            let (assembler, preset) = self.active_settings().await?;
            let view =
                ConversationAssembler::build_view(&chat.messages, &chat.characters, AssemblyMode::Fresh)?;
            let rendered = self.fit_history(&assembler, view, &preset).await?;

            let speaker = RespondentSelector::new(self.backend.as_ref())
                .select(&rendered, &chat.characters)
                .await?;
            let message = self
                .store
                .create_message(chat_id, speaker.id, String::new(), true)
                .await?;
            let _ = sink.send(GenerationEvent::Started {
                message_id: message.id,
                character_id: speaker.id,
            });

            Ok(self.conversation_request(
                &preset,
                &chat,
                generation_prompt(&rendered, &speaker.name),
                message.id,
                message.active_index(),
                String::new(),
            ))
        })
        .await
    }

    /// Add a new version to `message_id` and stream a fresh reply into it.
    pub async fn regenerate_message(
        &self,
        message_id: MessageId,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Result<RelayOutcome, GenerateError> {
        self.run(sink, cancel, |sink| async move {
            let message = self.store.get_message(message_id).await?;
            let chat = self.store.get_chat(message.chat_id).await?;
            let speaker = speaker_of(&chat, message_id, message.character_id)?;
            let (assembler, preset) = self.active_settings().await?;

            let view = ConversationAssembler::build_view(
                chat.history_before(message_id),
                &chat.characters,
                AssemblyMode::Fresh,
            )?;
            let rendered = self.fit_history(&assembler, view, &preset).await?;

            let swiped = self.store.new_swipe(message_id).await?;
            let _ = sink.send(GenerationEvent::Started {
                message_id,
                character_id: speaker.id,
            });

            Ok(self.conversation_request(
                &preset,
                &chat,
                generation_prompt(&rendered, &speaker.name),
                message_id,
                swiped.active_index(),
                String::new(),
            ))
        })
        .await
    }

    /// Extend the active version of `message_id` where it left off.
    pub async fn continue_message(
        &self,
        message_id: MessageId,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Result<RelayOutcome, GenerateError> {
        self.run(sink, cancel, |sink| async move {
            let message = self.store.get_message(message_id).await?;
            let chat = self.store.get_chat(message.chat_id).await?;
            let speaker = speaker_of(&chat, message_id, message.character_id)?;
            let (assembler, preset) = self.active_settings().await?;

            let upto = chat.history_before(message_id).len();
            let through_message = &chat.messages[..(upto + 1).min(chat.messages.len())];
            let view = ConversationAssembler::build_view(
                through_message,
                &chat.characters,
                AssemblyMode::Continue,
            )?;
            let rendered = self.fit_history(&assembler, view, &preset).await?;

            let partial = message.active_text().to_string();
            let _ = sink.send(GenerationEvent::Started {
                message_id,
                character_id: speaker.id,
            });

            Ok(self.conversation_request(
                &preset,
                &chat,
                continuation_prompt(&rendered, &speaker.name, &partial),
                message_id,
                message.active_index(),
                partial,
            ))
        })
        .await
    }

    /// Shared envelope: single-flight admission, silent cancellation, and
    /// exactly one terminal event.
    async fn run<'s, F, Fut>(
        &'s self,
        sink: EventSink,
        cancel: CancellationToken,
        prepare: F,
    ) -> Result<RelayOutcome, GenerateError>
    where
        F: FnOnce(EventSink) -> Fut,
        Fut: Future<Output = Result<Prepared, GenerateError>> + 's,
    {
        let Ok(_permit) = self.gate.try_acquire() else {
            let _ = sink.send(GenerationEvent::Error {
                error: GenerateError::Busy.to_string(),
            });
            return Err(GenerateError::Busy);
        };

        let work = async {
            let prepared = prepare(sink.clone()).await?;
            let stream = self.backend.stream(prepared.request).await?;
            let mut relay = StreamRelay::new(sink.clone(), cancel.clone());
            if let Some(target) = prepared.target {
                relay = relay.persist_into(target);
            }
            Ok::<_, GenerateError>(relay.run(stream).await)
        };

        let result = tokio::select! {
            biased;
            result = work => result,
            _ = cancel.cancelled() => {
                debug!("Generation cancelled before streaming began");
                return Ok(RelayOutcome::Cancelled { partial: String::new() });
            }
        };

        if let Err(err) = &result {
            let _ = sink.send(GenerationEvent::Error {
                error: err.to_string(),
            });
        }
        result
    }

    async fn active_settings(&self) -> Result<(ConversationAssembler, GeneratePreset), GenerateError> {
        let template = self.store.active_template().await?;
        let preset = self.store.active_preset().await?;
        let assembler = ConversationAssembler::from_source(&template.content)?;
        Ok((assembler, preset))
    }

    /// Render `view`, dropping the oldest messages until the prompt fits the
    /// preset's context budget. The newest message is always kept.
    async fn fit_history(
        &self,
        assembler: &ConversationAssembler,
        mut view: PromptView,
        preset: &GeneratePreset,
    ) -> Result<String, GenerateError> {
        let Some(budget) = preset.prompt_budget() else {
            return Ok(assembler.render_view(&view)?);
        };

        loop {
            let rendered = assembler.render_view(&view)?;
            if view.messages.len() <= 1 {
                return Ok(rendered);
            }
            let tokens = self.backend.count_tokens(&rendered).await?;
            if tokens <= budget {
                return Ok(rendered);
            }
            debug!(tokens, budget, kept = view.messages.len() - 1, "Trimming history to fit context");
            view.messages.remove(0);
        }
    }

    fn conversation_request(
        &self,
        preset: &GeneratePreset,
        chat: &ChatSnapshot,
        prompt: String,
        message_id: MessageId,
        version: usize,
        prefix: String,
    ) -> Prepared {
        let mut request = preset.request(prompt);
        request.stop = stop_sequences(&chat.characters);
        info!(message_id, chat_id = chat.chat.id, "Streaming reply");
        Prepared {
            request,
            target: Some(PersistTarget {
                store: Arc::clone(&self.store),
                message_id,
                version,
                prefix,
            }),
        }
    }
}

fn speaker_of<'a>(
    chat: &'a ChatSnapshot,
    message_id: MessageId,
    character_id: CharacterId,
) -> Result<&'a Character, AssemblyError> {
    chat.character(character_id)
        .ok_or(AssemblyError::UnknownSpeaker {
            message_id,
            character_id,
        })
}

#[cfg(test)]
mod tests;
