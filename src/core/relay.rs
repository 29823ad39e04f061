//! Drains a streaming completion into a sink while mirroring the growing
//! text into storage.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{CompletionStream, StreamEvent};
use crate::character::CharacterId;
use crate::core::message::MessageId;
use crate::core::store::Store;

/// What a streamed generation call emits, in order: optionally `Started`,
/// any number of `Text`, then exactly one `Final` or `Error` (or nothing at
/// all when the caller cancelled).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// A message was created (or reopened) to receive the reply.
    Started {
        message_id: MessageId,
        character_id: CharacterId,
    },
    Text { text: String },
    Final { text: String },
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Completed(String),
    Failed { partial: String, reason: String },
    Cancelled { partial: String },
}

/// Message version that receives the streamed text. The version is fixed
/// when streaming starts, so swiping away mid-stream leaves others intact.
pub struct PersistTarget {
    pub store: Arc<dyn Store>,
    pub message_id: MessageId,
    pub version: usize,
    /// Text already in the version before streaming began (continue mode).
    pub prefix: String,
}

pub struct StreamRelay {
    sink: mpsc::UnboundedSender<GenerationEvent>,
    target: Option<PersistTarget>,
    cancel: CancellationToken,
}

impl StreamRelay {
    pub fn new(sink: mpsc::UnboundedSender<GenerationEvent>, cancel: CancellationToken) -> Self {
        Self {
            sink,
            target: None,
            cancel,
        }
    }

    pub fn persist_into(mut self, target: PersistTarget) -> Self {
        self.target = Some(target);
        self
    }

    fn emit(&self, event: GenerationEvent) {
        // A dropped receiver just means nobody is watching any more.
        let _ = self.sink.send(event);
    }

    fn fail(&self, partial: String, reason: String) -> RelayOutcome {
        self.emit(GenerationEvent::Error {
            error: reason.clone(),
        });
        RelayOutcome::Failed { partial, reason }
    }

    pub async fn run(self, mut stream: CompletionStream) -> RelayOutcome {
        let mut accumulated = String::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(chars = accumulated.len(), "Generation cancelled by caller");
                    return RelayOutcome::Cancelled { partial: accumulated };
                }
                next = stream.next_event() => next,
            };

            match next {
                Some(Ok(StreamEvent::Fragment(fragment))) => {
                    accumulated.push_str(&fragment);
                    if let Some(target) = &self.target {
                        let text = format!("{}{}", target.prefix, accumulated);
                        let written = target
                            .store
                            .set_version_text(target.message_id, target.version, text)
                            .await;
                        if let Err(err) = written {
                            warn!(message_id = target.message_id, error = %err, "Failed to persist streamed text");
                            return self.fail(accumulated, format!("Error updating message: {err}"));
                        }
                    }
                    self.emit(GenerationEvent::Text { text: fragment });
                }
                Some(Ok(StreamEvent::Stop)) | None => {
                    self.emit(GenerationEvent::Final {
                        text: accumulated.clone(),
                    });
                    return RelayOutcome::Completed(accumulated);
                }
                Some(Err(err)) => {
                    warn!(error = %err, chars = accumulated.len(), "Generation stream failed");
                    return self.fail(accumulated, err.to_string());
                }
            }
        }
    }
}
