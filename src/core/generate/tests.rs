use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::api::{CompletionClient, CompletionResponse, CompletionStream};
use crate::core::store::InMemoryStore;
use crate::utils::test_utils::{MockReply, MockServer};

/// Backend with a scripted speaker choice and reply, recording every call.
struct ScriptedBackend {
    choice: String,
    fragments: Vec<&'static str>,
    completions: Mutex<Vec<CompletionRequest>>,
    streams: Mutex<Vec<CompletionRequest>>,
    counted: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(choice: &str, fragments: &[&'static str]) -> Self {
        Self {
            choice: choice.to_string(),
            fragments: fragments.to_vec(),
            completions: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
            counted: Mutex::new(Vec::new()),
        }
    }

    fn last_stream(&self) -> CompletionRequest {
        self.streams.lock().unwrap().last().cloned().expect("a stream request")
    }
}

#[async_trait::async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        self.completions.lock().unwrap().push(request);
        Ok(CompletionResponse {
            content: self.choice.clone(),
            stop: true,
        })
    }

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, CompletionError> {
        self.streams.lock().unwrap().push(request);
        let mut chunks: Vec<Result<Vec<u8>, CompletionError>> = self
            .fragments
            .iter()
            .map(|fragment| {
                let frame = serde_json::json!({"content": fragment, "stop": false});
                Ok(format!("data: {frame}\n\n").into_bytes())
            })
            .collect();
        chunks.push(Ok(b"data: {\"content\":\"\",\"stop\":true}\n\n".to_vec()));
        Ok(CompletionStream::from_chunks(chunks))
    }

    /// One token per byte keeps budgets easy to reason about.
    async fn count_tokens(&self, text: &str) -> Result<usize, CompletionError> {
        self.counted.lock().unwrap().push(text.to_string());
        Ok(text.len())
    }
}

fn setup(backend: ScriptedBackend) -> (Generator, Arc<ScriptedBackend>, Arc<InMemoryStore>) {
    let backend = Arc::new(backend);
    let store = Arc::new(InMemoryStore::with_fixtures().expect("fixtures load"));
    let generator = Generator::new(backend.clone(), store.clone());
    (generator, backend, store)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<GenerationEvent>) -> Vec<GenerationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn generate_message_picks_speaker_and_streams_into_new_message() {
    let (generator, backend, store) = setup(ScriptedBackend::new("Assistant", &["Sure", ", go on."]));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = generator
        .generate_message(1, tx, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, RelayOutcome::Completed("Sure, go on.".to_string()));

    let events = drain(&mut rx);
    let GenerationEvent::Started {
        message_id,
        character_id,
    } = events[0].clone()
    else {
        panic!("expected Started first, got {:?}", events[0]);
    };
    assert_eq!(character_id, 2);
    assert_eq!(
        events[1..],
        [
            GenerationEvent::Text { text: "Sure".into() },
            GenerationEvent::Text { text: ", go on.".into() },
            GenerationEvent::Final { text: "Sure, go on.".into() },
        ]
    );

    let stored = store.get_message(message_id).await.unwrap();
    assert_eq!(stored.active_text(), "Sure, go on.");
    assert!(stored.generated);

    let selection = backend.completions.lock().unwrap()[0].clone();
    assert_eq!(selection.grammar.as_deref(), Some(r#"root ::= ("Assistant")"#));
    assert_eq!(selection.n_predict, 10);

    let request = backend.last_stream();
    assert!(request.prompt.starts_with("<|im_start|>user\nHello<|im_end|>"));
    assert!(request.prompt.ends_with("<|im_start|>assistant\nAssistant: "));
    assert_eq!(request.stop, vec!["User:".to_string(), "Assistant:".to_string()]);
    assert_eq!(request.n_predict, 64);
    assert!(request.cache_prompt);
}

#[tokio::test]
async fn unmatched_speaker_emits_single_error_and_creates_nothing() {
    let (generator, _backend, store) = setup(ScriptedBackend::new("Narrator", &["x"]));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let err = generator
        .generate_message(1, tx, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GenerateError::Selection(SelectionError::NoRespondentSelected { .. })
    ));

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], GenerationEvent::Error { .. }));
    assert_eq!(store.get_chat(1).await.unwrap().messages.len(), 2);
}

#[tokio::test]
async fn regenerate_adds_a_swipe_and_leaves_old_version() {
    let (generator, backend, store) = setup(ScriptedBackend::new("Assistant", &["Again!"]));
    let (tx, mut rx) = mpsc::unbounded_channel();

    generator
        .regenerate_message(2, tx, CancellationToken::new())
        .await
        .unwrap();

    let message = store.get_message(2).await.unwrap();
    assert_eq!(message.version_count(), 2);
    assert_eq!(message.active_index(), 1);
    assert_eq!(message.active_text(), "Again!");
    assert_eq!(message.versions()[0], "Hi there, I'm here to help.");

    let prompt = backend.last_stream().prompt;
    assert!(!prompt.contains("here to help"));
    assert!(prompt.contains("Hello"));
    assert!(backend.completions.lock().unwrap().is_empty());
    assert_eq!(
        drain(&mut rx)[0],
        GenerationEvent::Started {
            message_id: 2,
            character_id: 2
        }
    );
}

#[tokio::test]
async fn continue_resumes_from_existing_text() {
    let (generator, backend, store) = setup(ScriptedBackend::new("Assistant", &[" Ask away."]));
    let (tx, _rx) = mpsc::unbounded_channel();

    let outcome = generator
        .continue_message(2, tx, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, RelayOutcome::Completed(" Ask away.".to_string()));

    let prompt = backend.last_stream().prompt;
    assert!(prompt.ends_with("<|im_start|>assistant\nAssistant: Hi there, I'm here to help."));
    assert_eq!(prompt.matches("here to help").count(), 1);

    let message = store.get_message(2).await.unwrap();
    assert_eq!(message.version_count(), 1);
    assert_eq!(message.active_text(), "Hi there, I'm here to help. Ask away.");
}

#[tokio::test]
async fn history_is_trimmed_to_the_context_budget() {
    let (generator, backend, store) = setup(ScriptedBackend::new("Assistant", &["ok"]));
    let tight = store
        .create_preset(GeneratePreset {
            name: "Tight".to_string(),
            context: 164,
            max_tokens: 64,
            ..GeneratePreset::default()
        })
        .await
        .unwrap();
    store.set_active_preset(tight.id).await.unwrap();

    let (tx, _rx) = mpsc::unbounded_channel();
    generator
        .generate_message(1, tx, CancellationToken::new())
        .await
        .unwrap();

    // Full history renders to 115 bytes, over the 100 byte budget. A single
    // remaining message is sent without counting.
    assert_eq!(backend.counted.lock().unwrap().len(), 1);
    let prompt = backend.last_stream().prompt;
    assert!(!prompt.contains("Hello"));
    assert!(prompt.contains("here to help"));
}

#[tokio::test]
async fn zero_context_skips_token_counting() {
    let (generator, backend, store) = setup(ScriptedBackend::new("Assistant", &["ok"]));
    let mut preset = store.active_preset().await.unwrap();
    preset.context = 0;
    store.update_preset(preset).await.unwrap();

    let (tx, _rx) = mpsc::unbounded_channel();
    generator
        .generate_message(1, tx, CancellationToken::new())
        .await
        .unwrap();
    assert!(backend.counted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn generate_text_uses_active_preset_without_persisting() {
    let (generator, backend, store) = setup(ScriptedBackend::new("", &["4"]));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = generator
        .generate_text("2+2=".to_string(), tx, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, RelayOutcome::Completed("4".to_string()));
    assert_eq!(
        drain(&mut rx),
        vec![
            GenerationEvent::Text { text: "4".into() },
            GenerationEvent::Final { text: "4".into() },
        ]
    );

    let request = backend.last_stream();
    assert_eq!(request.prompt, "2+2=");
    assert!(request.stop.is_empty());
    assert_eq!(request.sampling, store.active_preset().await.unwrap().sampling());
}

#[tokio::test]
async fn cancelled_before_start_is_silent() {
    let (generator, _backend, store) = setup(ScriptedBackend::new("Assistant", &["never"]));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = generator.generate_text("Hi".to_string(), tx, cancel).await.unwrap();
    assert!(matches!(outcome, RelayOutcome::Cancelled { .. }));
    assert!(drain(&mut rx).is_empty());
    assert_eq!(store.get_chat(1).await.unwrap().messages.len(), 2);
}

#[tokio::test]
async fn concurrent_generation_is_rejected_as_busy() {
    let server = MockServer::start(vec![MockReply::EventStream {
        chunks: vec!["data: {\"content\":\"slow\",\"stop\":false}\n\n".to_string()],
        hold_open: true,
    }])
    .await;
    let backend = Arc::new(CompletionClient::new(server.base_url.clone()));
    let store = Arc::new(InMemoryStore::with_fixtures().unwrap());
    let generator = Generator::new(backend, store);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let first = {
        let generator = generator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { generator.generate_text("Hi".to_string(), tx, cancel).await })
    };
    assert_eq!(
        rx.recv().await.unwrap(),
        GenerationEvent::Text { text: "slow".into() }
    );

    let (busy_tx, mut busy_rx) = mpsc::unbounded_channel();
    let err = generator
        .generate_text("Again".to_string(), busy_tx, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GenerateError::Busy));
    assert!(matches!(
        busy_rx.recv().await,
        Some(GenerationEvent::Error { .. })
    ));

    cancel.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(5), first)
        .await
        .expect("first generation should stop")
        .unwrap()
        .unwrap();
    assert_eq!(
        outcome,
        RelayOutcome::Cancelled {
            partial: "slow".to_string()
        }
    );
}
