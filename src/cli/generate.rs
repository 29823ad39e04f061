//! TUI-less "generate" command and the stdout printer shared with `chat`.

use std::error::Error;
use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cli::serve::connect;
use crate::core::generate::{EventSink, GenerateError, Generator};
use crate::core::relay::{GenerationEvent, RelayOutcome};
use crate::core::store::{InMemoryStore, Store};
use crate::server::ProcessSupervisor;

pub async fn run_generate(
    supervisor: &ProcessSupervisor,
    prompt: String,
    model: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    if prompt.trim().is_empty() {
        eprintln!("Usage: confab generate <prompt>");
        std::process::exit(1);
    }

    let client = connect(supervisor, model).await?;
    let store = Arc::new(InMemoryStore::with_fixtures()?);
    let generator = Generator::new(Arc::new(client), store);

    let result = stream_to_stdout(&generator, |sink, cancel| {
        generator.generate_text(prompt, sink, cancel)
    })
    .await;

    if model.is_some() {
        supervisor.stop().await?;
    }
    // The error was already printed from its event.
    if result?.is_err() {
        std::process::exit(1);
    }
    Ok(())
}

/// Run one generation while printing its events. Ctrl+C cancels it.
pub async fn stream_to_stdout<'g, F, Fut>(
    generator: &'g Generator,
    start: F,
) -> io::Result<Result<RelayOutcome, GenerateError>>
where
    F: FnOnce(EventSink, CancellationToken) -> Fut,
    Fut: Future<Output = Result<RelayOutcome, GenerateError>> + 'g,
{
    let (sink, events) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let work = start(sink, cancel.clone());
    let printer = print_events(events, cancel, generator.store().as_ref());
    let (outcome, printed) = tokio::join!(work, printer);
    printed?;
    Ok(outcome)
}

async fn print_events(
    mut events: mpsc::UnboundedReceiver<GenerationEvent>,
    cancel: CancellationToken,
    store: &dyn Store,
) -> io::Result<()> {
    let mut stdout = io::stdout();
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                cancel.cancel();
                continue;
            }
        };
        match event {
            Some(GenerationEvent::Started { character_id, .. }) => {
                let name = match store.get_character(character_id).await {
                    Ok(character) => character.name,
                    Err(_) => format!("#{character_id}"),
                };
                print!("{name}: ");
            }
            Some(GenerationEvent::Text { text }) => print!("{text}"),
            Some(GenerationEvent::Final { .. }) => println!(),
            Some(GenerationEvent::Error { error }) => eprintln!("\n❌ Error: {error}"),
            None => break,
        }
        stdout.flush()?;
    }
    if cancel.is_cancelled() {
        println!("\n⏹  Cancelled");
    }
    Ok(())
}
