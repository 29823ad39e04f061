//! Line-oriented multi-character chat.

use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::generate::stream_to_stdout;
use crate::cli::serve::connect;
use crate::core::generate::Generator;
use crate::core::message::{ChatId, Message};
use crate::core::store::{ChatSnapshot, InMemoryStore, Store, StoreError};
use crate::server::ProcessSupervisor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Say(String),
    Next,
    Regenerate,
    Continue,
    Left,
    Right,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_input(line: &str) -> ChatInput {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ChatInput::Empty;
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return ChatInput::Say(trimmed.to_string());
    };
    match command.to_lowercase().as_str() {
        "next" | "n" => ChatInput::Next,
        "regen" | "r" => ChatInput::Regenerate,
        "continue" | "c" => ChatInput::Continue,
        "left" => ChatInput::Left,
        "right" => ChatInput::Right,
        "help" | "?" => ChatInput::Help,
        "quit" | "exit" | "q" => ChatInput::Quit,
        _ => ChatInput::Unknown(trimmed.to_string()),
    }
}

fn print_help() {
    println!("Type a line to speak as the user. Commands:");
    println!("  /next       Let the model pick a character and reply");
    println!("  /regen      Regenerate the last reply as a new swipe");
    println!("  /continue   Extend the last reply");
    println!("  /left       Show the previous swipe of the last message");
    println!("  /right      Show the next swipe of the last message");
    println!("  /quit       Leave the chat");
}

fn speaker_name(chat: &ChatSnapshot, message: &Message) -> String {
    chat.character(message.character_id)
        .map(|character| character.name.clone())
        .unwrap_or_else(|| format!("#{}", message.character_id))
}

fn print_message(chat: &ChatSnapshot, message: &Message) {
    let name = speaker_name(chat, message);
    if message.version_count() > 1 {
        println!(
            "{name} [{}/{}]: {}",
            message.active_index() + 1,
            message.version_count(),
            message.active_text()
        );
    } else {
        println!("{name}: {}", message.active_text());
    }
}

async fn last_message(store: &dyn Store, chat_id: ChatId) -> Result<Option<Message>, StoreError> {
    Ok(store.get_chat(chat_id).await?.messages.pop())
}

pub async fn run_chat(
    supervisor: &ProcessSupervisor,
    model: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    let client = connect(supervisor, model).await?;
    let store = Arc::new(InMemoryStore::with_fixtures()?);
    let generator = Generator::new(Arc::new(client), store.clone());

    let chat_id = store
        .list_chats()
        .await?
        .first()
        .map(|chat| chat.id)
        .ok_or("No chat to join")?;
    let snapshot = store.get_chat(chat_id).await?;
    let user = snapshot
        .user()
        .cloned()
        .ok_or("This chat has no user character")?;

    let names: Vec<&str> = snapshot.characters.iter().map(|c| c.name.as_str()).collect();
    println!("💬 Chatting as {} with {}", user.name, names.join(", "));
    println!("💡 /help lists commands");
    println!();
    for message in &snapshot.messages {
        print_message(&snapshot, message);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_input(&line) {
            ChatInput::Empty => {}
            ChatInput::Say(text) => {
                store.create_message(chat_id, user.id, text, false).await?;
            }
            ChatInput::Next => {
                stream_to_stdout(&generator, |sink, cancel| {
                    generator.generate_message(chat_id, sink, cancel)
                })
                .await?;
            }
            input @ (ChatInput::Regenerate | ChatInput::Continue) => {
                let regenerate = input == ChatInput::Regenerate;
                let Some(message) = last_message(store.as_ref(), chat_id).await? else {
                    println!("⚠️  Nothing to work on yet");
                    continue;
                };
                if !message.generated {
                    println!("⚠️  The last message was written by the user; use /next");
                    continue;
                }
                let generator = &generator;
                stream_to_stdout(generator, |sink, cancel| async move {
                    if regenerate {
                        generator.regenerate_message(message.id, sink, cancel).await
                    } else {
                        generator.continue_message(message.id, sink, cancel).await
                    }
                })
                .await?;
            }
            input @ (ChatInput::Left | ChatInput::Right) => {
                let left = input == ChatInput::Left;
                let Some(message) = last_message(store.as_ref(), chat_id).await? else {
                    continue;
                };
                let swiped = if left {
                    store.swipe_left(message.id).await
                } else {
                    store.swipe_right(message.id).await
                };
                match swiped {
                    Ok(message) => {
                        let chat = store.get_chat(chat_id).await?;
                        print_message(&chat, &message);
                    }
                    Err(StoreError::Swipe(err)) => println!("⚠️  {err}"),
                    Err(err) => return Err(err.into()),
                }
            }
            ChatInput::Help => print_help(),
            ChatInput::Quit => break,
            ChatInput::Unknown(command) => {
                eprintln!("❌ Unknown command: {command} (try /help)");
            }
        }
    }

    if model.is_some() {
        supervisor.stop().await?;
    }
    Ok(())
}
