use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use memchr::memchr;

use crate::api::client::{format_api_error, CompletionError};
use crate::api::CompletionChunk;

/// One unit of server output, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Fragment(String),
    /// The server reported `stop: true`; nothing follows.
    Stop,
}

/// Splits a byte stream into complete lines, holding back any trailing
/// partial line until more data (or the end of the body) arrives.
#[derive(Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        self.drain_lines(false)
    }

    pub fn finish(&mut self) -> Vec<String> {
        self.drain_lines(true)
    }

    fn drain_lines(&mut self, flush: bool) -> Vec<String> {
        let mut lines = Vec::new();
        let mut search_index = 0;

        while let Some(relative_pos) = memchr(b'\n', &self.buffer[search_index..]) {
            let newline_index = search_index + relative_pos;
            push_line(&mut lines, &self.buffer[search_index..newline_index]);
            search_index = newline_index + 1;
        }

        if flush {
            push_line(&mut lines, &self.buffer[search_index..]);
            self.buffer.clear();
        } else if search_index > 0 {
            self.buffer.drain(..search_index);
        }

        lines
    }
}

fn push_line(lines: &mut Vec<String>, bytes: &[u8]) {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
        Err(err) => tracing::warn!(error = %err, "Dropping non UTF-8 stream line"),
    }
}

pub(crate) fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Decode one SSE line into zero or more events.
///
/// Lines that are not `data:` fields (comments, `event:` names) are ignored.
pub(crate) fn parse_sse_line(line: &str) -> Result<Vec<StreamEvent>, CompletionError> {
    let Some(payload) = extract_data_payload(line) else {
        return Ok(Vec::new());
    };
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    if payload == "[DONE]" {
        return Ok(vec![StreamEvent::Stop]);
    }

    let chunk: CompletionChunk = serde_json::from_str(payload)
        .map_err(|err| CompletionError::MalformedEvent(format!("{err}: {payload}")))?;

    if chunk.error.is_some() {
        return Err(CompletionError::StreamError(format_api_error(payload)));
    }

    let mut events = Vec::with_capacity(2);
    if !chunk.content.is_empty() {
        events.push(StreamEvent::Fragment(chunk.content));
    }
    if chunk.stop {
        events.push(StreamEvent::Stop);
    }
    Ok(events)
}

type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, CompletionError>> + Send>>;

/// Handle over an in-flight streaming completion.
///
/// Dropping it closes the underlying connection.
pub struct CompletionStream {
    body: ChunkStream,
    lines: SseLineBuffer,
    pending: VecDeque<Result<StreamEvent, CompletionError>>,
    body_done: bool,
    terminated: bool,
}

impl CompletionStream {
    pub(crate) fn from_response(response: reqwest::Response) -> Self {
        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(CompletionError::Interrupted)
            })
            .boxed();
        Self::from_body(body)
    }

    /// Build a stream over raw body chunks, e.g. canned bytes in tests.
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Result<Vec<u8>, CompletionError>>,
        I::IntoIter: Send + 'static,
    {
        Self::from_body(futures_util::stream::iter(chunks).boxed())
    }

    /// Build a stream fed chunk by chunk from a channel; ends when the
    /// sender is dropped.
    #[cfg(test)]
    pub(crate) fn from_channel(chunks: tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        let body = futures_util::stream::unfold(chunks, |mut chunks| async move {
            chunks.recv().await.map(|chunk| (Ok(chunk), chunks))
        })
        .boxed();
        Self::from_body(body)
    }

    fn from_body(body: ChunkStream) -> Self {
        Self {
            body,
            lines: SseLineBuffer::default(),
            pending: VecDeque::new(),
            body_done: false,
            terminated: false,
        }
    }

    /// Next event, `None` once the stream has ended.
    ///
    /// A `Stop` event or an error is the last item; later calls return `None`.
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent, CompletionError>> {
        loop {
            if self.terminated {
                return None;
            }
            if let Some(item) = self.pending.pop_front() {
                if matches!(item, Ok(StreamEvent::Stop) | Err(_)) {
                    self.terminated = true;
                    self.pending.clear();
                }
                return Some(item);
            }
            if self.body_done {
                self.terminated = true;
                return None;
            }

            let lines = match self.body.next().await {
                Some(Ok(chunk)) => self.lines.push(&chunk),
                Some(Err(err)) => {
                    self.pending.push_back(Err(err));
                    continue;
                }
                None => {
                    self.body_done = true;
                    self.lines.finish()
                }
            };

            for line in lines {
                match parse_sse_line(&line) {
                    Ok(events) => self.pending.extend(events.into_iter().map(Ok)),
                    Err(err) => {
                        self.pending.push_back(Err(err));
                        break;
                    }
                }
            }
        }
    }
}
