use bytes::BytesMut;
use futures::stream::{BoxStream, StreamExt};

use crate::error::GenerationError;

/// Splits a chunked byte stream into event data payloads.
///
/// `data:` lines are collected until the blank line that ends the event and
/// joined with `\n`. Comments, non-data fields and the `[DONE]` marker are
/// skipped. Lines may be split across chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                out.extend(self.dispatch());
            } else {
                self.field(line);
            }
        }

        out
    }

    /// Flush an event cut off by the end of the body.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let rest = self.buffer.split_to(self.buffer.len());
            let rest = String::from_utf8_lossy(&rest);
            self.field(rest.trim_end_matches(['\n', '\r']));
        }
        self.dispatch()
    }

    fn field(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        let trimmed = data.trim();
        if trimmed.is_empty() || trimmed == "[DONE]" {
            return None;
        }
        Some(data)
    }
}

/// Turn a streaming HTTP response into a stream of SSE data payloads.
///
/// Transport errors end the stream with `GenerationError::Request`.
pub fn data_stream(response: reqwest::Response) -> BoxStream<'static, Result<String, GenerationError>> {
    let bytes = response.bytes_stream().boxed();

    futures::stream::unfold(
        (bytes, SseDecoder::new(), std::collections::VecDeque::new(), false),
        |(mut bytes, mut decoder, mut ready, mut done)| async move {
            loop {
                if let Some(data) = ready.pop_front() {
                    return Some((Ok(data), (bytes, decoder, ready, done)));
                }
                if done {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => ready.extend(decoder.push(&chunk)),
                    Some(Err(e)) => {
                        done = true;
                        return Some((
                            Err(GenerationError::Request(e.to_string())),
                            (bytes, decoder, ready, done),
                        ));
                    }
                    None => {
                        done = true;
                        ready.extend(decoder.finish());
                    }
                }
            }
        },
    )
    .boxed()
}
