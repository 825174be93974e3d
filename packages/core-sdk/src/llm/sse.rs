//! Server-sent event framing shared by the streaming adapters.

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use reqwest::Response;

use crate::error::ChatError;

/**
 * \brief Incremental SSE decoder: bytes in, `data:` payloads out.
 * \details Carriage returns are dropped so `\r\n\r\n` and `\n\n` delimit events alike.
 */
#[derive(Debug, Default)]
pub struct SseBuffer {
    buf: Vec<u8>,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /**
     * \brief Appends a network chunk and returns the payloads of every completed event.
     */
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
        let mut out = Vec::new();
        while let Some(pos) = find_double_newline(&self.buf) {
            let block = self.buf.drain(..pos + 2).collect::<Vec<u8>>();
            if let Some(data) = extract_data(&block) {
                out.push(data);
            }
        }
        out
    }

    /**
     * \brief Payload of a trailing event that was not terminated by a blank line.
     */
    pub fn finish(&mut self) -> Option<String> {
        let block = std::mem::take(&mut self.buf);
        extract_data(&block)
    }
}

/**
 * \brief Streams the `data:` payloads of an SSE response body in arrival order.
 */
pub(crate) fn data_payloads(
    provider: &'static str,
    resp: Response,
) -> impl Stream<Item = Result<String, ChatError>> + Send {
    let mut body = resp.bytes_stream();
    try_stream! {
        let mut decoder = SseBuffer::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ChatError::upstream(provider, e.to_string()))?;
            for data in decoder.push(&chunk) {
                yield data;
            }
        }
        if let Some(data) = decoder.finish() {
            yield data;
        }
    }
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

/**
 * \brief Joins the `data:` lines of one event; `None` for comment-only or empty events.
 */
fn extract_data(block: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(block);
    let lines: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}
