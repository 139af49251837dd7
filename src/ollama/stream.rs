use futures::{Stream, StreamExt};
use std::pin::Pin;
use tracing::{debug, warn};

use super::types::ChatChunk;
use crate::error::ClientError;

/// Text increments of one streamed reply.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ClientError>> + Send>>;

struct DecodeState<S> {
    body: S,
    buf: Vec<u8>,
    endpoint: String,
    eof: bool,
}

enum Line {
    Skip,
    Text { text: String, done: bool },
}

/// Decode an NDJSON chat body into text increments.
///
/// The returned stream ends after the line carrying `done: true`, or when the
/// body closes. It owns the body: dropping the stream early drops the
/// underlying connection with it.
pub fn decode_ndjson<S, B, E>(
    body: S,
    endpoint: impl Into<String>,
) -> impl Stream<Item = Result<String, ClientError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let state = DecodeState {
        body,
        buf: Vec::new(),
        endpoint: endpoint.into(),
        eof: false,
    };

    futures::stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            if let Some(raw) = take_line(&mut state.buf, state.eof) {
                match parse_line(&raw) {
                    Line::Skip => continue,
                    Line::Text { text, done: true } => {
                        debug!(endpoint = %state.endpoint, "Stream signalled completion");
                        // Dropping `state` here releases the connection.
                        return if text.is_empty() {
                            None
                        } else {
                            Some((Ok(text), None))
                        };
                    }
                    Line::Text { text, done: false } => {
                        if text.is_empty() {
                            continue;
                        }
                        return Some((Ok(text), Some(state)));
                    }
                }
            }

            if state.eof {
                return None;
            }

            match state.body.next().await {
                Some(Ok(bytes)) => state.buf.extend_from_slice(bytes.as_ref()),
                Some(Err(e)) => {
                    let err = ClientError::Stream {
                        endpoint: state.endpoint.clone(),
                        message: e.to_string(),
                    };
                    return Some((Err(err), None));
                }
                None => state.eof = true,
            }
        }
    })
}

/// Pop the next complete line. At end of body, whatever is left counts as a
/// final line even without a trailing newline.
fn take_line(buf: &mut Vec<u8>, eof: bool) -> Option<Vec<u8>> {
    if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
        let mut line: Vec<u8> = buf.drain(..=pos).collect();
        line.pop();
        return Some(line);
    }
    if eof && !buf.is_empty() {
        return Some(std::mem::take(buf));
    }
    None
}

fn parse_line(raw: &[u8]) -> Line {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Line::Skip;
    }
    match serde_json::from_str::<ChatChunk>(trimmed) {
        Ok(chunk) => Line::Text {
            text: chunk.content().unwrap_or_default().to_string(),
            done: chunk.done,
        },
        Err(e) => {
            warn!(line = %trimmed, "Skipping undecodable stream line: {}", e);
            Line::Skip
        }
    }
}
