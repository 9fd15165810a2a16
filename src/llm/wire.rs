//! Response body framing shared by the HTTP clients
//!
//! Splits chunked bodies into lines, parses Server-Sent Events and turns
//! provider-specific lines into [`StreamEvent`]s.

use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;

use crate::error::{EnsembleError, Result};
use crate::llm::provider::{ResponseStream, StreamEvent};

/// A parsed Server-Sent Events line
#[derive(Debug, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Parse SSE data from a line
pub fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let line = line.trim();

    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    if let Some(data) = line.strip_prefix("data:") {
        Some(SseEvent {
            event: None,
            data: data.trim_start().to_string(),
        })
    } else {
        line.strip_prefix("event:").map(|event| SseEvent {
            event: Some(event.trim_start().to_string()),
            data: String::new(),
        })
    }
}

/// Turn an error status into a typed error, pass successful responses through.
pub async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status().as_u16();

    if status == 429 {
        return Err(EnsembleError::RateLimited {
            retry_after_ms: resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000),
        });
    }

    if status >= 400 {
        let body = resp.text().await.unwrap_or_default();
        return Err(EnsembleError::Api { status, body });
    }

    Ok(resp)
}

struct LineState<S> {
    body: Pin<Box<S>>,
    buffer: Vec<u8>,
    ready: VecDeque<String>,
    finished: bool,
}

/// Split a chunked body into text lines.
///
/// Lines are cut on raw `\n` bytes before decoding, so a multi-byte
/// character split across two network chunks is reassembled intact.
pub fn line_stream<S, B>(body: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = LineState {
        body: Box::pin(body),
        buffer: Vec::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(line) = st.ready.pop_front() {
                return Some((Ok(line), st));
            }
            if st.finished {
                return None;
            }

            match st.body.next().await {
                Some(Ok(bytes)) => {
                    st.buffer.extend_from_slice(bytes.as_ref());
                    while let Some(pos) = st.buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = st.buffer.drain(..=pos).collect();
                        st.ready.push_back(decode_line(&line));
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(EnsembleError::Network(e)), st));
                }
                None => {
                    st.finished = true;
                    if !st.buffer.is_empty() {
                        let rest = std::mem::take(&mut st.buffer);
                        st.ready.push_back(decode_line(&rest));
                    }
                }
            }
        }
    })
    .boxed()
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

/// Map every line through `decode`, flattening the produced events.
pub fn decode_lines<F>(lines: BoxStream<'static, Result<String>>, mut decode: F) -> ResponseStream
where
    F: FnMut(&str) -> Result<Vec<StreamEvent>> + Send + 'static,
{
    lines
        .flat_map(move |line| {
            let events: Vec<Result<StreamEvent>> = match line.and_then(|l| decode(&l)) {
                Ok(events) => events.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            stream::iter(events)
        })
        .boxed()
}
