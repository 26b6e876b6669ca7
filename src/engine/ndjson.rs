//! Newline-delimited JSON framing for streaming engine responses.

use crate::error::{CuratorError, EngineError, Result};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;

struct LineState<B, E> {
    body: BoxStream<'static, std::result::Result<B, E>>,
    buf: Vec<u8>,
    done: bool,
}

/// Split a chunked byte stream into trimmed, non-empty lines.
///
/// Chunks may end mid-line or mid-codepoint; bytes are buffered until a
/// newline arrives. A transport error ends the stream after being yielded.
pub fn lines<S, B, E>(body: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<EngineError> + Send + 'static,
{
    let state = LineState {
        body: body.boxed(),
        buf: Vec::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = st.buf.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line).trim().to_string();
                if text.is_empty() {
                    continue;
                }
                return Some((Ok(text), st));
            }

            if st.done {
                let rest = std::mem::take(&mut st.buf);
                let text = String::from_utf8_lossy(&rest).trim().to_string();
                if text.is_empty() {
                    return None;
                }
                return Some((Ok(text), st));
            }

            match st.body.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    st.done = true;
                    st.buf.clear();
                    return Some((Err(CuratorError::Engine(e.into())), st));
                }
                None => st.done = true,
            }
        }
    })
    .boxed()
}

/// Decode one NDJSON line
pub fn parse_line<T: DeserializeOwned>(line: &str) -> Result<T> {
    serde_json::from_str(line).map_err(|e| {
        CuratorError::Engine(EngineError::Protocol(format!(
            "invalid stream line {line:?}: {e}"
        )))
    })
}
