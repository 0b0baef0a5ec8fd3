//! Fixture utilities: load recorded SSE streams and drive them through a
//! converter via the stream factory.

use std::io;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;

use charsiu::error::AgentError;
use charsiu::types::ChatStreamEvent;
use charsiu::utils::streaming::{SseEventConverter, StreamFactory};

/// Directory holding the recorded `.sse` fixtures.
pub fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

/// Load an `.sse` fixture and split it into one byte chunk per SSE event
/// block, the way a provider delivers them.
pub fn load_sse_fixture_as_bytes(path: impl AsRef<Path>) -> io::Result<Vec<Result<Vec<u8>, io::Error>>> {
    let raw = std::fs::read_to_string(path)?;
    let normalized = raw.replace("\r\n", "\n");
    let mut chunks = Vec::new();
    for block in normalized.split("\n\n") {
        let block = block.trim_end_matches('\n');
        if block.is_empty() {
            continue;
        }
        // Restore the blank-line terminator stripped by the split.
        chunks.push(Ok(format!("{block}\n\n").into_bytes()));
    }
    Ok(chunks)
}

/// Run the byte chunks through the factory and collect everything the
/// converter produced, errors included.
pub async fn collect_events<C>(
    bytes: Vec<Result<Vec<u8>, io::Error>>,
    converter: C,
) -> Vec<Result<ChatStreamEvent, AgentError>>
where
    C: SseEventConverter + Clone + 'static,
{
    let stream = StreamFactory::from_byte_stream(futures_util::stream::iter(bytes), converter);
    stream.collect().await
}

/// Like [`collect_events`], but a failed item fails the test.
pub async fn collect_ok_events<C>(
    bytes: Vec<Result<Vec<u8>, io::Error>>,
    converter: C,
) -> Vec<ChatStreamEvent>
where
    C: SseEventConverter + Clone + 'static,
{
    collect_events(bytes, converter)
        .await
        .into_iter()
        .map(|item| item.expect("stream item converts cleanly"))
        .collect()
}

/// Concatenation of every content delta, in arrival order.
pub fn streamed_text(events: &[ChatStreamEvent]) -> String {
    let mut text = String::new();
    for event in events {
        if let ChatStreamEvent::ContentDelta { delta, .. } = event {
            text.push_str(delta);
        }
    }
    text
}
