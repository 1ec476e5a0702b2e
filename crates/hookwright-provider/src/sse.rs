//! Server-sent event framing for the generation stream.
//!
//! The backend separates events with a blank line and carries one JSON
//! payload per event on a `data:` line. Only the first `data:` line of an
//! event is read; multi-line data fields are not joined.

use bytes::Bytes;
use futures_core::Stream;
use hookwright_schema::GenerationEvent;
use tokio_stream::StreamExt;

use crate::BackendError;

const EVENT_DELIMITER: &str = "\n\n";
const MAX_LOGGED_PAYLOAD: usize = 120;

/// Incremental UTF-8 decoder. A multi-byte character split across two
/// reads is held back until its remaining bytes arrive.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flushes bytes still held at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Splits buffered text into complete events. The trailing segment after
/// the last delimiter stays buffered until more text arrives.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    skipped: usize,
}

impl SseParser {
    pub fn push(&mut self, fragment: &str) -> Vec<GenerationEvent> {
        self.buffer.push_str(fragment);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find(EVENT_DELIMITER) {
            let segment: String = self.buffer.drain(..pos + EVENT_DELIMITER.len()).collect();
            if let Some(event) = self.parse_segment(&segment[..pos]) {
                events.push(event);
            }
        }
        events
    }

    /// Parses whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Vec<GenerationEvent> {
        let rest = std::mem::take(&mut self.buffer);
        self.parse_segment(&rest).into_iter().collect()
    }

    /// Number of events dropped because their payload was not valid JSON.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn parse_segment(&mut self, segment: &str) -> Option<GenerationEvent> {
        if segment.trim().is_empty() {
            return None;
        }
        let data = segment.lines().find_map(data_payload)?;

        match serde_json::from_str::<GenerationEvent>(data) {
            Ok(event) => Some(event),
            Err(e) => {
                self.skipped += 1;
                let preview: String = data.chars().take(MAX_LOGGED_PAYLOAD).collect();
                tracing::warn!(error = %e, payload = %preview, "skipping malformed sse payload");
                None
            }
        }
    }
}

fn data_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Turns a response body into parsed generation events. A read error is
/// yielded once and ends the stream.
pub fn event_stream<S>(byte_stream: S) -> impl Stream<Item = Result<GenerationEvent, BackendError>> + Send
where
    S: Stream<Item = Result<Bytes, BackendError>> + Send + 'static,
{
    async_stream::stream! {
        tokio::pin!(byte_stream);
        let mut decoder = Utf8Decoder::default();
        let mut parser = SseParser::default();

        while let Some(chunk_result) = byte_stream.next().await {
            match chunk_result {
                Ok(bytes) => {
                    let text = decoder.decode(&bytes);
                    for event in parser.push(&text) {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        let tail = decoder.finish();
        for event in parser.push(&tail) {
            yield Ok(event);
        }
        for event in parser.finish() {
            yield Ok(event);
        }
        if parser.skipped() > 0 {
            tracing::debug!(skipped = parser.skipped(), "generation stream ended with skipped events");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookwright_schema::ChunkSection;

    const PAYLOAD: &str = concat!(
        "data: {\"type\":\"conversation\",\"content\":\"Here are some openers ✨\"}\n\n",
        "data: {\"type\":\"chunk\",\"section\":\"hook\",\"content\":\"Te\"}\n\n",
        "data: {\"type\":\"chunk\",\"section\":\"hook\",\"content\":\"st\"}\n\n",
        "data: {\"type\":\"hook\",\"content\":\"Test\",\"index\":0}\n\n",
        "data: {\"type\":\"complete\"}\n\n",
    );

    fn parse_fragments(fragments: &[&[u8]]) -> Vec<GenerationEvent> {
        let mut decoder = Utf8Decoder::default();
        let mut parser = SseParser::default();
        let mut events = Vec::new();
        for fragment in fragments {
            events.extend(parser.push(&decoder.decode(fragment)));
        }
        events.extend(parser.push(&decoder.finish()));
        events.extend(parser.finish());
        events
    }

    #[test]
    fn parses_whole_payload() {
        let events = parse_fragments(&[PAYLOAD.as_bytes()]);
        assert_eq!(events.len(), 5);
        assert_eq!(
            events[0],
            GenerationEvent::Conversation {
                content: "Here are some openers ✨".into()
            }
        );
        assert_eq!(events[4], GenerationEvent::Complete);
    }

    #[test]
    fn every_two_way_split_yields_same_events() {
        let bytes = PAYLOAD.as_bytes();
        let expected = parse_fragments(&[bytes]);
        for split in 1..bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(parse_fragments(&[a, b]), expected, "split at byte {split}");
        }
    }

    #[test]
    fn byte_at_a_time_yields_same_events() {
        let bytes = PAYLOAD.as_bytes();
        let expected = parse_fragments(&[bytes]);
        let fragments: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(parse_fragments(&fragments), expected);
    }

    #[test]
    fn no_event_before_delimiter_arrives() {
        let mut parser = SseParser::default();
        assert!(parser
            .push("data: {\"type\":\"complete\"}\n")
            .is_empty());
        assert_eq!(parser.push("\n"), vec![GenerationEvent::Complete]);
    }

    #[test]
    fn split_multibyte_character_is_reassembled() {
        let mut decoder = Utf8Decoder::default();
        let sparkle = "✨".as_bytes();
        assert_eq!(decoder.decode(&sparkle[..1]), "");
        assert_eq!(decoder.decode(&sparkle[1..2]), "");
        assert_eq!(decoder.decode(&sparkle[2..]), "✨");
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn malformed_json_is_skipped_and_stream_continues() {
        let mut parser = SseParser::default();
        let events = parser.push(concat!(
            "data: {\"type\":\"chunk\",\"section\":\"conversation\",\"content\":\"Hel\"}\n\n",
            "data: {not json}\n\n",
            "data: {\"type\":\"chunk\",\"section\":\"conversation\",\"content\":\"lo\"}\n\n",
        ));
        assert_eq!(events.len(), 2);
        assert_eq!(parser.skipped(), 1);
        assert!(matches!(
            &events[1],
            GenerationEvent::Chunk { section: ChunkSection::Conversation, content } if content == "lo"
        ));
    }

    #[test]
    fn blank_segments_and_comments_are_ignored() {
        let mut parser = SseParser::default();
        let events = parser.push("\n\n   \n\n: keep-alive\n\nevent: ping\n\n");
        assert!(events.is_empty());
        assert_eq!(parser.skipped(), 0);
    }

    #[test]
    fn only_first_data_line_is_used() {
        let mut parser = SseParser::default();
        let events = parser.push(concat!(
            "event: message\n",
            "data: {\"type\":\"hook\",\"content\":\"first\",\"index\":1}\n",
            "data: {\"type\":\"hook\",\"content\":\"second\",\"index\":2}\n\n",
        ));
        assert_eq!(
            events,
            vec![GenerationEvent::Hook {
                content: "first".into(),
                index: 1
            }]
        );
    }

    #[test]
    fn data_prefix_without_space_is_accepted() {
        let mut parser = SseParser::default();
        assert_eq!(
            parser.push("data:{\"type\":\"complete\"}\n\n"),
            vec![GenerationEvent::Complete]
        );
    }

    #[test]
    fn trailing_event_without_delimiter_is_flushed_on_finish() {
        let mut parser = SseParser::default();
        assert!(parser.push("data: {\"type\":\"complete\"}").is_empty());
        assert_eq!(parser.finish(), vec![GenerationEvent::Complete]);
        assert!(parser.finish().is_empty());
    }

    #[tokio::test]
    async fn event_stream_stops_after_read_error() {
        let chunks: Vec<Result<Bytes, BackendError>> = vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"conversation\",\"content\":\"A\"}\n\n")),
            Err(BackendError::Body("connection reset".into())),
            Ok(Bytes::from_static(b"data: {\"type\":\"complete\"}\n\n")),
        ];
        let stream = event_stream(tokio_stream::iter(chunks));
        tokio::pin!(stream);

        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item);
        }

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(BackendError::Body(_))));
    }

    #[tokio::test]
    async fn event_stream_reassembles_fragmented_body() {
        let chunks: Vec<Result<Bytes, BackendError>> = PAYLOAD
            .as_bytes()
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let stream = event_stream(tokio_stream::iter(chunks));
        tokio::pin!(stream);

        let mut events = Vec::new();
        while let Some(item) = stream.next().await {
            events.push(item.unwrap());
        }
        assert_eq!(events, parse_fragments(&[PAYLOAD.as_bytes()]));
    }
}
