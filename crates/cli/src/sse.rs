//! Incremental parser for `text/event-stream` bodies

/// One dispatched event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Feed chunks as they arrive; complete events come back in order
///
/// Bytes are buffered until a block is complete, so multi-byte characters
/// split across chunks decode intact.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        // CR never occurs inside a multi-byte sequence
        self.buffer.extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = SseEvent {
        event: "message".to_string(),
        ..Default::default()
    };
    let mut data_lines = Vec::new();

    for line in block.lines() {
        // Comment lines (keep-alives) start with ':'
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event.event = value.to_string(),
            "data" => data_lines.push(value),
            "id" => event.id = Some(value.to_string()),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    event.data = data_lines.join("\n");
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_split_across_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"event: completed\ndata: {\"jobId\"").is_empty());

        let events = parser.feed(b":\"1\"}\nid: 0\n\nevent: heartbeat\ndata: {}\nid: 1\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: "completed".into(),
                    data: "{\"jobId\":\"1\"}".into(),
                    id: Some("0".into()),
                },
                SseEvent {
                    event: "heartbeat".into(),
                    data: "{}".into(),
                    id: Some("1".into()),
                },
            ]
        );
    }

    #[test]
    fn test_comments_and_empty_blocks_are_skipped() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b": keep-alive\n\n").is_empty());
        let events = parser.feed(b"data: plain\r\n\r\n");
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "plain");
        assert_eq!(events[0].id, None);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let frame = "event: completed\ndata: {\"name\":\"café\"}\n\n".as_bytes();
        let split = frame.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut parser = SseParser::default();
        assert!(parser.feed(&frame[..split]).is_empty());
        let events = parser.feed(&frame[split..]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, r#"{"name":"café"}"#);
    }

    #[test]
    fn test_crlf_terminator_split_across_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"data: x\r\n\r").is_empty());
        let events = parser.feed(b"\n");
        assert_eq!(events[0].data, "x");
    }
}
