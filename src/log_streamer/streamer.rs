use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::types::*;
use crate::tasks::types::now_nanos;

impl LogStreamer {
    pub fn new(guid: &str, source_name: &str, index: i32, sink: Arc<dyn LogSink>) -> Self {
        if guid.is_empty() {
            return Self::noop();
        }

        let source_name = if source_name.is_empty() {
            DEFAULT_LOG_SOURCE
        } else {
            source_name
        };
        let source_instance = index.to_string();

        let destination = |message_type| {
            Arc::new(StreamDestination {
                guid: guid.to_string(),
                source_name: source_name.to_string(),
                source_instance: source_instance.clone(),
                message_type,
                sink: sink.clone(),
                buffer: Mutex::new(Vec::new()),
            })
        };

        LogStreamer {
            streams: Some(Streams {
                stdout: destination(MessageType::Out),
                stderr: destination(MessageType::Err),
            }),
        }
    }

    pub fn noop() -> Self {
        LogStreamer { streams: None }
    }

    pub fn write_stdout(&self, bytes: &[u8]) {
        if let Some(streams) = &self.streams {
            streams.stdout.write(bytes);
        }
    }

    pub fn write_stderr(&self, bytes: &[u8]) {
        if let Some(streams) = &self.streams {
            streams.stderr.write(bytes);
        }
    }

    /// Emits whatever partial lines are still buffered.
    pub fn flush(&self) {
        if let Some(streams) = &self.streams {
            streams.stdout.flush();
            streams.stderr.flush();
        }
    }

    /// Streamer writing to the same task under another source name.
    pub fn with_source(&self, source_name: &str) -> Self {
        match &self.streams {
            Some(streams) if !source_name.is_empty() => LogStreamer {
                streams: Some(Streams {
                    stdout: Arc::new(streams.stdout.with_source(source_name)),
                    stderr: Arc::new(streams.stderr.with_source(source_name)),
                }),
            },
            _ => self.clone(),
        }
    }

    pub fn source_name(&self) -> &str {
        match &self.streams {
            Some(streams) => &streams.stdout.source_name,
            None => "",
        }
    }
}

impl StreamDestination {
    fn buffer(&self) -> MutexGuard<'_, Vec<u8>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_source(&self, source_name: &str) -> Self {
        StreamDestination {
            guid: self.guid.clone(),
            source_name: source_name.to_string(),
            source_instance: self.source_instance.clone(),
            message_type: self.message_type,
            sink: self.sink.clone(),
            buffer: Mutex::new(Vec::new()),
        }
    }

    fn write(&self, bytes: &[u8]) {
        let mut buffer = self.buffer();
        buffer.extend_from_slice(bytes);

        loop {
            if let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                self.emit(&line[..line.len() - 1]);
            } else if buffer.len() >= MAX_MESSAGE_SIZE {
                let split = char_boundary(&buffer, MAX_MESSAGE_SIZE);
                let chunk: Vec<u8> = buffer.drain(..split).collect();
                self.emit(&chunk);
            } else {
                break;
            }
        }
    }

    fn flush(&self) {
        let mut buffer = self.buffer();
        if !buffer.is_empty() {
            let rest: Vec<u8> = buffer.drain(..).collect();
            self.emit(&rest);
        }
    }

    /// Sends `payload` in messages of at most `MAX_MESSAGE_SIZE` bytes, cut on char boundaries.
    fn emit(&self, payload: &[u8]) {
        let mut rest = payload;
        while !rest.is_empty() {
            let (chunk, tail) = rest.split_at(char_boundary(rest, MAX_MESSAGE_SIZE));
            rest = tail;
            self.sink.emit(LogMessage {
                app_id: self.guid.clone(),
                source_name: self.source_name.clone(),
                source_instance: self.source_instance.clone(),
                message_type: self.message_type,
                message: String::from_utf8_lossy(chunk).into_owned(),
                timestamp: now_nanos(),
            });
        }
    }
}

/// Largest index <= `max` that does not split a UTF-8 sequence.
fn char_boundary(bytes: &[u8], max: usize) -> usize {
    let mut split = max.min(bytes.len());
    while split > 0 && split < bytes.len() && (bytes[split] & 0xC0) == 0x80 {
        split -= 1;
    }
    if split == 0 { max.min(bytes.len()) } else { split }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_streamer::sink::CollectingSink;

    fn streamer(sink: &Arc<CollectingSink>) -> LogStreamer {
        LogStreamer::new("app-guid", "APP", 3, sink.clone())
    }

    #[test]
    fn test_lines_are_emitted_per_newline() {
        let sink = Arc::new(CollectingSink::new());
        let streamer = streamer(&sink);

        streamer.write_stdout(b"hello\nwor");
        streamer.write_stdout(b"ld\n");
        streamer.write_stderr(b"oops\n");

        let messages = sink.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].message, "hello");
        assert_eq!(messages[1].message, "world");
        assert_eq!(messages[2].message, "oops");
        assert_eq!(messages[2].message_type, MessageType::Err);
        assert_eq!(messages[0].source_instance, "3");
        assert_eq!(messages[0].app_id, "app-guid");
    }

    #[test]
    fn test_flush_emits_partial_lines() {
        let sink = Arc::new(CollectingSink::new());
        let streamer = streamer(&sink);

        streamer.write_stdout(b"partial");
        assert!(sink.messages().is_empty());

        streamer.flush();
        assert_eq!(sink.messages()[0].message, "partial");

        streamer.flush();
        assert_eq!(sink.messages().len(), 1);
    }

    #[test]
    fn test_long_output_is_split() {
        let sink = Arc::new(CollectingSink::new());
        let streamer = streamer(&sink);

        streamer.write_stdout(&vec![b'a'; MAX_MESSAGE_SIZE + 10]);
        streamer.flush();

        let messages = sink.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message.len(), MAX_MESSAGE_SIZE);
        assert_eq!(messages[1].message.len(), 10);
    }

    #[test]
    fn test_split_respects_utf8() {
        let mut bytes = vec![b'a'; MAX_MESSAGE_SIZE - 1];
        bytes.extend_from_slice("é".as_bytes());
        assert_eq!(char_boundary(&bytes, MAX_MESSAGE_SIZE), MAX_MESSAGE_SIZE - 1);
    }

    #[test]
    fn test_long_line_keeps_multibyte_chars() {
        let sink = Arc::new(CollectingSink::new());
        let streamer = streamer(&sink);

        let mut line = "a".repeat(MAX_MESSAGE_SIZE - 1);
        line.push_str("é\n");
        streamer.write_stdout(line.as_bytes());

        let messages = sink.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message, "a".repeat(MAX_MESSAGE_SIZE - 1));
        assert_eq!(messages[1].message, "é");
        assert!(messages.iter().all(|m| !m.message.contains('\u{FFFD}')));
    }

    #[test]
    fn test_source_names() {
        let sink = Arc::new(CollectingSink::new());
        let defaulted = LogStreamer::new("guid", "", 0, sink.clone());
        assert_eq!(defaulted.source_name(), DEFAULT_LOG_SOURCE);

        let staged = defaulted.with_source("STG");
        assert_eq!(staged.source_name(), "STG");
        assert_eq!(defaulted.with_source("").source_name(), DEFAULT_LOG_SOURCE);

        staged.write_stdout(b"x\n");
        assert_eq!(sink.messages()[0].source_name, "STG");
    }

    #[test]
    fn test_empty_guid_is_noop() {
        let sink = Arc::new(CollectingSink::new());
        let streamer = LogStreamer::new("", "APP", 0, sink.clone());

        streamer.write_stdout(b"dropped\n");
        streamer.flush();

        assert!(sink.messages().is_empty());
        assert_eq!(streamer.source_name(), "");
    }
}
