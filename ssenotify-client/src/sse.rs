//! Incremental `text/event-stream` decoder

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerEvent {
    /// `id` field of this event, if it carried one
    pub id: Option<String>,
    /// `event` field; `None` means the default `message` type
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// The `id` parsed as a notification sequence number
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        self.id.as_deref().and_then(|id| id.parse().ok())
    }
}

/// Splits an event stream into [`ServerEvent`]s.
///
/// Bytes may arrive in arbitrary chunks; partial lines are buffered until
/// their terminator arrives. Lines end with `\n`, `\r\n` or a lone `\r`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    id: Option<String>,
    event: Option<String>,
    data: String,
    has_data: bool,
    last_event_id: Option<String>,
    retry: Option<u64>,
    /// The previous line ended with `\r`; a leading `\n` belongs to it
    skip_lf: bool,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every event it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ServerEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        for i in 0..self.buffer.len() {
            let byte = self.buffer[i];
            if std::mem::take(&mut self.skip_lf) && byte == b'\n' {
                start = i + 1;
                continue;
            }
            if byte != b'\n' && byte != b'\r' {
                continue;
            }

            let line = String::from_utf8_lossy(&self.buffer[start..i]).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
            self.skip_lf = byte == b'\r';
            start = i + 1;
        }
        self.buffer.drain(..start);

        events
    }

    /// Most recent `id` seen on the stream
    #[must_use]
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Reconnection delay requested by the server, in milliseconds
    #[must_use]
    pub const fn retry(&self) -> Option<u64> {
        self.retry
    }

    fn process_line(&mut self, line: &str) -> Option<ServerEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            // Comment, used for keep-alives
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.event = Some(value.to_string()),
            "id" if !value.contains('\0') => {
                self.id = Some(value.to_string());
                self.last_event_id = Some(value.to_string());
            }
            "retry" => {
                if let Ok(millis) = value.parse() {
                    self.retry = Some(millis);
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<ServerEvent> {
        let id = self.id.take();
        let event = self.event.take();
        if !std::mem::take(&mut self.has_data) {
            return None;
        }
        Some(ServerEvent {
            id,
            event,
            data: std::mem::take(&mut self.data),
        })
    }
}
