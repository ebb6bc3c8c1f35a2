//! Line assembly for stream and datagram transports.
//!
//! Bytes accumulate in a bounded buffer until a `\r` or `\n` terminator.
//! A line that outgrows the buffer is discarded up to its terminator and
//! reported once as [`LineEvent::TooLong`].

/// Longest line kept, in bytes.
pub const MAX_LINE_LEN: usize = 128;

/// One assembled line, or the reason it was lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Line(String),
    /// The line exceeded [`MAX_LINE_LEN`].
    TooLong,
    /// The line was not valid UTF-8.
    Invalid,
}

/// Bounded line accumulator.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: heapless::Vec<u8, MAX_LINE_LEN>,
    overflowed: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes and return every line they complete.
    pub fn feed(&mut self, data: &[u8]) -> Vec<LineEvent> {
        let mut events = Vec::new();
        for &byte in data {
            if byte == b'\r' || byte == b'\n' {
                events.extend(self.finish());
            } else if !self.overflowed && self.buf.push(byte).is_err() {
                self.overflowed = true;
                self.buf.clear();
            }
        }
        events
    }

    /// Emit a pending unterminated line (end of datagram or body).
    pub fn flush(&mut self) -> Option<LineEvent> {
        self.finish()
    }

    /// Bytes held for the current, unterminated line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn finish(&mut self) -> Option<LineEvent> {
        if std::mem::take(&mut self.overflowed) {
            return Some(LineEvent::TooLong);
        }
        if self.buf.is_empty() {
            return None;
        }
        let event = match std::str::from_utf8(&self.buf) {
            Ok(line) => LineEvent::Line(line.to_owned()),
            Err(_) => LineEvent::Invalid,
        };
        self.buf.clear();
        Some(event)
    }
}

/// Split a complete payload (datagram or HTTP body) into lines.
pub fn split_payload(data: &[u8]) -> Vec<LineEvent> {
    let mut buffer = LineBuffer::new();
    let mut events = buffer.feed(data);
    events.extend(buffer.flush());
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(s: &str) -> LineEvent {
        LineEvent::Line(s.to_string())
    }

    #[test]
    fn test_partial_reads_assemble() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.feed(b"$IIMWV,045.0,R,").is_empty());
        assert_eq!(buffer.pending(), 15);

        let events = buffer.feed(b"12.5,N,A*XX\r\n$HEHDT");
        assert_eq!(events, vec![line("$IIMWV,045.0,R,12.5,N,A*XX")]);
        assert_eq!(buffer.flush(), Some(line("$HEHDT")));
    }

    #[test]
    fn test_overlong_line_reported_once() {
        let mut buffer = LineBuffer::new();
        let long = vec![b'A'; MAX_LINE_LEN * 2];
        assert!(buffer.feed(&long).is_empty());

        let events = buffer.feed(b"\r\n$OK\r\n");
        assert_eq!(events, vec![LineEvent::TooLong, line("$OK")]);
    }

    #[test]
    fn test_invalid_utf8() {
        assert_eq!(split_payload(b"\xff\xfe\n"), vec![LineEvent::Invalid]);
    }

    #[test]
    fn test_split_payload_multiple_lines() {
        let events = split_payload(b"$A*00\r\n\r\n$B*00\n$C*00");
        assert_eq!(events, vec![line("$A*00"), line("$B*00"), line("$C*00")]);
    }
}
