//! Accumulated console output of the game server.
//!
//! The service appends every output line of the child process here, plus its
//! own `>>`/`<<` notices. Remote clients read it back through the
//! `mcServerLogs` and `mcLogsUpdate` requests.

use log::debug;

/// Text sink holding the server console.
pub trait LogStore: Send {
    fn current_text(&self) -> &str;

    /// Length in bytes.
    fn current_length(&self) -> usize {
        self.current_text().len()
    }

    fn is_empty(&self) -> bool {
        self.current_length() == 0
    }

    fn append_line(&mut self, line: &str);

    fn line_count(&self) -> usize;

    fn clear(&mut self);
}

/// In-memory console buffer, one `\n`-terminated entry per line.
#[derive(Debug, Default)]
pub struct ConsoleLog {
    text: String,
    lines: usize,
}

impl ConsoleLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for ConsoleLog {
    fn current_text(&self) -> &str {
        &self.text
    }

    fn append_line(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
        self.lines += 1;
    }

    fn line_count(&self) -> usize {
        self.lines
    }

    fn clear(&mut self) {
        self.text.clear();
        self.lines = 0;
    }
}

/// Byte offset into the console up to which a remote client is caught up.
///
/// The offset is set when a client asks for the log size and moves forward
/// with every delta handed out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LogCursor {
    position: Option<usize>,
}

impl LogCursor {
    pub fn mark(&mut self, position: usize) {
        self.position = Some(position);
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }

    /// Returns the bytes appended since the last call, if any.
    ///
    /// Nothing is returned before the first [`mark`](Self::mark). When the
    /// console shrank (it was cleared), the cursor jumps to the new end and
    /// later growth is reported again.
    pub fn advance<'a>(&mut self, text: &'a [u8]) -> Option<&'a [u8]> {
        let last = self.position?;
        let now = text.len();

        if now < last {
            debug!("Console shrank from {} to {} bytes, resyncing", last, now);
            self.position = Some(now);
            return None;
        }
        if now == last {
            return None;
        }

        self.position = Some(now);
        Some(&text[last..])
    }
}
