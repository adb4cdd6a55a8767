//! Where response text goes.

use std::io::{self, Write};

/// Receives response fragments in arrival order.
pub trait TextSink: Send {
    /// Writes a fragment as-is, with no separator.
    fn write_fragment(&mut self, text: &str) -> io::Result<()>;

    /// The server finished a turn.
    fn end_turn(&mut self) -> io::Result<()>;
}

/// Writes fragments to stdout and flushes after each, so text shows up
/// as it streams in.
pub struct StdoutSink<W: Write + Send = io::Stdout> {
    out: W,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self { out: io::stdout() }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> TextSink for StdoutSink<W> {
    fn write_fragment(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes())?;
        self.out.flush()
    }

    fn end_turn(&mut self) -> io::Result<()> {
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}
