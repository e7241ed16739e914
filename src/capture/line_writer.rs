use std::io::{self, Write};

use super::timestamp::TimestampFormat;

/// Longest partial line held back waiting for a newline. Anything beyond is
/// emitted as its own line so a logger that never prints newlines cannot
/// grow the buffer without bound.
const MAX_PENDING_LINE: usize = 16 * 1024;

/// Splits an arbitrary byte stream into timestamped lines.
///
/// Bytes are buffered until a newline (or [`MAX_PENDING_LINE`]) and emitted
/// as `<timestamp> <line>\n`. A partial line survives across writes for the
/// life of the process and is flushed by [`close`](Self::close), which is
/// idempotent.
pub struct LineWriter<W: Write> {
    inner: W,
    format: TimestampFormat,
    pending: Vec<u8>,
    closed: bool,
}

impl<W: Write> LineWriter<W> {
    pub fn new(inner: W, format: TimestampFormat) -> Self {
        Self {
            inner,
            format,
            pending: Vec::new(),
            closed: false,
        }
    }

    fn emit(&mut self, line: &[u8]) -> io::Result<()> {
        self.inner.write_all(self.format.now().as_bytes())?;
        self.inner.write_all(b" ")?;
        self.inner.write_all(line)?;
        self.inner.write_all(b"\n")
    }

    /// Flushes any held partial line and the underlying writer. Safe to call
    /// more than once; later calls are no-ops.
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.emit(&line)?;
        }
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for LineWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write after close",
            ));
        }
        self.pending.extend_from_slice(buf);

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let rest = self.pending.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.pending, rest);
            line.pop(); // trailing newline
            self.emit(&line)?;
        }

        while self.pending.len() >= MAX_PENDING_LINE {
            let rest = self.pending.split_off(MAX_PENDING_LINE);
            let line = std::mem::replace(&mut self.pending, rest);
            self.emit(&line)?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
