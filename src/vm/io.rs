use std::io::Write;

use crate::value::Value;

/// Where program output goes. `write` renders into a pending buffer,
/// `flush` emits the buffer and empties it.
pub trait IoSink {
    fn write(&mut self, value: &Value);
    fn flush(&mut self) -> std::io::Result<()>;
}

pub struct BufferedSink<W: Write> {
    buffer: String,
    out: W,
}

impl<W: Write> BufferedSink<W> {
    pub fn new(out: W) -> Self {
        BufferedSink { buffer: String::new(), out }
    }

    /// Text written but not yet flushed.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> IoSink for BufferedSink<W> {
    fn write(&mut self, value: &Value) {
        use std::fmt::Write as _;
        let _ = write!(self.buffer, "{}", value);
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.out.write_all(self.buffer.as_bytes())?;
        self.out.flush()?;
        self.buffer.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_buffers_until_flush() {
        let mut sink = BufferedSink::new(Vec::new());
        sink.write(&Value::Integer(1));
        sink.write(&Value::Boolean(false));
        assert_eq!(sink.pending(), "1!f");
        assert!(sink.get_ref().is_empty());
        sink.flush().unwrap();
        assert_eq!(sink.pending(), "");
        assert_eq!(sink.into_inner(), b"1!f".to_vec());
    }

    #[test]
    fn flush_of_empty_buffer_writes_nothing() {
        let mut sink = BufferedSink::new(Vec::new());
        sink.flush().unwrap();
        assert!(sink.into_inner().is_empty());
    }
}
