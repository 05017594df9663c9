//! Output line buffer
//!
//! Program output arrives in arbitrary chunks (single bytes from a character
//! device, partial writes from libc buffering). The terminal wants whole
//! lines, so chunks are accumulated and every complete line, terminator
//! included, is handed to the sink as soon as it is complete. `flush` pushes
//! out whatever is left, e.g. a prompt that is waiting for input.

/// Coalesces output chunks into whole lines
pub struct LineBuffer<F: FnMut(&str)> {
    sink: F,
    pending: Vec<u8>,
}

impl<F: FnMut(&str)> LineBuffer<F> {
    pub fn new(sink: F) -> Self {
        Self {
            sink,
            pending: Vec::new(),
        }
    }

    /// Accumulate a chunk and emit every line it completes
    pub fn write(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);

        while let Some(idx) = self.pending.iter().position(|&b| b == b'\n') {
            let rest = self.pending.split_off(idx + 1);
            let line = std::mem::replace(&mut self.pending, rest);
            (self.sink)(&String::from_utf8_lossy(&line));
        }
    }

    /// Emit any trailing partial line immediately
    pub fn flush(&mut self) {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            (self.sink)(&String::from_utf8_lossy(&rest));
        }
    }

    /// Bytes waiting for a line terminator
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Drop pending output without emitting it
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn collecting() -> (Rc<RefCell<Vec<String>>>, impl FnMut(&str)) {
        let lines = Rc::new(RefCell::new(Vec::new()));
        let sink_lines = Rc::clone(&lines);
        (lines, move |line: &str| sink_lines.borrow_mut().push(line.to_string()))
    }

    #[test]
    fn test_partial_writes_form_one_line() {
        let (lines, sink) = collecting();
        let mut buffer = LineBuffer::new(sink);

        buffer.write(b"he");
        buffer.write(b"llo");
        assert!(lines.borrow().is_empty());

        buffer.write(b"\n");
        assert_eq!(*lines.borrow(), vec!["hello\n"]);
    }

    #[test]
    fn test_chunk_with_several_lines() {
        let (lines, sink) = collecting();
        let mut buffer = LineBuffer::new(sink);

        buffer.write(b"a\nb\nc");
        assert_eq!(*lines.borrow(), vec!["a\n", "b\n"]);
        assert_eq!(buffer.pending(), b"c");
    }

    #[test]
    fn test_flush_emits_remainder_once() {
        let (lines, sink) = collecting();
        let mut buffer = LineBuffer::new(sink);

        buffer.write(b"name? ");
        buffer.flush();
        buffer.flush();
        assert_eq!(*lines.borrow(), vec!["name? "]);
    }

    #[test]
    fn test_flush_without_remainder_emits_nothing() {
        let (lines, sink) = collecting();
        let mut buffer = LineBuffer::new(sink);

        buffer.write(b"done\n");
        buffer.flush();
        assert_eq!(lines.borrow().len(), 1);
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let (lines, sink) = collecting();
        let mut buffer = LineBuffer::new(sink);

        let text = "grüße\n".as_bytes();
        for byte in text {
            buffer.write(std::slice::from_ref(byte));
        }
        assert_eq!(*lines.borrow(), vec!["grüße\n"]);
    }

    #[test]
    fn test_emission_count_matches_terminators() {
        let (lines, sink) = collecting();
        let mut buffer = LineBuffer::new(sink);

        let chunks: [&[u8]; 5] = [b"x", b"\n\n", b"yy", b"y\nz", b"\n"];
        for chunk in chunks {
            buffer.write(chunk);
        }
        assert_eq!(lines.borrow().len(), 4);
    }
}
