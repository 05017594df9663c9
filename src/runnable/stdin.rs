//! Standard input sources
//!
//! A program reads stdin in arbitrary chunk sizes; lines come either from a
//! preset string (piped input) or one at a time from the handler. Both
//! ABIs terminate every line with `\n` but differ in what follows it:
//!
//! - `Stream` (POSIX ABI): the next read after a drained line asks for
//!   another one; a drained preset is end-of-input
//! - `Alternate` (libc ABI): every drained line is followed by exactly one
//!   end-of-input read; a preset is served once

use super::RunHandler;
use crate::wasm::HostTrap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StdinPolicy {
    Stream,
    Alternate,
}

pub(crate) struct StdinSource {
    policy: StdinPolicy,
    preset: bool,
    pending: Vec<u8>,
    pos: usize,
    eof_next: bool,
}

/// Ensure a line ends with a terminator
fn terminated(mut line: String) -> Vec<u8> {
    if !line.ends_with('\n') {
        line.push('\n');
    }
    line.into_bytes()
}

impl StdinSource {
    pub fn new(policy: StdinPolicy, preset: Option<String>) -> Self {
        Self {
            policy,
            preset: preset.is_some(),
            pending: preset.map(terminated).unwrap_or_default(),
            pos: 0,
            eof_next: false,
        }
    }

    fn drained(&self) -> bool {
        self.pos >= self.pending.len()
    }

    /// Read up to `max` bytes; an empty result is end-of-input
    pub fn read<H: RunHandler>(&mut self, handler: &mut H, max: usize) -> Result<Vec<u8>, HostTrap> {
        if max == 0 {
            return Ok(Vec::new());
        }
        if self.eof_next {
            self.eof_next = false;
            return Ok(Vec::new());
        }

        if self.drained() {
            if self.preset {
                return Ok(Vec::new());
            }

            let line = handler.stdin();
            if handler.interrupted() {
                return Err(HostTrap::Interrupted);
            }
            match line {
                Some(line) => {
                    self.pending = terminated(line);
                    self.pos = 0;
                }
                None => return Ok(Vec::new()),
            }
        }

        let end = self.pos.saturating_add(max).min(self.pending.len());
        let chunk = self.pending[self.pos..end].to_vec();
        self.pos = end;

        if self.drained() && self.policy == StdinPolicy::Alternate {
            self.eof_next = true;
            if self.preset {
                // Served once; stay at end-of-input afterwards
                self.eof_next = false;
            }
        }

        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runnable::RunError;
    use crate::vfs::VirtualFile;
    use std::collections::VecDeque;

    struct Lines {
        lines: VecDeque<String>,
        asked: usize,
    }

    impl Lines {
        fn new(lines: &[&str]) -> Self {
            Self {
                lines: lines.iter().map(|s| s.to_string()).collect(),
                asked: 0,
            }
        }
    }

    impl RunHandler for Lines {
        fn stdin(&mut self) -> Option<String> {
            self.asked += 1;
            self.lines.pop_front()
        }
        fn stdout(&mut self, _data: &[u8]) {}
        fn stderr(&mut self, _data: &[u8]) {}
        fn on_error(&mut self, _error: &RunError) {}
        fn on_finish(&mut self, _files: Vec<VirtualFile>) {}
    }

    fn read_all<H: RunHandler>(source: &mut StdinSource, handler: &mut H, max: usize) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let chunk = source.read(handler, max).unwrap();
            if chunk.is_empty() {
                return out;
            }
            out.extend(chunk);
        }
    }

    #[test]
    fn test_stream_preset_gets_terminator() {
        let mut handler = Lines::new(&[]);
        let mut source = StdinSource::new(StdinPolicy::Stream, Some("hi".to_string()));
        assert_eq!(read_all(&mut source, &mut handler, 1), b"hi\n");
        assert!(source.read(&mut handler, 8).unwrap().is_empty());
        assert_eq!(handler.asked, 0);
    }

    #[test]
    fn test_huge_request_after_partial_read() {
        let mut handler = Lines::new(&[]);
        let mut source = StdinSource::new(StdinPolicy::Stream, Some("abc".to_string()));
        assert_eq!(source.read(&mut handler, 1).unwrap(), b"a");
        assert_eq!(source.read(&mut handler, usize::MAX).unwrap(), b"bc\n");
        assert!(source.read(&mut handler, usize::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_stream_interactive_reads_lines_until_eof() {
        let mut handler = Lines::new(&["one", "two"]);
        let mut source = StdinSource::new(StdinPolicy::Stream, None);
        assert_eq!(read_all(&mut source, &mut handler, 64), b"one\ntwo\n");
        assert_eq!(handler.asked, 3);
    }

    #[test]
    fn test_alternate_preset_served_once() {
        let mut handler = Lines::new(&[]);
        let mut source = StdinSource::new(StdinPolicy::Alternate, Some("a\n".to_string()));
        assert_eq!(source.read(&mut handler, 64).unwrap(), b"a\n");
        assert!(source.read(&mut handler, 64).unwrap().is_empty());
        assert!(source.read(&mut handler, 64).unwrap().is_empty());
    }

    #[test]
    fn test_alternate_interactive_line_then_eof() {
        let mut handler = Lines::new(&["x", "y"]);
        let mut source = StdinSource::new(StdinPolicy::Alternate, None);
        assert_eq!(source.read(&mut handler, 64).unwrap(), b"x\n");
        assert!(source.read(&mut handler, 64).unwrap().is_empty());
        assert_eq!(source.read(&mut handler, 64).unwrap(), b"y\n");
        assert!(source.read(&mut handler, 64).unwrap().is_empty());
        assert_eq!(handler.asked, 2);
    }

    #[test]
    fn test_alternate_partial_reads_before_eof() {
        let mut handler = Lines::new(&["abcd"]);
        let mut source = StdinSource::new(StdinPolicy::Alternate, None);
        assert_eq!(source.read(&mut handler, 2).unwrap(), b"ab");
        assert_eq!(source.read(&mut handler, 2).unwrap(), b"cd");
        assert_eq!(source.read(&mut handler, 2).unwrap(), b"\n");
        assert!(source.read(&mut handler, 2).unwrap().is_empty());
    }

    struct Cancelled;

    impl RunHandler for Cancelled {
        fn stdin(&mut self) -> Option<String> {
            None
        }
        fn stdout(&mut self, _data: &[u8]) {}
        fn stderr(&mut self, _data: &[u8]) {}
        fn interrupted(&self) -> bool {
            true
        }
        fn on_error(&mut self, _error: &RunError) {}
        fn on_finish(&mut self, _files: Vec<VirtualFile>) {}
    }

    #[test]
    fn test_interrupt_during_read_traps() {
        let mut source = StdinSource::new(StdinPolicy::Stream, None);
        assert_eq!(
            source.read(&mut Cancelled, 8).unwrap_err(),
            HostTrap::Interrupted
        );
    }
}
