//! Terminal-side collaborators
//!
//! The controller talks to two services it does not implement:
//! a [`TerminalSurface`] that renders text and a [`LineReader`] that edits
//! one line of input at a time. [`TermIo`] adapts them to the
//! [`CommandIo`] seam of the execution contexts.

use crate::exec::{CommandIo, InterruptHandle};
use crate::line_buffer::LineBuffer;
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Renders terminal text
pub trait TerminalSurface {
    /// Write text as-is (escape sequences included)
    fn write(&self, text: &str);

    /// Clear the screen
    fn clear(&self) {
        self.write("\x1b[2J\x1b[H");
    }
}

/// Line editor
pub trait LineReader {
    /// Show `prompt` and read one line; `None` once input is closed
    fn read(&self, prompt: String) -> LocalBoxFuture<'static, Option<String>>;

    /// Whether the reader moves to a new line itself when input is submitted
    fn echoes_newline(&self) -> bool {
        false
    }
}

/// Terminal line endings
pub fn crlf(text: &str) -> String {
    text.replace('\n', "\r\n")
}

/// Output switch flipped by an interrupt
///
/// Once closed, everything still arriving for the interrupted command is
/// dropped; the next command opens it again.
#[derive(Debug, Clone, Default)]
pub struct OutputGate {
    closed: Rc<Cell<bool>>,
}

impl OutputGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.closed.set(false);
    }

    pub fn close(&self) {
        self.closed.set(true);
    }

    pub fn is_open(&self) -> bool {
        !self.closed.get()
    }
}

/// Interrupts the running command and silences its output
#[derive(Debug, Clone)]
pub struct Interrupter {
    handle: InterruptHandle,
    gate: OutputGate,
}

impl Interrupter {
    pub fn new(handle: InterruptHandle, gate: OutputGate) -> Self {
        Self { handle, gate }
    }

    /// Returns whether a run was interrupted
    pub fn fire(&self) -> bool {
        if !self.handle.interrupt() {
            return false;
        }
        self.gate.close();
        true
    }
}

type Sink = Box<dyn FnMut(&str)>;

/// Terminal side of one line's runs
pub struct TermIo {
    surface: Rc<dyn TerminalSurface>,
    reader: Rc<dyn LineReader>,
    gate: OutputGate,
    buffer: RefCell<LineBuffer<Sink>>,
    /// Whether the cursor sits at the start of a line
    at_line_start: Rc<Cell<bool>>,
}

impl TermIo {
    pub fn new(surface: Rc<dyn TerminalSurface>, reader: Rc<dyn LineReader>, gate: OutputGate) -> Self {
        let at_line_start = Rc::new(Cell::new(true));

        let sink_surface = Rc::clone(&surface);
        let sink_gate = gate.clone();
        let sink_start = Rc::clone(&at_line_start);
        let sink: Sink = Box::new(move |text: &str| {
            if !sink_gate.is_open() || text.is_empty() {
                return;
            }
            sink_start.set(text.ends_with('\n'));
            sink_surface.write(&crlf(text));
        });

        Self {
            surface,
            reader,
            gate,
            buffer: RefCell::new(LineBuffer::new(sink)),
            at_line_start,
        }
    }

    /// Push out a pending partial line
    pub fn flush(&self) {
        self.buffer.borrow_mut().flush();
    }

    /// Whether the last visible output ended a line
    pub fn at_line_start(&self) -> bool {
        self.at_line_start.get()
    }

    fn write(&self, data: &[u8]) {
        if !self.gate.is_open() {
            self.buffer.borrow_mut().clear();
            return;
        }
        self.buffer.borrow_mut().write(data);
    }
}

impl CommandIo for TermIo {
    fn stdout(&self, data: &[u8]) {
        self.write(data);
    }

    fn stderr(&self, data: &[u8]) {
        self.write(data);
    }

    fn status(&self, text: &str) {
        self.flush();
        if self.gate.is_open() {
            self.surface.write(text);
        }
    }

    fn read_line(&self, caption: String) -> LocalBoxFuture<'static, Option<String>> {
        self.flush();
        // The caption is already on screen; the reader redraws it as its prompt
        if !caption.is_empty() {
            self.surface.write("\r\x1b[K");
        }
        let surface = Rc::clone(&self.surface);
        let newline = !self.reader.echoes_newline();
        let at_line_start = Rc::clone(&self.at_line_start);
        self.reader
            .read(caption)
            .map(move |line| {
                if newline {
                    surface.write("\r\n");
                }
                at_line_start.set(true);
                line
            })
            .boxed_local()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::collections::VecDeque;

    /// Surface recording everything written
    #[derive(Default)]
    pub struct Screen {
        pub text: RefCell<String>,
        pub clears: Cell<usize>,
    }

    impl TerminalSurface for Screen {
        fn write(&self, text: &str) {
            self.text.borrow_mut().push_str(text);
        }

        fn clear(&self) {
            self.clears.set(self.clears.get() + 1);
            self.text.borrow_mut().clear();
        }
    }

    /// Reader answering from a script, recording prompts
    #[derive(Default)]
    pub struct Scripted {
        pub lines: RefCell<VecDeque<String>>,
        pub prompts: RefCell<Vec<String>>,
    }

    impl Scripted {
        pub fn new(lines: &[&str]) -> Self {
            Self {
                lines: RefCell::new(lines.iter().map(|l| l.to_string()).collect()),
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl LineReader for Scripted {
        fn read(&self, prompt: String) -> LocalBoxFuture<'static, Option<String>> {
            self.prompts.borrow_mut().push(prompt);
            let line = self.lines.borrow_mut().pop_front();
            Box::pin(futures::future::ready(line))
        }
    }

    fn term_io(lines: &[&str]) -> (Rc<Screen>, TermIo, OutputGate) {
        let screen = Rc::new(Screen::default());
        let gate = OutputGate::new();
        let io = TermIo::new(screen.clone(), Rc::new(Scripted::new(lines)), gate.clone());
        (screen, io, gate)
    }

    // ============ Output ============

    #[test]
    fn test_lines_converted_to_crlf() {
        let (screen, io, _) = term_io(&[]);
        io.stdout(b"a\nb");
        assert_eq!(*screen.text.borrow(), "a\r\n");
        io.flush();
        assert_eq!(*screen.text.borrow(), "a\r\nb");
        assert!(!io.at_line_start());
    }

    #[test]
    fn test_partial_writes_coalesced() {
        let (screen, io, _) = term_io(&[]);
        for b in b"hello\n" {
            io.stdout(&[*b]);
        }
        assert_eq!(*screen.text.borrow(), "hello\r\n");
        assert!(io.at_line_start());
    }

    #[test]
    fn test_closed_gate_drops_output() {
        let (screen, io, gate) = term_io(&[]);
        io.stdout(b"partial");
        gate.close();
        io.stdout(b" more\n");
        io.flush();
        assert_eq!(*screen.text.borrow(), "");

        gate.open();
        io.stdout(b"next\n");
        assert_eq!(*screen.text.borrow(), "next\r\n");
    }

    #[test]
    fn test_status_flushes_first() {
        let (screen, io, _) = term_io(&[]);
        io.stdout(b"x");
        io.status("loading");
        assert_eq!(*screen.text.borrow(), "xloading");
    }

    // ============ Input ============

    #[test]
    fn test_read_line_uses_caption() {
        let screen = Rc::new(Screen::default());
        let reader = Rc::new(Scripted::new(&["ada"]));
        let io = TermIo::new(screen.clone(), reader.clone(), OutputGate::new());

        io.stdout(b"name? ");
        let line = block_on(io.read_line("name? ".to_string()));
        assert_eq!(line.as_deref(), Some("ada"));
        assert_eq!(*reader.prompts.borrow(), vec!["name? "]);
        assert_eq!(*screen.text.borrow(), "name? \r\x1b[K\r\n");
        assert!(io.at_line_start());
    }

    #[test]
    fn test_interrupter_needs_a_run() {
        let handle = InterruptHandle::new();
        let gate = OutputGate::new();
        let interrupter = Interrupter::new(handle, gate.clone());
        assert!(!interrupter.fire());
        assert!(gate.is_open());
    }
}
