//! Synchronization bridge
//!
//! Lets a background context block inside a synchronous stdin read until
//! the foreground, whose line editor is asynchronous, hands over a line.
//!
//! Shared state is two word arrays:
//! - the pause flag (one word): 0 = running, 1 = held
//! - the input window ([`WINDOW_LEN`] words): one code point per word,
//!   0-terminated; a leading [`END_OF_INPUT`] means the read was cancelled
//!
//! Only the background side writes 1 into the flag, only the foreground
//! side writes 0 and notifies. Between the two the background side makes
//! no progress, so there is never more than one request in flight.

/// Words in the input window
pub const WINDOW_LEN: usize = 1000;

/// Longest line that fits the window next to its terminator
pub const MAX_INPUT_CHARS: usize = WINDOW_LEN - 1;

/// First window word of a cancelled read
pub const END_OF_INPUT: i32 = -1;

const RUNNING: i32 = 0;
const HELD: i32 = 1;

/// A fixed array of 32-bit words visible to both contexts
pub trait SharedWords {
    fn len(&self) -> usize;

    fn load(&self, index: usize) -> i32;

    fn store(&self, index: usize, value: i32);

    /// Block the calling context while word `index` equals `expected`.
    /// May return spuriously; callers re-check.
    fn wait(&self, index: usize, expected: i32);

    /// Wake every context waiting on word `index`
    fn notify(&self, index: usize);
}

/// Write a line (or end-of-input) into the window
pub fn encode_input<W: SharedWords>(window: &W, line: Option<&str>) {
    let Some(line) = line else {
        window.store(0, END_OF_INPUT);
        return;
    };

    let limit = window.len().saturating_sub(1).min(MAX_INPUT_CHARS);
    let mut end = 0;
    for (i, c) in line.chars().take(limit).enumerate() {
        window.store(i, c as i32);
        end = i + 1;
    }
    if end < window.len() {
        window.store(end, 0);
    }
}

/// Read the window back; `None` is end-of-input
pub fn decode_input<W: SharedWords>(window: &W) -> Option<String> {
    if window.len() == 0 || window.load(0) == END_OF_INPUT {
        return None;
    }

    let mut line = String::new();
    for i in 0..window.len() {
        let word = window.load(i);
        if word == 0 {
            break;
        }
        line.extend(u32::try_from(word).ok().and_then(char::from_u32));
    }
    Some(line)
}

/// Pause flag plus input window
pub struct Bridge<W> {
    pause: W,
    window: W,
}

impl<W: SharedWords> Bridge<W> {
    pub fn new(pause: W, window: W) -> Self {
        Self { pause, window }
    }

    pub fn pause_words(&self) -> &W {
        &self.pause
    }

    pub fn window_words(&self) -> &W {
        &self.window
    }

    /// Whether a request is waiting for input
    pub fn is_held(&self) -> bool {
        self.pause.load(0) == HELD
    }

    /// Background side: hold, let `signal` ask the foreground for a line,
    /// then block until it is delivered. Returns end-of-input once
    /// `cancelled` reports true.
    ///
    /// A canceller sets its flag before checking [`Bridge::is_held`], so
    /// after the flag is stored here one of the two sides sees the other.
    pub fn request(&self, signal: impl FnOnce(), cancelled: impl Fn() -> bool) -> Option<String> {
        // The flag must be set before the foreground can possibly answer
        self.pause.store(0, HELD);
        if cancelled() {
            self.pause.store(0, RUNNING);
            return None;
        }
        signal();

        while self.pause.load(0) == HELD {
            if cancelled() {
                self.pause.store(0, RUNNING);
                return None;
            }
            self.pause.wait(0, HELD);
        }
        decode_input(&self.window)
    }

    /// Foreground side: publish a line and release the background side
    pub fn deliver(&self, line: Option<&str>) {
        encode_input(&self.window, line);
        self.pause.store(0, RUNNING);
        self.pause.notify(0);
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native::NativeWords;

#[cfg(target_arch = "wasm32")]
pub use web::WebWords;

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use super::{Bridge, SharedWords, WINDOW_LEN};
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::{Condvar, Mutex, PoisonError};

    /// Atomic words with a condvar standing in for futex wait/notify
    pub struct NativeWords {
        words: Vec<AtomicI32>,
        lock: Mutex<()>,
        cond: Condvar,
    }

    impl NativeWords {
        pub fn new(len: usize) -> Self {
            Self {
                words: (0..len).map(|_| AtomicI32::new(0)).collect(),
                lock: Mutex::new(()),
                cond: Condvar::new(),
            }
        }
    }

    impl SharedWords for NativeWords {
        fn len(&self) -> usize {
            self.words.len()
        }

        fn load(&self, index: usize) -> i32 {
            self.words
                .get(index)
                .map(|w| w.load(Ordering::SeqCst))
                .unwrap_or(0)
        }

        fn store(&self, index: usize, value: i32) {
            if let Some(word) = self.words.get(index) {
                word.store(value, Ordering::SeqCst);
            }
        }

        fn wait(&self, index: usize, expected: i32) {
            let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            while self.load(index) == expected {
                guard = self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner);
            }
        }

        fn notify(&self, _index: usize) {
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.cond.notify_all();
        }
    }

    impl Bridge<NativeWords> {
        /// A bridge for two threads of one process
        pub fn native() -> Self {
            Bridge::new(NativeWords::new(1), NativeWords::new(WINDOW_LEN))
        }
    }
}

#[cfg(target_arch = "wasm32")]
mod web {
    use super::{Bridge, SharedWords, WINDOW_LEN};
    use js_sys::{Atomics, Int32Array, SharedArrayBuffer};

    /// An `Int32Array` over a `SharedArrayBuffer`
    #[derive(Clone)]
    pub struct WebWords(Int32Array);

    impl WebWords {
        /// Allocate a fresh shared buffer
        pub fn shared(len: usize) -> Self {
            let buffer = SharedArrayBuffer::new((len * 4) as u32);
            Self(Int32Array::new(&buffer))
        }

        /// View received from another context
        pub fn from_array(array: Int32Array) -> Self {
            Self(array)
        }

        pub fn array(&self) -> &Int32Array {
            &self.0
        }
    }

    impl SharedWords for WebWords {
        fn len(&self) -> usize {
            self.0.length() as usize
        }

        fn load(&self, index: usize) -> i32 {
            Atomics::load(&self.0, index as u32).unwrap_or(0)
        }

        fn store(&self, index: usize, value: i32) {
            if let Err(e) = Atomics::store(&self.0, index as u32, value) {
                crate::console_log!("[bridge] store failed: {:?}", e);
            }
        }

        fn wait(&self, index: usize, expected: i32) {
            // Only legal off the main thread
            if let Err(e) = Atomics::wait(&self.0, index as u32, expected) {
                crate::console_log!("[bridge] wait failed: {:?}", e);
            }
        }

        fn notify(&self, index: usize) {
            if let Err(e) = Atomics::notify(&self.0, index as u32) {
                crate::console_log!("[bridge] notify failed: {:?}", e);
            }
        }
    }

    impl Bridge<WebWords> {
        /// A bridge over fresh shared buffers, to be posted to a worker
        pub fn shared() -> Self {
            Bridge::new(WebWords::shared(1), WebWords::shared(WINDOW_LEN))
        }
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread;

    // ============ Window encoding ============

    #[test]
    fn test_round_trip_unicode() {
        let window = NativeWords::new(WINDOW_LEN);
        encode_input(&window, Some("héllo → wörld\n"));
        assert_eq!(decode_input(&window).as_deref(), Some("héllo → wörld\n"));
    }

    #[test]
    fn test_end_of_input() {
        let window = NativeWords::new(WINDOW_LEN);
        encode_input(&window, None);
        assert_eq!(decode_input(&window), None);
    }

    #[test]
    fn test_shorter_line_overwrites_longer() {
        let window = NativeWords::new(WINDOW_LEN);
        encode_input(&window, Some("a long line"));
        encode_input(&window, Some("ab"));
        assert_eq!(decode_input(&window).as_deref(), Some("ab"));
    }

    #[test]
    fn test_long_input_truncated() {
        let window = NativeWords::new(WINDOW_LEN);
        let line = "x".repeat(WINDOW_LEN + 50);
        encode_input(&window, Some(&line));
        assert_eq!(decode_input(&window).map(|l| l.len()), Some(MAX_INPUT_CHARS));
    }

    // ============ Handshake ============

    #[test]
    fn test_request_blocks_until_delivered() {
        let bridge = Arc::new(Bridge::native());
        let delivered = Arc::new(AtomicBool::new(false));
        let (asked_tx, asked_rx) = mpsc::channel();

        let worker = {
            let bridge = Arc::clone(&bridge);
            let delivered = Arc::clone(&delivered);
            thread::spawn(move || {
                let line = bridge.request(|| asked_tx.send(()).unwrap(), || false);
                (line, delivered.load(Ordering::SeqCst))
            })
        };

        asked_rx.recv().unwrap();
        assert!(bridge.is_held());
        delivered.store(true, Ordering::SeqCst);
        bridge.deliver(Some("input\n"));

        let (line, seen_delivery) = worker.join().unwrap();
        assert_eq!(line.as_deref(), Some("input\n"));
        assert!(seen_delivery);
        assert!(!bridge.is_held());
    }

    #[test]
    fn test_sequential_requests() {
        let bridge = Arc::new(Bridge::native());
        let (asked_tx, asked_rx) = mpsc::channel();

        let worker = {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                let first = bridge.request(|| asked_tx.send(()).unwrap(), || false);
                let second = bridge.request(|| asked_tx.send(()).unwrap(), || false);
                (first, second)
            })
        };

        asked_rx.recv().unwrap();
        bridge.deliver(Some("one"));
        asked_rx.recv().unwrap();
        bridge.deliver(None);

        assert_eq!(worker.join().unwrap(), (Some("one".to_string()), None));
    }

    #[test]
    fn test_cancelled_request_does_not_hold() {
        let bridge = Bridge::native();
        let mut signalled = false;

        // Cancelled before the flag went up: the canceller saw nothing held
        let line = bridge.request(|| signalled = true, || true);
        assert_eq!(line, None);
        assert!(!signalled);
        assert!(!bridge.is_held());
    }

    #[test]
    fn test_cancel_wakes_held_request() {
        let bridge = Arc::new(Bridge::native());
        let cancelled = Arc::new(AtomicBool::new(false));
        let (asked_tx, asked_rx) = mpsc::channel();

        let worker = {
            let bridge = Arc::clone(&bridge);
            let cancelled = Arc::clone(&cancelled);
            thread::spawn(move || {
                bridge.request(|| asked_tx.send(()).unwrap(), || cancelled.load(Ordering::SeqCst))
            })
        };

        asked_rx.recv().unwrap();
        cancelled.store(true, Ordering::SeqCst);
        if bridge.is_held() {
            bridge.deliver(None);
        }
        assert_eq!(worker.join().unwrap(), None);
        assert!(!bridge.is_held());
    }
}
