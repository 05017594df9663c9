//! Command history ring
//!
//! Keeps the `size` most recent command lines for the line editor. The
//! cursor walks backwards with `get_previous` and forwards with `get_next`; one
//! position past the newest entry stands for "the line being typed".

use std::collections::VecDeque;

/// Bounded list of recent entries with a navigation cursor
#[derive(Debug, Clone)]
pub struct History {
    size: usize,
    entries: VecDeque<String>,
    cursor: usize,
}

impl History {
    /// Create an empty history holding at most `size` entries
    pub fn new(size: usize) -> Self {
        Self {
            size,
            entries: VecDeque::with_capacity(size.min(1024)),
            cursor: 0,
        }
    }

    /// Maximum number of entries kept
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current cursor position (0..=len)
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Append an entry.
    ///
    /// Blank entries and immediate duplicates of the newest entry are
    /// ignored. The oldest entry is dropped once the ring is over capacity.
    /// The cursor is reset to one past the newest entry.
    pub fn push(&mut self, entry: &str) {
        if entry.trim().is_empty() {
            return;
        }
        if self.entries.back().is_some_and(|last| last == entry) {
            return;
        }

        self.entries.push_back(entry.to_string());
        while self.entries.len() > self.size {
            self.entries.pop_front();
        }

        self.cursor = self.entries.len();
    }

    /// Reset the cursor to one past the newest entry
    pub fn rewind(&mut self) {
        self.cursor = self.entries.len();
    }

    /// Move the cursor back by one and return the entry there
    pub fn get_previous(&mut self) -> Option<&str> {
        self.cursor = self.cursor.saturating_sub(1);
        self.entries.get(self.cursor).map(String::as_str)
    }

    /// Move the cursor forward by one and return the entry there.
    ///
    /// Returns `None` once the cursor is past the newest entry.
    pub fn get_next(&mut self) -> Option<&str> {
        self.cursor = (self.cursor + 1).min(self.entries.len());
        self.entries.get(self.cursor).map(String::as_str)
    }

    /// All entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_HISTORY_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============ Push ============

    #[test]
    fn test_push_skips_blank() {
        let mut history = History::new(3);
        history.push("");
        history.push("   ");
        assert!(history.is_empty());
    }

    #[test]
    fn test_push_skips_immediate_duplicate() {
        let mut history = History::new(3);
        history.push("ls");
        history.push("ls");
        assert_eq!(history.len(), 1);

        history.push("pwd");
        history.push("ls");
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_push_drops_oldest_over_capacity() {
        let mut history = History::new(3);
        for entry in ["a", "b", "c", "d"] {
            history.push(entry);
        }
        let entries: Vec<_> = history.entries().collect();
        assert_eq!(entries, vec!["b", "c", "d"]);
        assert_eq!(history.cursor(), 3);
    }

    // ============ Navigation ============

    #[test]
    fn test_previous_clamps_at_oldest() {
        let mut history = History::new(5);
        history.push("one");
        history.push("two");

        assert_eq!(history.get_previous(), Some("two"));
        assert_eq!(history.get_previous(), Some("one"));
        assert_eq!(history.get_previous(), Some("one"));
        assert_eq!(history.cursor(), 0);
    }

    #[test]
    fn test_next_past_newest_is_empty_line() {
        let mut history = History::new(5);
        history.push("one");
        history.push("two");

        history.get_previous();
        history.get_previous();
        assert_eq!(history.get_next(), Some("two"));
        assert_eq!(history.get_next(), None);
        assert_eq!(history.get_next(), None);
        assert_eq!(history.cursor(), 2);
    }

    #[test]
    fn test_rewind_after_navigation() {
        let mut history = History::new(5);
        history.push("one");
        history.push("two");
        history.get_previous();
        history.get_previous();

        history.rewind();
        assert_eq!(history.cursor(), 2);
        assert_eq!(history.get_previous(), Some("two"));
    }

    #[test]
    fn test_empty_history_navigation() {
        let mut history = History::new(5);
        assert_eq!(history.get_previous(), None);
        assert_eq!(history.get_next(), None);
        assert_eq!(history.cursor(), 0);
    }
}
