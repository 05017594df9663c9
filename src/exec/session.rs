//! The single execution slot
//!
//! At most one session is open at a time. Acquiring hands out a guard;
//! dropping the guard is the only way to release the slot, so every exit
//! path (success, error, interrupt, early return) releases it exactly once.

use super::{SessionError, SessionResult};
use std::cell::Cell;
use std::rc::Rc;

/// Shared "is a command running" token
#[derive(Debug, Clone, Default)]
pub struct SessionSlot {
    busy: Rc<Cell<bool>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.busy.get()
    }

    /// Open a session, failing if one is already open
    pub fn acquire(&self) -> SessionResult<SessionGuard> {
        if self.busy.replace(true) {
            return Err(SessionError::AlreadyRunning);
        }
        Ok(SessionGuard {
            busy: Rc::clone(&self.busy),
        })
    }
}

/// Proof of an open session
#[derive(Debug)]
pub struct SessionGuard {
    busy: Rc<Cell<bool>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.busy.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails() {
        let slot = SessionSlot::new();
        let guard = slot.acquire().unwrap();
        assert!(slot.is_running());
        assert_eq!(slot.acquire().unwrap_err(), SessionError::AlreadyRunning);
        drop(guard);
        assert!(!slot.is_running());
        assert!(slot.acquire().is_ok());
    }

    #[test]
    fn test_clones_share_the_slot() {
        let slot = SessionSlot::new();
        let other = slot.clone();
        let _guard = other.acquire().unwrap();
        assert!(slot.is_running());
    }

    #[test]
    fn test_released_on_error_path() {
        fn fails(slot: &SessionSlot) -> SessionResult<()> {
            let _guard = slot.acquire()?;
            Err(SessionError::Interrupted)
        }

        let slot = SessionSlot::new();
        assert_eq!(fails(&slot), Err(SessionError::Interrupted));
        assert!(!slot.is_running());
    }
}
