// src/io/serial/mailbox.rs
//
// Single-slot, last-write-wins handoff between the receiver thread and the
// polling consumer.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct Mailbox {
    slot: Mutex<Option<String>>,
    filled: Condvar,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `line`, replacing any unread one. Returns true if a pending line
    /// was overwritten.
    pub fn put(&self, line: String) -> bool {
        let overwritten = match self.slot.lock() {
            Ok(mut slot) => slot.replace(line).is_some(),
            Err(poisoned) => poisoned.into_inner().replace(line).is_some(),
        };
        self.filled.notify_all();
        overwritten
    }

    /// Take the pending line, leaving the slot empty.
    pub fn take(&self) -> Option<String> {
        match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Take the pending line, waiting up to `timeout` for one to arrive.
    pub fn take_timeout(&self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        let mut slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            if let Some(line) = slot.take() {
                return Some(line);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            slot = match self.filled.wait_timeout(slot, remaining) {
                Ok((slot, _)) => slot,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Drop the pending line without returning it.
    pub fn clear(&self) {
        let _ = self.take();
    }
}

/// Cut `line` down to at most `max_len` bytes without splitting a UTF-8
/// sequence. Returns the original length when truncation happened.
pub fn truncate_line(line: &mut String, max_len: usize) -> Option<usize> {
    if line.len() <= max_len {
        return None;
    }
    let original = line.len();
    let mut cut = max_len;
    while !line.is_char_boundary(cut) {
        cut -= 1;
    }
    line.truncate(cut);
    Some(original)
}
