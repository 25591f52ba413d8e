//! Rate-limited log silencer.
//!
//! Keeps a degraded store (a dangling previous-document pointer hit on every
//! read) from flooding the log: the first observation of a key is loud,
//! repeats within the window are silent.

use std::collections::HashMap;
use std::sync::Mutex;

use super::document::now_ms;

const DEFAULT_SILENCE_MS: u64 = 15 * 60 * 1000;
const DEFAULT_MAX_KEYS: usize = 2048;

pub struct LogSilencer {
    seen: Mutex<HashMap<String, u64>>,
    silence_ms: u64,
    max_keys: usize,
}

impl LogSilencer {
    pub fn new(silence_ms: u64, max_keys: usize) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            silence_ms,
            max_keys,
        }
    }

    /// True when `key` was already reported within the silence window. The
    /// first call for a key (or the first after the window expired) returns
    /// false and arms the window.
    pub fn silence(&self, key: &str) -> bool {
        let now = now_ms();
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&at) = seen.get(key) {
            if now < at + self.silence_ms {
                return true;
            }
        }
        if seen.len() >= self.max_keys {
            seen.retain(|_, &mut at| now < at + self.silence_ms);
            if seen.len() >= self.max_keys {
                // window full of live entries; silence rather than grow
                return true;
            }
        }
        seen.insert(key.to_string(), now);
        false
    }
}

impl Default for LogSilencer {
    fn default() -> Self {
        Self::new(DEFAULT_SILENCE_MS, DEFAULT_MAX_KEYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_is_loud_repeats_are_silent() {
        let silencer = LogSilencer::default();
        assert!(!silencer.silence("2:p/a/1-0-1/0"));
        assert!(silencer.silence("2:p/a/1-0-1/0"));
        assert!(!silencer.silence("2:p/b/1-0-1/0"));
    }

    #[test]
    fn expired_windows_are_loud_again() {
        let silencer = LogSilencer::new(0, 16);
        assert!(!silencer.silence("k"));
        assert!(!silencer.silence("k"));
    }
}
