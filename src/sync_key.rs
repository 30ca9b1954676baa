//! Container Sync Key
//!
//! A fresh secret is generated on every container create/update. The
//! storage layer keeps it as container metadata; container sync daemons
//! on both ends of a chain link must present the same value.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fmt;

/// Number of characters in a sync key
pub const SYNC_KEY_LEN: usize = 64;

/// Rotating shared secret for one container sync relationship
#[derive(Clone, PartialEq, Eq)]
pub struct SyncKey(String);

impl SyncKey {
    /// Draw a new key from `[A-Za-z0-9]`
    pub fn generate() -> Self {
        let key = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SYNC_KEY_LEN)
            .map(char::from)
            .collect();
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keys must never reach the logs
impl fmt::Debug for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SyncKey(<redacted>)")
    }
}
