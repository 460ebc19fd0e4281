//! Process-wide client runtime.
//!
//! The runtime is initialized lazily by the first session and stays up until
//! [`teardown`] is called. Once torn down it cannot come back: connecting
//! afterwards fails with `InternalError` "server not initialized".

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::classify::CATEGORY_INDEX;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuntimeState {
    Uninitialized,
    Initialized,
    TornDown,
}

static RUNTIME: Mutex<RuntimeState> = Mutex::new(RuntimeState::Uninitialized);

/// Initialize the runtime if needed.
pub fn ensure_initialized() -> Result<()> {
    let mut state = RUNTIME.lock();
    match *state {
        RuntimeState::Initialized => Ok(()),
        RuntimeState::Uninitialized => {
            Lazy::force(&CATEGORY_INDEX);
            *state = RuntimeState::Initialized;
            tracing::info!("client runtime initialized");
            Ok(())
        }
        RuntimeState::TornDown => Err(Error::not_initialized()),
    }
}

/// Whether the runtime is currently usable.
#[must_use]
pub fn is_initialized() -> bool {
    *RUNTIME.lock() == RuntimeState::Initialized
}

/// Shut the runtime down for the rest of the process.
///
/// Open sessions keep their sockets, but every later classification reports
/// `InternalError` "server not initialized".
pub fn teardown() {
    let mut state = RUNTIME.lock();
    if *state != RuntimeState::TornDown {
        *state = RuntimeState::TornDown;
        tracing::info!("client runtime torn down");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // Teardown is irreversible, so it is exercised in its own test binary.
    #[test]
    fn test_initialize_is_idempotent() {
        ensure_initialized().unwrap();
        ensure_initialized().unwrap();
        assert!(is_initialized());
    }
}
