// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{DoppelError, DoppelResult};

/// Shared cancellation flag. Clones observe the same flag.
///
/// Long-running work polls [`CancelToken::check`] between I/O blocks and
/// between items; an operation interrupted this way leaves no partial
/// target behind.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> DoppelResult<()> {
        if self.is_cancelled() {
            Err(DoppelError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(DoppelError::Cancelled)));
    }
}
