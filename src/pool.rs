use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Caps how many browser sessions are open at once across requests. Every
/// session launches its own browser process, so this is the only bound on
/// memory and CPU under concurrent load.
#[derive(Clone)]
pub struct SessionLimiter {
    permits: Arc<Semaphore>,
    max: usize,
}

/// Held for the lifetime of one session; releases its slot on drop.
pub struct SessionSlot {
    _permit: OwnedSemaphorePermit,
}

impl SessionLimiter {
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> SessionSlot {
        if self.permits.available_permits() == 0 {
            debug!(max = self.max, "all session slots busy, waiting");
        }
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .unwrap_or_else(|_| unreachable!("session semaphore is never closed"));
        SessionSlot { _permit: permit }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Sessions currently open.
    pub fn active(&self) -> usize {
        self.max - self.permits.available_permits()
    }
}
