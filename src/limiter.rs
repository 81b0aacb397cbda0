// src/limiter.rs

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// Spaces out the *start* of transfers across all workers.
///
/// Each caller reserves the next free start slot under a short lock and then
/// sleeps until that slot outside of it, so starts are at least `min_interval`
/// apart no matter how many workers race for them. How long each transfer
/// then runs is not limited.
#[derive(Clone)]
pub struct DispatchLimiter {
    state: Arc<Mutex<DispatchState>>,
}

struct DispatchState {
    min_interval: Duration,
    /// The last start slot handed out.
    last_dispatch: Option<Instant>,
}

impl DispatchLimiter {
    /// A zero interval disables the limiter.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(DispatchState {
                min_interval,
                last_dispatch: None,
            })),
        }
    }

    /// Waits until this caller may start a transfer.
    pub async fn acquire(&self) {
        let now = Instant::now();
        let slot = {
            let mut state = self.state.lock();
            let slot = match state.last_dispatch {
                Some(last) => (last + state.min_interval).max(now),
                None => now,
            };
            state.last_dispatch = Some(slot);
            slot
        };
        if slot > now {
            tokio::time::sleep_until(slot).await;
        }
    }
}
