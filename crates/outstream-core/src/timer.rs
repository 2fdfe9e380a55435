//! Autoplay fallback timer
//!
//! A single-shot timer armed when a break start is attempted. Each arming carries a
//! generation number that is passed back on expiry, so a late expiry from a previous
//! arming can be recognised and ignored.

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// Cancellable single-shot timer
#[derive(Debug)]
pub struct FallbackTimer {
    delay: Duration,
    armed: Option<(u64, JoinHandle<()>)>,
}

impl FallbackTimer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, armed: None }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm the timer; `on_elapsed` receives `generation` once the delay passes.
    ///
    /// The sleep runs on `runtime`, so the caller may be on any thread. Re-arming disarms the
    /// previous timer first.
    pub fn arm<F>(&mut self, runtime: &Handle, generation: u64, on_elapsed: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.disarm();

        let delay = self.delay;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            on_elapsed(generation);
        });

        debug!(generation, delay_ms = delay.as_millis() as u64, "Fallback timer armed");
        self.armed = Some((generation, handle));
    }

    /// Cancel a pending expiry. Returns true if a timer was armed.
    pub fn disarm(&mut self) -> bool {
        match self.armed.take() {
            Some((generation, handle)) => {
                handle.abort();
                debug!(generation, "Fallback timer disarmed");
                true
            }
            None => false,
        }
    }

    /// Whether an expiry is still pending
    pub fn is_armed(&self) -> bool {
        self.armed
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Generation of the current arming
    pub fn generation(&self) -> Option<u64> {
        self.armed.as_ref().map(|(generation, _)| *generation)
    }
}

impl Drop for FallbackTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}
