//! Cancellable periodic task on a dedicated thread

use crossbeam_channel::{bounded, select, tick, Sender};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Owns the timer thread; stopping or dropping the handle ends it
#[derive(Debug)]
pub struct TimerHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// Call `on_tick` every `interval` until stopped
    pub fn start(interval: Duration, on_tick: impl Fn() + Send + 'static) -> io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(interval);

        let thread = thread::Builder::new()
            .name("connector-timer".into())
            .spawn(move || {
                debug!(interval_ms = interval.as_millis() as u64, "Timer started");
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => on_tick(),
                    }
                }
                debug!("Timer stopped");
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    /// Stop the thread and wait for it, unless called from the timer thread itself
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the stop channel, which wakes the select.
        self.stop.take();
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            warn!("Timer thread panicked");
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_timer_ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let mut timer = TimerHandle::start(Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        thread::sleep(Duration::from_millis(60));
        timer.stop();
        assert!(!timer.is_running());

        let stopped_at = ticks.load(Ordering::SeqCst);
        assert!(stopped_at > 0);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), stopped_at);
    }
}
