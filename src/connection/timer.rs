//! Cancellable one-shot timer.

use std::time::Duration;

use tokio::task::JoinHandle;

/// One-shot countdown that invokes a callback on expiry.
///
/// Starting the timer cancels any countdown already running, so a timer
/// never has two pending expiries. Each start is stamped with a new
/// generation; an expiry that raced with a cancel can be recognised as
/// stale with [`CountdownTimer::fired`].
#[derive(Debug, Default)]
pub struct CountdownTimer {
    task: Option<JoinHandle<()>>,
    generation: u64,
}

impl CountdownTimer {
    /// Create a disarmed timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer. `on_expiry` receives the generation of this start.
    pub fn start<F>(&mut self, after: Duration, on_expiry: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            on_expiry(generation);
        }));
        generation
    }

    /// Disarm the timer.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether a countdown is pending.
    pub fn is_armed(&self) -> bool {
        self.task.is_some()
    }

    /// Accept an expiry of `generation`. Returns `false` for an expiry from
    /// a countdown that was cancelled or replaced.
    pub fn fired(&mut self, generation: u64) -> bool {
        if self.task.is_some() && generation == self.generation {
            self.task = None;
            true
        } else {
            false
        }
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = CountdownTimer::new();
        let started = tokio::time::Instant::now();

        let generation = timer.start(Duration::from_secs(5), move |g| {
            let _ = tx.send(g);
        });

        assert_eq!(rx.recv().await, Some(generation));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert!(timer.fired(generation));
        assert!(!timer.is_armed());
        assert!(!timer.fired(generation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_countdown() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = CountdownTimer::new();

        let first_tx = tx.clone();
        let first = timer.start(Duration::from_secs(1), move |g| {
            let _ = first_tx.send(g);
        });
        let second = timer.start(Duration::from_secs(2), move |g| {
            let _ = tx.send(g);
        });

        assert_ne!(first, second);
        assert_eq!(rx.recv().await, Some(second));
        assert!(!timer.fired(first));
        assert!(timer.fired(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        let mut timer = CountdownTimer::new();
        let generation = timer.start(Duration::from_secs(1), move |g| {
            let _ = tx.send(g);
        });

        timer.cancel();
        // The aborted task drops its sender, closing the channel.
        assert_eq!(rx.recv().await, None);
        assert!(!timer.fired(generation));
    }
}
