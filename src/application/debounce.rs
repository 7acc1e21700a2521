use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Runs the most recently scheduled job once `delay` passes without another
/// job being scheduled.
///
/// Scheduling a job cancels the pending one, including a job that already
/// left its quiet period and is in flight.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    parent: CancellationToken,
    pending: Option<CancellationToken>,
}

impl Debouncer {
    pub fn new(delay: Duration, parent: CancellationToken) -> Self {
        Self {
            delay,
            parent,
            pending: None,
        }
    }

    /// Schedules `job`, handing it the token that cancels it when superseded.
    pub fn schedule<J, F>(&mut self, job: J)
    where
        J: FnOnce(CancellationToken) -> F,
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let token = self.parent.child_token();
        let delay = self.delay;
        self.pending = Some(token.clone());
        let job = job(token.clone());
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = async {
                    tokio::time::sleep(delay).await;
                    job.await;
                } => {}
            }
        });
    }

    pub fn cancel(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_only_last_job_runs() {
        let runs = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(AtomicUsize::new(0));
        let mut debouncer = Debouncer::new(Duration::from_millis(300), CancellationToken::new());

        for value in 1..=3 {
            let runs = runs.clone();
            let last = last.clone();
            debouncer.schedule(|_| async move {
                runs.fetch_add(1, Ordering::SeqCst);
                last.store(value, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_stops_pending_job() {
        let runs = Arc::new(AtomicUsize::new(0));
        let parent = CancellationToken::new();
        let mut debouncer = Debouncer::new(Duration::from_millis(50), parent.clone());

        let counter = runs.clone();
        debouncer.schedule(|_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        parent.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
