use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::LocationSource;
use crate::models::position::Position;
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollState {
    held: Option<Position>,
}

impl PollState {
    pub fn new(initial: Option<Position>) -> Self {
        Self { held: initial }
    }

    pub fn held(&self) -> Option<&Position> {
        self.held.as_ref()
    }

    pub fn apply(&mut self, fetched: Option<Position>) -> Option<&Position> {
        match fetched {
            Some(position) => {
                self.held = Some(position);
                self.held.as_ref()
            }
            None => None,
        }
    }
}

pub async fn fetch_fix(
    source: &dyn LocationSource,
    assignment_id: &str,
    metrics: &Metrics,
) -> Option<Position> {
    match source.latest_fix(assignment_id).await {
        Ok(Some(position)) => {
            metrics.location_polls_total.with_label_values(&["fix"]).inc();
            Some(position)
        }
        Ok(None) => {
            metrics.location_polls_total.with_label_values(&["empty"]).inc();
            debug!(assignment_id, "no location reported yet");
            None
        }
        Err(err) => {
            metrics.location_polls_total.with_label_values(&["error"]).inc();
            warn!(assignment_id, error = %err, "location fetch failed, skipping tick");
            None
        }
    }
}

// Dropping the handle does not stop the loop.
pub struct PollerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "location poller ended abnormally");
        }
    }
}

pub fn start_polling(
    source: Arc<dyn LocationSource>,
    assignment_id: String,
    every: Duration,
    fixes: watch::Sender<Option<Position>>,
    cancel: CancellationToken,
    metrics: Metrics,
) -> PollerHandle {
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        let mut state = PollState::new(fixes.borrow().clone());
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(assignment_id = %assignment_id, interval_ms = every.as_millis() as u64, "location poller started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let fetched = tokio::select! {
                        _ = token.cancelled() => break,
                        fetched = fetch_fix(source.as_ref(), &assignment_id, &metrics) => fetched,
                    };

                    if let Some(fresh) = state.apply(fetched) {
                        if fixes.send(Some(fresh.clone())).is_err() {
                            debug!(assignment_id = %assignment_id, "no listeners for fixes");
                            break;
                        }
                    }
                }
            }
        }

        info!(assignment_id = %assignment_id, "location poller stopped");
    });

    PollerHandle { cancel, task }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::FetchError;
    use crate::models::position::GeoPoint;

    struct Scripted {
        replies: Mutex<VecDeque<Result<Option<Position>, FetchError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: Vec<Result<Option<Position>, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LocationSource for Scripted {
        async fn latest_fix(&self, _assignment_id: &str) -> Result<Option<Position>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies.lock().unwrap().pop_front().unwrap_or(Ok(None))
        }
    }

    fn fix(lat: f64, lng: f64) -> Position {
        Position::at(GeoPoint::new(lat, lng))
    }

    #[test]
    fn empty_tick_keeps_held_position() {
        let mut state = PollState::new(Some(fix(14.61, 120.99)));
        assert!(state.apply(None).is_none());
        assert_eq!(state.held(), Some(&fix(14.61, 120.99)));

        assert_eq!(state.apply(Some(fix(14.62, 121.0))), Some(&fix(14.62, 121.0)));
        assert_eq!(state.held(), Some(&fix(14.62, 121.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_fixes_and_skips_empty_or_failed_ticks() {
        let source = Scripted::new(vec![
            Ok(Some(fix(14.61, 120.99))),
            Ok(None),
            Err(FetchError::Status(500)),
            Ok(Some(fix(14.62, 121.0))),
        ]);
        let (tx, mut rx) = watch::channel(None);
        let handle = start_polling(
            source.clone(),
            "42".to_string(),
            Duration::from_secs(5),
            tx,
            CancellationToken::new(),
            Metrics::new(),
        );

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(fix(14.61, 120.99)));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), Some(fix(14.61, 120.99)));

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(fix(14.62, 121.0)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_further_fetches() {
        let source = Scripted::new(Vec::new());
        let (tx, _rx) = watch::channel(None);
        let handle = start_polling(
            source.clone(),
            "42".to_string(),
            Duration::from_secs(5),
            tx,
            CancellationToken::new(),
            Metrics::new(),
        );

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        handle.stop().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
