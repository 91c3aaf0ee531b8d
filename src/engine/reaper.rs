use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::state::AppState;

pub async fn run_session_reaper(state: Arc<AppState>, idle_timeout: Duration) {
    let mut ticker = interval((idle_timeout / 2).max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(idle_timeout_ms = idle_timeout.as_millis() as u64, "session reaper started");

    loop {
        ticker.tick().await;
        let evicted = state.evict_idle(idle_timeout).await;
        if evicted > 0 {
            debug!(evicted, remaining = state.sessions.len(), "reaped idle sessions");
        }
    }
}
