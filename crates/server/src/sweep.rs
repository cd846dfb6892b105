//! Periodic timeout sweep. Ticks fire on a fixed cadence; a sweep that
//! outlives its interval makes the next tick skip instead of stacking a
//! second sweep behind it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::control::ControlService;

pub fn spawn(control: Arc<ControlService>, interval: Duration) -> tokio::task::JoinHandle<()> {
    let in_flight = Arc::new(Mutex::new(()));
    info!(
        event_name = "sweep.start",
        interval_secs = interval.as_secs(),
        "timeout sweep scheduled"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let control = control.clone();
            let in_flight = in_flight.clone();
            tokio::spawn(async move {
                let Ok(_guard) = in_flight.try_lock() else {
                    warn!(event_name = "sweep.skipped", "previous sweep still running");
                    return;
                };
                if let Err(error) = control.sweep_at(Utc::now()).await {
                    warn!(event_name = "sweep.failed", error = %error, "timeout sweep failed");
                }
            });
        }
    })
}
