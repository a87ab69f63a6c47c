//! Background job: periodically run the store-side auto-approval procedure.
//!
//! Optional. Deployments that invoke `portal policy run` from an external
//! scheduler leave `AUTO_APPROVAL_INTERVAL_SECS` at 0 and never start it.

use std::time::Duration;
use tokio::time;

use crate::store::postgres::PgStore;

/// Spawn the trigger loop. Returns `false` without spawning when `every_secs`
/// is 0.
pub fn spawn(store: PgStore, every_secs: u64) -> bool {
    if every_secs == 0 {
        return false;
    }
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(every_secs));
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match store.run_auto_approval().await {
                Ok(0) => tracing::debug!("auto-approval run promoted nothing"),
                Ok(count) => tracing::info!(count, "auto-approval run promoted applications"),
                Err(e) => tracing::error!("auto-approval job failed: {}", e),
            }
        }
    });
    true
}
