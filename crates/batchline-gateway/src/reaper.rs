use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use batchline_kv::KvStore;

/// Periodic sweep of expired staging fragments and trigger locks, standing
/// in for DynamoDB's native TTL (SPEC_FULL.md §5 `KvStore::reap_expired`).
/// Runs once a minute; that cadence is unrelated to `batch_window_secs` and
/// only bounds how long an expired row can linger before cleanup.
pub async fn run(kv: Arc<KvStore>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match kv.reap_expired() {
                    Ok((staging, locks)) if staging > 0 || locks > 0 => {
                        info!(staging, locks, "reaped expired rows");
                    }
                    Ok(_) => {}
                    Err(e) => error!("TTL reap failed: {e}"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("TTL reaper shutting down");
                    break;
                }
            }
        }
    }
}
