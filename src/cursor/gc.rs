//! TTL based garbage collection

use super::resource::Resource;
use super::store::Store;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Remove expired resources from the backend and then from memory.
///
/// `started` is when the collector began running: resources loaded from a
/// previous run are aged from that point rather than from their last update.
/// Returns the number of resources removed.
pub fn collect(store: &Store, started: DateTime<Utc>, now: DateTime<Utc>) -> usize {
    let mut table = store.ephemeral.lock();

    let expired: Vec<String> = table
        .iter()
        .filter(|(_, resource)| Arc::strong_count(resource) == 1)
        .filter(|(_, resource)| is_expired(resource, started, now))
        .map(|(key, _)| key.clone())
        .collect();

    let mut removed = 0;
    for key in expired {
        if let Err(e) = store.persistent.remove(&key) {
            warn!(key = %key, error = %e, "failed to remove expired resource");
            continue;
        }
        table.remove(&key);
        removed += 1;
    }

    if removed > 0 {
        debug!(removed, remaining = table.len(), "garbage collected resources");
    }
    removed
}

fn is_expired(resource: &Resource, started: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let Ok(_guard) = resource.consumer_lock().try_lock() else {
        return false;
    };

    let st = resource.state();
    if !st.in_sync || st.active_cursor_operations > 0 || st.pending_update.is_some() {
        return false;
    }
    if st.ttl.is_removed() {
        return true;
    }
    let Some(ttl) = st.ttl.as_duration() else {
        return false;
    };

    let reference = st.updated.map_or(started, |updated| updated.max(started));
    (now - reference)
        .to_std()
        .is_ok_and(|elapsed| elapsed > ttl)
}

/// Run `collect` every `interval` until `cancel` fires
pub fn spawn_collector(
    store: Arc<Store>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let started = Utc::now();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    collect(&store, started, Utc::now());
                }
            }
        }
        debug!(prefix = %store.prefix(), "garbage collector stopped");
    })
}
