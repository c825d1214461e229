//! Scheduled-call promoter: moves jobs whose `scheduled_at` has arrived back
//! onto the Pending queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, warn};

use crate::store::StateStore;

pub async fn promoter_loop(store: Arc<StateStore>, tick: Duration) {
    let mut ticker = interval(tick);
    loop {
        ticker.tick().await;
        match store.promote_due(chrono::Utc::now()).await {
            Ok(ids) if !ids.is_empty() => debug!(count = ids.len(), "promoted scheduled jobs"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "promote_due failed"),
        }
    }
}
