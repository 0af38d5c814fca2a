//! Self-ping keep-alive
//!
//! Free-tier hosts idle instances out after a quiet period; pinging our own
//! public URL keeps the relay warm.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, warn};

use crate::http::counters::Counters;

/// How often the keep-alive task pings the configured URL.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Periodically GET `url`, logging failures without giving up.
pub async fn task(url: String, counters: Arc<Counters>) {
    let client = reqwest::Client::new();
    let mut ticker = interval(KEEP_ALIVE_INTERVAL);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match client.get(&url).send().await {
            Ok(response) => {
                counters.record_keepalive();
                debug!("Keep-alive ping returned {}", response.status());
            }
            Err(err) => warn!("Keep-alive ping failed: {}", err),
        }
    }
}
