//! Counters for the auxiliary HTTP surface
//!
//! Plain atomics so handlers never contend on a lock. These track the HTTP
//! surface only; the relay core keeps no counters.

use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;

use crate::http::AppState;

/// Atomic counters for the HTTP surface
#[derive(Debug, Default)]
pub struct Counters {
    search_requests: AtomicU64,
    search_hits: AtomicU64,
    throttled_requests: AtomicU64,
    keepalive_pings: AtomicU64,
}

/// Point-in-time view of the counters
#[derive(Debug, Serialize)]
pub struct CountersSnapshot {
    pub search_requests: u64,
    pub search_hits: u64,
    pub throttled_requests: u64,
    pub keepalive_pings: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_search(&self) {
        self.search_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hits(&self, n: u64) {
        self.search_hits.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_throttled(&self) {
        self.throttled_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_keepalive(&self) {
        self.keepalive_pings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            search_requests: self.search_requests.load(Ordering::Relaxed),
            search_hits: self.search_hits.load(Ordering::Relaxed),
            throttled_requests: self.throttled_requests.load(Ordering::Relaxed),
            keepalive_pings: self.keepalive_pings.load(Ordering::Relaxed),
        }
    }
}

/// `GET /counters`
pub async fn counters_handler(State(state): State<AppState>) -> Json<CountersSnapshot> {
    Json(state.counters.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let counters = Counters::new();
        counters.record_search();
        counters.record_search();
        counters.record_hits(7);
        counters.record_throttled();

        let snap = counters.snapshot();
        assert_eq!(snap.search_requests, 2);
        assert_eq!(snap.search_hits, 7);
        assert_eq!(snap.throttled_requests, 1);
        assert_eq!(snap.keepalive_pings, 0);
    }
}
