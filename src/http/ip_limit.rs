//! Per-IP rate limiting for the auxiliary HTTP routes
//!
//! Each IP gets a token bucket plus a rolling daily request cap. The relay's
//! WebSocket endpoint is not behind this; clients there have their own
//! per-connection ingress limiter.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::http::AppState;
use crate::limit::TokenBucket;

/// Sustained request rate per IP, requests per second.
const HTTP_RATE: f64 = 2.0;
/// Burst allowance per IP.
const HTTP_BURST: f64 = 4.0;
/// Requests served per IP per day.
const DAILY_CAP: u64 = 200;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

struct IpBucket {
    bucket: TokenBucket,
    served_today: u64,
    window_start: Instant,
}

/// Token buckets indexed by client IP
pub struct IpRateLimiter {
    rate: f64,
    burst: f64,
    daily_cap: u64,
    window: Duration,
    buckets: Mutex<HashMap<IpAddr, IpBucket>>,
}

impl IpRateLimiter {
    pub fn new() -> Self {
        Self::with_limits(HTTP_RATE, HTTP_BURST, DAILY_CAP)
    }

    pub fn with_limits(rate: f64, burst: f64, daily_cap: u64) -> Self {
        Self {
            rate,
            burst,
            daily_cap,
            window: DAY,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Account one request from `ip`. Returns false when it should be refused.
    pub fn check(&self, ip: IpAddr) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let entry = buckets.entry(ip).or_insert_with(|| IpBucket {
            bucket: TokenBucket::new(self.rate, self.burst),
            served_today: 0,
            window_start: Instant::now(),
        });

        if entry.window_start.elapsed() >= self.window {
            entry.served_today = 0;
            entry.window_start = Instant::now();
        }
        if entry.served_today >= self.daily_cap {
            return false;
        }
        if !entry.bucket.allow() {
            return false;
        }
        entry.served_today += 1;
        true
    }
}

impl Default for IpRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Middleware refusing over-limit requests with 429.
pub async fn ip_limit_mw(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if !state.ip_limiter.check(addr.ip()) {
        state.counters.record_throttled();
        warn!("Throttled request from {}", addr.ip());
        return (StatusCode::TOO_MANY_REQUESTS, "Too many requests").into_response();
    }
    next.run(request).await
}
