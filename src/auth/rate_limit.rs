//! Fixed-window rate limiting keyed by client address.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::AuthError;

/// Maximum requests admitted per key within one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub name: &'static str,
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub const LOGIN: RateLimitPolicy = RateLimitPolicy {
        name: "login",
        max_requests: 5,
        window: Duration::from_secs(60),
    };

    pub const FORGOT_PASSWORD: RateLimitPolicy = RateLimitPolicy {
        name: "forgot-password",
        max_requests: 3,
        window: Duration::from_secs(60 * 60),
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

/// Check-and-increment contract. A shared backend can satisfy it without
/// touching callers.
pub trait RateLimiter: Send + Sync {
    /// Count one request for `key` and decide whether it is admitted.
    fn check_and_increment(&self, key: &str, policy: &RateLimitPolicy) -> RateLimitDecision;

    /// Drop entries whose window has elapsed; returns how many were removed.
    fn sweep(&self) -> usize;
}

#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    count: u32,
    window_end: Instant,
}

/// Single-process limiter: one map behind one lock.
#[derive(Debug, Default)]
pub struct InMemoryRateLimiter {
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_at(&self, key: &str, policy: &RateLimitPolicy, now: Instant) -> RateLimitDecision {
        // Read, compare and increment under the same guard.
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if now < entry.window_end => {
                if entry.count >= policy.max_requests {
                    RateLimitDecision::Limited
                } else {
                    entry.count += 1;
                    RateLimitDecision::Allowed
                }
            }
            _ => {
                entries.insert(
                    key.to_owned(),
                    RateLimitEntry {
                        count: 1,
                        window_end: now + policy.window,
                    },
                );
                RateLimitDecision::Allowed
            }
        }
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.window_end);
        before - entries.len()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn check_and_increment(&self, key: &str, policy: &RateLimitPolicy) -> RateLimitDecision {
        self.check_at(key, policy, Instant::now())
    }

    fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }
}

/// Periodically evict expired entries on an independent timer.
pub fn spawn_sweeper(limiter: Arc<dyn RateLimiter>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiter.sweep();
            if removed > 0 {
                debug!(removed, "rate limit sweep");
            }
        }
    })
}

/// Resolve the client key: `X-Forwarded-For`, then `X-Real-IP`, then the
/// transport peer. The first non-empty value wins.
///
/// Forwarded headers are trusted unconditionally, so a client that reaches the
/// service directly can pick its own key. Put the service behind a proxy that
/// overwrites these headers, or add a trusted-proxy allowlist here.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    ["x-forwarded-for", "x-real-ip"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_owned)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_owned())
}

/// State for the [`rate_limit`] middleware: one policy per guarded route.
#[derive(Clone)]
pub struct RateLimitGuard {
    pub limiter: Arc<dyn RateLimiter>,
    pub policy: RateLimitPolicy,
}

impl RateLimitGuard {
    pub fn new(limiter: Arc<dyn RateLimiter>, policy: RateLimitPolicy) -> Self {
        Self { limiter, policy }
    }
}

pub async fn rate_limit(
    State(guard): State<RateLimitGuard>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(request.headers(), peer);
    let key = format!("{}:{}", guard.policy.name, client);

    match guard.limiter.check_and_increment(&key, &guard.policy) {
        RateLimitDecision::Allowed => Ok(next.run(request).await),
        RateLimitDecision::Limited => {
            warn!(policy = guard.policy.name, client = %client, "rate limit exceeded");
            Err(AuthError::RateLimited)
        }
    }
}
