//! Fixed-window request throttling.
//!
//! Each `(client, method, route)` triple owns a counter that lives for one
//! window. The first hit creates it with a TTL; the request that pushes it past
//! the limit, and every one after it until the key expires, is rejected with
//! `429` and a `Retry-After` header.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRef, FromRequestParts, MatchedPath},
    http::request::Parts,
};
use redis::aio::ConnectionManager;
use tracing::{error, warn};

use crate::{error::AppError, state::AppState};

/// Counter state after a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub count: u64,
    /// Seconds until the counter resets.
    pub resets_in: u64,
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn hit(&self, key: &str, window: Duration) -> anyhow::Result<Window>;
}

pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("parse REDIS_URL")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("connect to redis")?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn hit(&self, key: &str, window: Duration) -> anyhow::Result<Window> {
        let secs = window.as_secs().max(1);
        let mut conn = self.conn.clone();
        let (count, ttl): (u64, i64) = redis::pipe()
            .atomic()
            .cmd("SET").arg(key).arg(0).arg("NX").arg("EX").arg(secs).ignore()
            .cmd("INCR").arg(key)
            .cmd("TTL").arg(key)
            .query_async(&mut conn)
            .await
            .context("redis rate limit pipeline")?;
        Ok(Window {
            count,
            resets_in: if ttl > 0 { ttl as u64 } else { secs },
        })
    }
}

/// Process-local counters.
#[derive(Default)]
pub struct MemoryStore {
    windows: Mutex<HashMap<String, (u64, Instant)>>,
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn hit(&self, key: &str, window: Duration) -> anyhow::Result<Window> {
        let now = Instant::now();
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| anyhow::anyhow!("rate limit store poisoned"))?;
        windows.retain(|_, (_, started)| now.duration_since(*started) < window);

        let (count, started) = windows.entry(key.to_string()).or_insert((0, now));
        *count += 1;
        let elapsed = now.duration_since(*started);
        let remaining = window.saturating_sub(elapsed);
        Ok(Window {
            count: *count,
            resets_in: remaining.as_secs().max(1),
        })
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    /// Counts a hit and fails with `TooManyRequests` once `times` is exceeded.
    /// An unavailable store lets the request through.
    pub async fn check(&self, key: &str, times: u64, window: Duration) -> Result<(), AppError> {
        match self.store.hit(key, window).await {
            Ok(w) if w.count > times => {
                warn!(key, count = w.count, limit = times, "rate limit exceeded");
                Err(AppError::TooManyRequests { retry_after: w.resets_in })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                error!(error = ?e, key, "rate limit store unavailable; allowing request");
                Ok(())
            }
        }
    }
}

impl FromRef<AppState> for RateLimiter {
    fn from_ref(state: &AppState) -> Self {
        state.limiter.clone()
    }
}

/// Allows `TIMES` requests per `SECONDS` for each client on the matched route.
pub struct Throttle<const TIMES: u64, const SECONDS: u64>;

#[async_trait]
impl<S, const TIMES: u64, const SECONDS: u64> FromRequestParts<S> for Throttle<TIMES, SECONDS>
where
    S: Send + Sync,
    RateLimiter: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let limiter = RateLimiter::from_ref(state);
        let route = parts
            .extensions
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());
        let key = format!("ratelimit:{}:{}:{}", client_id(parts), parts.method, route);

        limiter
            .check(&key, TIMES, Duration::from_secs(SECONDS))
            .await?;
        Ok(Throttle)
    }
}

/// First `X-Forwarded-For` hop, then the peer address.
fn client_id(parts: &Parts) -> String {
    let forwarded = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
