//! Sliding-window rate limiting (§4.7 step 2): per-sender message limit and
//! per-IP join limit, as a `tower::Layer`/`Service` pair.
//!
//! Grounded on `apps/ingress-common/src/rate.rs`'s token-bucket
//! `RateLimiter`/`RateLimitLayer`/`RateLimitMiddleware` shape; extended here
//! to key on a caller-supplied header (rather than always `x-forwarded-for`)
//! and to report `X-RateLimit-{Limit,Remaining,Reset}` via [`ApiError`]
//! instead of a bare 429.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Instant,
};

use axum::{
    body::Body,
    http::{Request, Response},
    response::IntoResponse,
};
use tower::{Layer, Service};

use crate::error::ApiError;

#[derive(Clone, Copy, Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

/// The key a request is bucketed under (§4.7: per-sender for messages,
/// per-IP for joins).
#[derive(Clone, Copy, Debug)]
pub enum KeySource {
    AgentIdHeader,
    ClientIp,
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
    cap: u32,
    refill_per_sec: f64,
}

impl RateLimiter {
    /// `cap` tokens, refilling at `cap` per `window_secs`.
    pub fn new(cap: u32, window_secs: u64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            cap,
            refill_per_sec: cap as f64 / window_secs as f64,
        }
    }

    /// Returns `(allowed, remaining, reset_secs)`.
    fn check(&self, key: &str) -> (bool, u32, i64) {
        let mut map = self.buckets.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();
        let bucket = map.entry(key.to_string()).or_insert(Bucket {
            tokens: self.cap,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        let refill = (elapsed * self.refill_per_sec).floor() as u32;
        if refill > 0 {
            bucket.tokens = bucket.tokens.saturating_add(refill).min(self.cap);
            bucket.last_refill = now;
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            let reset = if self.refill_per_sec > 0.0 {
                (1.0 / self.refill_per_sec).ceil() as i64
            } else {
                0
            };
            (true, bucket.tokens, reset)
        } else {
            let reset = if self.refill_per_sec > 0.0 {
                (1.0 / self.refill_per_sec).ceil() as i64
            } else {
                i64::MAX
            };
            (false, 0, reset)
        }
    }
}

#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: RateLimiter,
    key_source: KeySourceTag,
}

#[derive(Clone, Copy)]
enum KeySourceTag {
    AgentIdHeader,
    ClientIp,
}

impl RateLimitLayer {
    pub fn per_sender(cap: u32, window_secs: u64) -> Self {
        Self {
            limiter: RateLimiter::new(cap, window_secs),
            key_source: KeySourceTag::AgentIdHeader,
        }
    }

    pub fn per_ip(cap: u32, window_secs: u64) -> Self {
        Self {
            limiter: RateLimiter::new(cap, window_secs),
            key_source: KeySourceTag::ClientIp,
        }
    }
}

impl<S> Layer<S> for RateLimitLayer
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
{
    type Service = RateLimitMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitMiddleware {
            inner,
            limiter: self.limiter.clone(),
            key_source: self.key_source,
        }
    }
}

#[derive(Clone)]
pub struct RateLimitMiddleware<S> {
    inner: S,
    limiter: RateLimiter,
    key_source: KeySourceTag,
}

fn extract_key(req: &Request<Body>, key_source: KeySourceTag) -> String {
    match key_source {
        KeySourceTag::AgentIdHeader => req
            .headers()
            .get("X-Agent-ID")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string(),
        KeySourceTag::ClientIp => req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

impl<S> Service<Request<Body>> for RateLimitMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let key = extract_key(&req, self.key_source);
        let (allowed, remaining, reset) = self.limiter.check(&key);
        let cap = self.limiter.cap;
        let mut inner = self.inner.clone();
        Box::pin(async move {
            if allowed {
                inner.call(req).await
            } else {
                Ok(ApiError::RateLimited {
                    limit: cap,
                    remaining,
                    reset,
                }
                .into_response())
            }
        })
    }
}
