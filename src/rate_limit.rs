use std::collections::HashMap;
use std::env;
use std::sync::Mutex;
use std::time::Instant;

use rocket::http::Header;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::Request;

/// Configurable rate limit values, read from environment variables with
/// defaults matching the protocol contract.
///
/// Environment variables:
/// - `RATE_LIMIT_ROUTE` — Max routed messages per minute per agent (default: 60)
/// - `RATE_LIMIT_FEDERATION` — Max federation deliveries per minute per provider (default: 120)
pub struct RateLimitConfig {
    /// Routed messages per minute per agent
    pub route_max: usize,
    pub route_window_secs: u64,
    /// Federation deliveries per minute per provider
    pub federation_max: usize,
    pub federation_window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            route_max: 60,
            route_window_secs: 60,
            federation_max: 120,
            federation_window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("RATE_LIMIT_ROUTE")
            && let Ok(n) = val.parse::<usize>()
        {
            config.route_max = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_FEDERATION")
            && let Ok(n) = val.parse::<usize>()
        {
            config.federation_max = n;
        }

        config
    }
}

/// In-process sliding-window counters. Keys are `action:identity` strings.
/// Expired entries across all keys are purged every 100 checks.
pub struct RateLimiter {
    limits: Mutex<HashMap<String, Vec<Instant>>>,
    checks: Mutex<u64>,
}

/// Information about rate limit status for a given key.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    /// Seconds until the oldest request in the window expires (i.e. a slot
    /// opens). 0 if there's remaining capacity.
    pub retry_after_secs: u64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            limits: Mutex::new(HashMap::new()),
            checks: Mutex::new(0),
        }
    }

    pub fn check(&self, key: &str, max: usize, window_secs: u64) -> bool {
        self.check_with_info(key, max, window_secs).allowed
    }

    /// Check rate limit and return detailed info for response headers.
    pub fn check_with_info(&self, key: &str, max: usize, window_secs: u64) -> RateLimitInfo {
        let window = std::time::Duration::from_secs(window_secs);
        let now = Instant::now();

        {
            let mut checks = self.checks.lock().unwrap_or_else(|e| e.into_inner());
            *checks += 1;
            if *checks % 100 == 0 {
                let mut limits = self.limits.lock().unwrap_or_else(|e| e.into_inner());
                limits.retain(|_, entries| {
                    entries.retain(|t| now.duration_since(*t) < window);
                    !entries.is_empty()
                });
            }
        }

        let mut limits = self.limits.lock().unwrap_or_else(|e| e.into_inner());
        let entries = limits.entry(key.to_string()).or_default();
        entries.retain(|t| now.duration_since(*t) < window);

        if entries.len() >= max {
            let oldest = match entries.iter().min() {
                Some(t) => t,
                None => {
                    return RateLimitInfo {
                        allowed: false,
                        remaining: 0,
                        limit: max,
                        retry_after_secs: 1,
                    }
                }
            };
            let elapsed = now.duration_since(*oldest);
            let retry_after = if elapsed < window {
                (window - elapsed).as_secs() + 1 // +1 to ensure the slot is actually open
            } else {
                1
            };

            return RateLimitInfo {
                allowed: false,
                limit: max,
                remaining: 0,
                retry_after_secs: retry_after,
            };
        }

        entries.push(now);
        let remaining = max - entries.len();

        RateLimitInfo {
            allowed: true,
            limit: max,
            remaining,
            retry_after_secs: 0,
        }
    }
}

/// Wrapper that adds standard rate limit headers to any JSON response.
/// Headers: X-RateLimit-Limit, X-RateLimit-Remaining, X-RateLimit-Reset
pub struct RateLimited<T> {
    pub inner: Json<T>,
    pub info: RateLimitInfo,
}

impl<T> RateLimited<T> {
    pub fn new(inner: Json<T>, info: RateLimitInfo) -> Self {
        Self { inner, info }
    }
}

impl<'r, 'o: 'r, T: serde::Serialize + 'o> Responder<'r, 'o> for RateLimited<T> {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let response = Response::build_from(self.inner.respond_to(req)?)
            .header(Header::new("X-RateLimit-Limit", self.info.limit.to_string()))
            .header(Header::new(
                "X-RateLimit-Remaining",
                self.info.remaining.to_string(),
            ))
            .header(Header::new(
                "X-RateLimit-Reset",
                self.info.retry_after_secs.to_string(),
            ))
            .finalize();
        Ok(response)
    }
}
