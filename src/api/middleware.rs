//! Security Middleware for the Honor API
//!
//! Provides:
//! - API key authentication on ingest routes
//! - Rate limiting per client IP
//! - Request body size limits
//! - Security headers

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use subtle::ConstantTimeEq;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::SecurityConfig;

/// Security configuration for middleware
#[derive(Clone)]
pub struct SecurityMiddlewareConfig {
    /// Keys accepted in `x-api-key`
    pub api_keys: Vec<String>,
    /// Requests per minute per IP
    pub rate_limit_per_minute: u32,
    /// Maximum request body size in bytes
    pub max_request_size: usize,
    /// Key rate limits on proxy headers instead of the socket address
    pub trust_proxy_headers: bool,
}

impl From<&SecurityConfig> for SecurityMiddlewareConfig {
    fn from(config: &SecurityConfig) -> Self {
        Self {
            api_keys: config.api_keys.clone(),
            rate_limit_per_minute: config.rate_limit_per_minute,
            max_request_size: config.max_request_size,
            trust_proxy_headers: config.trust_proxy_headers,
        }
    }
}

/// Rate limiter state - tracks requests per IP
#[derive(Debug)]
pub struct RateLimiter {
    /// Map of IP -> (request count, window start)
    requests: DashMap<String, (u32, Instant)>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            requests: DashMap::new(),
            limit: requests_per_minute,
            window: Duration::from_secs(60),
        }
    }

    /// Returns (allowed, remaining, reset_after_secs)
    pub fn check_request(&self, ip: &str) -> (bool, u32, u64) {
        let now = Instant::now();

        let mut entry = self.requests.entry(ip.to_string()).or_insert((0, now));
        let (count, window_start) = entry.value_mut();

        if now.duration_since(*window_start) >= self.window {
            *count = 0;
            *window_start = now;
        }

        let remaining = self.limit.saturating_sub(*count);
        let reset_after = self
            .window
            .checked_sub(now.duration_since(*window_start))
            .map(|d| d.as_secs())
            .unwrap_or(0);

        if *count >= self.limit {
            return (false, 0, reset_after);
        }

        *count += 1;
        (true, remaining.saturating_sub(1), reset_after)
    }

    /// Drop windows that expired long ago
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.requests
            .retain(|_, (_, window_start)| now.duration_since(*window_start) < self.window * 2);
    }

    pub fn tracked(&self) -> usize {
        self.requests.len()
    }
}

/// Shared state for security middleware
#[derive(Clone)]
pub struct SecurityState {
    pub config: SecurityMiddlewareConfig,
    pub rate_limiter: Arc<RateLimiter>,
}

impl SecurityState {
    pub fn new(config: SecurityMiddlewareConfig) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute));
        Self {
            config,
            rate_limiter,
        }
    }
}

/// Client IP for rate limiting. Proxy headers are read only when trusted;
/// otherwise the socket address, if the server was started with connect info.
fn client_ip(headers: &HeaderMap, request: &Request, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        if let Some(ip) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
        {
            return ip.trim().to_string();
        }

        if let Some(ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
            return ip.trim().to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Compare fixed-length digests so timing leaks neither content nor length
fn key_matches(presented: &str, expected: &str) -> bool {
    let a = Sha256::digest(presented.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    bool::from(a.as_slice().ct_eq(b.as_slice()))
}

/// Authentication middleware for ingest routes
pub async fn auth_middleware(
    State(state): State<SecurityState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = request.uri().path().to_string();

    let Some(presented) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) else {
        warn!(path = %path, "Missing API key");
        return Err(StatusCode::UNAUTHORIZED);
    };

    // Check every key so the match position is not observable
    let authorized = state
        .config
        .api_keys
        .iter()
        .fold(false, |found, key| key_matches(presented, key) | found);

    if authorized {
        debug!(path = %path, "API key authenticated");
        Ok(next.run(request).await)
    } else {
        warn!(path = %path, "Invalid API key attempt");
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(state): State<SecurityState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    let ip = client_ip(&headers, &request, state.config.trust_proxy_headers);
    let (allowed, remaining, reset_after) = state.rate_limiter.check_request(&ip);
    let limit = state.config.rate_limit_per_minute;

    if !allowed {
        warn!(path = %request.uri().path(), "Rate limit exceeded");

        let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
        let headers = response.headers_mut();
        headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
        headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u32));
        headers.insert("X-RateLimit-Reset", HeaderValue::from(reset_after));
        headers.insert("Retry-After", HeaderValue::from(reset_after));
        return Err(response);
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(reset_after));

    Ok(response)
}

/// Security headers middleware
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.insert(
        "Cache-Control",
        HeaderValue::from_static("no-store, no-cache, must-revalidate"),
    );
    headers.remove("Server");

    response
}

/// Reject bodies whose declared length exceeds the limit
pub async fn body_size_middleware(
    State(state): State<SecurityState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let declared = headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    if let Some(length) = declared {
        if length > state.config.max_request_size {
            warn!(
                length,
                max = state.config.max_request_size,
                "Request body too large"
            );
            return Err(StatusCode::PAYLOAD_TOO_LARGE);
        }
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter() {
        let limiter = RateLimiter::new(3);

        assert!(limiter.check_request("127.0.0.1").0);
        assert!(limiter.check_request("127.0.0.1").0);
        assert!(limiter.check_request("127.0.0.1").0);

        let (allowed, remaining, _) = limiter.check_request("127.0.0.1");
        assert!(!allowed);
        assert_eq!(remaining, 0);

        assert!(limiter.check_request("192.168.1.1").0);
        assert_eq!(limiter.tracked(), 2);
    }

    #[test]
    fn test_cleanup_keeps_fresh_windows() {
        let limiter = RateLimiter::new(3);
        limiter.check_request("10.0.0.1");
        limiter.cleanup();
        assert_eq!(limiter.tracked(), 1);
    }

    fn request_from(peer: &str, forwarded: &str) -> (HeaderMap, Request) {
        let mut request = Request::builder()
            .uri("/verify/certificate/CERT-X")
            .header("x-forwarded-for", forwarded)
            .header("x-real-ip", forwarded)
            .body(axum::body::Body::empty())
            .unwrap();
        let addr: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        (request.headers().clone(), request)
    }

    #[test]
    fn test_proxy_headers_ignored_unless_trusted() {
        let (headers, request) = request_from("203.0.113.7:4100", "10.9.9.9, 10.0.0.1");
        assert_eq!(client_ip(&headers, &request, false), "203.0.113.7");
        assert_eq!(client_ip(&headers, &request, true), "10.9.9.9");

        // Rotating the header does not open new buckets
        let limiter = RateLimiter::new(2);
        for forged in ["1.1.1.1", "2.2.2.2", "3.3.3.3"] {
            let (headers, request) = request_from("203.0.113.7:4100", forged);
            limiter.check_request(&client_ip(&headers, &request, false));
        }
        assert!(!limiter.check_request("203.0.113.7").0);
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn test_key_matches() {
        let key = "k".repeat(32);
        assert!(key_matches(&key, &key));
        assert!(!key_matches("k", &key));
        assert!(!key_matches(&"j".repeat(32), &key));
    }
}
