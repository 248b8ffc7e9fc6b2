use axum::http::HeaderMap;
use dashmap::DashMap;
use metrics::counter;
use std::time::{Duration, Instant};
use tracing::debug;

/// Per-key request throttle.
///
/// A single-slot spacing limiter, not a token bucket: each key may pass at
/// most once per `min_interval`, measured from its last allowed call. The
/// last-allowed timestamp is only updated when a call is allowed, so a burst
/// of denied calls cannot push the window forward.
pub struct RequestThrottle {
    entries: DashMap<String, Instant>,
}

impl RequestThrottle {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Returns true and records the call when at least `min_interval` has
    /// passed since this key's last allowed call.
    pub fn allow(&self, key: &str, min_interval: Duration) -> bool {
        let now = Instant::now();
        let mut allowed = false;

        self.entries
            .entry(key.to_string())
            .and_modify(|last| {
                if now.duration_since(*last) >= min_interval {
                    *last = now;
                    allowed = true;
                }
            })
            .or_insert_with(|| {
                allowed = true;
                now
            });

        if allowed {
            counter!("throttle_allowed_total", 1);
        } else {
            counter!("throttle_denied_total", 1);
            debug!(key, "request throttled");
        }
        allowed
    }

    /// Drops keys that have been idle longer than `idle_for`. Without this
    /// the map grows with every session/address pair ever seen.
    pub fn cleanup_idle(&self, idle_for: Duration) {
        let now = Instant::now();
        self.entries
            .retain(|_, last| now.duration_since(*last) < idle_for);
    }

    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}

impl Default for RequestThrottle {
    fn default() -> Self {
        Self::new()
    }
}

/// Background sweep task for idle throttle keys.
pub async fn start_cleanup_task(
    throttle: std::sync::Arc<RequestThrottle>,
    interval: Duration,
    idle_for: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        throttle.cleanup_idle(idle_for);
        debug!(tracked = throttle.tracked_keys(), "throttle cleanup completed");
    }
}

/// Throttle key: conversation identity combined with the caller address.
pub fn throttle_key(session_id: &str, client_ip: &str) -> String {
    let session = if session_id.is_empty() {
        "anon"
    } else {
        session_id
    };
    format!("{}|{}", session, client_ip)
}

/// First-hop client address from forwarding headers, falling back to
/// "unknown" when none is present.
pub fn extract_client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(ip) = forwarded_str.split(',').next() {
                let trimmed = ip.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }

    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn enforces_minimum_spacing() {
        let throttle = RequestThrottle::new();
        let interval = Duration::from_millis(50);

        assert!(throttle.allow("s1|1.2.3.4", interval));
        assert!(!throttle.allow("s1|1.2.3.4", interval));

        std::thread::sleep(Duration::from_millis(60));
        assert!(throttle.allow("s1|1.2.3.4", interval));
    }

    #[test]
    fn denied_calls_do_not_extend_the_window() {
        let throttle = RequestThrottle::new();
        let interval = Duration::from_millis(100);

        assert!(throttle.allow("k", interval));
        for _ in 0..5 {
            std::thread::sleep(Duration::from_millis(10));
            assert!(!throttle.allow("k", interval));
        }
        // ~100ms elapsed since the single allowed call, the denials in between
        // must not have reset the clock.
        std::thread::sleep(Duration::from_millis(60));
        assert!(throttle.allow("k", interval));
    }

    #[test]
    fn keys_are_independent() {
        let throttle = RequestThrottle::new();
        let interval = Duration::from_secs(60);

        assert!(throttle.allow("a|1.1.1.1", interval));
        assert!(throttle.allow("b|1.1.1.1", interval));
        assert!(!throttle.allow("a|1.1.1.1", interval));
    }

    #[test]
    fn cleanup_drops_idle_keys() {
        let throttle = RequestThrottle::new();
        assert!(throttle.allow("stale", Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(throttle.allow("live", Duration::from_millis(1)));

        throttle.cleanup_idle(Duration::from_millis(15));
        assert_eq!(throttle.tracked_keys(), 1);
    }

    #[test]
    fn throttle_key_defaults_anonymous_sessions() {
        assert_eq!(throttle_key("", "9.9.9.9"), "anon|9.9.9.9");
        assert_eq!(throttle_key("sess-1", "9.9.9.9"), "sess-1|9.9.9.9");
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(extract_client_ip(&headers), "203.0.113.7");

        let empty = HeaderMap::new();
        assert_eq!(extract_client_ip(&empty), "unknown");
    }
}
