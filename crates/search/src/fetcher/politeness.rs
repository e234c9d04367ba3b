//! Per-host request spacing and user-agent rotation

use dashmap::DashMap;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;

/// Keyed token bucket: each host gets `per_second` requests with no burst
pub struct HostRateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl HostRateLimiter {
    pub fn new(per_second: u32) -> Self {
        let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(rate).allow_burst(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    /// Wait until `host` may be contacted again
    pub async fn until_ready(&self, host: &str) {
        self.limiter.until_key_ready(&host.to_string()).await;
    }

    /// Non-blocking check, used by tests
    pub fn try_acquire(&self, host: &str) -> bool {
        self.limiter.check_key(&host.to_string()).is_ok()
    }
}

/// Round-robin user-agent selection, tracked per host
pub struct UserAgentRotator {
    agents: Vec<String>,
    cursors: DashMap<String, usize>,
}

impl UserAgentRotator {
    pub fn new(agents: Vec<String>) -> Self {
        Self {
            agents,
            cursors: DashMap::new(),
        }
    }

    /// Next user-agent for `host`; `fallback` when the pool is empty
    pub fn next_for<'a>(&'a self, host: &str, fallback: &'a str) -> &'a str {
        if self.agents.is_empty() {
            return fallback;
        }
        let mut cursor = self.cursors.entry(host.to_string()).or_insert(0);
        let agent = &self.agents[*cursor % self.agents.len()];
        *cursor = cursor.wrapping_add(1);
        agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_is_per_host() {
        let rotator = UserAgentRotator::new(vec!["ua-1".into(), "ua-2".into()]);
        assert_eq!(rotator.next_for("a.com", "bot"), "ua-1");
        assert_eq!(rotator.next_for("a.com", "bot"), "ua-2");
        assert_eq!(rotator.next_for("b.com", "bot"), "ua-1");
        assert_eq!(rotator.next_for("a.com", "bot"), "ua-1");
    }

    #[test]
    fn test_empty_pool_uses_fallback() {
        let rotator = UserAgentRotator::new(Vec::new());
        assert_eq!(rotator.next_for("a.com", "ResearchBot/1.0"), "ResearchBot/1.0");
    }

    #[test]
    fn test_limiter_spaces_same_host_only() {
        let limiter = HostRateLimiter::new(1);
        assert!(limiter.try_acquire("a.com"));
        assert!(!limiter.try_acquire("a.com"));
        assert!(limiter.try_acquire("b.com"));
    }

    #[tokio::test]
    async fn test_until_ready_completes() {
        let limiter = HostRateLimiter::new(50);
        limiter.until_ready("a.com").await;
        limiter.until_ready("a.com").await;
    }
}
