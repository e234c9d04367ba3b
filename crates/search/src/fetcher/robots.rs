//! robots.txt policy
//!
//! Rules are parsed once per origin and cached with a TTL. A missing or
//! unreadable robots.txt allows everything; transient failures expire
//! sooner so the real rules are picked up on a later request.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
struct Rule {
    pattern: String,
    allow: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

/// Parsed robots.txt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsRules {
    groups: Vec<Group>,
}

impl RobotsRules {
    /// Rules that permit every path
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse robots.txt text. Unknown directives are ignored.
    pub fn parse(text: &str) -> Self {
        let mut groups: Vec<Group> = Vec::new();
        let mut current = Group::default();
        let mut in_agent_block = false;

        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_ascii_lowercase();
            let value = value.trim();

            match field.as_str() {
                "user-agent" => {
                    if !in_agent_block && (!current.agents.is_empty() || !current.rules.is_empty()) {
                        groups.push(std::mem::take(&mut current));
                    }
                    current.agents.push(value.to_ascii_lowercase());
                    in_agent_block = true;
                }
                "allow" | "disallow" => {
                    in_agent_block = false;
                    if current.agents.is_empty() {
                        continue;
                    }
                    // An empty Disallow permits everything
                    if value.is_empty() {
                        continue;
                    }
                    current.rules.push(Rule {
                        pattern: value.to_string(),
                        allow: field == "allow",
                    });
                }
                _ => {
                    in_agent_block = false;
                }
            }
        }
        if !current.agents.is_empty() {
            groups.push(current);
        }

        Self { groups }
    }

    /// Whether `agent` may fetch `path` (path plus query string)
    pub fn is_allowed(&self, agent: &str, path: &str) -> bool {
        let agent = agent.to_ascii_lowercase();

        let group = self
            .groups
            .iter()
            .find(|g| g.agents.iter().any(|a| a != "*" && agent.contains(a.as_str())))
            .or_else(|| self.groups.iter().find(|g| g.agents.iter().any(|a| a == "*")));

        let Some(group) = group else {
            return true;
        };

        // Longest matching pattern wins; Allow wins ties
        let mut best: Option<(usize, bool)> = None;
        for rule in &group.rules {
            if pattern_matches(&rule.pattern, path) {
                let len = rule.pattern.len();
                best = match best {
                    Some((best_len, best_allow))
                        if best_len > len || (best_len == len && best_allow) =>
                    {
                        Some((best_len, best_allow))
                    }
                    _ => Some((len, rule.allow)),
                };
            }
        }
        best.map_or(true, |(_, allow)| allow)
    }
}

/// Prefix match with `*` wildcards and a trailing `$` anchor
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let mut pieces = pattern.split('*');
    let first = pieces.next().unwrap_or("");
    if !path.starts_with(first) {
        return false;
    }
    let mut pos = first.len();
    let mut last_piece_end = pos;

    for piece in pieces {
        if piece.is_empty() {
            last_piece_end = path.len();
            continue;
        }
        match path[pos..].find(piece) {
            Some(offset) => {
                pos += offset + piece.len();
                last_piece_end = pos;
            }
            None => return false,
        }
    }

    !anchored || last_piece_end == path.len() || pattern.ends_with('*')
}

/// Rules fetched successfully (or a definitive 4xx) are reused this long
const ROBOTS_TTL: Duration = Duration::from_secs(60 * 60);
/// Transient failures are retried sooner
const FAILURE_TTL: Duration = Duration::from_secs(5 * 60);
/// Expired origins are swept once the map reaches this size
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Clone)]
struct CachedRules {
    rules: Arc<RobotsRules>,
    expires_at: Instant,
}

/// Per-origin cache of parsed robots rules
pub struct RobotsCache {
    client: reqwest::Client,
    agent: String,
    max_body_bytes: usize,
    rules: DashMap<String, CachedRules>,
}

impl RobotsCache {
    pub fn new(client: reqwest::Client, agent: impl Into<String>, max_body_bytes: usize) -> Self {
        Self {
            client,
            agent: agent.into(),
            max_body_bytes,
            rules: DashMap::new(),
        }
    }

    /// Check `url` against its origin's robots.txt, fetching it when absent or stale
    pub async fn is_allowed(&self, url: &Url) -> bool {
        let origin = url.origin().ascii_serialization();
        let now = Instant::now();
        let cached = self
            .rules
            .get(&origin)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.rules.clone());

        let rules = match cached {
            Some(rules) => rules,
            None => {
                let (rules, ttl) = self.fetch_rules(&origin).await;
                let rules = Arc::new(rules);
                self.store(origin, rules.clone(), ttl);
                rules
            }
        };

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        rules.is_allowed(&self.agent, &path)
    }

    fn store(&self, origin: String, rules: Arc<RobotsRules>, ttl: Duration) {
        let now = Instant::now();
        if self.rules.len() >= SWEEP_THRESHOLD {
            self.rules.retain(|_, entry| entry.expires_at > now);
        }
        self.rules.insert(
            origin,
            CachedRules {
                rules,
                expires_at: now + ttl,
            },
        );
    }

    async fn fetch_rules(&self, origin: &str) -> (RobotsRules, Duration) {
        let robots_url = format!("{}/robots.txt", origin);
        let response = self
            .client
            .get(&robots_url)
            .header(reqwest::header::USER_AGENT, format!("{}/1.0", self.agent))
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match self.read_capped(resp).await {
                Ok(text) => {
                    debug!(origin, "Parsed robots.txt");
                    (RobotsRules::parse(&text), ROBOTS_TTL)
                }
                Err(e) => {
                    warn!(origin, error = %e, "Failed to read robots.txt, allowing");
                    (RobotsRules::allow_all(), FAILURE_TTL)
                }
            },
            Ok(resp) if resp.status().is_server_error() => {
                warn!(origin, status = resp.status().as_u16(), "robots.txt unavailable, allowing");
                (RobotsRules::allow_all(), FAILURE_TTL)
            }
            Ok(resp) => {
                debug!(origin, status = resp.status().as_u16(), "No robots.txt, allowing");
                (RobotsRules::allow_all(), ROBOTS_TTL)
            }
            Err(e) => {
                warn!(origin, error = %e, "Error fetching robots.txt, allowing");
                (RobotsRules::allow_all(), FAILURE_TTL)
            }
        }
    }

    async fn read_capped(&self, mut resp: reqwest::Response) -> reqwest::Result<String> {
        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            let room = self.max_body_bytes.saturating_sub(body.len());
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                break;
            }
            body.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Seed rules for an origin without fetching
    pub fn insert(&self, origin: impl Into<String>, rules: RobotsRules) {
        self.store(origin.into(), Arc::new(rules), ROBOTS_TTL);
    }

    #[cfg(test)]
    fn insert_with_ttl(&self, origin: impl Into<String>, rules: RobotsRules, ttl: Duration) {
        self.store(origin.into(), Arc::new(rules), ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROBOTS: &str = "\
# example
User-agent: *
Disallow: /private/
Allow: /private/press/
Disallow: /*.pdf$

User-agent: ResearchBot
User-agent: OtherBot
Disallow: /drafts
";

    #[test]
    fn test_named_group_takes_precedence() {
        let rules = RobotsRules::parse(ROBOTS);
        // ResearchBot uses its own group, which does not mention /private/
        assert!(rules.is_allowed("ResearchBot", "/private/secret"));
        assert!(!rules.is_allowed("ResearchBot", "/drafts/one"));
        assert!(!rules.is_allowed("OtherBot", "/drafts"));
    }

    #[test]
    fn test_wildcard_group_and_longest_match() {
        let rules = RobotsRules::parse(ROBOTS);
        assert!(!rules.is_allowed("SomeCrawler", "/private/secret"));
        assert!(rules.is_allowed("SomeCrawler", "/private/press/release"));
        assert!(!rules.is_allowed("SomeCrawler", "/files/report.pdf"));
        assert!(rules.is_allowed("SomeCrawler", "/files/report.pdf?download=1"));
        assert!(rules.is_allowed("SomeCrawler", "/public"));
    }

    #[test]
    fn test_empty_disallow_allows_all() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow:\n");
        assert!(rules.is_allowed("ResearchBot", "/anything"));
        assert!(RobotsRules::allow_all().is_allowed("ResearchBot", "/"));
    }

    #[tokio::test]
    async fn test_cache_uses_seeded_rules() {
        let cache = RobotsCache::new(reqwest::Client::new(), "ResearchBot", 64 * 1024);
        cache.insert(
            "https://example.com",
            RobotsRules::parse("User-agent: *\nDisallow: /\n"),
        );
        let url = Url::parse("https://example.com/page").unwrap();
        assert!(!cache.is_allowed(&url).await);
    }

    #[tokio::test]
    async fn test_stale_rules_are_refetched() {
        let cache = RobotsCache::new(reqwest::Client::new(), "ResearchBot", 64 * 1024);
        // Seeded rules block everything but are already expired; the refetch
        // against a closed port fails and falls back to allowing
        cache.insert_with_ttl(
            "http://127.0.0.1:9",
            RobotsRules::parse("User-agent: *\nDisallow: /\n"),
            Duration::ZERO,
        );
        let url = Url::parse("http://127.0.0.1:9/page").unwrap();
        assert!(cache.is_allowed(&url).await);
    }

    #[test]
    fn test_expired_origins_are_swept() {
        let cache = RobotsCache::new(reqwest::Client::new(), "ResearchBot", 64 * 1024);
        for i in 0..SWEEP_THRESHOLD {
            cache.insert_with_ttl(format!("https://site{}.example", i), RobotsRules::allow_all(), Duration::ZERO);
        }
        cache.insert("https://fresh.example", RobotsRules::allow_all());
        assert_eq!(cache.rules.len(), 1);
    }
}
