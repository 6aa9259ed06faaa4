use std::collections::HashMap;
use std::sync::Mutex;

use regex::Regex;

use crate::frame::{Frame, HeaderKey};
use crate::subscription::SubscriptionIds;

/// Decides whether an inbound frame belongs to a subscribed destination.
pub trait PathMatcher: Send + Sync {
    fn matches(&self, destination: &str, frame: &Frame) -> bool;
}

/// Which built-in matcher a client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchStrategy {
    /// `destination` header equals the subscribed destination.
    #[default]
    Exact,
    /// Broker topic patterns with `*` and `#` segments.
    Wildcard,
    /// `subscription` header equals the id allocated at subscribe time.
    SubscriptionId,
}

/// Exact destination echo.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactMatcher;

impl PathMatcher for ExactMatcher {
    fn matches(&self, destination: &str, frame: &Frame) -> bool {
        frame.destination() == Some(destination)
    }
}

/// Hierarchical topic matcher for brokers such as RabbitMQ.
///
/// The subscribed destination is a dot-separated pattern. A segment that is
/// exactly `*` matches one segment, a segment that is exactly `#` matches
/// anything that follows. Inside a segment, `*` matches any run of non-dot
/// characters and `#` any run of characters. Each pattern is compiled once.
#[derive(Debug, Default)]
pub struct WildcardMatcher {
    compiled: Mutex<HashMap<String, Option<Regex>>>,
}

impl WildcardMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate a topic pattern into an anchored regular expression.
    pub fn pattern_to_regex(pattern: &str) -> String {
        let segments: Vec<String> = pattern
            .split('.')
            .map(|segment| match segment {
                "*" => "[^.]+".to_string(),
                "#" => ".*".to_string(),
                _ => {
                    let mut out = String::with_capacity(segment.len());
                    let mut buf = [0u8; 4];
                    for ch in segment.chars() {
                        match ch {
                            '*' => out.push_str("[^.]*"),
                            '#' => out.push_str(".*"),
                            c => out.push_str(&regex::escape(c.encode_utf8(&mut buf))),
                        }
                    }
                    out
                }
            })
            .collect();
        format!("^{}$", segments.join("\\."))
    }

    fn is_match(&self, pattern: &str, destination: &str) -> bool {
        let mut compiled = match self.compiled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let regex = compiled.entry(pattern.to_string()).or_insert_with(|| {
            Regex::new(&Self::pattern_to_regex(pattern))
                .map_err(|e| tracing::warn!(%pattern, error = %e, "invalid topic pattern"))
                .ok()
        });
        regex.as_ref().is_some_and(|r| r.is_match(destination))
    }
}

impl PathMatcher for WildcardMatcher {
    fn matches(&self, destination: &str, frame: &Frame) -> bool {
        match frame.destination() {
            Some(dest) => self.is_match(destination, dest),
            None => false,
        }
    }
}

/// Routes by the `subscription` header rather than by destination echo.
#[derive(Clone)]
pub struct SubscriptionIdMatcher {
    ids: SubscriptionIds,
}

impl SubscriptionIdMatcher {
    pub fn new(ids: SubscriptionIds) -> Self {
        Self { ids }
    }
}

impl PathMatcher for SubscriptionIdMatcher {
    fn matches(&self, destination: &str, frame: &Frame) -> bool {
        let Some(expected) = self.ids.get(destination) else {
            return false;
        };
        frame.header_value(HeaderKey::Subscription) == Some(expected.as_str())
    }
}
