//! Spam heuristics.
//!
//! Frequency and duplication read and rewrite short-lived per-(room, user)
//! histories in the cache; the remaining checks only look at the text.
//! Cache trouble degrades to "no history" so spam checks never block chat.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::warn;
use url::Url;

use super::policy::FilterPolicy;
use super::{Severity, Violation, ViolationKind};
use crate::domain::cache::keys;
use crate::domain::ports::{CacheKey, CacheStore};
use crate::domain::{RoomId, SpamThresholds, UserId};

static URL_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>"]+"#).ok());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RecentText {
    text: String,
    at: i64,
}

/// Stateful spam detector for one deployment.
#[derive(Clone)]
pub(crate) struct SpamDetector {
    cache: Arc<dyn CacheStore>,
    thresholds: SpamThresholds,
    policy: Arc<FilterPolicy>,
}

impl SpamDetector {
    pub(crate) fn new(
        cache: Arc<dyn CacheStore>,
        thresholds: SpamThresholds,
        policy: Arc<FilterPolicy>,
    ) -> Self {
        Self {
            cache,
            thresholds,
            policy,
        }
    }

    /// Run every heuristic against `body`, recording it in the histories.
    pub(crate) async fn check(
        &self,
        body: &str,
        user_id: UserId,
        room_id: RoomId,
        now: DateTime<Utc>,
    ) -> Vec<Violation> {
        let mut violations = Vec::new();
        violations.extend(self.check_frequency(user_id, room_id, now).await);
        violations.extend(self.check_duplicates(body, user_id, room_id, now).await);
        violations.extend(excessive_caps(body, &self.thresholds));
        violations.extend(character_repetition(body, &self.thresholds));
        violations.extend(url_spam(body, &self.thresholds, &self.policy));
        violations
    }

    async fn check_frequency(
        &self,
        user_id: UserId,
        room_id: RoomId,
        now: DateTime<Utc>,
    ) -> Option<Violation> {
        let window = self.thresholds.frequency_window;
        let key = keys::spam_frequency(room_id, user_id);
        let horizon = now.timestamp_millis() - window_millis(window);

        let mut stamps: Vec<i64> = self.read_history(&key).await;
        stamps.retain(|stamp| *stamp > horizon);
        stamps.push(now.timestamp_millis());
        keep_newest(&mut stamps, self.thresholds.history_cap);
        self.write_history(&key, &stamps, window).await;

        (stamps.len() > self.thresholds.frequency_max_messages).then(|| Violation {
            kind: ViolationKind::MessageFrequency,
            severity: Severity::High,
            detail: format!(
                "{} messages within {} seconds",
                stamps.len(),
                window.as_secs()
            ),
        })
    }

    async fn check_duplicates(
        &self,
        body: &str,
        user_id: UserId,
        room_id: RoomId,
        now: DateTime<Utc>,
    ) -> Option<Violation> {
        let window = self.thresholds.duplicate_window;
        let key = keys::spam_duplicates(room_id, user_id);
        let horizon = now.timestamp_millis() - window_millis(window);
        let text = body.trim().to_lowercase();

        let mut recent: Vec<RecentText> = self.read_history(&key).await;
        recent.retain(|entry| entry.at > horizon);
        recent.push(RecentText {
            text: text.clone(),
            at: now.timestamp_millis(),
        });
        keep_newest(&mut recent, self.thresholds.history_cap);
        self.write_history(&key, &recent, window).await;

        let copies = recent.iter().filter(|entry| entry.text == text).count();
        (copies >= self.thresholds.duplicate_threshold).then(|| Violation {
            kind: ViolationKind::DuplicateMessage,
            severity: Severity::Medium,
            detail: format!(
                "{copies} identical messages within {} seconds",
                window.as_secs()
            ),
        })
    }

    async fn read_history<T: DeserializeOwned>(&self, key: &CacheKey) -> Vec<T> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!(key = %key, error = %err, "discarding unreadable spam history");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(key = %key, error = %err, "spam history unavailable");
                Vec::new()
            }
        }
    }

    async fn write_history<T: Serialize>(
        &self,
        key: &CacheKey,
        entries: &[T],
        ttl: std::time::Duration,
    ) {
        let raw = match serde_json::to_string(entries) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key = %key, error = %err, "spam history not serialisable");
                return;
            }
        };
        if let Err(err) = self.cache.set(key, raw, ttl).await {
            warn!(key = %key, error = %err, "spam history write failed");
        }
    }
}

fn window_millis(window: std::time::Duration) -> i64 {
    TimeDelta::from_std(window)
        .map(|delta| delta.num_milliseconds())
        .unwrap_or(i64::MAX / 2)
}

fn keep_newest<T>(entries: &mut Vec<T>, cap: usize) {
    if entries.len() > cap {
        entries.drain(..entries.len() - cap);
    }
}

/// Uppercase share of the letters above the configured ratio.
pub(crate) fn excessive_caps(body: &str, thresholds: &SpamThresholds) -> Option<Violation> {
    let letters = body.chars().filter(|ch| ch.is_alphabetic()).count();
    if letters < thresholds.caps_min_letters {
        return None;
    }
    let upper = body.chars().filter(|ch| ch.is_uppercase()).count();
    (upper * 100 > letters * thresholds.caps_ratio_percent).then(|| Violation {
        kind: ViolationKind::ExcessiveCaps,
        severity: Severity::Low,
        detail: format!("{upper} of {letters} letters are uppercase"),
    })
}

/// Runs of one repeated character covering too much of the message.
pub(crate) fn character_repetition(
    body: &str,
    thresholds: &SpamThresholds,
) -> Option<Violation> {
    let chars: Vec<char> = body.chars().collect();
    if chars.len() < thresholds.repetition_min_length {
        return None;
    }
    let repeated: usize = chars
        .chunk_by(|left, right| left == right)
        .map(<[char]>::len)
        .filter(|run| *run >= thresholds.repetition_run)
        .sum();
    (repeated * 100 > chars.len() * thresholds.repetition_ratio_percent).then(|| Violation {
        kind: ViolationKind::CharacterRepetition,
        severity: Severity::Low,
        detail: format!("{repeated} of {} characters are repeated", chars.len()),
    })
}

/// Too many links, or links to shorteners or suspicious destinations.
pub(crate) fn url_spam(
    body: &str,
    thresholds: &SpamThresholds,
    policy: &FilterPolicy,
) -> Option<Violation> {
    let pattern = URL_PATTERN.as_ref()?;
    let urls: Vec<&str> = pattern.find_iter(body).map(|m| m.as_str()).collect();
    if urls.is_empty() {
        return None;
    }
    let detail = if urls.len() > thresholds.max_urls {
        format!("{} links in one message", urls.len())
    } else if let Some(host) = urls
        .iter()
        .filter_map(|raw| link_host(raw))
        .find(|host| policy.is_shortener(host))
    {
        format!("shortened link via {host}")
    } else if let Some(phrase) = urls.iter().find_map(|raw| policy.suspicious_phrase(raw)) {
        format!("suspicious link containing {phrase:?}")
    } else {
        return None;
    };
    Some(Violation {
        kind: ViolationKind::UrlSpam,
        severity: Severity::Medium,
        detail,
    })
}

fn link_host(raw: &str) -> Option<String> {
    let parsed = if raw.len() >= 4 && raw[..4].eq_ignore_ascii_case("www.") {
        Url::parse(&format!("http://{raw}"))
    } else {
        Url::parse(raw)
    };
    parsed.ok()?.host_str().map(str::to_owned)
}

#[cfg(test)]
#[path = "spam_tests.rs"]
mod tests;
