//! Tunable limits for the chat core.
//!
//! Every struct's `Default` carries the production defaults; settings
//! loaded at startup override individual fields.

use std::time::Duration;

use chrono::TimeDelta;

/// Message pipeline limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Messages allowed per (user, room) per window.
    pub rate_limit: u32,
    pub rate_window: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rate_limit: 10,
            rate_window: Duration::from_secs(60),
        }
    }
}

/// Presence timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceConfig {
    /// Silence after which an online member is considered gone.
    pub inactivity_timeout: TimeDelta,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: TimeDelta::minutes(5),
        }
    }
}

/// Moderation thresholds and ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModerationConfig {
    /// Pending reports that trigger automatic deletion.
    pub report_threshold: usize,
    /// Mute applied when a review cascades into a mute without a duration.
    pub review_mute_minutes: u32,
    /// Longest timed mute (one week).
    pub max_mute_minutes: u32,
    /// Longest timed ban (one year).
    pub max_ban_minutes: u32,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            report_threshold: 3,
            review_mute_minutes: 60,
            max_mute_minutes: 7 * 24 * 60,
            max_ban_minutes: 365 * 24 * 60,
        }
    }
}

/// Spam heuristic thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpamThresholds {
    /// Messages tolerated per frequency window; one more is a violation.
    pub frequency_max_messages: usize,
    pub frequency_window: Duration,
    /// Identical messages within the window that count as duplication.
    pub duplicate_threshold: usize,
    pub duplicate_window: Duration,
    /// Timestamps kept per (user, room) counter.
    pub history_cap: usize,
    /// Letters required before the caps ratio is evaluated.
    pub caps_min_letters: usize,
    /// Uppercase share, in percent, that must be exceeded.
    pub caps_ratio_percent: usize,
    /// Characters required before repetition is evaluated.
    pub repetition_min_length: usize,
    /// Shortest run of one character that counts as repetition.
    pub repetition_run: usize,
    /// Share of the message, in percent, covered by runs that must be
    /// exceeded.
    pub repetition_ratio_percent: usize,
    /// URLs tolerated per message.
    pub max_urls: usize,
    /// Length of the automatic mute after high-severity spam.
    pub auto_mute_minutes: u32,
}

impl Default for SpamThresholds {
    fn default() -> Self {
        Self {
            frequency_max_messages: 5,
            frequency_window: Duration::from_secs(60),
            duplicate_threshold: 3,
            duplicate_window: Duration::from_secs(300),
            history_cap: 20,
            caps_min_letters: 10,
            caps_ratio_percent: 70,
            repetition_min_length: 10,
            repetition_run: 4,
            repetition_ratio_percent: 50,
            max_urls: 2,
            auto_mute_minutes: 10,
        }
    }
}

/// Lifetimes of cached views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub room_list: Duration,
    pub room_stats: Duration,
    pub online_users: Duration,
    pub history_page: Duration,
    pub presence: Duration,
    /// Lifetime of a room's history generation counter; must outlive
    /// `history_page`.
    pub history_generation: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            room_list: Duration::from_secs(300),
            room_stats: Duration::from_secs(600),
            online_users: Duration::from_secs(60),
            history_page: Duration::from_secs(1800),
            presence: Duration::from_secs(120),
            history_generation: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Complete configuration for the chat core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatConfig {
    pub pipeline: PipelineConfig,
    pub presence: PresenceConfig,
    pub moderation: ModerationConfig,
    pub spam: SpamThresholds,
    pub cache: CacheTtls,
}
