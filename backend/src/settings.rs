//! Runtime settings loaded via OrthoConfig.
//!
//! Values come from CLI flags, `CHAT_*` environment variables, or a
//! configuration file. Anything left unset falls back to the defaults in
//! [`ChatConfig`].

use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;
use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::domain::ChatConfig;

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Settings for the chat worker.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "CHAT")]
pub struct ChatSettings {
    /// Redis connection URL. The in-memory cache is used when unset.
    pub redis_url: Option<String>,
    /// Seconds between presence sweeps.
    pub sweep_interval_secs: Option<u64>,
    /// Seconds of silence before an online member is swept offline.
    pub presence_timeout_secs: Option<u64>,
    /// Messages allowed per user and room in each rate window.
    pub message_rate_limit: Option<u32>,
    pub message_rate_window_secs: Option<u64>,
    /// Length of the automatic mute applied to high-severity spam.
    pub auto_mute_minutes: Option<u32>,
    /// Pending reports that remove a message automatically.
    pub report_threshold: Option<usize>,
    /// Mute length used when a review mutes without a duration.
    pub review_mute_minutes: Option<u32>,
    /// JSON filter policy replacing the built-in word and link tables.
    pub filter_policy_path: Option<PathBuf>,
}

impl ChatSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(
            self.sweep_interval_secs
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS)
                .max(1),
        )
    }

    /// Domain configuration with every override applied.
    pub fn to_config(&self) -> ChatConfig {
        let mut config = ChatConfig::default();
        if let Some(secs) = self.presence_timeout_secs {
            config.presence.inactivity_timeout =
                TimeDelta::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000));
        }
        if let Some(limit) = self.message_rate_limit {
            config.pipeline.rate_limit = limit;
        }
        if let Some(secs) = self.message_rate_window_secs {
            config.pipeline.rate_window = Duration::from_secs(secs.max(1));
        }
        if let Some(minutes) = self.auto_mute_minutes {
            config.spam.auto_mute_minutes = minutes;
        }
        if let Some(threshold) = self.report_threshold {
            config.moderation.report_threshold = threshold.max(1);
        }
        if let Some(minutes) = self.review_mute_minutes {
            config.moderation.review_mute_minutes = minutes;
        }
        config
    }
}
