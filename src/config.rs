//! Bank Configuration
//!
//! Numeric thresholds and periods of the clustering engine, loaded once at startup
//! from a JSON file and read-only thereafter. Every field has a default so a partial
//! file (or no file at all) yields a working bank.
//!
//! Unless stated otherwise, periods and ages are in seconds.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

const SECONDS_PER_DAY: f64 = 86400.0;

/// Event shape and merge-level knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Length of an event's word summary.
    pub max_core_words: u32,
    /// Maximum length of a message's ranked core-word list.
    pub max_message_core_words: u32,
    pub max_size: u32,
    pub max_time_range: u64,
    pub merge_level_base: u32,
    pub merge_level_min: u32,
    pub merge_level_size_based_decrement_step: f64,
    /// Merge level growth per day elapsed between two events.
    pub merge_level_time_based_increment_step: f64,
    /// Merge level growth per day of combined time range.
    pub merge_level_range_based_increment_step: f64,
    pub merge_level_strain_based_increment_step: f64,
    pub merge_max_strain: u32,
    pub merge_max_time_diff: u64,
    pub min_rift_time: u64,
    /// Seconds of merge denial per member of the pair.
    pub merge_deny_size_factor: u64,
    pub merge_deny_max_time: u64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            max_core_words: 20,
            max_message_core_words: 20,
            max_size: 200,
            max_time_range: 5 * 86400,
            merge_level_base: 60,
            merge_level_min: 30,
            merge_level_size_based_decrement_step: 0.5,
            merge_level_time_based_increment_step: 10.0,
            merge_level_range_based_increment_step: 5.0,
            merge_level_strain_based_increment_step: 0.3,
            merge_max_strain: 20,
            merge_max_time_diff: 2 * 86400,
            min_rift_time: 12 * 3600,
            merge_deny_size_factor: 60,
            merge_deny_max_time: 86400,
        }
    }
}

/// Local re-optimization ("remake") knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemakeConfig {
    /// Minimal relative improvement, in percent.
    pub min_improve: u32,
    pub min_size_remake: u32,
    pub min_size_revise: u32,
    pub min_part: u32,
    pub traverse_records: u32,
    pub traverse_period: u64,
    pub traverse_pause: u64,
    pub dry_run: bool,
    pub improve_log_offset: f64,
    pub event_word_boost: f64,
    pub max_message_word_check: u32,
}

impl Default for RemakeConfig {
    fn default() -> Self {
        Self {
            min_improve: 30,
            min_size_remake: 3,
            min_size_revise: 4,
            min_part: 2,
            traverse_records: 100,
            traverse_period: 60,
            traverse_pause: 300,
            dry_run: false,
            improve_log_offset: 0.01,
            event_word_boost: 10.0,
            max_message_word_check: 3,
        }
    }
}

/// Growth policy of the traversal period when the changed-event backlog worsens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PeriodMaximization {
    Inc,
    Dbl,
    Max,
}

/// Maintenance traversal, merge cycle and cache knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub traverse_period_min: u64,
    pub traverse_period_max: u64,
    pub traverse_period_maximization: PeriodMaximization,
    pub traverse_records: u32,
    pub push_out_prc_per_hour: f64,
    pub cleanup_allowed_change_events_count: u32,
    pub revise_events_period: u64,
    /// Milliseconds.
    pub merge_check_period: u64,
    pub event_load_retry_delay: u64,
    /// Milliseconds of candidate scanning allowed per merge step.
    pub find_best_overlap_timeout: u64,
    pub merge_blacklist_cleanup_period: u64,
    pub recompose_timeout: u64,
    pub msg_core_words_timeout: u64,
    pub msg_core_words_preempt_period: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            traverse_period_min: 5,
            traverse_period_max: 60,
            traverse_period_maximization: PeriodMaximization::Dbl,
            traverse_records: 1000,
            push_out_prc_per_hour: 0.5,
            cleanup_allowed_change_events_count: 1000,
            revise_events_period: 3600,
            merge_check_period: 1000,
            event_load_retry_delay: 10,
            find_best_overlap_timeout: 500,
            merge_blacklist_cleanup_period: 600,
            recompose_timeout: 3 * 86400,
            msg_core_words_timeout: 3600,
            msg_core_words_preempt_period: 600,
        }
    }
}

/// Directory login and presence knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of clustering engines (language partitions).
    pub backets: usize,
    pub login_retry_period: u64,
    pub report_presence_period: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backets: 4,
            login_retry_period: 10,
            report_presence_period: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    pub event: EventConfig,
    pub event_remake: RemakeConfig,
    pub event_cache: CacheConfig,
    pub session: SessionConfig,
    pub message_expiration_time: u64,
    pub read_chunk_size: u32,
    pub message_update_chunk_size: u32,
    /// Milliseconds.
    pub message_update_chunk_min_period: u64,
    /// Path prefix of the crash-recovery snapshot.
    pub cache_file: String,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            event: EventConfig::default(),
            event_remake: RemakeConfig::default(),
            event_cache: CacheConfig::default(),
            session: SessionConfig::default(),
            message_expiration_time: 30 * 86400,
            read_chunk_size: 1000,
            message_update_chunk_size: 1000,
            message_update_chunk_min_period: 1000,
            cache_file: "event_bank.cache".to_string(),
        }
    }
}

impl BankConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: BankConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_cache.traverse_period_min == 0 {
            return Err(anyhow::anyhow!("event_cache.traverse_period_min must be positive"));
        }
        if self.event_cache.traverse_period_min > self.event_cache.traverse_period_max {
            return Err(anyhow::anyhow!(
                "event_cache.traverse_period_min exceeds traverse_period_max"
            ));
        }
        if self.read_chunk_size == 0 {
            return Err(anyhow::anyhow!("read_chunk_size must be positive"));
        }
        if self.session.backets == 0 {
            return Err(anyhow::anyhow!("session.backets must be positive"));
        }
        Ok(())
    }

    /// Path of the changed-events / merge-denial snapshot file.
    pub fn snapshot_path(&self) -> String {
        format!("{}.chn", self.cache_file)
    }
}

impl EventConfig {
    pub fn time_step_per_second(&self) -> f64 {
        self.merge_level_time_based_increment_step / SECONDS_PER_DAY
    }

    pub fn range_step_per_second(&self) -> f64 {
        self.merge_level_range_based_increment_step / SECONDS_PER_DAY
    }

    /// With no size-based decay and no negative growth steps the level can never drop
    /// below the base, so the base doubles as the floor.
    pub fn effective_merge_level_min(&self) -> u32 {
        if self.merge_level_size_based_decrement_step <= 0.0
            && self.merge_level_time_based_increment_step >= 0.0
            && self.merge_level_range_based_increment_step >= 0.0
        {
            self.merge_level_base
        } else {
            self.merge_level_min
        }
    }
}
