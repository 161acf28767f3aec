//! Job-level configuration.
//!
//! [`JobConfig`] collects every tunable of the pipeline: chunk sizing, the
//! length-tolerance bands, retry policy, dispatch concurrency, document
//! eligibility and skeleton behaviour. The server binary builds one from its
//! CLI/environment settings; tests build one with struct-update syntax over
//! [`JobConfig::default`].

use crate::error::{Error, Result};
use core::{fmt, time::Duration};
use serde::{Deserialize, Serialize};

/// Whether a structural outline of the document is extracted before chunk
/// processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkeletonMode {
    /// Never extract a skeleton.
    Off,
    /// Extract one; on failure, warn and continue without it.
    #[default]
    Optional,
    /// Extract one; on failure, fail the job.
    Required,
}

/// How the rewritten document should relate to the input length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthMode {
    #[default]
    Preserve,
    Expand,
    Condense,
}

impl LengthMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preserve => "preserve",
            Self::Expand => "expand",
            Self::Condense => "condense",
        }
    }
}

impl fmt::Display for LengthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive word-count bounds `[min, max]` a chunk result must land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WordBand {
    pub min: usize,
    pub max: usize,
}

impl WordBand {
    /// Builds a symmetric band of `±tolerance` (a fraction) around `target`.
    pub fn around(target: usize, tolerance: f64) -> Self {
        let target = target as f64;
        Self {
            min: (target * (1.0 - tolerance)).round().max(0.0) as usize,
            max: (target * (1.0 + tolerance)).round() as usize,
        }
    }

    pub const fn contains(&self, words: usize) -> bool {
        self.min <= words && words <= self.max
    }
}

/// Upper bound for [`JobConfig::max_retries`].
pub const MAX_RETRIES: u32 = 10;

/// Tunables for planning and processing a single rewrite job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    /// Source words per chunk before sentence-boundary adjustment.
    pub chunk_target_words: usize,
    /// Primary tolerance band, as a fraction of each chunk's target.
    pub tolerance: f64,
    /// Wider band that still counts as a pass once retries are exhausted.
    pub secondary_tolerance: f64,
    /// Retries after the first attempt; a chunk gets `1 + max_retries` calls.
    pub max_retries: u32,
    /// Delay before retrying after a failed call, doubled per consecutive
    /// failure.
    pub retry_backoff: Duration,
    /// Upper bound for the doubled backoff.
    pub max_retry_backoff: Duration,
    /// Timeout for each individual generation call.
    pub attempt_timeout: Duration,
    /// Maximum number of chunks in flight at once.
    pub concurrency: usize,
    /// Smallest accepted document, in words.
    pub min_document_words: usize,
    /// Largest accepted document, in words.
    pub max_document_words: usize,
    pub skeleton_mode: SkeletonMode,
    /// Length mode used when a request does not name one.
    pub default_length_mode: LengthMode,
    /// Output/input ratio for [`LengthMode::Expand`].
    pub expand_ratio: f64,
    /// Output/input ratio for [`LengthMode::Condense`].
    pub condense_ratio: f64,
    /// Capacity of the outbound event channel between a job and its session.
    pub event_buffer_size: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            chunk_target_words: 1000,
            tolerance: 0.10,
            secondary_tolerance: 0.20,
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
            max_retry_backoff: Duration::from_secs(8),
            attempt_timeout: Duration::from_secs(120),
            concurrency: 1,
            min_document_words: 500,
            max_document_words: 20_000,
            skeleton_mode: SkeletonMode::Optional,
            default_length_mode: LengthMode::Preserve,
            expand_ratio: 1.3,
            condense_ratio: 0.7,
            event_buffer_size: 32,
        }
    }
}

impl JobConfig {
    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(Error::InvalidConfig { reason });

        if self.chunk_target_words < 10 {
            return invalid(format!(
                "chunk_target_words must be at least 10 (got {})",
                self.chunk_target_words
            ));
        }
        if !(0.0..1.0).contains(&self.tolerance) {
            return invalid(format!(
                "tolerance must be in [0, 1) (got {})",
                self.tolerance
            ));
        }
        if !(self.tolerance..1.0).contains(&self.secondary_tolerance) {
            return invalid(format!(
                "secondary_tolerance must be in [tolerance, 1) (got {})",
                self.secondary_tolerance
            ));
        }
        if self.max_retries > MAX_RETRIES {
            return invalid(format!(
                "max_retries must be at most {MAX_RETRIES} (got {})",
                self.max_retries
            ));
        }
        if self.concurrency == 0 {
            return invalid("concurrency must be greater than 0".to_string());
        }
        if self.attempt_timeout.is_zero() {
            return invalid("attempt_timeout must be greater than 0".to_string());
        }
        if self.min_document_words == 0 || self.min_document_words > self.max_document_words {
            return invalid(format!(
                "document word bounds must satisfy 0 < min <= max (got {}..={})",
                self.min_document_words, self.max_document_words
            ));
        }
        if self.expand_ratio < 1.0 {
            return invalid(format!(
                "expand_ratio must be at least 1.0 (got {})",
                self.expand_ratio
            ));
        }
        if !(self.condense_ratio > 0.0 && self.condense_ratio <= 1.0) {
            return invalid(format!(
                "condense_ratio must be in (0, 1] (got {})",
                self.condense_ratio
            ));
        }
        if self.event_buffer_size == 0 {
            return invalid("event_buffer_size must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Output/input word ratio for `mode`.
    pub const fn length_ratio(&self, mode: LengthMode) -> f64 {
        match mode {
            LengthMode::Preserve => 1.0,
            LengthMode::Expand => self.expand_ratio,
            LengthMode::Condense => self.condense_ratio,
        }
    }

    pub fn primary_band(&self, target: usize) -> WordBand {
        WordBand::around(target, self.tolerance)
    }

    pub fn secondary_band(&self, target: usize) -> WordBand {
        WordBand::around(target, self.secondary_tolerance)
    }

    /// Backoff before the retry that follows `consecutive_failures` failed
    /// calls in a row.
    pub fn backoff_for(&self, consecutive_failures: u32) -> Duration {
        let shift = consecutive_failures.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(1 << shift)
            .min(self.max_retry_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        JobConfig::default().validate().unwrap();
        JobConfig {
            max_retries: MAX_RETRIES,
            ..JobConfig::default()
        }
        .validate()
        .unwrap();
    }

    #[test]
    fn band_is_ten_percent_by_default() {
        let config = JobConfig::default();
        let band = config.primary_band(1000);
        assert_eq!(band, WordBand { min: 900, max: 1100 });
        assert!(band.contains(900));
        assert!(band.contains(1100));
        assert!(!band.contains(899));
        assert!(!band.contains(1101));
        assert_eq!(config.secondary_band(1000), WordBand { min: 800, max: 1200 });
    }

    #[test]
    fn rejects_out_of_range_values() {
        let cases = [
            JobConfig {
                concurrency: 0,
                ..JobConfig::default()
            },
            JobConfig {
                tolerance: 1.5,
                ..JobConfig::default()
            },
            JobConfig {
                secondary_tolerance: 0.05,
                ..JobConfig::default()
            },
            JobConfig {
                min_document_words: 30_000,
                ..JobConfig::default()
            },
            JobConfig {
                condense_ratio: 0.0,
                ..JobConfig::default()
            },
            JobConfig {
                max_retries: u32::MAX,
                ..JobConfig::default()
            },
        ];
        for config in cases {
            assert!(matches!(
                config.validate(),
                Err(Error::InvalidConfig { .. })
            ));
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = JobConfig {
            retry_backoff: Duration::from_millis(100),
            max_retry_backoff: Duration::from_millis(350),
            ..JobConfig::default()
        };
        assert_eq!(config.backoff_for(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(350));
        assert_eq!(config.backoff_for(40), Duration::from_millis(350));
    }

    #[test]
    fn ratios_follow_length_mode() {
        let config = JobConfig::default();
        assert_eq!(config.length_ratio(LengthMode::Preserve), 1.0);
        assert_eq!(config.length_ratio(LengthMode::Expand), 1.3);
        assert_eq!(config.length_ratio(LengthMode::Condense), 0.7);
    }
}
