//! Tunables for the outbox pipeline.
//!
//! Every struct has sensible defaults, builder-style setters, and can be
//! deserialized from configuration files. Durations are written as
//! milliseconds:
//!
//! ```json
//! {
//!   "publish_timeout_ms": 5000,
//!   "retry": { "max_retries": 3, "initial_backoff_ms": 50, "max_backoff_ms": 1000 },
//!   "sweep": { "interval_ms": 30000, "batch_size": 100 }
//! }
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Retry/backoff strategy for whole transactions.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: u32,
    #[serde(rename = "initial_backoff_ms", with = "duration_ms")]
    pub initial_backoff: Duration,
    #[serde(rename = "max_backoff_ms", with = "duration_ms")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(1_000),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Delay to wait before retry number `retry` (1-based): doubles each time, capped.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Cadence and limits of the retry sweep.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    #[serde(rename = "interval_ms", with = "duration_ms")]
    pub interval: Duration,
    /// Entries re-attempted per pass.
    pub batch_size: usize,
    /// Base wait before a Failed entry is re-attempted; doubles per attempt.
    #[serde(rename = "retry_after_ms", with = "duration_ms")]
    pub retry_after: Duration,
    #[serde(rename = "max_retry_after_ms", with = "duration_ms")]
    pub max_retry_after: Duration,
    /// An InProgress entry older than this is considered abandoned.
    #[serde(rename = "in_progress_timeout_ms", with = "duration_ms")]
    pub in_progress_timeout: Duration,
    /// Entries sent this many times are left Failed for manual action.
    pub max_attempts: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            batch_size: 100,
            retry_after: Duration::from_secs(10),
            max_retry_after: Duration::from_secs(600),
            in_progress_timeout: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

impl SweepConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn with_max_retry_after(mut self, max: Duration) -> Self {
        self.max_retry_after = max;
        self
    }

    pub fn with_in_progress_timeout(mut self, timeout: Duration) -> Self {
        self.in_progress_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// How long an entry that has been sent `times_sent` times must sit in
    /// Failed before the sweep picks it up again.
    pub fn retry_delay(&self, times_sent: u32) -> Duration {
        let factor = 2u32.saturating_pow(times_sent.saturating_sub(1));
        self.retry_after
            .saturating_mul(factor)
            .min(self.max_retry_after)
    }
}

/// Top-level configuration of the pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Upper bound on a single publish attempt; expiry counts as a failure.
    #[serde(rename = "publish_timeout_ms", with = "duration_ms")]
    pub publish_timeout: Duration,
    pub retry: RetryPolicy,
    pub sweep: SweepConfig,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            sweep: SweepConfig::default(),
        }
    }
}

impl OutboxConfig {
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sweep(mut self, sweep: SweepConfig) -> Self {
        self.sweep = sweep;
        self
    }

    /// Parse a JSON document; missing fields fall back to defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
