//! Exchange-level configuration.
//!
//! Follows the `Default`-impl-plus-doc-comment pattern used throughout
//! this workspace's configuration modules: every field documents its
//! purpose and reasonable production defaults, and the whole struct is
//! `Serialize`/`Deserialize` so it can be loaded from file or env.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the partition exchange coordination layer (§6).
///
/// None of these settings change protocol *correctness* — the exchange
/// always waits for quiescence and always completes eventually. They only
/// control how aggressively the quiesce waiter logs diagnostics while
/// waiting, per the "unbounded wait with observability" design choice
/// in §4.3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Baseline network round-trip timeout. The quiesce waiter's first
    /// diagnostic dump fires after `2 * network_timeout`; later dumps
    /// double the interval (§4.3).
    #[serde(with = "duration_millis")]
    pub network_timeout: Duration,

    /// Upper bound on the exponential dump interval growth (§6:
    /// `longOpDumpTimeoutLimit`). Once the computed interval would exceed
    /// this, it is clamped here instead.
    #[serde(with = "duration_millis")]
    pub long_op_dump_timeout_limit: Duration,

    /// Minimum wait time before the partition-release future's contents
    /// are dumped in diagnostics (§6: `releaseFutureDumpThreshold`).
    /// `Duration::ZERO` means "never dump the release future contents".
    #[serde(with = "duration_millis")]
    pub release_future_dump_threshold: Duration,

    /// Whether a timed-out quiesce wait should also capture a thread/task
    /// dump (§6: `threadDumpOnExchangeTimeout`). Expensive, so defaults
    /// to off outside of debugging sessions.
    pub thread_dump_on_exchange_timeout: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            network_timeout: Duration::from_secs(5),
            long_op_dump_timeout_limit: Duration::from_secs(30 * 60),
            release_future_dump_threshold: Duration::from_secs(0),
            thread_dump_on_exchange_timeout: false,
        }
    }
}

impl ExchangeConfig {
    /// First diagnostic-dump interval: `2 * network_timeout` (§4.3).
    pub fn initial_dump_interval(&self) -> Duration {
        self.network_timeout.saturating_mul(2)
    }

    /// Next interval given the previous one: doubles, capped at
    /// `long_op_dump_timeout_limit`.
    pub fn next_dump_interval(&self, previous: Duration) -> Duration {
        previous.saturating_mul(2).min(self.long_op_dump_timeout_limit)
    }
}

/// `serde` helper: (de)serialize a `Duration` as milliseconds, since
/// `Duration`'s default serde representation is a struct and configs are
/// meant to be hand-editable JSON/YAML/TOML.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_timeouts() {
        let cfg = ExchangeConfig::default();
        assert_eq!(cfg.initial_dump_interval(), Duration::from_secs(10));
        assert!(!cfg.thread_dump_on_exchange_timeout);
    }

    #[test]
    fn dump_interval_doubles_then_caps() {
        let cfg = ExchangeConfig {
            long_op_dump_timeout_limit: Duration::from_secs(20),
            ..ExchangeConfig::default()
        };
        let first = cfg.initial_dump_interval();
        let second = cfg.next_dump_interval(first);
        let third = cfg.next_dump_interval(second);
        assert_eq!(second, first * 2);
        assert_eq!(third, Duration::from_secs(20));
    }

    #[test]
    fn roundtrips_through_json() {
        let cfg = ExchangeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ExchangeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.network_timeout, back.network_timeout);
    }
}
