//! Quiesce waiter (§4.3).
//!
//! Waits for a release future (partition-release or lock-release) to
//! complete, dumping diagnostics on exponentially-spaced timeouts
//! without ever giving up — the design choice is unbounded wait with
//! observability, because abandoning the wait risks diverging
//! ownership across the cluster.

use std::future::Future;

use pxproto_core::ExchangeConfig;
use tokio::time::timeout;
use tracing::warn;

/// What was dumped the last time this wait timed out, kept around for
/// callers that want to surface it (logs, tests, the CLI demo).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuiesceDiagnostics {
    pub timeouts_hit: u32,
    pub pending_transactions: Vec<String>,
    pub locked_keys: Vec<String>,
}

/// Poll `release` to completion, dumping diagnostics from `dump` every
/// time the current interval elapses and doubling the interval (capped
/// by `config.long_op_dump_timeout_limit`) for the next round.
pub async fn quiesce<F>(
    release: F,
    config: &ExchangeConfig,
    mut dump: impl FnMut() -> (Vec<String>, Vec<String>),
) -> QuiesceDiagnostics
where
    F: Future<Output = ()>,
{
    tokio::pin!(release);
    let mut interval = config.initial_dump_interval();
    let mut diagnostics = QuiesceDiagnostics::default();

    loop {
        match timeout(interval, &mut release).await {
            Ok(()) => return diagnostics,
            Err(_) => {
                diagnostics.timeouts_hit += 1;
                let (pending_transactions, locked_keys) = dump();
                warn!(
                    timeouts = diagnostics.timeouts_hit,
                    pending = pending_transactions.len(),
                    locked = locked_keys.len(),
                    "quiesce wait timed out, continuing to wait"
                );
                diagnostics.pending_transactions = pending_transactions;
                diagnostics.locked_keys = locked_keys;
                interval = config.next_dump_interval(interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast_config() -> ExchangeConfig {
        ExchangeConfig { network_timeout: Duration::from_millis(5), ..Default::default() }
    }

    #[tokio::test]
    async fn returns_immediately_when_already_ready() {
        let diagnostics = quiesce(async {}, &fast_config(), || (Vec::new(), Vec::new())).await;
        assert_eq!(diagnostics.timeouts_hit, 0);
    }

    #[tokio::test]
    async fn dumps_diagnostics_on_slow_release() {
        let release = tokio::time::sleep(Duration::from_millis(40));
        let diagnostics = quiesce(release, &fast_config(), || {
            (vec!["tx-1".to_string()], vec!["key-1".to_string()])
        })
        .await;

        assert!(diagnostics.timeouts_hit >= 1);
        assert_eq!(diagnostics.pending_transactions, vec!["tx-1".to_string()]);
    }
}
