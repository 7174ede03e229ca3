//! Bounded waiting primitives.
//!
//! Every wait in the system is "check, sleep, re-check" with a hard bound:
//! a retry policy for transient RPC failures during reads, and the shared
//! confirmation wait used by both the conversion and purchase paths. No
//! loop here runs forever.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::rpc::{NodeRpc, RpcError};
use crate::types::BuyerError;

/// Fixed-delay retry bound for transient RPC failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first failure; total tries = retries + 1.
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }
}

/// Run an RPC read, retrying transient failures under the policy. The
/// last error escalates once the budget is spent. Submissions must NOT go
/// through this: resubmitting a conversion or take-offer risks spending
/// twice.
pub async fn with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.retries => {
                attempt += 1;
                warn!(what, attempt, error = %e, "transient RPC failure, retrying");
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Poll a transaction until it reaches `required` confirmations.
///
/// Returns `Ok(Some(count))` once confirmed, `Ok(None)` when `max_polls`
/// checks pass without reaching the threshold (the caller picks its own
/// timeout error), and errors out immediately when the transaction is
/// orphaned. A transaction the wallet does not know yet counts as zero
/// confirmations; right after broadcast that is the normal case.
pub async fn wait_for_confirmations(
    rpc: &dyn NodeRpc,
    txid: &str,
    required: u32,
    interval: Duration,
    max_polls: u32,
    retry: &RetryPolicy,
) -> Result<Option<i64>, BuyerError> {
    for poll in 0..max_polls {
        let confirmations =
            with_retries(retry, "gettransaction", || rpc.transaction_confirmations(txid))
                .await?
                .unwrap_or(0);

        if confirmations == -1 {
            return Err(BuyerError::TransactionOrphaned {
                txid: txid.to_string(),
            });
        }
        if confirmations >= i64::from(required) {
            return Ok(Some(confirmations));
        }

        debug!(txid, confirmations, required, poll, "waiting for confirmations");
        tokio::time::sleep(interval).await;
    }
    Ok(None)
}
