//! Conversion orchestrator: tops up ticket-currency balance before buying.
//!
//! Sizes an exact-out conversion off the cheapest converter quote plus a
//! slippage buffer, submits it once, then drives three bounded waits in
//! order: the async wallet operation (when the node hands back an opid),
//! the transaction confirmation, and the balance actually reflecting the
//! converted funds. Each wait has its own poll interval and budget; a
//! spent budget surfaces as a typed timeout, never a hang.

use rust_decimal::Decimal;
use std::fmt;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::poll::{wait_for_confirmations, with_retries};
use crate::rpc::{ConversionOutput, ConverterRoute, NodeRpc};
use crate::types::{BuyerError, OperationId, OperationKind, PendingOperation};
use crate::wallet;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// How a funding pass ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionOutcome {
    /// The balance already covers the requested tickets.
    AlreadyFunded { balance: Decimal },
    /// Dry run: the conversion that would have been submitted.
    Planned {
        base_amount: Decimal,
        via: Option<String>,
    },
    /// Conversion submitted, confirmed, and visible in the balance.
    Converted {
        txid: String,
        base_amount: Decimal,
        confirmations: i64,
    },
}

impl fmt::Display for ConversionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionOutcome::AlreadyFunded { balance } => {
                write!(f, "already funded (balance {balance})")
            }
            ConversionOutcome::Planned { base_amount, via } => match via {
                Some(via) => write!(f, "planned conversion of {base_amount} via {via}"),
                None => write!(f, "planned conversion of {base_amount}"),
            },
            ConversionOutcome::Converted {
                txid,
                base_amount,
                confirmations,
            } => write!(
                f,
                "converted {base_amount} in tx {txid} ({confirmations} confirmations)"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

pub struct Converter<'a> {
    rpc: &'a dyn NodeRpc,
    cfg: &'a AppConfig,
    dry_run: bool,
}

impl<'a> Converter<'a> {
    pub fn new(rpc: &'a dyn NodeRpc, cfg: &'a AppConfig, dry_run: bool) -> Self {
        Self { rpc, cfg, dry_run }
    }

    /// Make sure `address` holds enough ticket currency for `quantity`
    /// tickets, converting from the base currency when short.
    ///
    /// A balance exactly equal to the requirement counts as funded. The
    /// conversion submission itself is never retried: a duplicate send
    /// would spend twice.
    pub async fn ensure_ticket_balance(
        &self,
        address: &str,
        quantity: u32,
    ) -> Result<ConversionOutcome, BuyerError> {
        if quantity == 0 {
            return Ok(ConversionOutcome::AlreadyFunded {
                balance: Decimal::ZERO,
            });
        }

        let needed = self.cfg.buy.ticket_price * Decimal::from(quantity);
        let balance = wallet::ticket_balance(self.rpc, self.cfg, address).await?;
        if balance >= needed {
            info!(%balance, %needed, "ticket balance already covers the purchase");
            return Ok(ConversionOutcome::AlreadyFunded { balance });
        }

        let shortfall = needed - balance;
        let (cost, via) = self.best_route(shortfall).await?;
        // The multiply inflates the scale; normalize strips the trailing
        // zeros before the amount hits logs and the wire.
        let base_amount = (cost * (Decimal::ONE + self.cfg.buy.conversion_buffer))
            .round_dp(8)
            .normalize();
        info!(
            %shortfall,
            %cost,
            %base_amount,
            via = via.as_deref().unwrap_or("direct"),
            "conversion sized"
        );

        if self.dry_run {
            info!(
                "[DRY RUN] Would convert {} {} to {}",
                base_amount, self.cfg.lottery.base_currency, self.cfg.lottery.currency_name
            );
            return Ok(ConversionOutcome::Planned { base_amount, via });
        }

        let output = ConversionOutput {
            address: address.to_string(),
            amount: base_amount,
            currency: self.cfg.lottery.base_currency.clone(),
            convertto: self.cfg.lottery.currency_name.clone(),
            via,
        };
        let submission = self.rpc.send_currency(address, &output).await?;
        let id = OperationId::from_submission(&submission);

        let retry = self.cfg.timing.rpc_retry();
        let submitted_at_block =
            with_retries(&retry, "getinfo", || self.rpc.chain_height()).await?;
        let pending = PendingOperation {
            kind: OperationKind::Conversion,
            id: id.clone(),
            submitted_at_block,
            required_confirmations: self.cfg.buy.min_confirmations,
        };
        info!(pending = %pending, "conversion submitted");

        let txid = match id {
            OperationId::Transaction(txid) => txid,
            OperationId::Operation(opid) => self.wait_operation(&opid).await?,
        };

        let confirmations = wait_for_confirmations(
            self.rpc,
            &txid,
            self.cfg.buy.min_confirmations,
            self.cfg.timing.confirm_poll_interval(),
            self.cfg.timing.confirm_poll_attempts,
            &retry,
        )
        .await?
        .ok_or_else(|| BuyerError::ConversionTimedOut {
            stage: "confirmation".to_string(),
        })?;

        self.wait_balance(address, needed).await?;
        Ok(ConversionOutcome::Converted {
            txid,
            base_amount: output.amount,
            confirmations,
        })
    }

    /// Quote the cheapest converter for `amount` of the ticket currency.
    /// Returns the base-currency cost and the `via` leg; `None` when the
    /// best converter is the target currency itself.
    async fn best_route(&self, amount: Decimal) -> Result<(Decimal, Option<String>), BuyerError> {
        let from = &self.cfg.lottery.base_currency;
        let to = &self.cfg.lottery.currency_name;
        let retry = self.cfg.timing.rpc_retry();
        let routes = with_retries(&retry, "getcurrencyconverters", || {
            self.rpc.conversion_routes(from, to, amount)
        })
        .await?;

        let mut best: Option<(Decimal, Option<String>)> = None;
        for route in &routes {
            let Some(cost) = route_cost(route, from) else {
                continue;
            };
            if cost <= Decimal::ZERO {
                continue;
            }
            let via = if route.fullyqualifiedname.eq_ignore_ascii_case(to) {
                None
            } else {
                Some(route.fullyqualifiedname.clone())
            };
            debug!(converter = %route.fullyqualifiedname, %cost, "conversion route quoted");
            match &best {
                Some((cheapest, _)) if *cheapest <= cost => {}
                _ => best = Some((cost, via)),
            }
        }

        best.ok_or_else(|| BuyerError::QuoteUnavailable {
            from: from.clone(),
            to: to.clone(),
        })
    }

    /// Poll an async operation id until the node reports a transaction.
    async fn wait_operation(&self, opid: &str) -> Result<String, BuyerError> {
        let retry = self.cfg.timing.rpc_retry();
        for poll in 0..self.cfg.timing.status_poll_attempts {
            let status = with_retries(&retry, "z_getoperationstatus", || {
                self.rpc.operation_status(opid)
            })
            .await?;

            match status {
                Some(status) if status.status == "success" => {
                    let txid = status
                        .result
                        .map(|r| r.txid)
                        .filter(|txid| !txid.is_empty())
                        .ok_or_else(|| {
                            BuyerError::ConversionFailed(
                                "operation reported success without a txid".to_string(),
                            )
                        })?;
                    info!(opid, txid, "conversion operation completed");
                    return Ok(txid);
                }
                Some(status) if status.status == "failed" => {
                    let message = status
                        .error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "unspecified operation failure".to_string());
                    return Err(BuyerError::ConversionFailed(message));
                }
                Some(status) => {
                    debug!(opid, status = %status.status, poll, "operation still running");
                }
                None => debug!(opid, poll, "operation not yet visible"),
            }
            sleep(self.cfg.timing.status_poll_interval()).await;
        }
        Err(BuyerError::ConversionTimedOut {
            stage: "operation status".to_string(),
        })
    }

    /// Converted funds land in the balance a block or two after the
    /// conversion confirms. Poll until the requirement is met.
    async fn wait_balance(&self, address: &str, needed: Decimal) -> Result<Decimal, BuyerError> {
        let retry = self.cfg.timing.rpc_retry();
        let attempts = self.cfg.timing.balance_poll_attempts;
        for poll in 0..attempts {
            let balances = with_retries(&retry, "getcurrencybalance", || {
                self.rpc.currency_balances(address)
            })
            .await?;
            let balance = wallet::currency_amount(&balances, &self.cfg.lottery.currency_name);
            if balance >= needed {
                info!(%balance, "converted balance settled");
                return Ok(balance);
            }
            debug!(%balance, %needed, poll, "waiting for converted balance");
            sleep(self.cfg.timing.balance_poll_interval()).await;
        }
        Err(BuyerError::BalanceNotUpdated { polls: attempts })
    }
}

/// Base-currency amount a route charges, if it quotes the base currency.
fn route_cost(route: &ConverterRoute, from: &str) -> Option<Decimal> {
    if let Some(cost) = route.sourceamounts.get(from) {
        return Some(*cost);
    }
    route
        .sourceamounts
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(from))
        .map(|(_, cost)| *cost)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
