//! Shared types for the vLotto ticket buyer.
//!
//! These types form the data model used across all modules: ticket and
//! offer identities coming off the marketplace, draw metadata published
//! by the lottery ledger identity, and the run-level purchase records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::rpc::RpcError;

// ---------------------------------------------------------------------------
// Ticket identity
// ---------------------------------------------------------------------------

/// A lottery ticket identity, encoded on-chain as `{drawBlock}_{index}of{total}`
/// (e.g. `3906000_32of32`).
///
/// Ticket ids are never constructed from scratch; they are parsed from
/// marketplace offer names and wallet identity names. Ordering is by
/// `(draw_block, index)`, which is also the offer-selection order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TicketId {
    pub draw_block: u64,
    pub index: u32,
    pub total: u32,
}

impl TicketId {
    /// Parse a ticket name like `3906000_32of32`.
    pub fn parse(name: &str) -> Result<Self, BuyerError> {
        let unparseable = || BuyerError::Unparseable {
            name: name.to_string(),
        };

        let (block_part, rest) = name.split_once('_').ok_or_else(unparseable)?;
        let (index_part, total_part) = rest.split_once("of").ok_or_else(unparseable)?;

        let draw_block: u64 = block_part.parse().map_err(|_| unparseable())?;
        let index: u32 = index_part.parse().map_err(|_| unparseable())?;
        let total: u32 = total_part.parse().map_err(|_| unparseable())?;

        Ok(TicketId {
            draw_block,
            index,
            total,
        })
    }

    /// The canonical on-chain name, without the `@` identity suffix.
    pub fn name(&self) -> String {
        format!("{}_{}of{}", self.draw_block, self.index, self.total)
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}of{}", self.draw_block, self.index, self.total)
    }
}

// ---------------------------------------------------------------------------
// Marketplace offer
// ---------------------------------------------------------------------------

/// A marketplace listing selling one ticket identity.
///
/// Offers are ephemeral: another buyer may consume one between a refresh
/// and our take attempt. A gone offer is never retried against the same
/// txid within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    /// Txid of the offer transaction itself (the take target).
    pub txid: String,
    pub ticket: TicketId,
    /// Identity address delivered by the offer, echoed back in the accept leg.
    pub identity_id: String,
    /// Price in the ticket currency.
    pub price: Decimal,
}

impl fmt::Display for Offer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {} ({})", self.ticket, self.price, self.txid)
    }
}

// ---------------------------------------------------------------------------
// Draw state
// ---------------------------------------------------------------------------

/// Lifecycle phase published by the lottery ledger identity.
///
/// Phase strings on chain look like `phase1_ticket_sales`; parsing is
/// lenient because the phase is informational. A missing phase field is
/// a `DataUnavailable` condition, an unknown value is not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawPhase {
    TicketSales,
    Drawing,
    Payout,
    Complete,
    Other(String),
}

impl DrawPhase {
    pub fn parse(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        if lower.contains("sale") || lower.contains("sell") {
            DrawPhase::TicketSales
        } else if lower.contains("draw") {
            DrawPhase::Drawing
        } else if lower.contains("payout") || lower.contains("payment") {
            DrawPhase::Payout
        } else if lower.contains("complete") || lower.contains("closed") {
            DrawPhase::Complete
        } else {
            DrawPhase::Other(raw.to_string())
        }
    }
}

impl fmt::Display for DrawPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrawPhase::TicketSales => write!(f, "ticket sales"),
            DrawPhase::Drawing => write!(f, "drawing"),
            DrawPhase::Payout => write!(f, "payout"),
            DrawPhase::Complete => write!(f, "complete"),
            DrawPhase::Other(raw) => {
                write!(f, "{}", raw.replace('_', " ").replace("phase", "Phase "))
            }
        }
    }
}

/// Snapshot of the active draw: chain height, ledger parameters and the
/// open offer book. Recomputed on every read, never persisted.
///
/// Invariant: every offer in `offered` belongs to `draw_block`.
#[derive(Debug, Clone)]
pub struct DrawState {
    pub draw_block: u64,
    pub current_block: u64,
    pub total_tickets: u32,
    pub offered: Vec<Offer>,
    pub required_matches: u32,
    pub jackpot: Decimal,
    pub phase: DrawPhase,
}

impl DrawState {
    /// Blocks left until the draw. Negative once the draw block has passed.
    pub fn blocks_until_draw(&self) -> i64 {
        self.draw_block as i64 - self.current_block as i64
    }

    /// Rough wall-clock estimate until the draw, at ~1 block per minute.
    pub fn estimated_time_to_draw(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.blocks_until_draw().max(0))
    }
}

impl fmt::Display for DrawState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "draw {} (height {}, {} offered of {}, {} matches to win, jackpot {}, {})",
            self.draw_block,
            self.current_block,
            self.offered.len(),
            self.total_tickets,
            self.required_matches,
            self.jackpot,
            self.phase,
        )
    }
}

// ---------------------------------------------------------------------------
// Funding addresses
// ---------------------------------------------------------------------------

/// A wallet address holding funds usable for purchases.
///
/// Balances are stale the instant they are fetched; callers re-read before
/// any decision that depends on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingAddress {
    pub address: String,
    /// Base-currency balance (the conversion source).
    pub base_balance: Decimal,
    /// Ticket-currency balance (what purchases actually spend).
    pub ticket_balance: Decimal,
}

impl FundingAddress {
    /// Whole tickets this address could cover with base and ticket
    /// balances combined, pricing the base currency at par. `None` when
    /// the price is not positive.
    pub fn tickets_affordable(&self, ticket_price: Decimal) -> Option<Decimal> {
        if ticket_price <= Decimal::ZERO {
            return None;
        }
        Some(((self.ticket_balance + self.base_balance) / ticket_price).floor())
    }
}

impl fmt::Display for FundingAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (base: {}, tickets: {})",
            self.address, self.base_balance, self.ticket_balance
        )
    }
}

// ---------------------------------------------------------------------------
// Pending operations
// ---------------------------------------------------------------------------

/// What a pending node-side operation was submitted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Conversion,
    Purchase,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Conversion => write!(f, "conversion"),
            OperationKind::Purchase => write!(f, "purchase"),
        }
    }
}

/// Identifier returned by a submission: either a broadcast transaction id,
/// or an async wallet operation id that must be polled to a txid first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationId {
    Transaction(String),
    Operation(String),
}

impl OperationId {
    /// Classify a raw submission result. Async operation ids carry an
    /// `opid-` prefix; anything else is a transaction id.
    pub fn from_submission(raw: &str) -> Self {
        if raw.starts_with("opid-") {
            OperationId::Operation(raw.to_string())
        } else {
            OperationId::Transaction(raw.to_string())
        }
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationId::Transaction(txid) => write!(f, "tx {txid}"),
            OperationId::Operation(opid) => write!(f, "op {opid}"),
        }
    }
}

/// A submitted-but-unconfirmed node operation. Created on submission,
/// dropped once terminal, and owned exclusively by the orchestrator that
/// submitted it. The purchase engine holds at most one of these at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation {
    pub kind: OperationKind,
    pub id: OperationId,
    pub submitted_at_block: u64,
    pub required_confirmations: u32,
}

impl fmt::Display for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (submitted at {}, needs {} confirmations)",
            self.kind, self.id, self.submitted_at_block, self.required_confirmations
        )
    }
}

// ---------------------------------------------------------------------------
// Purchase results
// ---------------------------------------------------------------------------

/// One confirmed ticket purchase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseResult {
    pub ticket: TicketId,
    pub txid: String,
    /// Chain height observed once the confirmation threshold was met.
    pub confirmed_at_block: u64,
}

impl fmt::Display for PurchaseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} via {} (confirmed at {})",
            self.ticket, self.txid, self.confirmed_at_block
        )
    }
}

/// How a purchase run ended.
#[derive(Debug)]
pub enum PurchaseOutcome {
    /// Every requested ticket was obtained (vacuously true for quantity 0).
    Complete,
    /// The run stopped short; already-confirmed tickets remain valid.
    Aborted(BuyerError),
}

impl PurchaseOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, PurchaseOutcome::Complete)
    }
}

/// Final output of a purchase run: the ordered results plus the outcome.
#[derive(Debug)]
pub struct PurchaseReport {
    pub requested: u32,
    pub results: Vec<PurchaseResult>,
    pub outcome: PurchaseOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PurchaseReport {
    pub fn purchased(&self) -> u32 {
        self.results.len() as u32
    }

    /// Tickets requested but not obtained.
    pub fn shortfall(&self) -> u32 {
        self.requested.saturating_sub(self.purchased())
    }

    /// Process exit code: 0 full success, 2 partial, 1 nothing obtained.
    pub fn exit_code(&self) -> i32 {
        if self.outcome.is_complete() {
            0
        } else if !self.results.is_empty() {
            2
        } else {
            1
        }
    }
}

impl fmt::Display for PurchaseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            PurchaseOutcome::Complete => {
                write!(f, "bought {}/{} tickets", self.purchased(), self.requested)
            }
            PurchaseOutcome::Aborted(reason) => write!(
                f,
                "bought {}/{} tickets, stopped: {}",
                self.purchased(),
                self.requested,
                reason
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Failure modes of a buyer run.
///
/// Everything here is fatal for the run except where the purchase loop
/// consumes it internally: an offer-gone rejection (detected on the
/// underlying [`RpcError`]) loops back to re-selection and never surfaces.
#[derive(Debug, thiserror::Error)]
pub enum BuyerError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Marketplace or ledger data missing or malformed. Non-retryable:
    /// it means the published format changed or the draw is unpublished.
    #[error("Marketplace data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Unparseable ticket name: {name:?}")]
    Unparseable { name: String },

    #[error("No usable conversion route quoted for {from} -> {to}")]
    QuoteUnavailable { from: String, to: String },

    #[error("Conversion failed on the node: {0}")]
    ConversionFailed(String),

    #[error("Conversion timed out waiting for {stage}")]
    ConversionTimedOut { stage: String },

    #[error("Balance did not reflect the conversion after {polls} polls")]
    BalanceNotUpdated { polls: u32 },

    #[error("Offer refresh budget exhausted after {rounds} rounds")]
    OffersExhausted { rounds: u32 },

    #[error("Purchase {txid} not confirmed after {polls} polls")]
    ConfirmationTimedOut { txid: String, polls: u32 },

    #[error("Transaction {txid} was orphaned")]
    TransactionOrphaned { txid: String },

    #[error("Interrupted before completion")]
    Interrupted,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
