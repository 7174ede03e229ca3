//! Node RPC gateway.
//!
//! Defines the `NodeRpc` trait, one method per consumed node call, and
//! the wire types shared by the live client and the test doubles. The
//! gateway carries no business logic: it issues named requests with
//! positional parameters and hands back parsed results or a typed failure.

pub mod credentials;
pub mod verusd;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Messages a node uses to reject a take-offer whose target was already
/// consumed or expired. Matched case-insensitively; anything else is a
/// fatal rejection.
const OFFER_GONE_MARKERS: &[&str] = &[
    "already taken",
    "not found",
    "no longer",
    "unavailable",
    "expired",
    "spent",
];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures crossing the RPC boundary.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Connection-level failure: refused, timed out, interrupted.
    #[error("RPC transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The node answered with an error object.
    #[error("Node error {code}: {message}")]
    Node { code: i64, message: String },

    /// The response was not a well-formed JSON-RPC envelope.
    #[error("RPC protocol error: {0}")]
    Protocol(String),

    /// A result arrived but did not match the expected shape.
    #[error("Failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl RpcError {
    /// Whether a take-offer rejection means the offer was consumed by a
    /// concurrent buyer. That is the one benign rejection the purchase
    /// loop absorbs by re-selecting.
    pub fn is_offer_gone(&self) -> bool {
        match self {
            RpcError::Node { message, .. } => {
                let lower = message.to_lowercase();
                OFFER_GONE_MARKERS.iter().any(|m| lower.contains(m))
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types: marketplace offers
// ---------------------------------------------------------------------------

/// One entry of the marketplace offer listing. The listing nests the
/// sellable object two levels deep: the outer `offer` is the on-chain
/// offer transaction, its inner `offer` describes the identity for sale.
#[derive(Debug, Clone, Deserialize)]
pub struct OfferEntry {
    /// Identity address the offer delivers; echoed back in the accept leg.
    #[serde(default)]
    pub identityid: String,
    pub offer: OfferBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfferBody {
    /// Txid of the offer transaction, the take-offer target.
    pub txid: String,
    pub offer: OfferTerms,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfferTerms {
    /// Name of the identity being sold, e.g. `3906000_4of32`.
    #[serde(default)]
    pub name: String,
}

// ---------------------------------------------------------------------------
// Wire types: identities
// ---------------------------------------------------------------------------

/// Envelope shared by `getidentity` and `listidentities` results.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityEnvelope {
    pub identity: IdentityDetails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityDetails {
    #[serde(default)]
    pub name: String,
    /// Parent currency (i-address form) the identity is registered under.
    #[serde(default)]
    pub parent: String,
    #[serde(default)]
    pub primaryaddresses: Vec<String>,
    /// Free-form structured metadata; the lottery ledger publishes draw
    /// parameters in here as a nested JSON payload.
    #[serde(default)]
    pub contentmultimap: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Wire types: conversion
// ---------------------------------------------------------------------------

/// One converter returned by the exact-output rate query.
#[derive(Debug, Clone, Deserialize)]
pub struct ConverterRoute {
    /// Converter currency name, used as the `via` leg when it differs
    /// from the target currency.
    #[serde(default)]
    pub fullyqualifiedname: String,
    /// Source currency -> amount required to produce the queried output.
    #[serde(default)]
    pub sourceamounts: HashMap<String, Decimal>,
}

/// Single output of a `sendcurrency` submission.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    pub address: String,
    pub amount: Decimal,
    pub currency: String,
    pub convertto: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
}

/// Status of an async wallet operation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationStatus {
    /// "queued" | "executing" | "success" | "failed".
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub result: Option<OperationResult>,
    #[serde(default)]
    pub error: Option<OperationFailure>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationResult {
    #[serde(default)]
    pub txid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationFailure {
    #[serde(default)]
    pub message: String,
}

// ---------------------------------------------------------------------------
// Wire types: take-offer
// ---------------------------------------------------------------------------

/// Body of a take-offer submission: what we deliver (ticket-currency
/// payment) and what we accept (the ticket identity, re-keyed to us).
#[derive(Debug, Clone, Serialize)]
pub struct TakeOfferRequest {
    /// Offer transaction being taken.
    pub txid: String,
    pub changeaddress: String,
    pub deliver: DeliverLeg,
    pub accept: AcceptLeg,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliverLeg {
    pub currency: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcceptLeg {
    /// Identity name with the `@` suffix, e.g. `3906000_4of32@`.
    pub name: String,
    pub parent: String,
    pub primaryaddresses: Vec<String>,
    pub minimumsignatures: u32,
    pub identityid: String,
}

// ---------------------------------------------------------------------------
// The gateway trait
// ---------------------------------------------------------------------------

/// Abstraction over the local node's JSON-RPC interface.
///
/// The live implementation is [`verusd::VerusdClient`]; tests supply
/// scripted doubles. Implementors do not retry; bounded-retry policy for
/// transient failures lives with the callers in `poll`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Current chain height.
    async fn chain_height(&self) -> Result<u64, RpcError>;

    /// Open marketplace offers for a currency's identities.
    async fn market_offers(&self, currency: &str) -> Result<Vec<OfferEntry>, RpcError>;

    /// Look up a single identity by name (e.g. `ledger.vlotto@`).
    async fn identity(&self, name: &str) -> Result<IdentityEnvelope, RpcError>;

    /// All identities controlled by the wallet.
    async fn wallet_identities(&self) -> Result<Vec<IdentityEnvelope>, RpcError>;

    /// Wallet addresses with their base-currency balances.
    async fn address_groupings(&self) -> Result<Vec<(String, Decimal)>, RpcError>;

    /// Per-currency balances held by one address.
    async fn currency_balances(&self, address: &str)
        -> Result<HashMap<String, Decimal>, RpcError>;

    /// Quote converters able to produce exactly `amount` of `to` from `from`.
    async fn conversion_routes(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
    ) -> Result<Vec<ConverterRoute>, RpcError>;

    /// Submit a conversion. Returns a sync txid or an async `opid-…` id.
    async fn send_currency(
        &self,
        from: &str,
        output: &ConversionOutput,
    ) -> Result<String, RpcError>;

    /// Status of an async wallet operation; `None` when the node does not
    /// report on the opid yet.
    async fn operation_status(&self, opid: &str) -> Result<Option<OperationStatus>, RpcError>;

    /// Confirmation count for a transaction; `None` while the wallet does
    /// not know the transaction yet (propagation delay), `-1` once orphaned.
    async fn transaction_confirmations(&self, txid: &str) -> Result<Option<i64>, RpcError>;

    /// Take a marketplace offer. Returns the txid of the purchase
    /// transaction the node broadcast.
    async fn take_offer(
        &self,
        from: &str,
        request: &TakeOfferRequest,
    ) -> Result<String, RpcError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
