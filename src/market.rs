//! Market reader: active draw state and the open offer book.
//!
//! Pulls the chain height, the marketplace offer listing, and the lottery
//! ledger identity's published parameters, and assembles them into a
//! `DrawState`. Every offer name must parse as a ticket id; a malformed
//! name means the marketplace format drifted, so parsing failures are
//! fatal here rather than silently skipped.

use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::poll::with_retries;
use crate::rpc::{IdentityEnvelope, NodeRpc};
use crate::types::{BuyerError, DrawPhase, DrawState, Offer, TicketId};

// ---------------------------------------------------------------------------
// Draw state
// ---------------------------------------------------------------------------

/// Read the active draw: chain height, ledger parameters, and the offers
/// belonging to the ledger's draw block.
pub async fn read_draw_state(rpc: &dyn NodeRpc, cfg: &AppConfig) -> Result<DrawState, BuyerError> {
    let retry = cfg.timing.rpc_retry();
    let current_block = with_retries(&retry, "getinfo", || rpc.chain_height()).await?;

    let ledger = rpc.identity(&cfg.lottery.ledger_identity).await?;
    let params = ledger_draw_params(&ledger)?;

    let all_offers = open_offers(rpc, cfg).await?;
    let total_listed = all_offers.len();
    let offered: Vec<Offer> = all_offers
        .into_iter()
        .filter(|o| o.ticket.draw_block == params.draw_block)
        .collect();

    if offered.len() < total_listed {
        debug!(
            draw_block = params.draw_block,
            dropped = total_listed - offered.len(),
            "ignoring offers for other draws"
        );
    }

    let state = DrawState {
        draw_block: params.draw_block,
        current_block,
        total_tickets: params.total_tickets,
        offered,
        required_matches: params.required_matches,
        jackpot: params.jackpot,
        phase: params.phase,
    };

    info!(draw = %state, "draw state read");
    Ok(state)
}

/// Fetch the full marketplace offer book, parsed and sorted by ticket id.
///
/// Fresh on every call: the purchase loop must never reuse offers from a
/// prior refresh, other buyers consume them in real time.
pub async fn open_offers(rpc: &dyn NodeRpc, cfg: &AppConfig) -> Result<Vec<Offer>, BuyerError> {
    let entries = rpc.market_offers(&cfg.lottery.currency_name).await?;

    let mut offers = Vec::with_capacity(entries.len());
    for entry in entries {
        let ticket = TicketId::parse(&entry.offer.offer.name)?;
        if entry.identityid.is_empty() {
            return Err(BuyerError::DataUnavailable(format!(
                "offer {} for {} carries no identity id",
                entry.offer.txid, ticket
            )));
        }
        offers.push(Offer {
            txid: entry.offer.txid,
            ticket,
            identity_id: entry.identityid,
            price: cfg.buy.ticket_price,
        });
    }

    offers.sort_by(|a, b| a.ticket.cmp(&b.ticket));
    Ok(offers)
}

// ---------------------------------------------------------------------------
// Ledger identity parsing
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LedgerParams {
    draw_block: u64,
    total_tickets: u32,
    required_matches: u32,
    jackpot: Decimal,
    phase: DrawPhase,
}

/// Extract the draw parameters the ledger identity publishes in its
/// content multimap. The payload sits in a nested `objectdata.message`
/// string holding JSON. Any missing field is `DataUnavailable`: it means
/// the published format changed or the draw is not published yet.
fn ledger_draw_params(envelope: &IdentityEnvelope) -> Result<LedgerParams, BuyerError> {
    let message = find_ledger_message(&envelope.identity.contentmultimap).ok_or_else(|| {
        BuyerError::DataUnavailable(format!(
            "identity {:?} carries no lottery payload in its content multimap",
            envelope.identity.name
        ))
    })?;

    let data: Value = serde_json::from_str(&message).map_err(|e| {
        BuyerError::DataUnavailable(format!("lottery payload is not valid JSON: {e}"))
    })?;

    let draw_block = data
        .pointer("/lotteryParameters/drawingBlock")
        .and_then(Value::as_u64)
        .ok_or_else(|| missing("lotteryParameters.drawingBlock"))?;

    let required_matches = data
        .pointer("/lotteryParameters/requiredMatches")
        .and_then(Value::as_u64)
        .ok_or_else(|| missing("lotteryParameters.requiredMatches"))?
        as u32;

    let jackpot = data
        .pointer("/financialSummary/jackpotCurrent")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .ok_or_else(|| missing("financialSummary.jackpotCurrent"))?;

    let total_tickets = data
        .pointer("/ticketSummary/planned")
        .and_then(Value::as_u64)
        .ok_or_else(|| missing("ticketSummary.planned"))? as u32;

    let phase = data
        .get("currentPhase")
        .and_then(Value::as_str)
        .map(DrawPhase::parse)
        .ok_or_else(|| missing("currentPhase"))?;

    Ok(LedgerParams {
        draw_block,
        total_tickets,
        required_matches,
        jackpot,
        phase,
    })
}

fn missing(field: &str) -> BuyerError {
    BuyerError::DataUnavailable(format!("lottery payload missing {field}"))
}

/// Walk the content multimap looking for the first `objectdata.message`
/// value that holds a JSON document. The multimap nests two levels of
/// opaque keys before the data record.
fn find_ledger_message(multimap: &Value) -> Option<String> {
    let buckets = multimap.as_object()?;
    for bucket in buckets.values() {
        let Value::Array(entries) = bucket else { continue };
        for entry in entries {
            let Some(inner) = entry.as_object() else { continue };
            for record in inner.values() {
                let message = record
                    .get("objectdata")
                    .and_then(|o| o.get("message"))
                    .and_then(Value::as_str);
                if let Some(message) = message {
                    if message.starts_with('{') {
                        return Some(message.to_string());
                    }
                }
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
