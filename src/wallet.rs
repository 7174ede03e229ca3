//! Wallet views: funding addresses, per-currency balances, owned tickets.
//!
//! The node's wallet is the source of truth for what this buyer holds.
//! Balances are read per transparent address so the purchase flow can pick
//! one funding address and track its ticket-currency balance through a
//! conversion.

use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::config::AppConfig;
use crate::rpc::NodeRpc;
use crate::types::{BuyerError, FundingAddress, TicketId};

// ---------------------------------------------------------------------------
// Funding addresses
// ---------------------------------------------------------------------------

/// List transparent addresses able to fund a purchase, richest first.
///
/// Dust-balance addresses are dropped: they cannot cover a ticket and only
/// clutter the listing.
pub async fn list_funding_addresses(
    rpc: &dyn NodeRpc,
    cfg: &AppConfig,
) -> Result<Vec<FundingAddress>, BuyerError> {
    let groupings = rpc.address_groupings().await?;

    let mut seen = HashSet::new();
    let mut addresses = Vec::new();
    for (address, base_balance) in groupings {
        if base_balance < cfg.buy.dust_threshold {
            continue;
        }
        if !seen.insert(address.clone()) {
            continue;
        }
        let balances = rpc.currency_balances(&address).await?;
        let ticket_balance = currency_amount(&balances, &cfg.lottery.currency_name);
        addresses.push(FundingAddress {
            address,
            base_balance,
            ticket_balance,
        });
    }

    addresses.sort_by(|a, b| b.base_balance.cmp(&a.base_balance));
    debug!(count = addresses.len(), "funding addresses listed");
    Ok(addresses)
}

/// Current ticket-currency balance of one address.
pub async fn ticket_balance(
    rpc: &dyn NodeRpc,
    cfg: &AppConfig,
    address: &str,
) -> Result<Decimal, BuyerError> {
    let balances = rpc.currency_balances(address).await?;
    Ok(currency_amount(&balances, &cfg.lottery.currency_name))
}

/// Look up a currency in a balance map. The node keys balances by currency
/// name with inconsistent casing across calls, so fall back to a
/// case-insensitive scan before reporting zero.
pub fn currency_amount(balances: &HashMap<String, Decimal>, currency: &str) -> Decimal {
    if let Some(amount) = balances.get(currency) {
        return *amount;
    }
    balances
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(currency))
        .map(|(_, amount)| *amount)
        .unwrap_or(Decimal::ZERO)
}

// ---------------------------------------------------------------------------
// Owned tickets
// ---------------------------------------------------------------------------

/// Tickets already held in this wallet, oldest draw first.
///
/// Wallet identities under the lottery parent whose names do not parse as
/// ticket ids are skipped, not fatal: the wallet may hold unrelated
/// identities under the same parent.
pub async fn owned_tickets(
    rpc: &dyn NodeRpc,
    cfg: &AppConfig,
    address: Option<&str>,
) -> Result<Vec<TicketId>, BuyerError> {
    let identities = rpc.wallet_identities().await?;

    let mut tickets = Vec::new();
    for envelope in identities {
        let identity = &envelope.identity;
        if identity.parent != cfg.lottery.currency_id {
            continue;
        }
        if let Some(address) = address {
            if !identity.primaryaddresses.iter().any(|a| a == address) {
                continue;
            }
        }
        match TicketId::parse(&identity.name) {
            Ok(ticket) => tickets.push(ticket),
            Err(_) => {
                debug!(name = %identity.name, "non-ticket identity under lottery parent");
            }
        }
    }

    tickets.sort();
    Ok(tickets)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
