//! Purchase engine: refresh, select, take, confirm, record.
//!
//! Drives the offer book one ticket at a time. Each round refreshes the
//! book, selects the lowest eligible ticket, submits a single take-offer
//! and waits for it to confirm before touching the book again. At most
//! one submission is ever in flight; the `pending` slot enforces that.
//!
//! An offer that the node rejects as gone (taken, spent, expired) is a
//! race lost to another buyer, not a failure: the engine re-selects from
//! a fresh refresh and never touches that offer txid again. Every other
//! submission error aborts the run with the tickets already obtained
//! left intact.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::market;
use crate::poll::{wait_for_confirmations, with_retries};
use crate::rpc::{AcceptLeg, DeliverLeg, NodeRpc, TakeOfferRequest};
use crate::types::{
    BuyerError, Offer, OperationId, OperationKind, PendingOperation, PurchaseOutcome,
    PurchaseReport, PurchaseResult, TicketId,
};

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct TicketBuyer<'a> {
    rpc: &'a dyn NodeRpc,
    cfg: &'a AppConfig,
    /// Funding address; pays, receives change, and becomes the primary
    /// address of every accepted ticket identity.
    address: String,
    /// Draw the run is locked to. Offers for any other draw are ignored.
    draw_block: u64,
    dry_run: bool,
    /// Set by the shutdown handler; checked between rounds.
    cancel: Arc<AtomicBool>,
    /// Offer txids already submitted against. An entry is permanent for
    /// the run, whether the take succeeded, failed, or vanished.
    attempted: HashSet<String>,
    /// Tickets held in the wallet plus those bought this run.
    owned: HashSet<TicketId>,
    /// The single in-flight submission. Occupied between take-offer and
    /// its confirmation, empty otherwise.
    pending: Option<PendingOperation>,
    results: Vec<PurchaseResult>,
    rounds_used: u32,
}

impl<'a> TicketBuyer<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rpc: &'a dyn NodeRpc,
        cfg: &'a AppConfig,
        address: String,
        draw_block: u64,
        owned: HashSet<TicketId>,
        dry_run: bool,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            rpc,
            cfg,
            address,
            draw_block,
            dry_run,
            cancel,
            attempted: HashSet::new(),
            owned,
            pending: None,
            results: Vec::new(),
            rounds_used: 0,
        }
    }

    /// Buy up to `quantity` tickets. Always returns a report: an abort
    /// keeps the purchases already confirmed.
    pub async fn run(&mut self, quantity: u32) -> PurchaseReport {
        let started_at = Utc::now();
        info!(
            quantity,
            draw_block = self.draw_block,
            address = %self.address,
            dry_run = self.dry_run,
            "purchase run starting"
        );

        let outcome = match self.buy_all(quantity).await {
            Ok(()) => PurchaseOutcome::Complete,
            Err(e) => {
                warn!(error = %e, "purchase run stopped early");
                PurchaseOutcome::Aborted(e)
            }
        };

        PurchaseReport {
            requested: quantity,
            results: std::mem::take(&mut self.results),
            outcome,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn buy_all(&mut self, quantity: u32) -> Result<(), BuyerError> {
        while self.results.len() < quantity as usize {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(BuyerError::Interrupted);
            }
            if self.rounds_used >= self.cfg.buy.max_rounds {
                return Err(BuyerError::OffersExhausted {
                    rounds: self.rounds_used,
                });
            }
            self.rounds_used += 1;

            // Always a fresh book. Offers from a previous round may have
            // been taken by other buyers in the meantime.
            let offers = market::open_offers(self.rpc, self.cfg).await?;
            let selected = offers
                .into_iter()
                .filter(|o| o.ticket.draw_block == self.draw_block)
                .filter(|o| !self.attempted.contains(&o.txid) && !self.owned.contains(&o.ticket))
                .min_by(|a, b| a.ticket.cmp(&b.ticket));

            let Some(offer) = selected else {
                debug!(
                    round = self.rounds_used,
                    bought = self.results.len(),
                    "no eligible offers this round"
                );
                sleep(self.cfg.timing.refresh_delay()).await;
                continue;
            };

            match self.take(&offer).await {
                Ok(()) => {}
                Err(BuyerError::Rpc(e)) if e.is_offer_gone() => {
                    debug!(offer = %offer, reason = %e, "offer gone, reselecting");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Submit one take-offer and drive it to a confirmed purchase.
    async fn take(&mut self, offer: &Offer) -> Result<(), BuyerError> {
        // One shot per offer txid. Marked before submission so an
        // ambiguous failure can never lead to a second take of the same
        // offer.
        self.attempted.insert(offer.txid.clone());
        debug_assert!(
            self.pending.is_none(),
            "take-offer submitted while another operation is pending"
        );

        let retry = self.cfg.timing.rpc_retry();

        if self.dry_run {
            info!(
                "[DRY RUN] Would take offer {} for ticket {}",
                offer.txid, offer.ticket
            );
            let height = with_retries(&retry, "getinfo", || self.rpc.chain_height()).await?;
            self.record(offer, format!("dry-run-{}", Uuid::new_v4()), height);
            return Ok(());
        }

        let request = self.take_offer_request(offer);
        let txid = self.rpc.take_offer(&self.address, &request).await?;

        let submitted_at_block =
            with_retries(&retry, "getinfo", || self.rpc.chain_height()).await?;
        let pending = PendingOperation {
            kind: OperationKind::Purchase,
            id: OperationId::Transaction(txid.clone()),
            submitted_at_block,
            required_confirmations: self.cfg.buy.min_confirmations,
        };
        info!(pending = %pending, ticket = %offer.ticket, "take-offer submitted");
        self.pending = Some(pending);

        let confirmed = wait_for_confirmations(
            self.rpc,
            &txid,
            self.cfg.buy.min_confirmations,
            self.cfg.timing.confirm_poll_interval(),
            self.cfg.timing.confirm_poll_attempts,
            &retry,
        )
        .await;
        self.pending = None;

        match confirmed? {
            Some(confirmations) => {
                // The ticket is already ours here; a failed height read
                // falls back to the submission height rather than losing
                // the purchase from the report.
                let height =
                    match with_retries(&retry, "getinfo", || self.rpc.chain_height()).await {
                        Ok(height) => height,
                        Err(e) => {
                            warn!(txid, error = %e, "height read failed after confirmation");
                            submitted_at_block
                        }
                    };
                debug!(txid, confirmations, height, "purchase confirmed");
                self.record(offer, txid, height);
                Ok(())
            }
            None => Err(BuyerError::ConfirmationTimedOut {
                txid,
                polls: self.cfg.timing.confirm_poll_attempts,
            }),
        }
    }

    fn record(&mut self, offer: &Offer, txid: String, confirmed_at_block: u64) {
        self.owned.insert(offer.ticket.clone());
        let result = PurchaseResult {
            ticket: offer.ticket.clone(),
            txid,
            confirmed_at_block,
        };
        info!(purchase = %result, "ticket recorded");
        self.results.push(result);
    }

    /// Shape the take-offer body: deliver the ticket price in the ticket
    /// currency, accept the ticket identity re-keyed to our address.
    fn take_offer_request(&self, offer: &Offer) -> TakeOfferRequest {
        TakeOfferRequest {
            txid: offer.txid.clone(),
            changeaddress: self.address.clone(),
            deliver: DeliverLeg {
                currency: self.cfg.lottery.currency_id.clone(),
                amount: offer.price,
            },
            accept: AcceptLeg {
                name: format!("{}@", offer.ticket.name()),
                parent: self.cfg.lottery.currency_name.clone(),
                primaryaddresses: vec![self.address.clone()],
                minimumsignatures: 1,
                identityid: offer.identity_id.clone(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
