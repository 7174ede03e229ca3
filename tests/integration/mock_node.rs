//! Scriptable in-memory node for end-to-end flow tests.
//!
//! Implements `NodeRpc` over mutable shared state: an offer book that
//! take-offer consumes, per-address balances that a conversion credits,
//! scripted confirmation schedules, and an ordered call log the flow
//! tests assert sequencing against. No network, fully deterministic.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use vlotto_buyer::rpc::{
    ConversionOutput, ConverterRoute, IdentityEnvelope, NodeRpc, OfferBody, OfferEntry,
    OfferTerms, OperationFailure, OperationResult, OperationStatus, RpcError, TakeOfferRequest,
};

pub const DRAW_BLOCK: u64 = 3906000;
pub const LOTTERY_CURRENCY_ID: &str = "iMLmoaN3SS8KdJwb7fG4WZxJMFrjJxHBfj";

/// A deterministic Verus node stand-in.
///
/// All state is in-memory and controllable from test code; every RPC
/// call is recorded as `method:detail` in arrival order.
pub struct MockNode {
    state: Arc<Mutex<NodeState>>,
}

struct NodeState {
    height: u64,
    offers: Vec<OfferEntry>,
    /// Ticket-currency balance per address.
    ticket_balances: HashMap<String, Decimal>,
    /// Base-currency view returned by the grouping listing.
    base_balances: Vec<(String, Decimal)>,
    ledger: Value,
    wallet_identities: Vec<Value>,
    routes: Vec<ConverterRoute>,
    /// Confirmation counts per txid, consumed front to back with the
    /// last entry repeating. Unscripted txids confirm immediately.
    confirmations: HashMap<String, VecDeque<i64>>,
    /// Scripted operation statuses per opid, same consumption rule.
    operations: HashMap<String, VecDeque<OperationStatus>>,
    /// Errors handed out by upcoming take-offer calls, in order.
    take_failures: VecDeque<RpcError>,
    /// Fixed string returned by send_currency instead of a minted txid.
    send_returns: Option<String>,
    /// Ticket amount credited to the sender once a conversion is
    /// submitted, standing in for the eventual on-chain settlement.
    credit_on_send: Option<Decimal>,
    calls: Vec<String>,
    next_txid: u32,
}

impl MockNode {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NodeState {
                height: DRAW_BLOCK - 100,
                offers: Vec::new(),
                ticket_balances: HashMap::new(),
                base_balances: Vec::new(),
                ledger: default_ledger(DRAW_BLOCK),
                wallet_identities: Vec::new(),
                routes: Vec::new(),
                confirmations: HashMap::new(),
                operations: HashMap::new(),
                take_failures: VecDeque::new(),
                send_returns: None,
                credit_on_send: None,
                calls: Vec::new(),
                next_txid: 0,
            })),
        }
    }

    /// Txid minted for the n-th successful submission (1-based).
    pub fn minted_txid(n: u32) -> String {
        format!("{n:064x}")
    }

    pub fn with_offer(self, txid: &str, name: &str) -> Self {
        self.state.lock().unwrap().offers.push(make_offer(txid, name));
        self
    }

    pub fn with_balance(self, address: &str, base: Decimal, tickets: Decimal) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.base_balances.push((address.to_string(), base));
            state.ticket_balances.insert(address.to_string(), tickets);
        }
        self
    }

    pub fn with_route(self, converter: &str, cost: Decimal) -> Self {
        let mut sourceamounts = HashMap::new();
        sourceamounts.insert("VRSC".to_string(), cost);
        self.state.lock().unwrap().routes.push(ConverterRoute {
            fullyqualifiedname: converter.to_string(),
            sourceamounts,
        });
        self
    }

    pub fn with_confirmations(self, txid: &str, counts: &[i64]) -> Self {
        assert!(!counts.is_empty());
        self.state
            .lock()
            .unwrap()
            .confirmations
            .insert(txid.to_string(), counts.iter().copied().collect());
        self
    }

    pub fn with_operation(self, opid: &str, statuses: Vec<OperationStatus>) -> Self {
        assert!(!statuses.is_empty());
        self.state
            .lock()
            .unwrap()
            .operations
            .insert(opid.to_string(), statuses.into_iter().collect());
        self
    }

    pub fn with_take_failure(self, error: RpcError) -> Self {
        self.state.lock().unwrap().take_failures.push_back(error);
        self
    }

    pub fn with_send_returns(self, raw: &str) -> Self {
        self.state.lock().unwrap().send_returns = Some(raw.to_string());
        self
    }

    pub fn with_credit_on_send(self, amount: Decimal) -> Self {
        self.state.lock().unwrap().credit_on_send = Some(amount);
        self
    }

    pub fn with_owned_ticket(self, name: &str, address: &str) -> Self {
        self.state.lock().unwrap().wallet_identities.push(json!({
            "identity": {
                "name": name,
                "parent": LOTTERY_CURRENCY_ID,
                "primaryaddresses": [address],
                "contentmultimap": {},
            }
        }));
        self
    }

    /// Every RPC call recorded so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// How many recorded calls start with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn remaining_offers(&self) -> usize {
        self.state.lock().unwrap().offers.len()
    }
}

pub fn executing_status() -> OperationStatus {
    OperationStatus {
        status: "executing".to_string(),
        result: None,
        error: None,
    }
}

pub fn success_status(txid: &str) -> OperationStatus {
    OperationStatus {
        status: "success".to_string(),
        result: Some(OperationResult {
            txid: txid.to_string(),
        }),
        error: None,
    }
}

pub fn failed_status(message: &str) -> OperationStatus {
    OperationStatus {
        status: "failed".to_string(),
        result: None,
        error: Some(OperationFailure {
            message: message.to_string(),
        }),
    }
}

fn make_offer(txid: &str, name: &str) -> OfferEntry {
    OfferEntry {
        identityid: format!("i{name}"),
        offer: OfferBody {
            txid: txid.to_string(),
            offer: OfferTerms {
                name: name.to_string(),
            },
        },
    }
}

fn default_ledger(draw_block: u64) -> Value {
    let message = json!({
        "lotteryParameters": { "requiredMatches": 1, "drawingBlock": draw_block },
        "financialSummary": { "jackpotCurrent": 250.5 },
        "ticketSummary": { "planned": 32, "onMarketplace": 13 },
        "currentPhase": "phase1_ticket_sales",
    })
    .to_string();
    json!({
        "identity": {
            "name": "ledger",
            "parent": LOTTERY_CURRENCY_ID,
            "primaryaddresses": [],
            "contentmultimap": {
                "iKey": [
                    { "iNested": { "objectdata": { "message": message } } }
                ]
            }
        }
    })
}

fn decode<T: serde::de::DeserializeOwned>(what: &'static str, value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::Decode { what, source: e })
}

#[async_trait]
impl NodeRpc for MockNode {
    async fn chain_height(&self) -> Result<u64, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("getinfo".to_string());
        Ok(state.height)
    }

    async fn market_offers(&self, _currency: &str) -> Result<Vec<OfferEntry>, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("getoffers".to_string());
        Ok(state.offers.clone())
    }

    async fn identity(&self, name: &str) -> Result<IdentityEnvelope, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("getidentity:{name}"));
        decode("getidentity", state.ledger.clone())
    }

    async fn wallet_identities(&self) -> Result<Vec<IdentityEnvelope>, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("listidentities".to_string());
        state
            .wallet_identities
            .clone()
            .into_iter()
            .map(|v| decode("listidentities", v))
            .collect()
    }

    async fn address_groupings(&self) -> Result<Vec<(String, Decimal)>, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("listaddressgroupings".to_string());
        Ok(state.base_balances.clone())
    }

    async fn currency_balances(&self, address: &str) -> Result<HashMap<String, Decimal>, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("getcurrencybalance:{address}"));
        let mut balances = HashMap::new();
        if let Some(amount) = state.ticket_balances.get(address) {
            balances.insert("vlotto".to_string(), *amount);
        }
        Ok(balances)
    }

    async fn conversion_routes(
        &self,
        _from: &str,
        _to: &str,
        amount: Decimal,
    ) -> Result<Vec<ConverterRoute>, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("getcurrencyconverters:{amount}"));
        Ok(state.routes.clone())
    }

    async fn send_currency(&self, from: &str, output: &ConversionOutput) -> Result<String, RpcError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("sendcurrency:{}:{}", output.amount, output.convertto));
        let credit = state.credit_on_send;
        if let Some(credit) = credit {
            let balance = state
                .ticket_balances
                .entry(from.to_string())
                .or_insert(Decimal::ZERO);
            *balance += credit;
        }
        if let Some(fixed) = state.send_returns.clone() {
            return Ok(fixed);
        }
        state.next_txid += 1;
        Ok(Self::minted_txid(state.next_txid))
    }

    async fn operation_status(&self, opid: &str) -> Result<Option<OperationStatus>, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("z_getoperationstatus:{opid}"));
        let Some(schedule) = state.operations.get_mut(opid) else {
            return Ok(None);
        };
        let status = if schedule.len() > 1 {
            schedule.pop_front()
        } else {
            schedule.front().cloned()
        };
        Ok(status)
    }

    async fn transaction_confirmations(&self, txid: &str) -> Result<Option<i64>, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("gettransaction:{txid}"));
        let Some(schedule) = state.confirmations.get_mut(txid) else {
            return Ok(Some(1));
        };
        let count = if schedule.len() > 1 {
            schedule.pop_front()
        } else {
            schedule.front().copied()
        };
        Ok(count)
    }

    async fn take_offer(&self, _from: &str, request: &TakeOfferRequest) -> Result<String, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("takeoffer:{}", request.txid));
        if let Some(error) = state.take_failures.pop_front() {
            return Err(error);
        }
        let position = state
            .offers
            .iter()
            .position(|o| o.offer.txid == request.txid);
        let Some(position) = position else {
            return Err(RpcError::Node {
                code: -32000,
                message: format!("offer not found: {}", request.txid),
            });
        };
        state.offers.remove(position);
        state.next_txid += 1;
        Ok(Self::minted_txid(state.next_txid))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_take_offer_consumes_the_book() {
        let node = MockNode::new()
            .with_offer("off-1", "3906000_1of32")
            .with_offer("off-2", "3906000_2of32");

        let request = take_request("off-1");
        let txid = node.take_offer("RMine", &request).await.unwrap();
        assert_eq!(txid, MockNode::minted_txid(1));
        assert_eq!(node.remaining_offers(), 1);

        // Taking the same offer again is a gone-offer rejection.
        let err = node.take_offer("RMine", &request).await.unwrap_err();
        assert!(err.is_offer_gone());
    }

    #[tokio::test]
    async fn test_scripted_confirmations_repeat_last() {
        let node = MockNode::new().with_confirmations("tx-1", &[0, 2]);
        assert_eq!(
            node.transaction_confirmations("tx-1").await.unwrap(),
            Some(0)
        );
        assert_eq!(
            node.transaction_confirmations("tx-1").await.unwrap(),
            Some(2)
        );
        assert_eq!(
            node.transaction_confirmations("tx-1").await.unwrap(),
            Some(2)
        );
        // Unscripted txids confirm immediately.
        assert_eq!(
            node.transaction_confirmations("tx-other").await.unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_send_currency_credits_ticket_balance() {
        let node = MockNode::new()
            .with_balance("RMine", dec!(10), dec!(0))
            .with_credit_on_send(dec!(2.5));

        let output = ConversionOutput {
            address: "RMine".to_string(),
            amount: dec!(2.02),
            currency: "VRSC".to_string(),
            convertto: "vlotto".to_string(),
            via: None,
        };
        node.send_currency("RMine", &output).await.unwrap();

        let balances = node.currency_balances("RMine").await.unwrap();
        assert_eq!(balances.get("vlotto"), Some(&dec!(2.5)));
    }

    #[tokio::test]
    async fn test_ledger_identity_decodes() {
        let node = MockNode::new();
        let envelope = node.identity("ledger.vlotto@").await.unwrap();
        assert_eq!(envelope.identity.parent, LOTTERY_CURRENCY_ID);
        assert!(envelope.identity.contentmultimap.is_object());
    }

    #[tokio::test]
    async fn test_call_log_preserves_order() {
        let node = MockNode::new().with_offer("off-1", "3906000_1of32");
        node.chain_height().await.unwrap();
        node.market_offers("vlotto").await.unwrap();
        node.chain_height().await.unwrap();

        assert_eq!(node.calls(), vec!["getinfo", "getoffers", "getinfo"]);
        assert_eq!(node.count("getinfo"), 2);
    }

    fn take_request(offer_txid: &str) -> TakeOfferRequest {
        use vlotto_buyer::rpc::{AcceptLeg, DeliverLeg};
        TakeOfferRequest {
            txid: offer_txid.to_string(),
            changeaddress: "RMine".to_string(),
            deliver: DeliverLeg {
                currency: LOTTERY_CURRENCY_ID.to_string(),
                amount: dec!(1.0),
            },
            accept: AcceptLeg {
                name: "3906000_1of32@".to_string(),
                parent: "vlotto".to_string(),
                primaryaddresses: vec!["RMine".to_string()],
                minimumsignatures: 1,
                identityid: "i3906000_1of32".to_string(),
            },
        }
    }
}
