//! Live JSON-RPC client for a local verusd node.
//!
//! Speaks JSON-RPC 1.0 over HTTP with basic auth, the protocol the node's
//! built-in server expects. One request per call; no connection pooling
//! beyond what the HTTP client does on its own.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use super::credentials::RpcCredentials;
use super::{
    ConversionOutput, ConverterRoute, IdentityEnvelope, NodeRpc, OfferEntry, OperationStatus,
    RpcError, TakeOfferRequest,
};

/// Per-request timeout. Wallet calls (sendcurrency, takeoffer) can take a
/// while when the node is busy signing.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Node error code for "Invalid or non-wallet transaction id", returned
/// for a txid the wallet has not indexed yet.
const ERR_INVALID_TXID: i64 = -5;

// ---------------------------------------------------------------------------
// JSON-RPC envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcFailure>,
}

#[derive(Debug, Deserialize)]
struct RpcFailure {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for the node RPC interface.
pub struct VerusdClient {
    http: Client,
    credentials: RpcCredentials,
    next_id: AtomicU64,
}

impl VerusdClient {
    pub fn new(credentials: RpcCredentials) -> Result<Self, RpcError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent("vlotto-buyer/0.1.0")
            .build()?;

        Ok(Self {
            http,
            credentials,
            next_id: AtomicU64::new(1),
        })
    }

    /// Issue one JSON-RPC call and unwrap the envelope.
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "1.0",
            "id": format!("vlotto-buyer-{id}"),
            "method": method,
            "params": params,
        });

        trace!(method, %params, "RPC request");

        let resp = self
            .http
            .post(&self.credentials.url)
            .basic_auth(
                &self.credentials.user,
                Some(self.credentials.password.expose_secret()),
            )
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        let envelope: RpcEnvelope = resp.json().await.map_err(|e| {
            RpcError::Protocol(format!("non-JSON response to {method} (HTTP {status}): {e}"))
        })?;

        if let Some(failure) = envelope.error {
            debug!(method, code = failure.code, message = %failure.message, "node rejected call");
            return Err(RpcError::Node {
                code: failure.code,
                message: failure.message,
            });
        }

        envelope.result.ok_or_else(|| {
            RpcError::Protocol(format!("{method} response carried neither result nor error"))
        })
    }
}

// ---------------------------------------------------------------------------
// Result-shape helpers
// ---------------------------------------------------------------------------

/// The offer listing is usually a plain array, but some node versions wrap
/// it in an object whose single list-valued member holds the entries.
fn flatten_offer_listing(result: Value) -> Vec<Value> {
    match result {
        Value::Array(items) => items,
        Value::Object(map) => {
            let mut lists: Vec<Vec<Value>> = map
                .into_iter()
                .filter_map(|(_, v)| match v {
                    Value::Array(items) => Some(items),
                    _ => None,
                })
                .collect();
            if lists.len() == 1 {
                lists.pop().unwrap_or_default()
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}

fn decimal_value(v: &Value) -> Option<Decimal> {
    serde_json::from_value(v.clone()).ok()
}

// ---------------------------------------------------------------------------
// NodeRpc implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl NodeRpc for VerusdClient {
    async fn chain_height(&self) -> Result<u64, RpcError> {
        let info = self.call("getinfo", json!([])).await?;
        info.get("blocks")
            .and_then(Value::as_u64)
            .ok_or_else(|| RpcError::Protocol("getinfo result missing blocks".to_string()))
    }

    async fn market_offers(&self, currency: &str) -> Result<Vec<OfferEntry>, RpcError> {
        let result = self.call("getoffers", json!([currency, true])).await?;
        flatten_offer_listing(result)
            .into_iter()
            .map(|item| {
                serde_json::from_value(item).map_err(|source| RpcError::Decode {
                    what: "offer entry",
                    source,
                })
            })
            .collect()
    }

    async fn identity(&self, name: &str) -> Result<IdentityEnvelope, RpcError> {
        let result = self.call("getidentity", json!([name])).await?;
        serde_json::from_value(result).map_err(|source| RpcError::Decode {
            what: "identity",
            source,
        })
    }

    async fn wallet_identities(&self) -> Result<Vec<IdentityEnvelope>, RpcError> {
        let result = self.call("listidentities", json!([])).await?;
        let entries = match result {
            Value::Array(items) => items,
            _ => Vec::new(),
        };
        // Ownership listing is display-only; skip entries that do not
        // carry an identity object instead of failing the whole call.
        Ok(entries
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    debug!(error = %e, "skipping undecodable wallet identity");
                    None
                }
            })
            .collect())
    }

    async fn address_groupings(&self) -> Result<Vec<(String, Decimal)>, RpcError> {
        let result = self.call("listaddressgroupings", json!([])).await?;
        let mut out = Vec::new();
        if let Value::Array(groups) = result {
            for group in groups {
                let Value::Array(entries) = group else { continue };
                for entry in entries {
                    let Value::Array(fields) = entry else { continue };
                    let address = fields.first().and_then(Value::as_str);
                    let balance = fields.get(1).and_then(decimal_value);
                    if let (Some(address), Some(balance)) = (address, balance) {
                        out.push((address.to_string(), balance));
                    }
                }
            }
        }
        Ok(out)
    }

    async fn currency_balances(
        &self,
        address: &str,
    ) -> Result<HashMap<String, Decimal>, RpcError> {
        let result = self.call("getcurrencybalance", json!([address])).await?;
        match result {
            Value::Object(_) => {
                serde_json::from_value(result).map_err(|source| RpcError::Decode {
                    what: "currency balances",
                    source,
                })
            }
            _ => Ok(HashMap::new()),
        }
    }

    async fn conversion_routes(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
    ) -> Result<Vec<ConverterRoute>, RpcError> {
        // The node takes the query as a single JSON string parameter.
        let query = json!({
            "fromcurrency": [{ "currency": from }],
            "convertto": to,
            "amount": amount,
        })
        .to_string();

        let result = self.call("getcurrencyconverters", json!([query])).await?;
        let entries = match result {
            Value::Array(items) => items,
            _ => Vec::new(),
        };
        // Converters the wallet cannot use come back in odd shapes; skip
        // them and let the caller decide whether anything usable remains.
        Ok(entries
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect())
    }

    async fn send_currency(
        &self,
        from: &str,
        output: &ConversionOutput,
    ) -> Result<String, RpcError> {
        let params = json!([from, [output]]);
        let result = self.call("sendcurrency", params).await?;
        match result {
            Value::String(s) => Ok(s),
            Value::Object(map) => map
                .get("txid")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    RpcError::Protocol("sendcurrency result missing txid".to_string())
                }),
            other => Err(RpcError::Protocol(format!(
                "unexpected sendcurrency result: {other}"
            ))),
        }
    }

    async fn operation_status(&self, opid: &str) -> Result<Option<OperationStatus>, RpcError> {
        let result = self.call("z_getoperationstatus", json!([[opid]])).await?;
        let entries = match result {
            Value::Array(items) => items,
            _ => return Ok(None),
        };
        match entries.into_iter().next() {
            Some(entry) => serde_json::from_value(entry)
                .map(Some)
                .map_err(|source| RpcError::Decode {
                    what: "operation status",
                    source,
                }),
            None => Ok(None),
        }
    }

    async fn transaction_confirmations(&self, txid: &str) -> Result<Option<i64>, RpcError> {
        match self.call("gettransaction", json!([txid])).await {
            Ok(tx) => Ok(Some(
                tx.get("confirmations").and_then(Value::as_i64).unwrap_or(0),
            )),
            Err(RpcError::Node { code, .. }) if code == ERR_INVALID_TXID => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn take_offer(
        &self,
        from: &str,
        request: &TakeOfferRequest,
    ) -> Result<String, RpcError> {
        let params = json!([from, request]);
        let result = self.call("takeoffer", params).await?;
        match result {
            // Some node versions return the raw hex with the txid as the
            // first 64 characters, others a bare txid or an object.
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.len() >= 64 {
                    Ok(trimmed.chars().take(64).collect())
                } else {
                    Err(RpcError::Protocol(format!(
                        "unexpected takeoffer result: {trimmed}"
                    )))
                }
            }
            Value::Object(map) => map
                .get("txid")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| RpcError::Protocol("takeoffer result missing txid".to_string())),
            other => Err(RpcError::Protocol(format!(
                "unexpected takeoffer result: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
