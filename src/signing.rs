//! Nonce issuance and L1 action signing (component E). Every mutating
//! exchange call is signed with the EIP-712 "Agent" scheme and stamped with
//! a strictly increasing nonce; invalid-nonce responses are retried up to 3
//! times at 0.5s per spec §7, never resubmitted with a lower nonce.

use crate::errors::{EngineError, EngineResult};
use ethers_core::types::{transaction::eip712::EIP712Domain, Address, H256, U256};
use ethers_core::utils::keccak256;
use ethers_signers::{LocalWallet, Signer};
use rmp_serde::Serializer;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::{sleep, Duration};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub r: String,
    pub s: String,
    pub v: u8,
}

/// Hands out strictly increasing millisecond nonces even when the clock
/// doesn't advance between two calls (e.g. cancel-all issuing a burst).
pub struct NonceSigner {
    private_key: String,
    last_nonce: AtomicU64,
}

impl NonceSigner {
    pub fn new(private_key: String) -> Self {
        Self {
            private_key,
            last_nonce: AtomicU64::new(0),
        }
    }

    pub fn next_nonce(&self, now_ms: u64) -> u64 {
        loop {
            let prev = self.last_nonce.load(Ordering::SeqCst);
            let candidate = now_ms.max(prev + 1);
            if self
                .last_nonce
                .compare_exchange(prev, candidate, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return candidate;
            }
        }
    }

    pub fn sign_order_action(&self, orders: Vec<OrderWire>, nonce: u64) -> EngineResult<(Signature, serde_json::Value)> {
        sign_l1_action(
            &self.private_key,
            ActionWire {
                r#type: "order".to_string(),
                orders,
                grouping: "na".to_string(),
            },
            nonce,
        )
    }

    pub fn sign_cancel(&self, asset: u32, oid: u64, nonce: u64) -> EngineResult<(Signature, serde_json::Value)> {
        sign_cancel_action(&self.private_key, asset, oid, nonce)
    }

    /// Retries the given signer+submit closure up to 3 times at 0.5s on an
    /// invalid-nonce error, reissuing a fresh nonce each attempt (spec §7).
    pub async fn submit_with_nonce_retry<F, Fut, T>(&self, now_ms: u64, mut submit: F) -> EngineResult<T>
    where
        F: FnMut(u64) -> Fut,
        Fut: std::future::Future<Output = EngineResult<T>>,
    {
        let mut attempt = 0;
        loop {
            let nonce = self.next_nonce(now_ms);
            match submit(nonce).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable_nonce_error() && attempt < 3 => {
                    attempt += 1;
                    sleep(Duration::from_millis(500)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OrderWire {
    pub asset: u32,
    pub is_buy: bool,
    pub limit_px: String,
    pub sz: String,
    pub reduce_only: bool,
    pub order_type: OrderTypeWire,
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub enum OrderTypeWire {
    Limit(LimitOrderWire),
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LimitOrderWire {
    pub tif: String,
}

#[derive(Serialize, Clone)]
struct ActionWire {
    r#type: String,
    orders: Vec<OrderWire>,
    grouping: String,
}

#[derive(Serialize)]
struct OrderWireMsgPack {
    a: u32,
    b: bool,
    p: String,
    s: String,
    r: bool,
    t: OrderTypeWireMsgPack,
}

#[derive(Serialize)]
struct OrderTypeWireMsgPack {
    limit: LimitOrderWireMsgPack,
}

#[derive(Serialize)]
struct LimitOrderWireMsgPack {
    tif: String,
}

#[derive(Serialize)]
struct ActionMsgPack {
    r#type: String,
    orders: Vec<OrderWireMsgPack>,
    grouping: String,
}

fn compute_action_hash(action: &ActionWire, nonce: u64, vault_address: Option<&str>) -> [u8; 32] {
    let msgpack_orders: Vec<OrderWireMsgPack> = action
        .orders
        .iter()
        .map(|o| {
            let tif_str = match &o.order_type {
                OrderTypeWire::Limit(l) => l.tif.clone(),
            };
            OrderWireMsgPack {
                a: o.asset,
                b: o.is_buy,
                p: o.limit_px.clone(),
                s: o.sz.clone(),
                r: o.reduce_only,
                t: OrderTypeWireMsgPack {
                    limit: LimitOrderWireMsgPack { tif: tif_str },
                },
            }
        })
        .collect();

    let msgpack_action = ActionMsgPack {
        r#type: action.r#type.clone(),
        orders: msgpack_orders,
        grouping: action.grouping.clone(),
    };

    let mut buf = Vec::new();
    let mut serializer = Serializer::new(&mut buf).with_struct_map();
    msgpack_action
        .serialize(&mut serializer)
        .expect("msgpack serialization of a plain struct cannot fail");

    buf.extend_from_slice(&nonce.to_be_bytes());
    match vault_address {
        None => buf.push(0x00),
        Some(addr) => {
            buf.push(0x01);
            let addr_clean = addr.strip_prefix("0x").unwrap_or(addr);
            if let Ok(bytes) = hex::decode(addr_clean) {
                buf.extend_from_slice(&bytes);
            }
        }
    }
    keccak256(&buf)
}

fn agent_domain() -> EIP712Domain {
    EIP712Domain {
        name: Some("Exchange".to_string()),
        version: Some("1".to_string()),
        chain_id: Some(U256::from(1337)),
        verifying_contract: Some(Address::zero()),
        salt: None,
    }
}

fn sign_agent_digest(private_key: &str, action_hash: [u8; 32]) -> EngineResult<Signature> {
    let wallet = LocalWallet::from_str(private_key)
        .map_err(|e| EngineError::Config(format!("invalid private key: {e}")))?;

    let action_hash_h256 = H256::from(action_hash);
    let domain_hash = agent_domain().separator();
    let agent_type_hash = keccak256("Agent(string source,bytes32 connectionId)".as_bytes());
    let source_hash = keccak256("a".as_bytes());

    let mut encoded = Vec::new();
    encoded.extend_from_slice(&agent_type_hash);
    encoded.extend_from_slice(&source_hash);
    encoded.extend_from_slice(action_hash_h256.as_bytes());
    let struct_hash = keccak256(&encoded);

    let mut final_payload = Vec::new();
    final_payload.extend_from_slice(&[0x19, 0x01]);
    final_payload.extend_from_slice(&domain_hash);
    final_payload.extend_from_slice(&struct_hash);
    let final_digest = H256::from(keccak256(&final_payload));

    let sig = wallet
        .sign_hash(final_digest)
        .map_err(|e| EngineError::InvalidOrder(e.to_string()))?;

    Ok(Signature {
        r: format!("0x{:0>64x}", sig.r),
        s: format!("0x{:0>64x}", sig.s),
        v: sig.v as u8,
    })
}

/// Signs an order-placement action, returning the signature plus the exact
/// JSON body to submit. Key order inside the JSON map is preserved
/// (`type`, `orders`, `grouping`; per-order `a, b, p, s, r, t`) because the
/// venue re-serializes the request body to verify the signature.
fn sign_l1_action(private_key: &str, action: ActionWire, nonce: u64) -> EngineResult<(Signature, serde_json::Value)> {
    let action_hash = compute_action_hash(&action, nonce, None);
    let signature = sign_agent_digest(private_key, action_hash)?;

    let json_orders: Vec<serde_json::Value> = action
        .orders
        .iter()
        .map(|o| {
            let tif_str = match &o.order_type {
                OrderTypeWire::Limit(l) => l.tif.clone(),
            };
            let mut order_map = serde_json::Map::new();
            order_map.insert("a".to_string(), serde_json::Value::from(o.asset));
            order_map.insert("b".to_string(), serde_json::Value::from(o.is_buy));
            order_map.insert("p".to_string(), serde_json::Value::from(o.limit_px.clone()));
            order_map.insert("s".to_string(), serde_json::Value::from(o.sz.clone()));
            order_map.insert("r".to_string(), serde_json::Value::from(o.reduce_only));
            let mut tif_map = serde_json::Map::new();
            tif_map.insert("tif".to_string(), serde_json::Value::from(tif_str));
            let mut limit_map = serde_json::Map::new();
            limit_map.insert("limit".to_string(), serde_json::Value::Object(tif_map));
            order_map.insert("t".to_string(), serde_json::Value::Object(limit_map));
            serde_json::Value::Object(order_map)
        })
        .collect();

    let mut action_map = serde_json::Map::new();
    action_map.insert("type".to_string(), serde_json::Value::from(action.r#type.clone()));
    action_map.insert("orders".to_string(), serde_json::Value::Array(json_orders));
    action_map.insert("grouping".to_string(), serde_json::Value::from(action.grouping.clone()));

    Ok((signature, serde_json::Value::Object(action_map)))
}

fn sign_cancel_action(private_key: &str, asset: u32, oid: u64, nonce: u64) -> EngineResult<(Signature, serde_json::Value)> {
    #[derive(Serialize)]
    struct CancelWireMsgPack {
        a: u32,
        o: u64,
    }
    #[derive(Serialize)]
    struct CancelActionMsgPack {
        r#type: String,
        cancels: Vec<CancelWireMsgPack>,
    }

    let msgpack_action = CancelActionMsgPack {
        r#type: "cancel".to_string(),
        cancels: vec![CancelWireMsgPack { a: asset, o: oid }],
    };

    let mut buf = Vec::new();
    let mut serializer = Serializer::new(&mut buf).with_struct_map();
    msgpack_action
        .serialize(&mut serializer)
        .expect("msgpack serialization of a plain struct cannot fail");
    buf.extend_from_slice(&nonce.to_be_bytes());
    buf.push(0x00);

    let action_hash = keccak256(&buf);
    let signature = sign_agent_digest(private_key, action_hash)?;

    let mut cancel_obj = serde_json::Map::new();
    cancel_obj.insert("a".to_string(), serde_json::Value::from(asset));
    cancel_obj.insert("o".to_string(), serde_json::Value::from(oid));

    let mut action_map = serde_json::Map::new();
    action_map.insert("type".to_string(), serde_json::Value::from("cancel"));
    action_map.insert(
        "cancels".to_string(),
        serde_json::Value::Array(vec![serde_json::Value::Object(cancel_obj)]),
    );

    Ok((signature, serde_json::Value::Object(action_map)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "0x0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn nonce_signer_is_monotonic_even_in_a_tight_burst() {
        let signer = NonceSigner::new(TEST_KEY.to_string());
        let a = signer.next_nonce(1_000);
        let b = signer.next_nonce(1_000);
        let c = signer.next_nonce(1_000);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn nonce_signer_uses_the_clock_when_it_has_moved_ahead() {
        let signer = NonceSigner::new(TEST_KEY.to_string());
        signer.next_nonce(1_000);
        let next = signer.next_nonce(5_000);
        assert_eq!(next, 5_000);
    }

    #[test]
    fn sign_l1_action_produces_a_well_formed_signature() {
        let orders = vec![OrderWire {
            asset: 0,
            is_buy: true,
            limit_px: "100.5".to_string(),
            sz: "1.0".to_string(),
            reduce_only: false,
            order_type: OrderTypeWire::Limit(LimitOrderWire { tif: "Alo".to_string() }),
        }];
        let (sig, json) = sign_l1_action(
            TEST_KEY,
            ActionWire {
                r#type: "order".to_string(),
                orders,
                grouping: "na".to_string(),
            },
            12345,
        )
        .unwrap();
        assert!(sig.r.starts_with("0x"));
        assert_eq!(json["type"], "order");
    }
}
