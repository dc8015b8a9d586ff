//! Extraction of monetary amounts and transaction hashes from untyped
//! tool arguments / results.

use serde_json::Value;

/// Argument keys that carry a USD amount directly.
const USD_KEYS: [&str; 4] = ["amountUsd", "amount_usd", "valueUsd", "value_usd"];

/// Extract a USD amount from tool arguments.
///
/// Recognizes the explicit USD keys, plus a bare `amount` when no
/// `currency` field is present or the currency is `"USD"`.
pub fn extract_amount_usd(args: &Value) -> Option<f64> {
    let obj = args.as_object()?;

    for key in USD_KEYS {
        if let Some(v) = obj.get(key).and_then(as_f64) {
            return Some(v);
        }
    }

    if let Some(v) = obj.get("amount").and_then(as_f64) {
        match obj.get("currency").and_then(|c| c.as_str()) {
            None => return Some(v),
            Some(c) if c.eq_ignore_ascii_case("usd") => return Some(v),
            Some(_) => return None,
        }
    }

    None
}

/// Extract a transaction hash from tool result data.
pub fn extract_tx_hash(data: &Value) -> Option<String> {
    let obj = data.as_object()?;
    for key in ["txHash", "tx_hash", "transactionHash"] {
        if let Some(h) = obj.get(key).and_then(|v| v.as_str()) {
            return Some(h.to_owned());
        }
    }
    None
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        // Amounts often arrive as strings from LLM-generated arguments.
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
