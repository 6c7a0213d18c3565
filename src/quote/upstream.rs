// =============================================================================
// Upstream quote connection — subscribe, read forever, reconnect on failure
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use super::hub::QuoteHub;

const DEMP_CODE: &str = "e2571ebfeb4c217b4f6adac7a1ef3d4d";
const UPSTREAM_SECRET: &str = "ceb1b5791048bb9ca438582b534d005b";
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Maintain the single upstream subscription forever. Every disconnect marks
/// the upstream dead, waits the fixed backoff, and dials again; the price
/// cache persists across the gap until staleness invalidates it.
pub async fn run_upstream(hub: Arc<QuoteHub>, url: String) {
    loop {
        info!(url = %url, "connecting to upstream quote feed");

        match connect_async(&url).await {
            Ok((stream, _response)) => {
                hub.set_upstream_alive(true);
                info!("upstream quote feed connected");

                let (mut write, mut read) = stream.split();

                if let Err(e) = write
                    .send(Message::Text(subscribe_envelope()))
                    .await
                {
                    error!(error = %e, "failed to send subscription envelope");
                } else {
                    info!("subscription envelope sent");

                    loop {
                        match read.next().await {
                            Some(Ok(Message::Text(text))) => {
                                hub.handle_upstream_frame(&text);
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if write.send(Message::Pong(data)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                warn!("upstream quote feed closed");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!(error = %e, "upstream read error");
                                break;
                            }
                        }
                    }
                }

                hub.set_upstream_alive(false);
            }
            Err(e) => {
                error!(error = %e, "upstream connect failed");
            }
        }

        tokio::time::sleep(RETRY_DELAY).await;
    }
}

/// Subscription envelope sent right after connect. The session id is derived
/// from the current wall-clock time.
fn subscribe_envelope() -> String {
    let now = Local::now();
    serde_json::json!({
        "userid": 0,
        "dempCode": DEMP_CODE,
        "channel": "channel",
        "clientIp": "127.0.0.1",
        "secret": UPSTREAM_SECRET,
        "sessionId": now.format("%Y%m%d%H%M%S").to_string(),
        "subscriptionType": "all",
        "time": now.format("%Y-%m-%d %H:%M:%S").to_string(),
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Price extraction
// ---------------------------------------------------------------------------

/// Pull the reference price out of an upstream frame, trying in order:
///
/// 1. `data.au9999.currentPrice`
/// 2. inside the JSON-decoded `content` string: `items.AU.Sell`,
///    `items.AU9999.Sell`, `items.XAU.Sell`, then the first nested object
///    exposing a positive numeric `Sell`.
///
/// Numeric and string-numeric forms are both accepted; only positive results
/// count.
pub fn extract_price(text: &str) -> Option<f64> {
    let root: Value = serde_json::from_str(text).ok()?;

    if let Some(price) = positive_number(root.pointer("/data/au9999/currentPrice")) {
        return Some(price);
    }

    let content_str = root.get("content")?.as_str()?;
    let content: Value = serde_json::from_str(content_str).ok()?;
    let items = content.get("items")?;

    for key in ["AU", "AU9999", "XAU"] {
        if let Some(price) = positive_number(items.get(key).and_then(|i| i.get("Sell"))) {
            return Some(price);
        }
    }

    // Fallback: any nested object with a usable Sell.
    if let Some(map) = items.as_object() {
        for item in map.values() {
            if let Some(price) = positive_number(item.get("Sell")) {
                return Some(price);
            }
        }
    }
    None
}

/// Accept `12.3` and `"12.3"`, rejecting everything non-positive.
fn positive_number(value: Option<&Value>) -> Option<f64> {
    let value = value?;
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (n > 0.0).then_some(n)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_direct_au9999_current_price() {
        let frame = r#"{"data":{"au9999":{"currentPrice":512.5}}}"#;
        assert_eq!(extract_price(frame), Some(512.5));
    }

    #[test]
    fn extracts_string_numeric_price() {
        let frame = r#"{"data":{"au9999":{"currentPrice":"498.76"}}}"#;
        assert_eq!(extract_price(frame), Some(498.76));
    }

    #[test]
    fn extracts_au_sell_from_content() {
        let content = r#"{"items":{"AU":{"Sell":501.2,"Buy":500.8}}}"#;
        let frame = serde_json::json!({ "content": content }).to_string();
        assert_eq!(extract_price(&frame), Some(501.2));
    }

    #[test]
    fn falls_back_through_content_keys_in_order() {
        let content = r#"{"items":{"AU9999":{"Sell":"502.4"},"XAU":{"Sell":9999.0}}}"#;
        let frame = serde_json::json!({ "content": content }).to_string();
        assert_eq!(extract_price(&frame), Some(502.4));

        let content = r#"{"items":{"XAU":{"Sell":2301.5}}}"#;
        let frame = serde_json::json!({ "content": content }).to_string();
        assert_eq!(extract_price(&frame), Some(2301.5));
    }

    #[test]
    fn falls_back_to_any_item_with_positive_sell() {
        let content = r#"{"items":{"AG":{"Sell":6.02}}}"#;
        let frame = serde_json::json!({ "content": content }).to_string();
        assert_eq!(extract_price(&frame), Some(6.02));
    }

    #[test]
    fn rejects_non_positive_and_malformed() {
        assert_eq!(
            extract_price(r#"{"data":{"au9999":{"currentPrice":0}}}"#),
            None
        );
        assert_eq!(
            extract_price(r#"{"data":{"au9999":{"currentPrice":-3.5}}}"#),
            None
        );
        assert_eq!(extract_price("not json at all"), None);
        assert_eq!(extract_price(r#"{"heartbeat":true}"#), None);

        let content = r#"{"items":{"AU":{"Sell":"-1"}}}"#;
        let frame = serde_json::json!({ "content": content }).to_string();
        assert_eq!(extract_price(&frame), None);
    }

    #[test]
    fn envelope_carries_required_fields() {
        let envelope: serde_json::Value =
            serde_json::from_str(&subscribe_envelope()).unwrap();
        assert_eq!(envelope["dempCode"], DEMP_CODE);
        assert_eq!(envelope["secret"], UPSTREAM_SECRET);
        assert_eq!(envelope["subscriptionType"], "all");
        assert_eq!(envelope["userid"], 0);
        // sessionId is the wall clock compacted to digits.
        let session = envelope["sessionId"].as_str().unwrap();
        assert_eq!(session.len(), 14);
        assert!(session.chars().all(|c| c.is_ascii_digit()));
        assert!(envelope["time"].as_str().unwrap().contains(' '));
    }
}
