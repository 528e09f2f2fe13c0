//! bitFlyer Realtime API (Lightstream) JSON-RPC 2.0 over WebSocket
//!
//! Keeps one connection open, subscribes every configured channel on connect
//! and forwards two kinds of inbound frames to the dispatcher, in arrival
//! order:
//! - subscription acknowledgments (`{"id": ..., "result": true}`)
//! - channel messages (`{"method": "channelMessage", "params": {...}}`)
//!
//! Reconnects with exponential backoff. Nothing is reordered or deduplicated.

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

pub const LIGHTSTREAM_WSS_URL: &str = "wss://ws.lightstream.bitflyer.com/json-rpc";

const JSONRPC_VERSION: &str = "2.0";

/// Diff channel for a product, e.g. `lightning_board_BTC_JPY`
pub fn board_channel(product_code: &str) -> String {
    format!("lightning_board_{}", product_code)
}

/// Request id used when subscribing to `channel`; the ack echoes it back
pub fn subscription_id(channel: &str) -> String {
    format!("subscribe_{}", channel)
}

#[derive(Debug, Clone)]
pub struct LightstreamConfig {
    pub url: String,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

impl Default for LightstreamConfig {
    fn default() -> Self {
        Self {
            url: LIGHTSTREAM_WSS_URL.to_string(),
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
        }
    }
}

impl LightstreamConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("BITFLYER_RPC_URL") {
            if !v.trim().is_empty() {
                cfg.url = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var("LIGHTSTREAM_RECONNECT_BASE_MS") {
            if let Ok(ms) = v.parse() {
                cfg.reconnect_base_delay_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("LIGHTSTREAM_RECONNECT_MAX_MS") {
            if let Ok(ms) = v.parse() {
                cfg.reconnect_max_delay_ms = ms;
            }
        }
        if cfg.reconnect_max_delay_ms < cfg.reconnect_base_delay_ms {
            cfg.reconnect_max_delay_ms = cfg.reconnect_base_delay_ms;
        }

        cfg
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    pub jsonrpc: &'static str,
    pub id: String,
    pub method: &'static str,
    pub params: ChannelParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelParams {
    pub channel: String,
}

impl SubscribeRequest {
    pub fn new(channel: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: subscription_id(channel),
            method: "subscribe",
            params: ChannelParams {
                channel: channel.to_string(),
            },
        }
    }
}

/// Inbound frame after protocol decoding
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Successful subscription; `id` is the request id (`subscribe_<channel>`)
    SubscriptionAck { id: String },
    /// Payload pushed on a subscribed channel
    Channel { channel: String, message: Value },
}

impl FeedMessage {
    /// Key used to route the message to a handler
    pub fn identifier(&self) -> &str {
        match self {
            FeedMessage::SubscriptionAck { id } => id,
            FeedMessage::Channel { channel, .. } => channel,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcFrame {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<RpcChannelParams>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcChannelParams {
    channel: String,
    #[serde(default)]
    message: Value,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Decode one text frame.
///
/// `Ok(None)` for frames that are valid JSON but carry nothing to route
/// (error replies, rejected subscriptions, unknown shapes).
pub fn parse_frame(text: &str) -> Result<Option<FeedMessage>> {
    let frame: RpcFrame = serde_json::from_str(text).context("Invalid JSON-RPC frame")?;

    if frame.method.as_deref() == Some("channelMessage") {
        let params = frame
            .params
            .ok_or_else(|| anyhow!("channelMessage without params"))?;
        return Ok(Some(FeedMessage::Channel {
            channel: params.channel,
            message: params.message,
        }));
    }

    if let Some(err) = frame.error {
        error!(
            code = err.code,
            message = %err.message,
            id = ?frame.id,
            "Lightstream error message received"
        );
        return Ok(None);
    }

    if let (Some(id), Some(result)) = (frame.id, frame.result) {
        let id = match id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        if result == Value::Bool(true) {
            info!(id = %id, "Subscription successful");
            return Ok(Some(FeedMessage::SubscriptionAck { id }));
        }
        warn!(id = %id, result = %result, "Subscription not acknowledged");
        return Ok(None);
    }

    debug!("Ignoring unrecognized Lightstream frame");
    Ok(None)
}

/// Persistent Lightstream connection feeding a single consumer
pub struct LightstreamClient {
    config: LightstreamConfig,
    channels: Vec<String>,
    sink: mpsc::UnboundedSender<FeedMessage>,
}

impl LightstreamClient {
    pub fn new(
        config: LightstreamConfig,
        channels: Vec<String>,
        sink: mpsc::UnboundedSender<FeedMessage>,
    ) -> Self {
        Self {
            config,
            channels,
            sink,
        }
    }

    /// Connect and stream forever, reconnecting on failure.
    ///
    /// Returns once the consumer side of the sink has been dropped.
    pub async fn run(&self) -> Result<()> {
        let base_delay = Duration::from_millis(self.config.reconnect_base_delay_ms);
        let max_delay = Duration::from_millis(self.config.reconnect_max_delay_ms);
        let mut reconnect_delay = base_delay;

        loop {
            if self.sink.is_closed() {
                info!("Feed consumer gone, stopping Lightstream client");
                return Ok(());
            }

            match self.connect_and_stream().await {
                Ok(()) => {
                    info!("Lightstream connection closed");
                    reconnect_delay = base_delay;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        delay_ms = reconnect_delay.as_millis() as u64,
                        "Lightstream disconnected, reconnecting"
                    );
                    sleep(reconnect_delay).await;
                    reconnect_delay = (reconnect_delay * 2).min(max_delay);
                }
            }
        }
    }

    async fn connect_and_stream(&self) -> Result<()> {
        info!(url = %self.config.url, "Connecting to Lightstream");
        let (ws_stream, resp) = connect_async(self.config.url.as_str())
            .await
            .context("Failed to connect to Lightstream")?;

        info!(status = %resp.status(), "Connected to Lightstream");

        let (mut write, mut read) = ws_stream.split();

        for channel in &self.channels {
            let request = serde_json::to_string(&SubscribeRequest::new(channel))
                .context("Failed to encode subscribe request")?;
            write
                .send(Message::Text(request))
                .await
                .with_context(|| format!("Failed to subscribe to {}", channel))?;
            debug!(channel = %channel, "Sent subscription");
        }

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => match parse_frame(&text) {
                    Ok(Some(feed_msg)) => {
                        if self.sink.send(feed_msg).is_err() {
                            return Ok(());
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        debug!(error = %e, "Dropping malformed Lightstream frame");
                    }
                },
                Ok(Message::Ping(data)) => {
                    write.send(Message::Pong(data)).await?;
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Lightstream close frame received");
                    return Err(anyhow!("Lightstream closed by server"));
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(anyhow!("Lightstream error: {}", e));
                }
            }
        }

        Err(anyhow!("Lightstream stream ended"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_naming() {
        let channel = board_channel("FX_BTC_JPY");
        assert_eq!(channel, "lightning_board_FX_BTC_JPY");
        assert_eq!(subscription_id(&channel), "subscribe_lightning_board_FX_BTC_JPY");
    }

    #[test]
    fn test_subscribe_request_shape() {
        let json = serde_json::to_value(SubscribeRequest::new("lightning_board_BTC_JPY")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": "subscribe_lightning_board_BTC_JPY",
                "method": "subscribe",
                "params": {"channel": "lightning_board_BTC_JPY"},
            })
        );
    }

    #[test]
    fn test_parse_subscription_ack() {
        let msg = parse_frame(r#"{"jsonrpc":"2.0","id":"subscribe_lightning_board_BTC_JPY","result":true}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            msg,
            FeedMessage::SubscriptionAck {
                id: "subscribe_lightning_board_BTC_JPY".to_string()
            }
        );
        assert_eq!(msg.identifier(), "subscribe_lightning_board_BTC_JPY");
    }

    #[test]
    fn test_parse_channel_message() {
        let text = r#"{
            "jsonrpc": "2.0",
            "method": "channelMessage",
            "params": {
                "channel": "lightning_board_BTC_JPY",
                "message": {"mid_price": 35625, "bids": [], "asks": [{"price": 35630, "size": 0}]}
            }
        }"#;

        let msg = parse_frame(text).unwrap().unwrap();
        match &msg {
            FeedMessage::Channel { channel, message } => {
                assert_eq!(channel, "lightning_board_BTC_JPY");
                assert_eq!(message["mid_price"], 35625);
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert_eq!(msg.identifier(), "lightning_board_BTC_JPY");
    }

    #[test]
    fn test_parse_ignores_rejections_and_errors() {
        assert!(parse_frame(r#"{"jsonrpc":"2.0","id":"subscribe_x","result":false}"#)
            .unwrap()
            .is_none());
        assert!(parse_frame(
            r#"{"jsonrpc":"2.0","id":"subscribe_x","error":{"code":-32600,"message":"Invalid Request"}}"#
        )
        .unwrap()
        .is_none());
        assert!(parse_frame(r#"{"jsonrpc":"2.0","method":"somethingElse"}"#)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_frame("not json").is_err());
        assert!(parse_frame(r#"{"method":"channelMessage"}"#).is_err());
    }

    #[test]
    fn test_config_defaults() {
        let cfg = LightstreamConfig::default();
        assert_eq!(cfg.url, LIGHTSTREAM_WSS_URL);
        assert!(cfg.reconnect_max_delay_ms >= cfg.reconnect_base_delay_ms);
    }
}
