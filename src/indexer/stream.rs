use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::StreamConfig;

use super::decoder::transfer_topic;
use super::types::RawLog;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Failure classes of the streaming transport. Every variant ends the
/// current connection; the owning session reconnects after
/// [`StreamError::retry_delay`].
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("subscription failed: {0}")]
    Subscribe(String),
    #[error("no subscription acknowledgment within {0:?}")]
    SubscribeTimeout(Duration),
    #[error("connection closed: {0}")]
    Closed(String),
    #[error("read error: {0}")]
    Read(String),
    #[error("write error: {0}")]
    Write(String),
    #[error("no pong within {0:?}")]
    PingTimeout(Duration),
}

impl StreamError {
    /// Subscription failures wait longer than transport failures before the
    /// next connect attempt.
    pub fn retry_delay(&self, config: &StreamConfig) -> Duration {
        match self {
            Self::Subscribe(_) | Self::SubscribeTimeout(_) => config.resubscribe_delay(),
            _ => config.reconnect_delay(),
        }
    }
}

/// `eth_subscribe` request for Transfer logs from the given contracts.
pub fn subscribe_request(addresses: &[String]) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_subscribe",
        "params": [
            "logs",
            {
                "address": addresses,
                "topics": [transfer_topic()],
            }
        ]
    })
}

/// Extract the subscription id from the first reply to `eth_subscribe`.
pub fn parse_subscription_ack(text: &str) -> Result<String, StreamError> {
    let reply: Value = serde_json::from_str(text)
        .map_err(|e| StreamError::Subscribe(format!("non-JSON acknowledgment: {}", e)))?;

    match reply.get("result") {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(Value::Null) | None => {
            let reason = reply
                .get("error")
                .map(Value::to_string)
                .unwrap_or_else(|| text.to_string());
            Err(StreamError::Subscribe(reason))
        }
        Some(other) => Ok(other.to_string()),
    }
}

#[derive(Deserialize)]
struct Notification {
    params: NotificationParams,
}

#[derive(Deserialize)]
struct NotificationParams {
    result: RawLog,
}

/// The log carried by an `eth_subscription` notification, or `None` for any
/// other message.
pub fn parse_notification(text: &str) -> Option<RawLog> {
    serde_json::from_str::<Notification>(text)
        .ok()
        .map(|n| n.params.result)
}

/// Open the websocket connection.
pub async fn connect(url: &str, timeout: Duration) -> Result<WsStream, StreamError> {
    match tokio::time::timeout(timeout, connect_async(url)).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(StreamError::Connect(e.to_string())),
        Err(_) => Err(StreamError::ConnectTimeout(timeout)),
    }
}

/// A live Transfer log subscription over one websocket connection.
///
/// Dropping it closes the socket.
pub struct LogSubscription {
    pub id: String,
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    keepalive: Interval,
    ping_timeout: Duration,
    pong_deadline: Option<Instant>,
}

impl LogSubscription {
    /// Send the subscription request and wait for exactly one acknowledgment.
    pub async fn subscribe(
        ws: WsStream,
        addresses: &[String],
        config: &StreamConfig,
    ) -> Result<Self, StreamError> {
        let (mut sink, mut stream) = ws.split();

        sink.send(Message::text(subscribe_request(addresses).to_string()))
            .await
            .map_err(|e| StreamError::Write(e.to_string()))?;

        let ack = tokio::time::timeout(config.subscribe_timeout(), next_text(&mut stream))
            .await
            .map_err(|_| StreamError::SubscribeTimeout(config.subscribe_timeout()))??;
        let id = parse_subscription_ack(&ack)?;

        let ping_interval = config.ping_interval();
        let mut keepalive = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(Self {
            id,
            sink,
            stream,
            keepalive,
            ping_timeout: config.ping_timeout(),
            pong_deadline: None,
        })
    }

    /// Wait for the next Transfer log notification, keeping the connection
    /// alive meanwhile. Messages that are not notifications are skipped.
    ///
    /// Frames already received are read before the pong deadline is checked,
    /// and any inbound frame counts as an answer to an outstanding ping.
    pub async fn next_log(&mut self) -> Result<RawLog, StreamError> {
        loop {
            let pong_deadline = self.pong_deadline;
            let pong_overdue = async move {
                match pong_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;

                message = self.stream.next() => {
                    if let Some(Ok(_)) = &message {
                        self.pong_deadline = None;
                    }
                    match message {
                        Some(Ok(Message::Text(text))) => match parse_notification(text.as_str()) {
                            Some(log) => return Ok(log),
                            None => tracing::debug!(
                                payload = %text.as_str(),
                                "Ignoring non-notification message"
                            ),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|f| f.reason.as_str().to_string())
                                .unwrap_or_default();
                            return Err(StreamError::Closed(reason));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(StreamError::Read(e.to_string())),
                        None => return Err(StreamError::Closed("end of stream".to_string())),
                    }
                }
                _ = pong_overdue => return Err(StreamError::PingTimeout(self.ping_timeout)),
                _ = self.keepalive.tick() => {
                    if self.pong_deadline.is_none() {
                        self.sink
                            .send(Message::Ping(Default::default()))
                            .await
                            .map_err(|e| StreamError::Write(e.to_string()))?;
                        self.pong_deadline = Some(Instant::now() + self.ping_timeout);
                    }
                }
            }
        }
    }
}

/// Next text frame, skipping control frames.
async fn next_text(stream: &mut SplitStream<WsStream>) -> Result<String, StreamError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_string()),
            Some(Ok(Message::Close(_))) | None => {
                return Err(StreamError::Closed("closed during subscription".to_string()))
            }
            Some(Ok(Message::Binary(_))) => {
                return Err(StreamError::Subscribe("binary acknowledgment".to_string()))
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(StreamError::Read(e.to_string())),
        }
    }
}
