//! 极简 socket.io 客户端 (Engine.IO v3，仅 websocket 传输)
//!
//! OPQ 通过 socket.io 推送 `OnGroupMsgs` / `OnFriendMsgs` / `OnEvents`，
//! 连接后需要以 ack 方式发送 `GetWebConn` 完成绑定。

use crate::error::{Error, Result};
use crate::matcher::AckMatcher;
use crate::{debug, warn};
use futures_util::future::BoxFuture;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::AbortHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

pub type TraitSink = Box<dyn Sink<WsMessage, Error = WsError> + Send + Unpin>;
pub type TraitStream = Box<dyn Stream<Item = std::result::Result<WsMessage, WsError>> + Send + Unpin>;
pub type LockedWriter = Arc<AsyncMutex<TraitSink>>;

/// 事件处理函数：事件名 + 第一个参数
pub type EventHandler = Arc<dyn Fn(String, Value) -> BoxFuture<'static, ()> + Send + Sync>;

pub fn socket_url(addr: &str) -> String {
    format!("ws://{}/socket.io/?EIO=3&transport=websocket", addr)
}

/// 解析后的 socket.io 帧
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open { ping_interval: Duration },
    Close,
    Ping,
    Pong,
    Connect,
    Disconnect,
    Event {
        name: String,
        data: Value,
        ack: Option<u64>,
    },
    Ack { id: u64, args: Vec<Value> },
    Error(String),
    Noop,
}

#[derive(serde::Deserialize)]
struct Handshake {
    #[serde(rename = "pingInterval", default = "default_ping_interval")]
    ping_interval: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

/// 拆出数字 ack id 与后面的 JSON 部分
fn split_ack_id(s: &str) -> (Option<u64>, &str) {
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return (None, s);
    }
    (s[..digits].parse().ok(), &s[digits..])
}

pub fn parse_frame(text: &str) -> Result<Frame> {
    let mut chars = text.chars();
    let frame = match chars.next() {
        Some('0') => {
            let hs: Handshake = serde_json::from_str(chars.as_str())?;
            Frame::Open {
                ping_interval: Duration::from_millis(hs.ping_interval),
            }
        }
        Some('1') => Frame::Close,
        Some('2') => Frame::Ping,
        Some('3') => Frame::Pong,
        Some('4') => parse_packet(chars.as_str())?,
        Some('6') | None => Frame::Noop,
        Some(other) => {
            return Err(Error::Transport(format!("未知的 Engine.IO 帧类型: {}", other)));
        }
    };
    Ok(frame)
}

fn parse_packet(body: &str) -> Result<Frame> {
    let mut chars = body.chars();
    let frame = match chars.next() {
        Some('0') => Frame::Connect,
        Some('1') => Frame::Disconnect,
        Some('2') => {
            let (ack, json) = split_ack_id(chars.as_str());
            let mut bytes = json.as_bytes().to_vec();
            let mut args: Vec<Value> = simd_json::serde::from_slice(&mut bytes)
                .map_err(|e| Error::Transport(format!("事件帧解析失败: {}", e)))?;
            if args.is_empty() {
                return Err(Error::Transport("事件帧缺少事件名".into()));
            }
            let name = match args.remove(0) {
                Value::String(name) => name,
                other => return Err(Error::Transport(format!("事件名无效: {}", other))),
            };
            let data = if args.is_empty() {
                Value::Null
            } else {
                args.remove(0)
            };
            Frame::Event { name, data, ack }
        }
        Some('3') => {
            let (id, json) = split_ack_id(chars.as_str());
            let id = id.ok_or_else(|| Error::Transport("ack 帧缺少 id".into()))?;
            let args = if json.is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(json)?
            };
            Frame::Ack { id, args }
        }
        Some('4') => Frame::Error(chars.as_str().to_string()),
        _ => Frame::Noop,
    };
    Ok(frame)
}

/// 编码一个事件帧，`ack` 为需要对方回应时的 id
pub fn encode_event(name: &str, arg: &Value, ack: Option<u64>) -> Result<String> {
    let payload = serde_json::to_string(&[Value::String(name.to_string()), arg.clone()])?;
    Ok(match ack {
        Some(id) => format!("42{}{}", id, payload),
        None => format!("42{}", payload),
    })
}

/// 一条 socket.io 连接的发送端
pub struct Socket {
    writer: LockedWriter,
    acks: AckMatcher,
    next_ack: AtomicU64,
    ping_task: std::sync::Mutex<Option<AbortHandle>>,
}

impl Socket {
    pub fn new(writer: TraitSink) -> Self {
        Self {
            writer: Arc::new(AsyncMutex::new(writer)),
            acks: AckMatcher::new(),
            next_ack: AtomicU64::new(0),
            ping_task: std::sync::Mutex::new(None),
        }
    }

    /// 建立 websocket 连接，失败时按固定间隔重试
    pub async fn connect(
        addr: &str,
        retries: u32,
        delay: Duration,
    ) -> Result<(Arc<Socket>, TraitStream)> {
        let url = socket_url(addr);
        let mut last_err = None;
        for attempt in 1..=retries.max(1) {
            match connect_async(url.as_str()).await {
                Ok((ws_stream, _)) => {
                    let (write_half, read_half) = ws_stream.split();
                    let socket = Arc::new(Socket::new(Box::new(write_half)));
                    return Ok((socket, Box::new(read_half)));
                }
                Err(e) => {
                    warn!(
                        target: "Socket",
                        "连接 OPQ 失败 ({}/{}): {}，{} 秒后重试",
                        attempt,
                        retries,
                        e,
                        delay.as_secs()
                    );
                    last_err = Some(e);
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(match last_err {
            Some(e) => Error::WebSocket(e),
            None => Error::Transport("未尝试连接".into()),
        })
    }

    async fn send_raw(&self, text: String) -> Result<()> {
        let mut guard = self.writer.lock().await;
        guard.send(WsMessage::Text(text.into())).await?;
        Ok(())
    }

    pub async fn emit(&self, name: &str, arg: &Value) -> Result<()> {
        self.send_raw(encode_event(name, arg, None)?).await
    }

    /// 发送事件并等待对方 ack
    pub async fn emit_with_ack(
        &self,
        name: &str,
        arg: &Value,
        timeout: Duration,
    ) -> Result<Vec<Value>> {
        let id = self.next_ack.fetch_add(1, Ordering::SeqCst);
        let rx = self.acks.register(id);
        if let Err(e) = self.send_raw(encode_event(name, arg, Some(id))?).await {
            self.acks.cancel(id);
            return Err(e);
        }
        self.acks
            .wait(id, rx, timeout)
            .await
            .ok_or_else(|| Error::Transport(format!("{} 等待 ack 超时", name)))
    }

    fn start_ping(self: &Arc<Self>, interval: Duration) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let Some(socket) = weak.upgrade() else { break };
                if let Err(e) = socket.send_raw("2".to_string()).await {
                    warn!(target: "Socket", "发送心跳失败: {}", e);
                    break;
                }
            }
        });
        if let Ok(mut slot) = self.ping_task.lock()
            && let Some(old) = slot.replace(handle.abort_handle())
        {
            old.abort();
        }
    }

    pub fn stop_ping(&self) {
        if let Ok(mut slot) = self.ping_task.lock()
            && let Some(handle) = slot.take()
        {
            handle.abort();
        }
    }

    /// 处理一帧文本；返回 false 表示对方要求断开
    pub async fn handle_text(self: &Arc<Self>, text: &str, handler: &EventHandler) -> bool {
        let frame = match parse_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(target: "Socket", "无法解析的帧: {} ({})", text, e);
                return true;
            }
        };

        match frame {
            Frame::Open { ping_interval } => {
                debug!(target: "Socket", "握手完成，心跳间隔 {:?}", ping_interval);
                self.start_ping(ping_interval);
            }
            Frame::Ping => {
                if let Err(e) = self.send_raw("3".to_string()).await {
                    warn!(target: "Socket", "回应心跳失败: {}", e);
                }
            }
            Frame::Event { name, data, ack } => {
                if let Some(id) = ack
                    && let Err(e) = self.send_raw(format!("43{}[]", id)).await
                {
                    warn!(target: "Socket", "回应 ack 失败: {}", e);
                }
                // 每个事件独立处理，互不阻塞
                tokio::spawn(handler(name, data));
            }
            Frame::Ack { id, args } => {
                if !self.acks.dispatch(id, args) {
                    debug!(target: "Socket", "收到未知 ack: {}", id);
                }
            }
            Frame::Error(msg) => warn!(target: "Socket", "服务端错误: {}", msg),
            Frame::Close | Frame::Disconnect => return false,
            Frame::Pong | Frame::Connect | Frame::Noop => {}
        }
        true
    }

    /// 读循环，直到连接关闭
    pub async fn listen(
        self: Arc<Self>,
        mut read_half: TraitStream,
        handler: EventHandler,
    ) -> Result<()> {
        let result = loop {
            match read_half.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    if !self.handle_text(text.as_str(), &handler).await {
                        break Ok(());
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break Ok(()),
                Some(Err(e)) => break Err(Error::WebSocket(e)),
                Some(Ok(_)) => {}
            }
        };
        self.stop_ping();
        result
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.stop_ping();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("2", Frame::Ping)]
    #[case("3", Frame::Pong)]
    #[case("40", Frame::Connect)]
    #[case("41", Frame::Disconnect)]
    #[case("1", Frame::Close)]
    fn parses_control_frames(#[case] text: &str, #[case] expected: Frame) {
        assert_eq!(parse_frame(text).unwrap(), expected);
    }

    #[test]
    fn parses_open_frame() {
        let frame = parse_frame(r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":60000}"#)
            .unwrap();
        assert_eq!(
            frame,
            Frame::Open {
                ping_interval: Duration::from_millis(25000)
            }
        );
    }

    #[test]
    fn parses_event_frame() {
        let frame = parse_frame(r#"42["OnGroupMsgs",{"CurrentQQ":1}]"#).unwrap();
        assert_eq!(
            frame,
            Frame::Event {
                name: "OnGroupMsgs".into(),
                data: json!({ "CurrentQQ": 1 }),
                ack: None
            }
        );
    }

    #[test]
    fn parses_ack_frame() {
        let frame = parse_frame(r#"4312["OK"]"#).unwrap();
        assert_eq!(
            frame,
            Frame::Ack {
                id: 12,
                args: vec![json!("OK")]
            }
        );
    }

    #[test]
    fn encodes_event_with_ack_id() {
        let text = encode_event("GetWebConn", &json!("10086"), Some(0)).unwrap();
        assert_eq!(text, r#"420["GetWebConn","10086"]"#);
    }

    fn channel_socket() -> (Arc<Socket>, tokio::sync::mpsc::UnboundedReceiver<WsMessage>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<WsMessage>();
        let sink = futures_util::sink::unfold(tx, |tx, msg: WsMessage| async move {
            tx.send(msg).map_err(|_| WsError::ConnectionClosed)?;
            Ok::<_, WsError>(tx)
        });
        (Arc::new(Socket::new(Box::new(Box::pin(sink)))), rx)
    }

    fn noop_handler() -> EventHandler {
        Arc::new(|_: String, _: Value| -> BoxFuture<'static, ()> { Box::pin(async {}) })
    }

    #[tokio::test]
    async fn emit_with_ack_resolves_on_reply() {
        let (socket, mut rx) = channel_socket();
        let responder = socket.clone();
        tokio::spawn(async move {
            if let Some(WsMessage::Text(text)) = rx.recv().await {
                assert!(text.as_str().starts_with("420"));
                responder
                    .handle_text(r#"430["OK"]"#, &noop_handler())
                    .await;
            }
        });

        let args = socket
            .emit_with_ack("GetWebConn", &json!("1"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(args, vec![json!("OK")]);
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let (socket, mut rx) = channel_socket();
        assert!(socket.handle_text("2", &noop_handler()).await);
        match rx.recv().await {
            Some(WsMessage::Text(text)) => assert_eq!(text.as_str(), "3"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn events_reach_handler() {
        let (socket, _rx) = channel_socket();
        let (tx, mut events) = tokio::sync::mpsc::unbounded_channel();
        let handler: EventHandler = Arc::new(move |name: String, data: Value| -> BoxFuture<'static, ()> {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send((name, data));
            })
        });
        socket
            .handle_text(r#"42["OnEvents",{"a":1}]"#, &handler)
            .await;
        assert_eq!(
            events.recv().await,
            Some(("OnEvents".to_string(), json!({ "a": 1 })))
        );
    }

    #[tokio::test]
    async fn close_frame_ends_session() {
        let (socket, _rx) = channel_socket();
        assert!(!socket.handle_text("41", &noop_handler()).await);
    }
}
