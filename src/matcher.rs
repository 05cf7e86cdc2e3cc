use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

/// socket.io ack 等待表：按 ack id 把响应交给发起方
#[derive(Default)]
pub struct AckMatcher {
    waiters: Mutex<HashMap<u64, oneshot::Sender<Vec<Value>>>>,
}

impl AckMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个等待者，必须在发送请求之前调用
    pub fn register(&self, id: u64) -> oneshot::Receiver<Vec<Value>> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.insert(id, tx);
        }
        rx
    }

    /// 等待响应，超时返回 None 并清理等待者
    pub async fn wait(
        &self,
        id: u64,
        rx: oneshot::Receiver<Vec<Value>>,
        timeout: Duration,
    ) -> Option<Vec<Value>> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(args)) => Some(args),
            _ => {
                self.cancel(id);
                None
            }
        }
    }

    pub fn cancel(&self, id: u64) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.remove(&id);
        }
    }

    /// 分发一个 ack；没有对应等待者时返回 false
    pub fn dispatch(&self, id: u64, args: Vec<Value>) -> bool {
        let waiter = self.waiters.lock().ok().and_then(|mut w| w.remove(&id));
        match waiter {
            // 等待者可能已经超时放弃，忽略发送错误
            Some(tx) => {
                let _ = tx.send(args);
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.waiters.lock().map(|w| w.len()).unwrap_or(0)
    }
}
