// lib.rs
//
// ================================================================================
// OPQ Agent - QQ 平台适配器
//
// 架构：socket.io 事件推送 | LuaApiCaller 接口调用 | 宿主标记消息 | 定时缓存
// ================================================================================

pub mod account;
pub mod cache;
pub mod config;
pub mod decoder;
pub mod error;
pub mod log;
pub mod markup;
pub mod matcher;
pub mod opq;
pub mod packetizer;
pub mod resolver;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use account::{Account, AccountEvents, ChatMessage, ConsoleEvents, MsgKind, RequestDecision};
pub use config::{AppConfig, ConfigManager};
pub use error::{Error, Result};

use crate::cache::NameCache;
use crate::config::ConnectConfig;
use crate::opq::api::{HttpLuaApi, LuaApi};
use crate::opq::socket::Socket;
use crate::resolver::Resolver;
use crate::scheduler::Scheduler;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// 适配器构建器
pub struct AgentBuilder {
    config_path: PathBuf,
    opq: Option<(String, u64)>,
    events: Option<Arc<dyn AccountEvents>>,
}

impl AgentBuilder {
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    /// 覆盖配置文件中的 OPQ 地址与机器人 QQ
    pub fn opq(mut self, addr: impl Into<String>, qq: u64) -> Self {
        self.opq = Some((addr.into(), qq));
        self
    }

    pub fn events(mut self, events: impl AccountEvents + 'static) -> Self {
        self.events = Some(Arc::new(events));
        self
    }

    pub fn build(self) -> Agent {
        Agent {
            config_path: self.config_path,
            opq: self.opq,
            events: self.events.unwrap_or_else(|| Arc::new(ConsoleEvents)),
        }
    }
}

pub struct Agent {
    config_path: PathBuf,
    opq: Option<(String, u64)>,
    events: Arc<dyn AccountEvents>,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder {
            config_path: PathBuf::from("config.toml"),
            opq: None,
            events: None,
        }
    }

    /// 加载配置并保持与 OPQ 的连接
    ///
    /// 连接断开后按 `reconnect_delay` 重连；只有连接或握手重试耗尽才会返回错误。
    pub async fn run(self) -> Result<()> {
        let mut config = ConfigManager::new(&self.config_path).load().await?;
        if let Some((addr, qq)) = self.opq {
            config.opq.addr = addr;
            config.opq.qq = qq;
        }
        log::set_level(log::Level::parse(&config.log_level));

        let qq = config.opq.qq;
        if qq == 0 {
            return Err(Error::Config("未配置机器人 QQ 号 (opq.qq)".into()));
        }
        info!("启动 OPQ 适配器: {} (QQ {})", config.opq.addr, qq);

        let api: Arc<dyn LuaApi> = Arc::new(HttpLuaApi::new(&config.opq.addr, qq)?);
        let cache = Arc::new(NameCache::new(config.cache.ttl()));
        let scheduler = Scheduler::default();
        cache.spawn_sweeper(&scheduler, config.cache.sweep_interval());

        let resolver = Arc::new(Resolver::new(api, cache));
        let account = Arc::new(Account::new(qq, resolver, self.events));
        let handler = account.event_handler();

        loop {
            let (socket, read_half) = Socket::connect(
                &config.opq.addr,
                config.connect.retries,
                config.connect.retry_delay(),
            )
            .await?;
            let listener = tokio::spawn(socket.clone().listen(read_half, handler.clone()));

            if let Err(e) = handshake(&socket, qq, &config.connect).await {
                error!("GetWebConn 握手失败: {}", e);
                listener.abort();
                return Err(e);
            }
            info!("已连接 OPQ");

            match listener.await {
                Ok(Ok(())) => warn!("OPQ 连接已关闭"),
                Ok(Err(e)) => warn!("OPQ 连接异常断开: {}", e),
                Err(e) => warn!("读循环异常退出: {}", e),
            }
            drop(socket);

            tokio::time::sleep(config.connect.reconnect_delay()).await;
            info!("正在重连 OPQ...");
        }
    }
}

/// 向 OPQ 注册当前连接，对方以 `"OK"` 作为 ack
async fn handshake(socket: &Arc<Socket>, qq: u64, cfg: &ConnectConfig) -> Result<()> {
    let arg = Value::String(qq.to_string());
    let retries = cfg.retries.max(1);
    let mut last_err = Error::Transport("未尝试握手".into());

    for attempt in 1..=retries {
        match socket.emit_with_ack("GetWebConn", &arg, cfg.ack_timeout()).await {
            Ok(args) if args.first().and_then(Value::as_str) == Some("OK") => return Ok(()),
            Ok(args) => {
                last_err = Error::Transport(format!("GetWebConn 响应异常: {:?}", args));
            }
            Err(e) => last_err = e,
        }
        warn!("GetWebConn 失败 ({}/{}): {}", attempt, retries, last_err);
        if attempt < retries {
            tokio::time::sleep(cfg.retry_delay()).await;
        }
    }
    Err(last_err)
}
