use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    // 日志级别 (debug / info / warn / error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // OPQ 连接配置
    #[serde(default)]
    pub opq: OpqConfig,

    // 名称缓存配置
    #[serde(default)]
    pub cache: CacheConfig,

    // 连接与握手重试配置
    #[serde(default)]
    pub connect: ConnectConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpqConfig {
    /// OPQ 服务地址 (host:port，不含协议头)
    #[serde(default = "default_addr")]
    pub addr: String,

    /// 机器人 QQ 号
    #[serde(default)]
    pub qq: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_secs")]
    pub sweep_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConnectConfig {
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_addr() -> String {
    "127.0.0.1:8888".to_string()
}

fn default_ttl_secs() -> u64 {
    600
}

fn default_sweep_secs() -> u64 {
    300
}

fn default_retries() -> u32 {
    5
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_ack_timeout_secs() -> u64 {
    5
}

fn default_reconnect_delay_secs() -> u64 {
    3
}

impl Default for OpqConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            qq: 0,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_secs: default_sweep_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_secs)
    }
}

impl ConnectConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            ack_timeout_secs: default_ack_timeout_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            opq: OpqConfig::default(),
            cache: CacheConfig::default(),
            connect: ConnectConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// 配置文件管理
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 加载配置，如果文件不存在则写入并返回默认配置
    pub async fn load(&self) -> Result<AppConfig> {
        if !self.path.exists() {
            let default_cfg = AppConfig::default();
            self.save_atomic(&default_cfg).await?;
            return Ok(default_cfg);
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        AppConfig::from_toml(&content)
    }

    /// 原子写入配置（写临时文件 -> Rename 覆盖）
    pub async fn save_atomic(&self, cfg: &AppConfig) -> Result<()> {
        let content = toml::to_string_pretty(cfg)?;
        let path = self.path.clone();
        let tmp_path = self.path.with_extension("tmp");

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }

            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
            std::fs::rename(&tmp_path, &path)?;
            Ok(())
        })
        .await
        .map_err(|e| crate::error::Error::Config(e.to_string()))??;

        Ok(())
    }
}
