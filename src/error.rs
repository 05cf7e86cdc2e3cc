use thiserror::Error;

/// 适配器统一错误类型
///
/// 名称解析层不区分网络失败与“找不到”，调用方只看到一个错误；
/// 入站解码错误只会丢弃当前事件，出站格式错误只会放弃当前发送请求。
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("传输失败: {0}")]
    Transport(String),

    /// 平台返回了非零的 Ret / code
    #[error("[Code: {code}] {message}")]
    Platform { code: i64, message: String },

    #[error("未找到: {0}")]
    NotFound(String),

    #[error("无法解析的消息: {0}")]
    Decode(String),

    #[error("消息格式错误: {0}")]
    Format(String),

    #[error("无效的 ID: {0}")]
    InvalidId(#[from] std::num::ParseIntError),

    #[error("配置错误: {0}")]
    Config(String),
}

impl Error {
    pub fn platform(code: i64, message: impl Into<String>) -> Self {
        Self::Platform {
            code,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Self::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// 解析十进制平台 ID
pub fn parse_id(id: &str) -> Result<u64> {
    Ok(id.parse::<u64>()?)
}
