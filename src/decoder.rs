use crate::error::{Error, Result};
use crate::markup::{Token, escape};
use crate::opq::model::{AtMsg, BigFaceMsg, PicMsg};
use crate::resolver::Resolver;
use crate::{debug, warn};
use regex::{Captures, Regex};
use std::sync::{Arc, OnceLock};

/// 平台上“@全体成员”的显示文本
pub const AT_ALL_TEXT: &str = "@全体成员";

static FACE_REGEX: OnceLock<Regex> = OnceLock::new();
static AT_FALLBACK_REGEX: OnceLock<Regex> = OnceLock::new();

/// 平台没有转义机制，表情只能在转义之后以 `\[表情N\]` 的形式识别
fn face_regex() -> &'static Regex {
    FACE_REGEX.get_or_init(|| Regex::new(r"\\\[表情(\d+)\\\]").expect("Invalid Regex"))
}

/// `@` 到下一个空格 (含空格) 为止
fn at_fallback_regex() -> &'static Regex {
    AT_FALLBACK_REGEX.get_or_init(|| Regex::new(r"@.*? ").expect("Invalid Regex"))
}

/// 转义平台文本并还原其中的表情
pub fn normalize_text(content: &str) -> String {
    face_regex()
        .replace_all(&escape(content), "[face:$1]")
        .into_owned()
}

/// 平台入站消息
#[derive(Debug, Clone)]
pub enum WireMessage {
    Text(String),
    At(AtMsg),
    Pic(PicMsg),
    BigFace(BigFaceMsg),
}

impl WireMessage {
    /// 根据 `MsgType` 解析 `Content`；非文本类型的 Content 是一段 JSON
    pub fn parse(msg_type: &str, content: &str) -> Result<Self> {
        let msg = match msg_type {
            "TextMsg" => WireMessage::Text(content.to_string()),
            "AtMsg" => WireMessage::At(from_json(msg_type, content)?),
            "PicMsg" => WireMessage::Pic(from_json(msg_type, content)?),
            "BigFaceMsg" => WireMessage::BigFace(from_json(msg_type, content)?),
            other => return Err(Error::Decode(format!("未知消息类型: {}", other))),
        };
        Ok(msg)
    }
}

fn from_json<T: serde::de::DeserializeOwned>(msg_type: &str, content: &str) -> Result<T> {
    serde_json::from_str(content).map_err(|e| Error::Decode(format!("{} 内容无效: {}", msg_type, e)))
}

/// 入站解码器：平台消息 -> 宿主标记
pub struct Decoder {
    resolver: Arc<Resolver>,
}

impl Decoder {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }

    /// 解码一条平台消息；失败时记录日志并返回错误，由调用方丢弃该事件
    pub async fn decode(&self, msg_type: &str, content: &str) -> Result<String> {
        let result = match WireMessage::parse(msg_type, content) {
            Ok(msg) => Ok(self.decode_wire(&msg).await),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(target: "Decoder", "{}，原始内容: {}", e, content);
        }
        result
    }

    pub async fn decode_wire(&self, msg: &WireMessage) -> String {
        match msg {
            WireMessage::Text(content) => normalize_text(content),
            WireMessage::At(at) => self.convert_at(at).await,
            WireMessage::Pic(pic) => {
                let mut out = self.convert_at(&pic.at).await;
                for p in &pic.group_pic {
                    out.push_str(&Token::ImageOnline(p.url.clone()).to_string());
                }
                out
            }
            WireMessage::BigFace(face) => Token::BigFace {
                field: face.forward_field,
                buf: face.forward_buf.clone(),
            }
            .to_string(),
        }
    }

    /// 还原 @ 提及
    ///
    /// 第一轮按昵称匹配 `@昵称` 的首次出现；匹配不到或解析失败的用户延后，
    /// 第二轮按 `@xxx ` 模式从左到右依次分配给延后的用户。多余的匹配保留原文，
    /// 多余的用户直接丢弃。
    async fn convert_at(&self, at: &AtMsg) -> String {
        let mut msg = normalize_text(&at.content);
        let mut deferred = Vec::new();

        for &user in &at.user_id {
            if user == 0 {
                msg = msg.replace(AT_ALL_TEXT, &Token::AtAll.to_string());
                continue;
            }

            let nick = match self.resolver.user_name(user).await {
                Ok(nick) => nick,
                Err(e) => {
                    debug!(target: "Decoder", "无法解析 {} 的昵称: {}", user, e);
                    deferred.push(user);
                    continue;
                }
            };

            let desc = format!("@{}", escape(&nick));
            match msg.find(&desc) {
                Some(start) => {
                    msg.replace_range(start..start + desc.len(), &Token::AtUser(user).to_string());
                }
                None => deferred.push(user),
            }
        }

        if !deferred.is_empty() {
            let mut pending = deferred.into_iter();
            msg = at_fallback_regex()
                .replace_all(&msg, |caps: &Captures| match pending.next() {
                    Some(user) => format!("{} ", Token::AtUser(user)),
                    None => caps[0].to_string(),
                })
                .into_owned();
        }

        msg
    }
}
