//! 出站分包
//!
//! 平台的发送接口每次最多携带一个附件 (图片或转发内容)，
//! 因此一条宿主消息可能拆成多次调用，按顺序逐个发送。

use crate::error;
use crate::error::Result;
use crate::markup::{self, Token};
use crate::opq::api::{self, LuaApi, SendMsgParams};

/// 文字与图片合并发送时的标记，平台据此把文字当作图片说明
pub const PIC_FLAG: &str = "[PICFLAG]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    PictureUrl(String),
    PictureBase64(String),
    Forward { field: i32, buf: String },
}

/// 一次平台发送调用的内容
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendPacket {
    pub content: String,
    pub attachment: Option<Attachment>,
}

impl SendPacket {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.attachment.is_none()
    }

    fn has_picture(&self) -> bool {
        matches!(
            self.attachment,
            Some(Attachment::PictureUrl(_) | Attachment::PictureBase64(_))
        )
    }

    /// 组装 `SendMsg` 参数
    pub fn to_params(&self, route: Route) -> SendMsgParams {
        let (to_user, send_to_type, groupid) = route.target();
        let mut params = SendMsgParams {
            send_msg_type: "TextMsg",
            content: self.content.clone(),
            at_user: 0,
            to_user,
            send_to_type,
            groupid,
            pic_url: None,
            pic_base64_buf: None,
            file_md5: None,
            flash_pic: None,
            forward_buf: None,
            forward_field: None,
        };
        match &self.attachment {
            Some(Attachment::Forward { field, buf }) => {
                params.send_msg_type = "ForwordMsg";
                params.forward_buf = Some(buf.clone());
                params.forward_field = Some(*field);
            }
            Some(Attachment::PictureUrl(url)) => {
                params.send_msg_type = "PicMsg";
                params.pic_url = Some(url.clone());
                params.pic_base64_buf = Some(String::new());
                params.file_md5 = Some(String::new());
                params.flash_pic = Some(0);
            }
            Some(Attachment::PictureBase64(data)) => {
                params.send_msg_type = "PicMsg";
                params.pic_url = Some(String::new());
                params.pic_base64_buf = Some(data.clone());
                params.file_md5 = Some(String::new());
                params.flash_pic = Some(0);
            }
            None => {}
        }
        params
    }
}

/// 发送目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Group(u64),
    /// 私聊；`group` 为消息来源群 (临时会话)，没有时为 0
    Private { user: u64, group: u64 },
}

impl Route {
    /// (toUser, sendToType, groupid)
    fn target(self) -> (u64, u8, u64) {
        match self {
            Route::Group(group) => (group, 2, 0),
            Route::Private { user, group } => (user, 1, group),
        }
    }
}

/// 当前包已有内容时，新图片的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImagePlacement {
    /// 当前包为空：直接挂上图片
    Attach,
    /// 当前包已有图片：先发出当前包，新图片另起一包
    FlushThenAttach,
    /// 当前包只有文字：文字加 PICFLAG 作为说明，挂上图片后立即发出
    CaptionThenFlush,
}

impl ImagePlacement {
    fn decide(current: &SendPacket) -> Self {
        match (current.is_empty(), current.has_picture(), current.content.is_empty()) {
            (true, _, _) => ImagePlacement::Attach,
            (false, true, _) => ImagePlacement::FlushThenAttach,
            (false, false, false) => ImagePlacement::CaptionThenFlush,
            // 只有转发内容的包不会停留在累加器里，这里按“先发出”处理
            (false, false, true) => ImagePlacement::FlushThenAttach,
        }
    }
}

/// 分包状态机：累加当前包，按规则切分
#[derive(Debug, Default)]
pub struct Packetizer {
    current: SendPacket,
    packets: Vec<SendPacket>,
}

impl Packetizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: Token) {
        match token {
            Token::Text(text) => self.current.content.push_str(&text),
            Token::Face(id) => {
                self.current.content.push_str(&format!("[表情{}]", id));
            }
            Token::AtAll => self.current.content.push_str("[ATALL()]"),
            Token::AtUser(id) => {
                self.current.content.push_str(&format!("[ATUSER({})]", id));
            }
            Token::ImageOnline(url) => self.push_picture(Attachment::PictureUrl(url)),
            Token::ImageBase64(data) => self.push_picture(Attachment::PictureBase64(data)),
            Token::BigFace { field, buf } => {
                self.flush();
                self.packets.push(SendPacket {
                    content: String::new(),
                    attachment: Some(Attachment::Forward { field, buf }),
                });
            }
        }
    }

    fn push_picture(&mut self, picture: Attachment) {
        match ImagePlacement::decide(&self.current) {
            ImagePlacement::Attach => {
                self.current.attachment = Some(picture);
            }
            ImagePlacement::FlushThenAttach => {
                self.flush();
                self.current.attachment = Some(picture);
            }
            ImagePlacement::CaptionThenFlush => {
                self.current.content.insert_str(0, PIC_FLAG);
                self.current.attachment = Some(picture);
                self.flush();
            }
        }
    }

    /// 发出当前包 (空包不发)
    fn flush(&mut self) {
        let packet = std::mem::take(&mut self.current);
        if !packet.is_empty() {
            self.packets.push(packet);
        }
    }

    pub fn finish(mut self) -> Vec<SendPacket> {
        self.flush();
        self.packets
    }
}

pub fn packetize_tokens(tokens: impl IntoIterator<Item = Token>) -> Vec<SendPacket> {
    let mut packetizer = Packetizer::new();
    for token in tokens {
        packetizer.push(token);
    }
    packetizer.finish()
}

/// 宿主标记 -> 发送包序列；big_face 格式错误时整条消息放弃
pub fn packetize(message: &str) -> Result<Vec<SendPacket>> {
    Ok(packetize_tokens(markup::parse(message)?))
}

/// 依次发送所有包，任一失败即中止，已发出的包不回滚
pub async fn dispatch(api: &dyn LuaApi, route: Route, packets: &[SendPacket]) -> Result<()> {
    for (index, packet) in packets.iter().enumerate() {
        if let Err(e) = api::send_msg(api, &packet.to_params(route)).await {
            error!(
                target: "Packetizer",
                "发送第 {}/{} 个包失败 ({:?}): {}",
                index + 1,
                packets.len(),
                route,
                e
            );
            return Err(e);
        }
    }
    Ok(())
}
