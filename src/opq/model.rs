//! OPQ 线上数据结构
//!
//! 所有字段都可能缺省，反序列化时一律回退到默认值。
//! 注意 `Forword` 是平台原有的拼写，必须保持不变。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// 平台会把空列表、空字符串写成 `null`，按缺省值处理
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ================= 消息内容 =================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AtMsg {
    #[serde(rename = "Content", deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(rename = "UserID", deserialize_with = "null_as_default")]
    pub user_id: Vec<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PicMsg {
    #[serde(flatten)]
    pub at: AtMsg,
    #[serde(rename = "GroupPic", deserialize_with = "null_as_default")]
    pub group_pic: Vec<GroupPicInfo>,
    #[serde(rename = "Tips", deserialize_with = "null_as_default")]
    pub tips: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GroupPicInfo {
    #[serde(rename = "FileId")]
    pub file_id: i64,
    #[serde(rename = "FileMd5", deserialize_with = "null_as_default")]
    pub file_md5: String,
    #[serde(rename = "FileSize")]
    pub file_size: i64,
    #[serde(rename = "ForwordBuf", deserialize_with = "null_as_default")]
    pub forward_buf: String,
    #[serde(rename = "ForwordField")]
    pub forward_field: i32,
    #[serde(rename = "Url", deserialize_with = "null_as_default")]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BigFaceMsg {
    #[serde(rename = "Content", deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(rename = "ForwordBuf", deserialize_with = "null_as_default")]
    pub forward_buf: String,
    #[serde(rename = "ForwordField")]
    pub forward_field: i32,
    #[serde(rename = "Tips", deserialize_with = "null_as_default")]
    pub tips: String,
}

// ================= 推送事件 =================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, bound(deserialize = "T: Deserialize<'de> + Default"))]
pub struct Packet<T> {
    #[serde(rename = "Data")]
    pub data: T,
    #[serde(rename = "WebConnId", deserialize_with = "null_as_default")]
    pub web_conn_id: String,
}

/// socket.io 推送的事件外壳
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, bound(deserialize = "T: Deserialize<'de> + Default"))]
pub struct Envelope<T> {
    #[serde(rename = "CurrentPacket")]
    pub current_packet: Packet<T>,
    #[serde(rename = "CurrentQQ")]
    pub current_qq: u64,
}

pub type GroupMessageEvent = Envelope<GroupMessageData>;
pub type FriendMessageEvent = Envelope<FriendMessageData>;
pub type EventMessagePacket = Envelope<EventData>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GroupMessageData {
    #[serde(rename = "Content", deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(rename = "FromGroupId")]
    pub from_group_id: u64,
    #[serde(rename = "FromGroupName", deserialize_with = "null_as_default")]
    pub from_group_name: String,
    #[serde(rename = "FromNickName", deserialize_with = "null_as_default")]
    pub from_nick_name: String,
    #[serde(rename = "FromUserId")]
    pub from_user_id: u64,
    #[serde(rename = "MsgRandom")]
    pub msg_random: u64,
    #[serde(rename = "MsgSeq")]
    pub msg_seq: u64,
    #[serde(rename = "MsgTime")]
    pub msg_time: u64,
    #[serde(rename = "MsgType", deserialize_with = "null_as_default")]
    pub msg_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FriendMessageData {
    #[serde(rename = "Content", deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(rename = "FromUin")]
    pub from_uin: u64,
    #[serde(rename = "ToUin")]
    pub to_uin: u64,
    #[serde(rename = "MsgSeq")]
    pub msg_seq: u64,
    #[serde(rename = "MsgType", deserialize_with = "null_as_default")]
    pub msg_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EventData {
    /// 具体结构取决于 `EventName`，延后解析
    #[serde(rename = "EventData")]
    pub event_data: Value,
    #[serde(rename = "EventMsg")]
    pub event_msg: EventMessage,
    #[serde(rename = "EventName", deserialize_with = "null_as_default")]
    pub event_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EventMessage {
    #[serde(rename = "FromUin")]
    pub from_uin: u64,
    #[serde(rename = "ToUin")]
    pub to_uin: u64,
    #[serde(rename = "MsgType", deserialize_with = "null_as_default")]
    pub msg_type: String,
    #[serde(rename = "Content", deserialize_with = "null_as_default")]
    pub content: String,
}

pub const GROUP_EXIT_EVENT: &str = "ON_EVENT_GROUP_EXIT";
pub const GROUP_JOIN_EVENT: &str = "ON_EVENT_GROUP_JOIN";
pub const FRIEND_ADDED_EVENT: &str = "ON_EVENT_FRIEND_ADDED";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GroupExitEventData {
    #[serde(rename = "UserID")]
    pub user_id: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GroupJoinEventData {
    #[serde(rename = "InviteUin")]
    pub invite_uin: u64,
    #[serde(rename = "UserID")]
    pub user_id: u64,
    #[serde(rename = "UserName", deserialize_with = "null_as_default")]
    pub user_name: String,
}

/// 好友请求，处理时原样回传并填写 `Action`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FriendAddedEventData {
    #[serde(rename = "UserID")]
    pub user_id: u64,
    #[serde(rename = "FromType")]
    pub from_type: i32,
    #[serde(rename = "Field_9")]
    pub field_9: i64,
    #[serde(rename = "Content", deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(rename = "FromGroupId")]
    pub from_group_id: u64,
    #[serde(rename = "FromGroupName", deserialize_with = "null_as_default")]
    pub from_group_name: String,
    #[serde(rename = "Action")]
    pub action: i32,
}

// ================= API 响应 =================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserInfoResponse {
    pub code: i64,
    pub data: UserInfo,
    pub default: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub message: String,
    pub subcode: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(deserialize_with = "null_as_default")]
    pub avatar_url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub bitmap: String,
    pub commfrd: i64,
    pub friendship: i64,
    pub intimacy_score: i64,
    pub is_friend: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub logolabel: String,
    #[serde(deserialize_with = "null_as_default")]
    pub nickname: String,
    pub qzone: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub realname: String,
    #[serde(deserialize_with = "null_as_default")]
    pub smartname: String,
    pub uin: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GroupListResponse {
    #[serde(rename = "Count")]
    pub count: i64,
    #[serde(rename = "NextToken", deserialize_with = "null_as_default")]
    pub next_token: String,
    #[serde(rename = "TroopList", deserialize_with = "null_as_default")]
    pub group_list: Vec<GroupInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GroupInfo {
    #[serde(rename = "GroupId")]
    pub group_id: u64,
    #[serde(rename = "GroupName", deserialize_with = "null_as_default")]
    pub group_name: String,
    #[serde(rename = "GroupOwner")]
    pub group_owner: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemberListResponse {
    #[serde(rename = "GroupUin")]
    pub group_uin: u64,
    #[serde(rename = "LastUin")]
    pub last_uin: u64,
    #[serde(rename = "Count")]
    pub count: i64,
    #[serde(rename = "MemberList", deserialize_with = "null_as_default")]
    pub member_list: Vec<MemberInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemberInfo {
    #[serde(rename = "Age")]
    pub age: i64,
    #[serde(rename = "AutoRemark", deserialize_with = "null_as_default")]
    pub auto_remark: String,
    #[serde(rename = "GroupAdmin")]
    pub group_admin: i64,
    #[serde(rename = "GroupCard", deserialize_with = "null_as_default")]
    pub group_card: String,
    #[serde(rename = "JoinTime")]
    pub join_time: u64,
    #[serde(rename = "LastSpeakTime")]
    pub last_speak_time: u64,
    #[serde(rename = "MemberLevel")]
    pub member_level: i64,
    #[serde(rename = "MemberUin")]
    pub member_uin: u64,
    #[serde(rename = "NickName", deserialize_with = "null_as_default")]
    pub nick_name: String,
    #[serde(rename = "ShowName", deserialize_with = "null_as_default")]
    pub show_name: String,
    #[serde(rename = "SpecialTitle", deserialize_with = "null_as_default")]
    pub special_title: String,
}

impl MemberInfo {
    /// 群内显示名：优先群名片，其次昵称
    pub fn display_name(&self) -> &str {
        if self.group_card.is_empty() {
            &self.nick_name
        } else {
            &self.group_card
        }
    }
}

/// 通用操作结果 `{Ret, Msg}`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OpqErrorResponse {
    #[serde(rename = "Ret")]
    pub ret: i64,
    #[serde(rename = "Msg", deserialize_with = "null_as_default")]
    pub msg: String,
}

impl OpqErrorResponse {
    pub fn into_result(self) -> crate::error::Result<()> {
        if self.ret != 0 {
            return Err(crate::error::Error::platform(self.ret, self.msg));
        }
        Ok(())
    }
}
