use super::model::{
    FriendAddedEventData, GroupInfo, GroupListResponse, MemberListResponse, OpqErrorResponse,
    UserInfo, UserInfoResponse,
};
use crate::error::{Error, Result};
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use url::Url;

/// OPQ `LuaApiCaller` 调用接口
///
/// 一次调用 = 函数名 + JSON 参数 -> JSON 响应。网络失败与协议失败都以 `Err` 返回，
/// 本层不做重试。
pub trait LuaApi: Send + Sync {
    fn call<'a>(&'a self, func: &'a str, params: Value) -> BoxFuture<'a, Result<Value>>;
}

/// 基于 HTTP 的实现: `POST http://<addr>/v1/LuaApiCaller?funcname=..&timeout=10&qq=..`
pub struct HttpLuaApi {
    client: reqwest::Client,
    addr: String,
    qq: u64,
}

impl HttpLuaApi {
    pub fn new(addr: impl Into<String>, qq: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            addr: addr.into(),
            qq,
        })
    }

    fn endpoint(&self, func: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("http://{}/v1/LuaApiCaller", self.addr))
            .map_err(|e| Error::Config(format!("OPQ 地址无效 ({}): {}", self.addr, e)))?;
        url.query_pairs_mut()
            .append_pair("funcname", func)
            .append_pair("timeout", "10")
            .append_pair("qq", &self.qq.to_string());
        Ok(url)
    }
}

impl LuaApi for HttpLuaApi {
    fn call<'a>(&'a self, func: &'a str, params: Value) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let url = self.endpoint(func)?;
            let body = serde_json::to_vec(&params)?;
            let resp = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .body(body)
                .send()
                .await?;
            let bytes = resp.bytes().await?;
            if bytes.is_empty() {
                return Ok(Value::Null);
            }
            Ok(serde_json::from_slice(&bytes)?)
        })
    }
}

/// 通用的强类型调用
pub async fn call_action<P, R>(api: &dyn LuaApi, func: &str, params: P) -> Result<R>
where
    P: Serialize,
    R: DeserializeOwned,
{
    let params = serde_json::to_value(params)?;
    let reply = api.call(func, params).await?;
    Ok(serde_json::from_value(reply)?)
}

/// 只关心 `{Ret, Msg}` 的操作类调用
async fn call_checked<P: Serialize>(api: &dyn LuaApi, func: &str, params: P) -> Result<()> {
    let resp: OpqErrorResponse = call_action(api, func, params).await?;
    resp.into_result()
}

// ================= API 定义 =================

pub async fn get_user_info(api: &dyn LuaApi, user_id: u64) -> Result<UserInfo> {
    let resp: UserInfoResponse = call_action(api, "GetUserInfo", json!({ "UserID": user_id })).await?;
    if resp.code != 0 {
        return Err(Error::NotFound(format!(
            "用户 {} ({}): {}",
            user_id, resp.code, resp.message
        )));
    }
    Ok(resp.data)
}

/// 获取机器人所在的群列表 (只取第一页)
pub async fn get_group_list(api: &dyn LuaApi) -> Result<GroupListResponse> {
    call_action(
        api,
        "friendlist.GetTroopListReqV2",
        json!({ "NextToken": "" }),
    )
    .await
}

pub async fn search_group(api: &dyn LuaApi, content: &str) -> Result<Vec<GroupInfo>> {
    let reply = api
        .call("SearchGroup", json!({ "Content": content, "Page": 0 }))
        .await?;
    if reply.is_null() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_value(reply)?)
}

/// 获取群成员列表 (只取第一页)
pub async fn get_member_list(api: &dyn LuaApi, group_id: u64) -> Result<MemberListResponse> {
    call_action(
        api,
        "friendlist.GetTroopMemberListReq",
        json!({ "GroupUin": group_id, "LastUin": 0 }),
    )
    .await
}

/// `SendMsg` 请求体，`content` 必须始终存在
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SendMsgParams {
    #[serde(rename = "sendMsgType")]
    pub send_msg_type: &'static str,
    pub content: String,
    #[serde(rename = "atUser")]
    pub at_user: u64,
    #[serde(rename = "toUser")]
    pub to_user: u64,
    #[serde(rename = "sendToType")]
    pub send_to_type: u8,
    pub groupid: u64,
    #[serde(rename = "picUrl", skip_serializing_if = "Option::is_none")]
    pub pic_url: Option<String>,
    #[serde(rename = "picBase64Buf", skip_serializing_if = "Option::is_none")]
    pub pic_base64_buf: Option<String>,
    #[serde(rename = "fileMd5", skip_serializing_if = "Option::is_none")]
    pub file_md5: Option<String>,
    #[serde(rename = "flashPic", skip_serializing_if = "Option::is_none")]
    pub flash_pic: Option<u8>,
    #[serde(rename = "forwordBuf", skip_serializing_if = "Option::is_none")]
    pub forward_buf: Option<String>,
    #[serde(rename = "forwordField", skip_serializing_if = "Option::is_none")]
    pub forward_field: Option<i32>,
}

pub async fn send_msg(api: &dyn LuaApi, params: &SendMsgParams) -> Result<()> {
    call_checked(api, "SendMsg", params).await
}

/// 踢出群成员
pub async fn remove_member(api: &dyn LuaApi, group_id: u64, user_id: u64) -> Result<()> {
    call_checked(
        api,
        "GroupMgr",
        json!({
            "ActionType": 3,
            "GroupID": group_id,
            "ActionUserID": user_id,
            "Content": "",
        }),
    )
    .await
}

/// 禁言群成员，`duration` 单位为秒，0 表示解除
pub async fn shutup_member(
    api: &dyn LuaApi,
    group_id: u64,
    user_id: u64,
    duration: u32,
) -> Result<()> {
    call_checked(
        api,
        "OidbSvc.0x570_8",
        json!({
            "GroupID": group_id,
            "ShutUpUserID": user_id,
            "ShutTime": duration,
        }),
    )
    .await
}

/// 全员禁言开关
pub async fn shutup_all_member(api: &dyn LuaApi, group_id: u64, enable: bool) -> Result<()> {
    call_checked(
        api,
        "OidbSvc.0x89a_0",
        json!({
            "GroupID": group_id,
            "Switch": if enable { 1 } else { 0 },
        }),
    )
    .await
}

/// 回应好友请求，不关心返回内容
pub async fn deal_friend(api: &dyn LuaApi, request: &FriendAddedEventData) -> Result<()> {
    api.call("DealFriend", serde_json::to_value(request)?).await?;
    Ok(())
}
