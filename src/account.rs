use crate::decoder::Decoder;
use crate::error::{Result, parse_id};
use crate::opq::api;
use crate::opq::model::{
    EventMessagePacket, FRIEND_ADDED_EVENT, FriendAddedEventData, FriendMessageEvent,
    GROUP_EXIT_EVENT, GROUP_JOIN_EVENT, GroupExitEventData, GroupJoinEventData,
    GroupMessageEvent,
};
use crate::opq::socket::EventHandler;
use crate::packetizer::{self, Route};
use crate::resolver::Resolver;
use crate::{debug, info, warn};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

pub const PLATFORM_ID: &str = "QQ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgKind {
    Group,
    Private,
}

/// 推送给宿主的聊天消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub kind: MsgKind,
    /// 群号；私聊为空
    pub source: String,
    pub sender: String,
    /// 宿主标记格式的消息内容
    pub message: String,
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    Accept,
    Reject,
    Ignore,
}

/// 宿主侧的事件接收者
pub trait AccountEvents: Send + Sync {
    fn on_receive_chat_message(&self, msg: ChatMessage) -> BoxFuture<'_, Result<()>>;

    /// `inviter` 为空表示主动加入
    fn on_member_joined(
        &self,
        group: String,
        user: String,
        inviter: String,
    ) -> BoxFuture<'_, Result<()>>;

    fn on_member_left(&self, group: String, user: String) -> BoxFuture<'_, Result<()>>;

    fn process_friend_request(
        &self,
        user: String,
        content: String,
    ) -> BoxFuture<'_, Result<RequestDecision>>;
}

/// 只打印事件、不处理请求的宿主实现
pub struct ConsoleEvents;

impl AccountEvents for ConsoleEvents {
    fn on_receive_chat_message(&self, msg: ChatMessage) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            match msg.kind {
                MsgKind::Group => {
                    info!(target: "Host", "[群:{}] {}: {}", msg.source, msg.sender, msg.message)
                }
                MsgKind::Private => {
                    info!(target: "Host", "[私聊] {}: {}", msg.sender, msg.message)
                }
            }
            Ok(())
        })
    }

    fn on_member_joined(
        &self,
        group: String,
        user: String,
        inviter: String,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(target: "Host", "[群:{}] {} 加入 (邀请人: {})", group, user, inviter);
            Ok(())
        })
    }

    fn on_member_left(&self, group: String, user: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(target: "Host", "[群:{}] {} 退出", group, user);
            Ok(())
        })
    }

    fn process_friend_request(
        &self,
        user: String,
        content: String,
    ) -> BoxFuture<'_, Result<RequestDecision>> {
        Box::pin(async move {
            info!(target: "Host", "好友请求 {}: {}", user, content);
            Ok(RequestDecision::Ignore)
        })
    }
}

/// 一个 QQ 账号：宿主调用的操作 + 平台推送事件的处理
pub struct Account {
    self_id: u64,
    resolver: Arc<Resolver>,
    decoder: Decoder,
    events: Arc<dyn AccountEvents>,
}

impl Account {
    pub fn new(self_id: u64, resolver: Arc<Resolver>, events: Arc<dyn AccountEvents>) -> Self {
        Self {
            self_id,
            decoder: Decoder::new(resolver.clone()),
            resolver,
            events,
        }
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// 供 socket 读循环使用的事件回调
    pub fn event_handler(self: &Arc<Self>) -> EventHandler {
        let account = self.clone();
        Arc::new(move |name: String, data: Value| -> BoxFuture<'static, ()> {
            let account = account.clone();
            Box::pin(async move { account.handle_event(&name, data).await })
        })
    }

    // ================= 宿主调用的操作 =================

    pub fn get_self_id(&self) -> String {
        self.self_id.to_string()
    }

    pub fn get_platform_id(&self) -> &'static str {
        PLATFORM_ID
    }

    pub async fn get_group_name(&self, id: &str) -> Result<String> {
        self.resolver.group_name(parse_id(id)?).await
    }

    pub async fn get_user_name(&self, id: &str) -> Result<String> {
        self.resolver.user_name(parse_id(id)?).await
    }

    pub async fn get_member_name(&self, source: &str, target: &str) -> Result<String> {
        self.resolver
            .member_name(parse_id(source)?, parse_id(target)?)
            .await
    }

    pub async fn get_user_avatar(&self, id: &str) -> Result<String> {
        self.resolver.user_avatar(parse_id(id)?).await
    }

    pub async fn get_group_list(&self) -> Result<Vec<String>> {
        let ids = self.resolver.group_list().await?;
        Ok(ids.into_iter().map(|id| id.to_string()).collect())
    }

    pub async fn get_member_list(&self, id: &str) -> Result<Vec<String>> {
        let ids = self.resolver.member_list(parse_id(id)?).await?;
        Ok(ids.into_iter().map(|id| id.to_string()).collect())
    }

    /// 发送宿主标记消息
    ///
    /// 群消息发往 `source`；私聊发往 `target`，`source` 为来源群 (可为空)。
    pub async fn send_chat_message(
        &self,
        kind: MsgKind,
        source: &str,
        target: &str,
        message: &str,
    ) -> Result<()> {
        let packets = packetizer::packetize(message)?;
        let route = match kind {
            MsgKind::Group => Route::Group(parse_id(source)?),
            MsgKind::Private => Route::Private {
                user: parse_id(target)?,
                group: if source.is_empty() {
                    0
                } else {
                    parse_id(source)?
                },
            },
        };
        packetizer::dispatch(self.resolver.api().as_ref(), route, &packets).await
    }

    pub async fn remove_member(&self, source: &str, target: &str) -> Result<()> {
        api::remove_member(
            self.resolver.api().as_ref(),
            parse_id(source)?,
            parse_id(target)?,
        )
        .await
    }

    pub async fn shutup_member(&self, source: &str, target: &str, duration: u32) -> Result<()> {
        api::shutup_member(
            self.resolver.api().as_ref(),
            parse_id(source)?,
            parse_id(target)?,
            duration,
        )
        .await
    }

    pub async fn shutup_all_member(&self, source: &str, enable: bool) -> Result<()> {
        api::shutup_all_member(self.resolver.api().as_ref(), parse_id(source)?, enable).await
    }

    // ================= 平台推送事件 =================

    /// socket.io 事件入口；单个事件的任何失败只会丢弃该事件
    pub async fn handle_event(&self, name: &str, data: Value) {
        let result = match name {
            "OnGroupMsgs" => match parse_payload(name, data) {
                Some(ev) => self.on_group_message(ev).await,
                None => return,
            },
            "OnFriendMsgs" => match parse_payload(name, data) {
                Some(ev) => self.on_friend_message(ev).await,
                None => return,
            },
            "OnEvents" => match parse_payload(name, data) {
                Some(ev) => self.on_platform_event(ev).await,
                None => return,
            },
            other => {
                debug!(target: "Account", "忽略事件: {}", other);
                return;
            }
        };
        if let Err(e) = result {
            warn!(target: "Account", "处理 {} 失败: {}", name, e);
        }
    }

    async fn on_group_message(&self, ev: GroupMessageEvent) -> Result<()> {
        let data = ev.current_packet.data;
        self.resolver
            .remember_group(data.from_group_id, &data.from_group_name);
        self.resolver
            .remember_member(data.from_group_id, data.from_user_id, &data.from_nick_name);

        if data.from_user_id == self.self_id {
            return Ok(());
        }

        // 解码失败已记录日志，直接丢弃
        let Ok(message) = self.decoder.decode(&data.msg_type, &data.content).await else {
            return Ok(());
        };

        self.events
            .on_receive_chat_message(ChatMessage {
                kind: MsgKind::Group,
                source: data.from_group_id.to_string(),
                sender: data.from_user_id.to_string(),
                message,
                id: format!(
                    "group{}.{}.{}.{}",
                    data.from_group_id, data.msg_time, data.msg_seq, data.msg_random
                ),
            })
            .await
    }

    async fn on_friend_message(&self, ev: FriendMessageEvent) -> Result<()> {
        let data = ev.current_packet.data;
        if data.from_uin == self.self_id {
            return Ok(());
        }

        let Ok(message) = self.decoder.decode(&data.msg_type, &data.content).await else {
            return Ok(());
        };

        self.events
            .on_receive_chat_message(ChatMessage {
                kind: MsgKind::Private,
                source: String::new(),
                sender: data.from_uin.to_string(),
                message,
                id: format!("friend{}.{}", data.from_uin, data.msg_seq),
            })
            .await
    }

    async fn on_platform_event(&self, ev: EventMessagePacket) -> Result<()> {
        let data = ev.current_packet.data;
        let group = data.event_msg.from_uin.to_string();

        match data.event_name.as_str() {
            GROUP_JOIN_EVENT => {
                let Some(join) = parse_payload::<GroupJoinEventData>(GROUP_JOIN_EVENT, data.event_data)
                else {
                    return Ok(());
                };
                let inviter = if join.invite_uin == 0 {
                    String::new()
                } else {
                    join.invite_uin.to_string()
                };
                self.events
                    .on_member_joined(group, join.user_id.to_string(), inviter)
                    .await
            }
            GROUP_EXIT_EVENT => {
                let Some(exit) = parse_payload::<GroupExitEventData>(GROUP_EXIT_EVENT, data.event_data)
                else {
                    return Ok(());
                };
                self.events
                    .on_member_left(group, exit.user_id.to_string())
                    .await
            }
            FRIEND_ADDED_EVENT => {
                let Some(mut request) =
                    parse_payload::<FriendAddedEventData>(FRIEND_ADDED_EVENT, data.event_data)
                else {
                    return Ok(());
                };
                let decision = self
                    .events
                    .process_friend_request(request.user_id.to_string(), request.content.clone())
                    .await?;
                request.action = match decision {
                    RequestDecision::Accept => 2,
                    RequestDecision::Reject => 3,
                    RequestDecision::Ignore => return Ok(()),
                };
                api::deal_friend(self.resolver.api().as_ref(), &request).await
            }
            other => {
                debug!(target: "Account", "忽略平台事件: {}", other);
                Ok(())
            }
        }
    }
}

fn parse_payload<T: DeserializeOwned>(name: &str, data: Value) -> Option<T> {
    match serde_json::from_value(data) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(target: "Account", "{} 数据无效: {}", name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{NameCache, member_key};
    use crate::error::Error;
    use crate::testing::MockApi;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<ChatMessage>>,
        joined: Mutex<Vec<(String, String, String)>>,
        left: Mutex<Vec<(String, String)>>,
        decision: Mutex<Option<RequestDecision>>,
    }

    impl AccountEvents for Recorder {
        fn on_receive_chat_message(&self, msg: ChatMessage) -> BoxFuture<'_, Result<()>> {
            self.messages.lock().unwrap().push(msg);
            Box::pin(async { Ok(()) })
        }

        fn on_member_joined(
            &self,
            group: String,
            user: String,
            inviter: String,
        ) -> BoxFuture<'_, Result<()>> {
            self.joined.lock().unwrap().push((group, user, inviter));
            Box::pin(async { Ok(()) })
        }

        fn on_member_left(&self, group: String, user: String) -> BoxFuture<'_, Result<()>> {
            self.left.lock().unwrap().push((group, user));
            Box::pin(async { Ok(()) })
        }

        fn process_friend_request(
            &self,
            _user: String,
            _content: String,
        ) -> BoxFuture<'_, Result<RequestDecision>> {
            let decision = self
                .decision
                .lock()
                .unwrap()
                .unwrap_or(RequestDecision::Ignore);
            Box::pin(async move { Ok(decision) })
        }
    }

    fn setup() -> (Account, Arc<MockApi>, Arc<Recorder>) {
        let api = Arc::new(MockApi::new());
        let resolver = Arc::new(Resolver::new(api.clone(), Arc::new(NameCache::default())));
        let recorder = Arc::new(Recorder::default());
        let account = Account::new(10000, resolver, recorder.clone());
        (account, api, recorder)
    }

    fn group_event(from_user: u64, msg_type: &str, content: &str) -> Value {
        json!({
            "CurrentPacket": { "Data": {
                "Content": content,
                "FromGroupId": 200,
                "FromGroupName": "测试群",
                "FromNickName": "小明",
                "FromUserId": from_user,
                "MsgRandom": 3,
                "MsgSeq": 2,
                "MsgTime": 1,
                "MsgType": msg_type
            }},
            "CurrentQQ": 10000
        })
    }

    #[tokio::test]
    async fn group_message_is_forwarded_and_cached() {
        let (account, api, recorder) = setup();
        account
            .handle_event("OnGroupMsgs", group_event(42, "TextMsg", "hi[表情1]"))
            .await;

        let messages = recorder.messages.lock().unwrap().clone();
        assert_eq!(
            messages,
            vec![ChatMessage {
                kind: MsgKind::Group,
                source: "200".into(),
                sender: "42".into(),
                message: "hi[face:1]".into(),
                id: "group200.1.2.3".into(),
            }]
        );

        // 群名与成员名由推送顺带缓存，不再走网络
        assert_eq!(account.get_group_name("200").await.unwrap(), "测试群");
        assert_eq!(account.get_member_name("200", "42").await.unwrap(), "小明");
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn own_group_message_is_skipped_but_cached() {
        let (account, _api, recorder) = setup();
        account
            .handle_event("OnGroupMsgs", group_event(10000, "TextMsg", "echo"))
            .await;
        assert!(recorder.messages.lock().unwrap().is_empty());
        assert_eq!(
            account
                .resolver()
                .cache()
                .members
                .get(&member_key(200, 10000))
                .as_deref(),
            Some("小明")
        );
    }

    #[tokio::test]
    async fn undecodable_message_is_dropped() {
        let (account, _api, recorder) = setup();
        account
            .handle_event("OnGroupMsgs", group_event(42, "VoiceMsg", "{}"))
            .await;
        assert!(recorder.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn friend_message_has_empty_source() {
        let (account, _api, recorder) = setup();
        let ev = json!({ "CurrentPacket": { "Data": {
            "Content": "在吗", "FromUin": 55, "ToUin": 10000, "MsgSeq": 9, "MsgType": "TextMsg"
        }}});
        account.handle_event("OnFriendMsgs", ev).await;

        let messages = recorder.messages.lock().unwrap().clone();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, MsgKind::Private);
        assert_eq!(messages[0].source, "");
        assert_eq!(messages[0].id, "friend55.9");
    }

    #[tokio::test]
    async fn event_handler_routes_by_name() {
        let (account, _api, recorder) = setup();
        let handler = Arc::new(account).event_handler();
        let ev = json!({ "CurrentPacket": { "Data": {
            "Content": "hi", "FromUin": 55, "MsgSeq": 1, "MsgType": "TextMsg"
        }}});
        handler("OnFriendMsgs".into(), ev).await;
        handler("OnUnknown".into(), json!(null)).await;
        assert_eq!(recorder.messages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn join_and_exit_events() {
        let (account, _api, recorder) = setup();
        let join = json!({ "CurrentPacket": { "Data": {
            "EventName": "ON_EVENT_GROUP_JOIN",
            "EventMsg": { "FromUin": 300 },
            "EventData": { "UserID": 7, "InviteUin": 0 }
        }}});
        let invited = json!({ "CurrentPacket": { "Data": {
            "EventName": "ON_EVENT_GROUP_JOIN",
            "EventMsg": { "FromUin": 300 },
            "EventData": { "UserID": 8, "InviteUin": 7 }
        }}});
        let exit = json!({ "CurrentPacket": { "Data": {
            "EventName": "ON_EVENT_GROUP_EXIT",
            "EventMsg": { "FromUin": 300 },
            "EventData": { "UserID": 7 }
        }}});
        account.handle_event("OnEvents", join).await;
        account.handle_event("OnEvents", invited).await;
        account.handle_event("OnEvents", exit).await;

        assert_eq!(
            *recorder.joined.lock().unwrap(),
            vec![
                ("300".into(), "7".into(), String::new()),
                ("300".into(), "8".into(), "7".into()),
            ]
        );
        assert_eq!(
            *recorder.left.lock().unwrap(),
            vec![("300".to_string(), "7".to_string())]
        );
    }

    #[tokio::test]
    async fn accepted_friend_request_is_answered() {
        let (account, api, recorder) = setup();
        *recorder.decision.lock().unwrap() = Some(RequestDecision::Accept);
        api.reply("DealFriend", json!({}));
        let ev = json!({ "CurrentPacket": { "Data": {
            "EventName": "ON_EVENT_FRIEND_ADDED",
            "EventData": { "UserID": 66, "Content": "加个好友", "FromType": 1 }
        }}});
        account.handle_event("OnEvents", ev).await;

        let calls = api.calls_to("DealFriend");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["UserID"], json!(66));
        assert_eq!(calls[0]["Action"], json!(2));
    }

    #[tokio::test]
    async fn ignored_friend_request_sends_nothing() {
        let (account, api, _recorder) = setup();
        let ev = json!({ "CurrentPacket": { "Data": {
            "EventName": "ON_EVENT_FRIEND_ADDED",
            "EventData": { "UserID": 66 }
        }}});
        account.handle_event("OnEvents", ev).await;
        assert_eq!(api.count("DealFriend"), 0);
    }

    #[tokio::test]
    async fn group_send_routes_every_packet() {
        let (account, api, _recorder) = setup();
        api.reply("SendMsg", json!({ "Ret": 0 }));
        account
            .send_chat_message(MsgKind::Group, "200", "", "hello[big_face:3,ABC]")
            .await
            .unwrap();

        let calls = api.calls_to("SendMsg");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0]["sendMsgType"], json!("TextMsg"));
        assert_eq!(calls[0]["toUser"], json!(200));
        assert_eq!(calls[0]["sendToType"], json!(2));
        assert_eq!(calls[1]["sendMsgType"], json!("ForwordMsg"));
    }

    #[tokio::test]
    async fn private_send_without_origin_group() {
        let (account, api, _recorder) = setup();
        api.reply("SendMsg", json!({ "Ret": 0 }));
        account
            .send_chat_message(MsgKind::Private, "", "55", "hi")
            .await
            .unwrap();
        let calls = api.calls_to("SendMsg");
        assert_eq!(calls[0]["toUser"], json!(55));
        assert_eq!(calls[0]["sendToType"], json!(1));
        assert_eq!(calls[0]["groupid"], json!(0));
    }

    #[tokio::test]
    async fn malformed_markup_sends_nothing() {
        let (account, api, _recorder) = setup();
        api.reply("SendMsg", json!({ "Ret": 0 }));
        let err = account
            .send_chat_message(MsgKind::Group, "200", "", "hi[big_face:oops]")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        assert_eq!(api.count("SendMsg"), 0);
    }

    #[tokio::test]
    async fn lists_return_decimal_ids() {
        let (account, api, _recorder) = setup();
        api.reply(
            "friendlist.GetTroopListReqV2",
            json!({ "TroopList": [{ "GroupId": 1, "GroupName": "a" }] }),
        );
        assert_eq!(account.get_group_list().await.unwrap(), vec!["1"]);
        assert_eq!(account.get_self_id(), "10000");
        assert_eq!(account.get_platform_id(), "QQ");
    }
}
