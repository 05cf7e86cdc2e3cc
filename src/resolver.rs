use crate::cache::{NameCache, member_key};
use crate::error::{Error, Result};
use crate::opq::api::{self, LuaApi};
use crate::opq::model::{GroupInfo, UserInfo};
use std::sync::Arc;

/// 名称解析服务
///
/// 先查缓存，未命中时走网络；网络失败与“找不到”对调用方不作区分，
/// 失败结果不会写入缓存，也不在本层重试。
pub struct Resolver {
    api: Arc<dyn LuaApi>,
    cache: Arc<NameCache>,
}

impl Resolver {
    pub fn new(api: Arc<dyn LuaApi>, cache: Arc<NameCache>) -> Self {
        Self { api, cache }
    }

    pub fn cache(&self) -> &Arc<NameCache> {
        &self.cache
    }

    pub fn api(&self) -> &Arc<dyn LuaApi> {
        &self.api
    }

    // ================= 用户 =================

    pub async fn user_info(&self, user_id: u64) -> Result<UserInfo> {
        let key = user_id.to_string();
        if let Some(info) = self.cache.users.get(&key) {
            return Ok(info);
        }
        let info = api::get_user_info(self.api.as_ref(), user_id).await?;
        self.cache.users.insert(key, info.clone());
        Ok(info)
    }

    pub async fn user_name(&self, user_id: u64) -> Result<String> {
        Ok(self.user_info(user_id).await?.nickname)
    }

    pub async fn user_avatar(&self, user_id: u64) -> Result<String> {
        Ok(self.user_info(user_id).await?.avatar_url)
    }

    // ================= 群 =================

    /// 群名解析：缓存 -> 群列表 -> 按群号搜索
    pub async fn group_name(&self, group_id: u64) -> Result<String> {
        let key = group_id.to_string();
        if let Some(name) = self.cache.groups.get(&key) {
            return Ok(name);
        }

        match self.group_name_by_list(&key).await {
            Ok(name) => return Ok(name),
            Err(e) => crate::debug!(target: "Resolver", "群列表中未找到 {}: {}", key, e),
        }

        self.group_name_by_search(&key).await
    }

    async fn group_name_by_list(&self, key: &str) -> Result<String> {
        self.group_list().await?;
        self.cache
            .groups
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("群 {}", key)))
    }

    async fn group_name_by_search(&self, key: &str) -> Result<String> {
        let groups = api::search_group(self.api.as_ref(), key).await?;
        self.remember_groups(&groups);
        self.cache
            .groups
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("群 {}", key)))
    }

    /// 拉取群列表，顺带刷新所有群名缓存
    pub async fn group_list(&self) -> Result<Vec<u64>> {
        let resp = api::get_group_list(self.api.as_ref()).await?;
        self.remember_groups(&resp.group_list);
        Ok(resp.group_list.iter().map(|g| g.group_id).collect())
    }

    fn remember_groups(&self, groups: &[GroupInfo]) {
        for group in groups {
            self.remember_group(group.group_id, &group.group_name);
        }
    }

    pub fn remember_group(&self, group_id: u64, name: &str) {
        self.cache.groups.insert(group_id.to_string(), name.to_string());
    }

    // ================= 群成员 =================

    /// 群内显示名；缓存未命中时回退到用户昵称 (回退结果不写入成员缓存)
    pub async fn member_name(&self, group_id: u64, user_id: u64) -> Result<String> {
        if let Some(name) = self.cache.members.get(&member_key(group_id, user_id)) {
            return Ok(name);
        }
        self.user_name(user_id).await
    }

    /// 拉取群成员列表，刷新成员显示名缓存
    pub async fn member_list(&self, group_id: u64) -> Result<Vec<u64>> {
        let resp = api::get_member_list(self.api.as_ref(), group_id).await?;
        // 以响应中的群号为准
        let group = if resp.group_uin != 0 {
            resp.group_uin
        } else {
            group_id
        };
        let mut ids = Vec::with_capacity(resp.member_list.len());
        for member in &resp.member_list {
            self.remember_member(group, member.member_uin, member.display_name());
            ids.push(member.member_uin);
        }
        Ok(ids)
    }

    pub fn remember_member(&self, group_id: u64, user_id: u64, name: &str) {
        self.cache
            .members
            .insert(member_key(group_id, user_id), name.to_string());
    }
}
