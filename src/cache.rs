use crate::opq::model::UserInfo;
use crate::scheduler::Scheduler;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// 默认条目存活时间
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);
/// 默认后台清理间隔
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// 带过期时间的键值缓存
///
/// 条目在写入后 `ttl` 内可读 (不含 `ttl` 整点)，超时后读取视为不存在，
/// 并由下一次 `sweep` 真正移除。写入总是整体覆盖，不做合并。
pub struct TimedCache<V> {
    entries: RwLock<HashMap<String, (V, Instant)>>,
    ttl: Duration,
}

impl<V: Clone> TimedCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().ok()?;
        let (value, inserted_at) = entries.get(key)?;
        if inserted_at.elapsed() < self.ttl {
            Some(value.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.into(), (value, Instant::now()));
        }
    }

    /// 移除所有已过期条目，返回移除数量
    pub fn sweep(&self) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, (_, inserted_at)| inserted_at.elapsed() < ttl);
        before - entries.len()
    }

    /// 物理存储的条目数 (包含尚未被清理的过期条目)
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// 群成员缓存的复合键: `群号.QQ号`
pub fn member_key(group_id: u64, user_id: u64) -> String {
    format!("{}.{}", group_id, user_id)
}

/// 名称解析使用的三层缓存
pub struct NameCache {
    /// QQ号 -> 用户资料
    pub users: TimedCache<UserInfo>,
    /// 群号 -> 群名
    pub groups: TimedCache<String>,
    /// `群号.QQ号` -> 群名片 (为空时为昵称)
    pub members: TimedCache<String>,
}

impl NameCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            users: TimedCache::new(ttl),
            groups: TimedCache::new(ttl),
            members: TimedCache::new(ttl),
        }
    }

    pub fn sweep(&self) -> usize {
        self.users.sweep() + self.groups.sweep() + self.members.sweep()
    }

    /// 在调度器上注册周期清理任务，返回任务 ID
    pub fn spawn_sweeper(self: &Arc<Self>, scheduler: &Scheduler, interval: Duration) -> u64 {
        let cache = Arc::downgrade(self);
        scheduler.add_interval(interval, move || {
            let cache = cache.clone();
            async move {
                if let Some(cache) = cache.upgrade() {
                    let removed = cache.sweep();
                    if removed > 0 {
                        crate::debug!(target: "Cache", "清理过期缓存 {} 条", removed);
                    }
                }
            }
        })
    }
}

impl Default for NameCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entry_visible_until_ttl() {
        let cache = TimedCache::new(DEFAULT_TTL);
        cache.insert("10001", "群A".to_string());

        tokio::time::advance(DEFAULT_TTL - Duration::from_millis(1)).await;
        assert_eq!(cache.get("10001").as_deref(), Some("群A"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get("10001"), None);
        // 过期但未清理，仍占用存储
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.sweep(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_refreshes_timestamp() {
        let cache = TimedCache::new(Duration::from_secs(60));
        cache.insert("k", 1u32);
        tokio::time::advance(Duration::from_secs(50)).await;
        cache.insert("k", 2u32);
        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(cache.get("k"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_without_reads() {
        let scheduler = Scheduler::new();
        let cache = Arc::new(NameCache::new(DEFAULT_TTL));
        cache.groups.insert("1", "g".to_string());
        cache.members.insert(member_key(1, 2), "m".to_string());
        cache.spawn_sweeper(&scheduler, DEFAULT_SWEEP_INTERVAL);

        // 第一次清理 (5 分钟) 时条目尚未过期
        tokio::time::sleep(DEFAULT_SWEEP_INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(cache.groups.len(), 1);

        // 第三次清理 (15 分钟) 之后全部移除
        tokio::time::sleep(DEFAULT_SWEEP_INTERVAL * 2).await;
        assert!(cache.groups.is_empty());
        assert!(cache.members.is_empty());
    }

    #[test]
    fn member_key_uses_decimal_ids() {
        assert_eq!(member_key(123, 456), "123.456");
    }
}
