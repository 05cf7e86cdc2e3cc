//! 测试用的 OPQ 接口替身

use crate::error::{Error, Result};
use crate::opq::api::LuaApi;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// 按函数名返回预设响应，并记录每一次调用
#[derive(Default)]
pub struct MockApi {
    replies: Mutex<HashMap<String, Value>>,
    failures: Mutex<HashMap<String, usize>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置某个函数的固定响应
    pub fn reply(&self, func: &str, value: Value) {
        self.replies
            .lock()
            .unwrap()
            .insert(func.to_string(), value);
    }

    /// 让某个函数在第 `nth` 次 (从 1 开始) 调用时返回传输错误
    pub fn fail_on(&self, func: &str, nth: usize) {
        self.failures
            .lock()
            .unwrap()
            .insert(func.to_string(), nth);
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, func: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(f, _)| f == func)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn count(&self, func: &str) -> usize {
        self.calls_to(func).len()
    }
}

impl LuaApi for MockApi {
    fn call<'a>(&'a self, func: &'a str, params: Value) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let nth = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((func.to_string(), params));
                calls.iter().filter(|(f, _)| f == func).count()
            };
            if self.failures.lock().unwrap().get(func) == Some(&nth) {
                return Err(Error::Transport(format!("{} 模拟失败", func)));
            }
            self.replies
                .lock()
                .unwrap()
                .get(func)
                .cloned()
                .ok_or_else(|| Error::Transport(format!("{} 无预设响应", func)))
        })
    }
}
