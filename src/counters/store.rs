use std::collections::HashMap;

use chrono::{DateTime, TimeZone};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::key::{Content, EventKey};

/// 单个聚合桶的计数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub view: u64,
    pub click: u64,
}

/// 某一时刻的窗口拷贝
pub type Snapshot = HashMap<EventKey, Counters>;

/// 当前窗口的内存聚合
///
/// 外层 `RwLock` 只用来协调整表替换：记录事件时持有读锁，
/// 多个请求可以同时进入；`DashMap` 的分片锁负责同一个键上的互斥。
/// `reset` 拿写锁，等正在进行的记录全部完成后才换上新表，
/// 因此每次自增要么落在旧窗口，要么落在新窗口。
#[derive(Debug, Default)]
pub struct AggregateStore {
    window: RwLock<DashMap<EventKey, Counters>>,
}

impl AggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次浏览，键不存在时先创建
    pub fn record_view(&self, key: &EventKey) {
        let window = self.window.read();
        let mut entry = window.entry(key.clone()).or_default();
        entry.view = entry.view.saturating_add(1);
    }

    /// 记录一次点击
    ///
    /// 当前窗口里没有浏览过的键不会凭空生成条目，返回 `false`。
    pub fn record_click(&self, key: &EventKey) -> bool {
        let window = self.window.read();
        match window.get_mut(key) {
            Some(mut entry) => {
                entry.click = entry.click.saturating_add(1);
                true
            }
            None => {
                tracing::debug!(%key, "click dropped: no view recorded in current window");
                false
            }
        }
    }

    /// 按时间戳解析键，记录浏览，`clicked` 时再记录点击
    ///
    /// 浏览和点击在同一次加锁内完成，两者总是落在同一个窗口。
    pub fn record_event<Tz: TimeZone>(
        &self,
        content: Content,
        at: &DateTime<Tz>,
        clicked: bool,
    ) -> EventKey {
        let key = EventKey::new(content, at);
        let window = self.window.read();
        let mut entry = window.entry(key.clone()).or_default();
        entry.view = entry.view.saturating_add(1);
        if clicked {
            entry.click = entry.click.saturating_add(1);
        }
        key
    }

    pub fn get(&self, key: &EventKey) -> Option<Counters> {
        self.window.read().get(key).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.window.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按值拷贝当前窗口，不阻塞后续的记录
    pub fn snapshot(&self) -> Snapshot {
        self.window
            .read()
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// 整表替换为空表，返回被淘汰的键数量
    pub fn reset(&self) -> usize {
        self.retire().len()
    }

    fn retire(&self) -> DashMap<EventKey, Counters> {
        std::mem::take(&mut *self.window.write())
    }
}
