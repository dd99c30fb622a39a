use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

// 分钟粒度的时间桶格式
const BUCKET_FORMAT: &str = "%Y-%m-%d %H:%M";

/// 可统计的内容类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Content {
    Sports,
    Entertainment,
    Business,
    Education,
}

impl Content {
    pub const ALL: [Content; 4] = [
        Content::Sports,
        Content::Entertainment,
        Content::Business,
        Content::Education,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Content::Sports => "sports",
            Content::Entertainment => "entertainment",
            Content::Business => "business",
            Content::Education => "education",
        }
    }
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyParseError {
    #[error("unknown content `{0}`")]
    UnknownContent(String),
    #[error("malformed event key `{0}`")]
    Malformed(String),
}

impl FromStr for Content {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Content::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| KeyParseError::UnknownContent(s.to_string()))
    }
}

/// 聚合桶标识：内容类别 + 分钟时间桶
///
/// 序列化形式为 `<content>:<YYYY-MM-DD HH:MM>`，与持久化文件中的键一致。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    content: Content,
    minute: NaiveDateTime,
}

impl EventKey {
    /// 按时间戳所在的分钟生成键（秒及以下被截断）
    pub fn new<Tz: TimeZone>(content: Content, at: &DateTime<Tz>) -> Self {
        let local = at.naive_local();
        let minute = local
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(local);
        Self { content, minute }
    }

    pub fn content(&self) -> Content {
        self.content
    }

    pub fn bucket(&self) -> String {
        self.minute.format(BUCKET_FORMAT).to_string()
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.content, self.minute.format(BUCKET_FORMAT))
    }
}

impl FromStr for EventKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // 内容名中没有冒号，第一个冒号即分隔符
        let (content, bucket) = s
            .split_once(':')
            .ok_or_else(|| KeyParseError::Malformed(s.to_string()))?;
        let content = content.parse::<Content>()?;
        let minute = NaiveDateTime::parse_from_str(bucket, BUCKET_FORMAT)
            .map_err(|_| KeyParseError::Malformed(s.to_string()))?;
        Ok(Self { content, minute })
    }
}

impl Serialize for EventKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EventKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
