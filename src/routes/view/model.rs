use serde::Serialize;

use crate::counters::EventKey;

// 浏览接口响应
#[derive(Debug, Serialize)]
pub struct ViewRecorded {
    pub key: EventKey,
    pub clicked: bool,
}
