use std::collections::BTreeMap;

use axum::extract::State;

use crate::{
    AppState,
    counters::{Counters, EventKey},
    result::ApiResult,
};

// 当前窗口的计数，按键排序
pub async fn window_stats(
    State(state): State<AppState>,
) -> ApiResult<BTreeMap<EventKey, Counters>> {
    ApiResult::success(state.store.snapshot().into_iter().collect())
}
