use std::time::Duration;

use axum::extract::{Path, State};
use chrono::Local;
use rand::{Rng, seq::SliceRandom};

use crate::{
    AppState,
    counters::{Content, EventKey},
    error::AppError,
    result::ApiResult,
    routes::view::model::ViewRecorded,
};

// 随机选一个内容类别记录浏览
pub async fn record_random_view(State(state): State<AppState>) -> ApiResult<ViewRecorded> {
    let content = *Content::ALL
        .choose(&mut rand::thread_rng())
        .unwrap_or(&Content::Sports);
    record_view(&state, content).await
}

// 指定内容类别记录浏览
pub async fn record_content_view(
    State(state): State<AppState>,
    Path(content): Path<String>,
) -> Result<ApiResult<ViewRecorded>, AppError> {
    let content = match content.parse::<Content>() {
        Ok(content) => content,
        Err(_) => return Err(AppError::UnknownContent(content)),
    };
    Ok(record_view(&state, content).await)
}

async fn record_view(state: &AppState, content: Content) -> ApiResult<ViewRecorded> {
    let key = EventKey::new(content, &Local::now());
    state.store.record_view(&key);

    // ThreadRng 不能跨 await 持有
    let (delay, wants_click) = {
        let mut rng = rand::thread_rng();
        let max_ms = state.config.simulated_latency().as_millis() as u64;
        let delay_ms = if max_ms == 0 { 0 } else { rng.gen_range(0..max_ms) };
        (Duration::from_millis(delay_ms), rng.gen_bool(state.config.click_rate))
    };

    // 模拟处理耗时
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    // 等待期间窗口可能已被重置，此时点击不会落到新窗口
    let clicked = wants_click && state.store.record_click(&key);
    tracing::debug!(%key, clicked, "view recorded");

    ApiResult::success(ViewRecorded { key, clicked })
}
