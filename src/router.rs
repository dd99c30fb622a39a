use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::get,
};

use crate::{
    AppState,
    middleware::{log_requests, rate_limit},
    routes,
};

// 统计接口，受窗口限流保护
fn stats_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/stats/", get(routes::stats::window_stats))
        .route_layer(from_fn_with_state(state.limiter.clone(), rate_limit))
}

// 浏览事件接口
fn view_routes() -> Router<AppState> {
    Router::new()
        .route("/view/", get(routes::view::record_random_view))
        .route("/view/{content}", get(routes::view::record_content_view))
}

// 创建主路由
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::welcome))
        .merge(view_routes())
        .merge(stats_routes(&state))
        .layer(from_fn(log_requests))
        .with_state(state)
}
