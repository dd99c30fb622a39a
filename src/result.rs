use axum::{
    Json,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// 统一的响应包装：成功时 `code` 为 0，失败时为 HTTP 状态码
#[derive(Debug, Serialize)]
pub struct ApiResult<T> {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<T>,
}

impl<T> ApiResult<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            error_message: None,
            content: Some(data),
        }
    }

    pub fn error(code: i32, message: &str) -> Self {
        Self {
            code,
            error_message: Some(message.to_string()),
            content: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResult<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}
