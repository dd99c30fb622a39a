use std::time::Duration;

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::result::ApiResult;

/// 返回给 HTTP 调用方的错误
#[derive(Debug)]
pub enum AppError {
    TooManyRequests { retry_after_secs: u64 },
    UnknownContent(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::TooManyRequests { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                format!("请求过于频繁，请在{}秒后重试", retry_after_secs),
            ),
            AppError::UnknownContent(content) => {
                (StatusCode::NOT_FOUND, format!("未知的内容类别: {}", content))
            }
        };

        let body = ApiResult::<()>::error(status.as_u16() as i32, &error_message);
        let mut response = (status, body).into_response();

        if let AppError::TooManyRequests { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }

        response
    }
}

/// 持久化文件读写错误
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("store file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode store: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("flush did not finish within {0:?}")]
    Timeout(Duration),
    #[error("flush cancelled before commit")]
    Cancelled,
    #[error("flush task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// 配置值不合法
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}")]
    Invalid { key: &'static str, value: String },
}
