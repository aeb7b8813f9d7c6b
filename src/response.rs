use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 统一API响应格式：`{code, msg, data}`
///
/// `code` 与 HTTP 状态码一致，客户端可以只看其中之一。
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    /// 业务响应码
    pub code: i32,
    /// 响应消息（中文）
    pub msg: String,
    /// 响应数据，出错时通常为空
    pub data: Option<T>,
}

/// 业务响应码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Success,
    Created,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    PayloadTooLarge,
    UnsupportedMediaType,
    Internal,
    BadGateway,
    ServiceUnavailable,
}

impl ResponseCode {
    pub fn status(self) -> StatusCode {
        match self {
            Self::Success => StatusCode::OK,
            Self::Created => StatusCode::CREATED,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(self) -> i32 {
        i32::from(self.status().as_u16())
    }

    /// 默认提示语
    pub fn message(self) -> &'static str {
        match self {
            Self::Success => "操作成功",
            Self::Created => "创建成功",
            Self::BadRequest => "请求参数错误",
            Self::Unauthorized => "需要身份认证",
            Self::Forbidden => "无权访问",
            Self::NotFound => "资源不存在",
            Self::Conflict => "资源冲突",
            Self::PayloadTooLarge => "文件过大",
            Self::UnsupportedMediaType => "不支持的文件类型",
            Self::Internal => "服务器内部错误",
            Self::BadGateway => "存储服务错误",
            Self::ServiceUnavailable => "服务暂不可用",
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self::with_code(ResponseCode::Success, ResponseCode::Success.message(), Some(data))
    }

    pub fn success_with_message(data: T, msg: impl Into<String>) -> Self {
        Self::with_code(ResponseCode::Success, msg, Some(data))
    }

    /// 新资源已创建（上传、注册），HTTP 201
    pub fn created(data: T, msg: impl Into<String>) -> Self {
        Self::with_code(ResponseCode::Created, msg, Some(data))
    }

    /// 出错但仍附带数据，例如降级状态下的健康检查
    pub fn error_with_data(code: ResponseCode, msg: impl Into<String>, data: T) -> Self {
        Self::with_code(code, msg, Some(data))
    }

    fn with_code(code: ResponseCode, msg: impl Into<String>, data: Option<T>) -> Self {
        Self {
            code: code.code(),
            msg: msg.into(),
            data,
        }
    }
}

impl ApiResponse<()> {
    /// 无数据的成功响应
    pub fn ok() -> Self {
        Self::with_code(ResponseCode::Success, ResponseCode::Success.message(), None)
    }

    pub fn error(code: ResponseCode, msg: impl Into<String>) -> Self {
        Self::with_code(code, msg, None)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = u16::try_from(self.code)
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        (status, Json(self)).into_response()
    }
}

/// 便捷的成功响应构造宏
#[macro_export]
macro_rules! ok_response {
    ($data:expr) => {
        $crate::response::ApiResponse::success($data)
    };
    () => {
        $crate::response::ApiResponse::ok()
    };
}
