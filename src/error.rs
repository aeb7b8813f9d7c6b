use axum::response::{IntoResponse, Response};
use thiserror::Error;
use uuid::Uuid;

use crate::models::TransitionError;
use crate::response::{ApiResponse, ResponseCode};

/// 应用程序错误类型
#[derive(Error, Debug)]
pub enum AppError {
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("文件处理错误: {0}")]
    FileProcessing(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("文件过大: 最大允许大小 {max_size} 字节")]
    FileTooLarge { max_size: u64 },

    #[error("不支持的文件类型: {file_type}")]
    UnsupportedFileType { file_type: String },

    #[error("内部错误: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("服务暂不可用: {0}")]
    ServiceUnavailable(String),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("资源不存在: {resource}")]
    NotFound { resource: String },

    #[error("分析任务不存在: {id}")]
    JobNotFound { id: Uuid },

    #[error("无权访问该分析任务")]
    AccessDenied,

    #[error("需要身份认证")]
    Unauthorized,

    #[error("资源冲突: {0}")]
    Conflict(String),

    #[error("非法的任务状态迁移: {0}")]
    InvalidTransition(#[from] TransitionError),
}

/// 应用程序Result类型别名
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Self::Validation(msg.into())
    }

    pub fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found<T: Into<String>>(resource: T) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn job_not_found(id: Uuid) -> Self {
        Self::JobNotFound { id }
    }

    pub fn conflict<T: Into<String>>(msg: T) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn service_unavailable<T: Into<String>>(msg: T) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn unsupported_file_type<T: Into<String>>(file_type: T) -> Self {
        Self::UnsupportedFileType {
            file_type: file_type.into(),
        }
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    /// 对应的业务响应码
    pub fn response_code(&self) -> ResponseCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) | AppError::FileProcessing(_) => {
                ResponseCode::BadRequest
            }
            AppError::Unauthorized => ResponseCode::Unauthorized,
            AppError::AccessDenied => ResponseCode::Forbidden,
            AppError::NotFound { .. } | AppError::JobNotFound { .. } => ResponseCode::NotFound,
            AppError::Conflict(_) | AppError::InvalidTransition(_) => ResponseCode::Conflict,
            AppError::FileTooLarge { .. } => ResponseCode::PayloadTooLarge,
            AppError::UnsupportedFileType { .. } => ResponseCode::UnsupportedMediaType,
            AppError::Storage(_) => ResponseCode::BadGateway,
            AppError::ServiceUnavailable(_) => ResponseCode::ServiceUnavailable,
            AppError::Serialization(_)
            | AppError::Io(_)
            | AppError::Config(_)
            | AppError::Internal(_) => ResponseCode::Internal,
        }
    }

    /// 返回给客户端的消息；内部错误不暴露细节
    fn client_message(&self) -> String {
        match self {
            AppError::Validation(msg) | AppError::BadRequest(msg) | AppError::Conflict(msg) => {
                msg.clone()
            }
            AppError::FileTooLarge { max_size } => {
                format!("文件过大，最大允许大小: {} MB", max_size / 1024 / 1024)
            }
            AppError::Serialization(_)
            | AppError::Io(_)
            | AppError::Config(_)
            | AppError::Internal(_) => self.response_code().message().to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.response_code();
        if code.status().is_server_error() {
            tracing::error!(error = %self, "请求处理失败");
        } else {
            tracing::debug!(error = %self, "请求被拒绝");
        }

        ApiResponse::error(code, self.client_message()).into_response()
    }
}
