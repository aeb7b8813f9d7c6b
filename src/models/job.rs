use super::{Entity, ScanResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// 分析任务状态
///
/// Queued → Running → {Completed, Failed}；两个终态不再迁移。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// 排队中
    Queued,
    /// 分析中
    Running,
    /// 已完成
    Completed,
    /// 失败
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// 非法的状态迁移
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// 上传文件的哈希信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FileHashes {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}

/// 分析任务
///
/// 由上传方以 Queued 状态创建，之后只由认领它的工作者修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: Uuid,
    /// 原始文件名（已清洗）
    pub filename: String,
    /// 上传文件在本地的保存路径
    pub file_path: String,
    pub hashes: Option<FileHashes>,
    /// 所属用户
    pub user_id: Uuid,
    /// 扫描选项（透传）
    pub options: Map<String, JsonValue>,
    pub status: JobStatus,
    /// 进度百分比 (0-100)
    pub progress: u8,
    /// 当前步骤描述，仅供展示
    pub current_step: String,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 仅在 Completed 时存在
    pub result: Option<Arc<ScanResult>>,
    /// 仅在 Failed 时存在
    pub error: Option<String>,
}

impl Entity for AnalysisJob {
    type Id = Uuid;

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl AnalysisJob {
    /// 创建新的排队任务
    pub fn new(
        id: Uuid,
        filename: impl Into<String>,
        file_path: impl Into<String>,
        user_id: Uuid,
        options: Map<String, JsonValue>,
    ) -> Self {
        Self {
            id,
            filename: filename.into(),
            file_path: file_path.into(),
            hashes: None,
            user_id,
            options,
            status: JobStatus::Queued,
            progress: 0,
            current_step: String::new(),
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn with_hashes(mut self, hashes: FileHashes) -> Self {
        self.hashes = Some(hashes);
        self
    }

    /// Queued → Running
    pub fn start(&mut self, step: impl Into<String>) -> Result<(), TransitionError> {
        self.guard(JobStatus::Queued, JobStatus::Running)?;
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        self.progress = 0;
        self.current_step = step.into();
        Ok(())
    }

    /// 记录进度；进度只增不减，返回实际生效的进度值
    pub fn record_progress(
        &mut self,
        step: impl Into<String>,
        progress: u8,
    ) -> Result<u8, TransitionError> {
        self.guard(JobStatus::Running, JobStatus::Running)?;
        // 100 保留给完成态
        self.progress = self.progress.max(progress.min(99));
        self.current_step = step.into();
        Ok(self.progress)
    }

    /// Running → Completed
    pub fn complete(&mut self, result: Arc<ScanResult>) -> Result<(), TransitionError> {
        self.guard(JobStatus::Running, JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.current_step = "Analysis complete".to_string();
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
        self.error = None;
        Ok(())
    }

    /// Running → Failed，错误信息原样保留
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.guard(JobStatus::Running, JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
        self.result = None;
        Ok(())
    }

    fn guard(&self, expected: JobStatus, to: JobStatus) -> Result<(), TransitionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                to,
            })
        }
    }
}

/// 任务状态视图（轮询接口返回）
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobStatusView {
    pub id: Uuid,
    pub filename: String,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: String,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&AnalysisJob> for JobStatusView {
    fn from(job: &AnalysisJob) -> Self {
        Self {
            id: job.id,
            filename: job.filename.clone(),
            status: job.status,
            progress: job.progress,
            current_step: job.current_step.clone(),
            submitted_at: job.submitted_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error: job.error.clone(),
        }
    }
}
