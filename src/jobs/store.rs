use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{AnalysisJob, Entity, JobStatus};

/// 分析任务表
///
/// 按任务 id 分片加锁：轮询读取只锁住所在分片，工作者对单个任务的
/// 读改写在同一把分片锁内完成。工作者与上传方在同一进程内运行，
/// 共享同一个表；拆成独立进程时需要换成外部存储。
#[derive(Debug, Clone, Default)]
pub struct JobStore {
    jobs: Arc<DashMap<Uuid, AnalysisJob>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记新任务；id 已存在时返回冲突
    pub fn create(&self, job: AnalysisJob) -> AppResult<()> {
        use dashmap::mapref::entry::Entry;

        match self.jobs.entry(job.id()) {
            Entry::Occupied(_) => Err(AppError::conflict(format!("分析任务已存在: {}", job.id))),
            Entry::Vacant(slot) => {
                slot.insert(job);
                Ok(())
            }
        }
    }

    /// 读取任务快照
    pub fn get(&self, id: Uuid) -> AppResult<AnalysisJob> {
        self.jobs
            .get(&id)
            .map(|job| job.value().clone())
            .ok_or_else(|| AppError::job_not_found(id))
    }

    /// 原子地读改写单个任务，返回 `mutator` 的结果
    pub fn update<R>(&self, id: Uuid, mutator: impl FnOnce(&mut AnalysisJob) -> R) -> AppResult<R> {
        let mut job = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::job_not_found(id))?;
        Ok(mutator(job.value_mut()))
    }

    /// 某用户的全部任务，按提交时间倒序
    pub fn list_by_owner(&self, user_id: Uuid) -> Vec<AnalysisJob> {
        let mut jobs: Vec<AnalysisJob> = self
            .jobs
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        jobs
    }

    /// 显式移除终态任务；排队或运行中的任务不允许移除
    pub fn evict(&self, id: Uuid) -> AppResult<AnalysisJob> {
        if let Some((_, job)) = self
            .jobs
            .remove_if(&id, |_, job| job.status.is_terminal())
        {
            return Ok(job);
        }

        match self.jobs.get(&id) {
            Some(job) => Err(AppError::conflict(format!(
                "任务 {} 尚未结束，当前状态: {:?}",
                id, job.status
            ))),
            None => Err(AppError::job_not_found(id)),
        }
    }

    /// 撤回尚未被工作者认领的任务，用于入队失败时回滚
    pub fn withdraw(&self, id: Uuid) -> Option<AnalysisJob> {
        self.jobs
            .remove_if(&id, |_, job| job.status == JobStatus::Queued)
            .map(|(_, job)| job)
    }

    /// 处于某状态的任务数
    pub fn count_by_status(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|entry| entry.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScanResult;
    use serde_json::Map;

    fn job_for(user_id: Uuid) -> AnalysisJob {
        AnalysisJob::new(
            Uuid::new_v4(),
            "app.apk",
            "uploads/app.apk",
            user_id,
            Map::new(),
        )
    }

    #[test]
    fn test_create_and_get() {
        let store = JobStore::new();
        let job = job_for(Uuid::new_v4());
        let id = job.id;

        store.create(job.clone()).unwrap();
        assert_eq!(store.get(id).unwrap().filename, "app.apk");
        assert!(matches!(store.create(job), Err(AppError::Conflict(_))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let store = JobStore::new();
        let id = Uuid::new_v4();

        assert!(matches!(store.get(id), Err(AppError::JobNotFound { .. })));
        assert!(matches!(
            store.update(id, |_| ()),
            Err(AppError::JobNotFound { .. })
        ));
        assert!(matches!(store.evict(id), Err(AppError::JobNotFound { .. })));
    }

    #[test]
    fn test_update_is_visible_to_readers() {
        let store = JobStore::new();
        let job = job_for(Uuid::new_v4());
        let id = job.id;
        store.create(job).unwrap();

        store
            .update(id, |job| job.start("Initializing analysis"))
            .unwrap()
            .unwrap();
        let snapshot = store.get(id).unwrap();
        assert_eq!(snapshot.status, JobStatus::Running);
        assert_eq!(store.count_by_status(JobStatus::Running), 1);
    }

    #[test]
    fn test_list_by_owner_newest_first() {
        let store = JobStore::new();
        let owner = Uuid::new_v4();

        let mut older = job_for(owner);
        older.submitted_at -= chrono::Duration::minutes(5);
        let newer = job_for(owner);
        let (older_id, newer_id) = (older.id, newer.id);

        store.create(older).unwrap();
        store.create(newer).unwrap();
        store.create(job_for(Uuid::new_v4())).unwrap();

        let ids: Vec<Uuid> = store.list_by_owner(owner).iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![newer_id, older_id]);
    }

    #[test]
    fn test_evict_only_terminal_jobs() {
        let store = JobStore::new();
        let job = job_for(Uuid::new_v4());
        let id = job.id;
        store.create(job).unwrap();

        assert!(matches!(store.evict(id), Err(AppError::Conflict(_))));

        store
            .update(id, |job| {
                job.start("init")?;
                job.complete(std::sync::Arc::new(ScanResult::failed("app.apk", "x")))
            })
            .unwrap()
            .unwrap();

        assert_eq!(store.evict(id).unwrap().id, id);
        assert!(store.is_empty());
    }

    #[test]
    fn test_withdraw_only_unclaimed_jobs() {
        let store = JobStore::new();
        let queued = job_for(Uuid::new_v4());
        let running = job_for(Uuid::new_v4());
        let (queued_id, running_id) = (queued.id, running.id);
        store.create(queued).unwrap();
        store.create(running).unwrap();
        store
            .update(running_id, |job| job.start("init"))
            .unwrap()
            .unwrap();

        assert_eq!(store.withdraw(queued_id).map(|j| j.id), Some(queued_id));
        assert!(store.withdraw(running_id).is_none());
        assert!(store.withdraw(Uuid::new_v4()).is_none());
        assert_eq!(store.len(), 1);
    }
}
