use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{JobQueue, JobStore, ProgressBroadcaster, ProgressEvent};
use crate::error::AppError;
use crate::models::{JobStatus, ScanResult};
use crate::scanner::{ProgressReporter, VulnerabilityScanner};
use crate::storage::ResultStore;

const STEP_INITIALIZING: &str = "Initializing analysis";

/// 工作者共享的依赖
#[derive(Clone)]
pub struct WorkerContext {
    pub store: JobStore,
    pub queue: JobQueue,
    pub broadcaster: ProgressBroadcaster,
    pub scanner: VulnerabilityScanner,
    pub results: Option<ResultStore>,
}

/// 写入任务表并推送进度事件的回调
struct JobProgress {
    job_id: Uuid,
    store: JobStore,
    broadcaster: ProgressBroadcaster,
}

impl ProgressReporter for JobProgress {
    fn report(&self, step: &str, progress: u8) {
        match self
            .store
            .update(self.job_id, |job| job.record_progress(step, progress))
        {
            Ok(Ok(effective)) => {
                self.broadcaster.publish(ProgressEvent::Progress {
                    analysis_id: self.job_id,
                    progress: effective,
                    current_step: step.to_string(),
                });
            }
            Ok(Err(e)) => warn!(job_id = %self.job_id, error = %e, "忽略非运行态任务的进度"),
            Err(e) => warn!(job_id = %self.job_id, error = %e, "记录进度失败"),
        }
    }
}

/// 固定数量的后台工作者
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// 启动 `size` 个工作者，队列关闭后各自退出
    pub fn spawn(context: WorkerContext, size: usize) -> Self {
        let size = size.max(1);
        info!("分析工作池启动，工作者数量: {}", size);

        let handles = (0..size)
            .map(|worker_id| {
                let ctx = context.clone();
                tokio::spawn(async move { run_worker(worker_id, ctx).await })
            })
            .collect();

        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// 等待所有工作者退出
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "工作者异常退出");
            }
        }
    }
}

async fn run_worker(worker_id: usize, ctx: WorkerContext) {
    debug!(worker_id, "工作者就绪");
    while let Some(job_id) = ctx.queue.dequeue().await {
        process_job(&ctx, job_id).await;
    }
    debug!(worker_id, "工作者退出");
}

/// 处理单个任务；每个任务 id 至多被处理一次
pub async fn process_job(ctx: &WorkerContext, job_id: Uuid) {
    let claimed = ctx.store.update(job_id, |job| {
        job.start(STEP_INITIALIZING)
            .map(|()| PathBuf::from(&job.file_path))
    });

    let target = match claimed {
        Ok(Ok(target)) => target,
        Ok(Err(e)) => {
            warn!(job_id = %job_id, error = %e, "任务已被处理，跳过");
            return;
        }
        Err(AppError::JobNotFound { .. }) => {
            warn!(job_id = %job_id, "任务不存在，跳过");
            return;
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "认领任务失败");
            return;
        }
    };

    info!(job_id = %job_id, target = %target.display(), "开始分析任务");
    ctx.broadcaster.publish(ProgressEvent::Update {
        analysis_id: job_id,
        status: JobStatus::Running,
        progress: 0,
        current_step: STEP_INITIALIZING.to_string(),
    });

    let progress: Arc<dyn ProgressReporter> = Arc::new(JobProgress {
        job_id,
        store: ctx.store.clone(),
        broadcaster: ctx.broadcaster.clone(),
    });
    let result = ctx.scanner.scan(&target, progress).await;

    if result.is_completed() {
        finish_completed(ctx, job_id, result).await;
    } else {
        finish_failed(ctx, job_id, &result);
    }

    ctx.broadcaster.close(job_id);
}

async fn finish_completed(ctx: &WorkerContext, job_id: Uuid, result: ScanResult) {
    if let Some(results) = &ctx.results {
        // 持久化失败不影响任务状态
        if let Err(e) = results.save(job_id, &result).await {
            warn!(job_id = %job_id, error = %e, "保存扫描结果失败");
        }
    }

    let result = Arc::new(result);
    let total = result.summary.total_vulnerabilities;
    let risk_score = result.summary.risk_score;

    match ctx
        .store
        .update(job_id, |job| job.complete(Arc::clone(&result)))
    {
        Ok(Ok(())) => {
            info!(job_id = %job_id, total, risk_score, "分析任务完成");
            ctx.broadcaster.publish(ProgressEvent::Complete {
                analysis_id: job_id,
                result,
            });
        }
        Ok(Err(e)) => warn!(job_id = %job_id, error = %e, "任务状态已变化，丢弃结果"),
        Err(e) => warn!(job_id = %job_id, error = %e, "任务在分析期间被移除"),
    }
}

fn finish_failed(ctx: &WorkerContext, job_id: Uuid, result: &ScanResult) {
    let message = result
        .error
        .clone()
        .unwrap_or_else(|| "Analysis failed".to_string());

    match ctx.store.update(job_id, |job| job.fail(message.clone())) {
        Ok(Ok(())) => {
            warn!(job_id = %job_id, error = %message, "分析任务失败");
            ctx.broadcaster.publish(ProgressEvent::Error {
                analysis_id: job_id,
                error: message,
            });
        }
        Ok(Err(e)) => warn!(job_id = %job_id, error = %e, "任务状态已变化，丢弃错误"),
        Err(e) => warn!(job_id = %job_id, error = %e, "任务在分析期间被移除"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisJob;
    use crate::scanner::{ManifestDumper, PackageDecoder, ScanError};
    use crate::storage::LocalStorage;
    use async_trait::async_trait;
    use serde_json::Map;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct DirDecoder {
        dir: PathBuf,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PackageDecoder for DirDecoder {
        async fn decode(&self, target: &Path) -> Result<PathBuf, ScanError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if target.to_string_lossy().contains("corrupt") {
                return Err(ScanError::Decode("invalid zip header".to_string()));
            }
            Ok(self.dir.clone())
        }
    }

    struct DebuggableDumper;

    #[async_trait]
    impl ManifestDumper for DebuggableDumper {
        async fn dump_manifest(&self, _target: &Path) -> Result<String, ScanError> {
            Ok("package: name='com.example'\napplication-debuggable\n".to_string())
        }
    }

    struct Harness {
        ctx: WorkerContext,
        decode_calls: Arc<AtomicUsize>,
        _decoded: TempDir,
        results_dir: TempDir,
    }

    async fn harness() -> Harness {
        let decoded = TempDir::new().unwrap();
        std::fs::write(
            decoded.path().join("AndroidManifest.xml"),
            r#"<manifest><application android:debuggable="true"/></manifest>"#,
        )
        .unwrap();
        std::fs::write(
            decoded.path().join("Api.java"),
            r#"String password = "hunter22";"#,
        )
        .unwrap();

        let results_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(results_dir.path()).await.unwrap();
        let decode_calls = Arc::new(AtomicUsize::new(0));
        let scanner = VulnerabilityScanner::new(
            Arc::new(DirDecoder {
                dir: decoded.path().to_path_buf(),
                calls: decode_calls.clone(),
            }),
            Arc::new(DebuggableDumper),
        );

        Harness {
            ctx: WorkerContext {
                store: JobStore::new(),
                queue: JobQueue::new(),
                broadcaster: ProgressBroadcaster::new(64),
                scanner,
                results: Some(ResultStore::new(Arc::new(storage))),
            },
            decode_calls,
            _decoded: decoded,
            results_dir,
        }
    }

    fn submit(ctx: &WorkerContext, file_path: &str) -> Uuid {
        let job = AnalysisJob::new(
            Uuid::new_v4(),
            "app.apk",
            file_path,
            Uuid::new_v4(),
            Map::new(),
        );
        let id = job.id;
        ctx.store.create(job).unwrap();
        id
    }

    async fn wait_terminal(store: &JobStore, id: Uuid) -> AnalysisJob {
        for _ in 0..200 {
            let job = store.get(id).unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", id);
    }

    #[tokio::test]
    async fn test_job_runs_to_completion() {
        let h = harness().await;
        let id = submit(&h.ctx, "uploads/app.apk");
        let mut events = h.ctx.broadcaster.subscribe(id);

        process_job(&h.ctx, id).await;

        let job = h.ctx.store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.error.is_none());
        let result = job.result.unwrap();
        assert_eq!(result.summary.total_vulnerabilities, 2);
        assert_eq!(result.summary.risk_score, 14);

        let persisted = h.results_dir.path().join(ResultStore::key_for(id));
        assert!(persisted.exists());

        // running → 进度... → complete，进度不减
        let mut received = Vec::new();
        while let Ok(event) = events.recv().await {
            received.push(event);
        }
        assert!(matches!(
            received.first(),
            Some(ProgressEvent::Update {
                status: JobStatus::Running,
                progress: 0,
                ..
            })
        ));
        assert!(matches!(received.last(), Some(ProgressEvent::Complete { .. })));
        let progress: Vec<u8> = received
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress { progress, .. } => Some(*progress),
                _ => None,
            })
            .collect();
        assert!(!progress.is_empty());
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_decode_failure_marks_job_failed() {
        let h = harness().await;
        let id = submit(&h.ctx, "uploads/corrupt.apk");
        let mut events = h.ctx.broadcaster.subscribe(id);

        process_job(&h.ctx, id).await;

        let job = h.ctx.store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.progress < 100);
        assert!(job.result.is_none());
        assert_eq!(
            job.error.as_deref(),
            Some("APK decoding failed: invalid zip header")
        );
        assert!(!h.results_dir.path().join(ResultStore::key_for(id)).exists());

        let mut last = None;
        while let Ok(event) = events.recv().await {
            last = Some(event);
        }
        assert!(matches!(last, Some(ProgressEvent::Error { .. })));
    }

    #[tokio::test]
    async fn test_double_enqueue_processed_once() {
        let h = harness().await;
        let id = submit(&h.ctx, "uploads/app.apk");
        h.ctx.queue.enqueue(id);
        h.ctx.queue.enqueue(id);

        let pool = WorkerPool::spawn(h.ctx.clone(), 2);
        assert_eq!(pool.size(), 2);
        let job = wait_terminal(&h.ctx.store, id).await;

        while !h.ctx.queue.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        h.ctx.queue.shutdown();
        pool.join().await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(h.decode_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.ctx.store.get(id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_missing_job_is_skipped() {
        let h = harness().await;
        let ghost = Uuid::new_v4();
        let real = submit(&h.ctx, "uploads/app.apk");
        h.ctx.queue.enqueue(ghost);
        h.ctx.queue.enqueue(real);

        let pool = WorkerPool::spawn(h.ctx.clone(), 1);
        let job = wait_terminal(&h.ctx.store, real).await;
        h.ctx.queue.shutdown();
        pool.join().await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(h.decode_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_still_completes() {
        let mut h = harness().await;
        let blocker = TempDir::new().unwrap();
        let storage = LocalStorage::new(blocker.path()).await.unwrap();
        let id = submit(&h.ctx, "uploads/app.apk");
        // 目标键被目录占用，写入必然失败
        std::fs::create_dir(blocker.path().join(ResultStore::key_for(id))).unwrap();
        h.ctx.results = Some(ResultStore::new(Arc::new(storage)));

        process_job(&h.ctx, id).await;

        let job = h.ctx.store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.result.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_jobs_all_finish() {
        let h = harness().await;
        let ids: Vec<Uuid> = (0..6).map(|_| submit(&h.ctx, "uploads/app.apk")).collect();
        for id in &ids {
            h.ctx.queue.enqueue(*id);
        }

        let pool = WorkerPool::spawn(h.ctx.clone(), 3);
        for id in &ids {
            let job = wait_terminal(&h.ctx.store, *id).await;
            assert_eq!(job.status, JobStatus::Completed);
            assert_eq!(job.progress, 100);
        }
        h.ctx.queue.shutdown();
        pool.join().await;

        assert_eq!(h.decode_calls.load(Ordering::SeqCst), ids.len());
    }
}
