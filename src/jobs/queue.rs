use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info};
use uuid::Uuid;

/// 任务 id 的先进先出队列
///
/// 入队从不阻塞；出队在有任务或收到关闭信号前一直等待。
/// 不去重，同一 id 不应重复提交。
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<Uuid>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Uuid>>>,
    shutdown: watch::Sender<bool>,
    pending: Arc<AtomicUsize>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            shutdown,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 提交任务 id；队列已关闭时返回 false
    pub fn enqueue(&self, id: Uuid) -> bool {
        if self.is_shut_down() {
            return false;
        }
        // 先计数再发送，等待中的消费者可能立即取走并递减
        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.sender.send(id) {
            Ok(()) => {
                debug!(job_id = %id, "任务入队");
                true
            }
            Err(_) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                false
            }
        }
    }

    /// 取出下一个任务 id；关闭后返回 None
    pub async fn dequeue(&self) -> Option<Uuid> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return None;
        }

        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;
            _ = shutdown.changed() => None,
            id = receiver.recv() => {
                if id.is_some() {
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                }
                id
            }
        }
    }

    /// 通知所有等待中的消费者退出
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("任务队列关闭");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// 尚未被取出的任务数
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = JobQueue::new();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            assert!(queue.enqueue(*id));
        }
        assert_eq!(queue.len(), 3);

        for id in &ids {
            assert_eq!(queue.dequeue().await, Some(*id));
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_item() {
        let queue = JobQueue::new();
        let consumer = queue.clone();
        let handle = tokio::spawn(async move { consumer.dequeue().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        let id = Uuid::new_v4();
        queue.enqueue(id);
        assert_eq!(handle.await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_shutdown_wakes_consumers() {
        let queue = JobQueue::new();
        let consumer = queue.clone();
        let handle = tokio::spawn(async move { consumer.dequeue().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, None);
        assert!(!queue.enqueue(Uuid::new_v4()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_len_never_underflows_with_waiting_consumer() {
        let queue = JobQueue::new();

        for _ in 0..200 {
            let consumer = {
                let queue = queue.clone();
                tokio::spawn(async move { queue.dequeue().await })
            };
            tokio::task::yield_now().await;

            let id = Uuid::new_v4();
            assert!(queue.enqueue(id));
            assert!(queue.len() <= 1);
            assert_eq!(consumer.await.unwrap(), Some(id));
            assert_eq!(queue.len(), 0);
        }
    }
}
