use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::models::{JobStatus, ScanResult};

/// 推送给订阅者的任务事件
///
/// 序列化后的 `event` 字段即 WebSocket 消息类型。
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum ProgressEvent {
    /// 状态变化（进入 Running）
    #[serde(rename = "analysis_update")]
    Update {
        analysis_id: Uuid,
        status: JobStatus,
        progress: u8,
        current_step: String,
    },
    #[serde(rename = "analysis_progress")]
    Progress {
        analysis_id: Uuid,
        progress: u8,
        current_step: String,
    },
    #[serde(rename = "analysis_complete")]
    Complete {
        analysis_id: Uuid,
        result: Arc<ScanResult>,
    },
    #[serde(rename = "analysis_error")]
    Error { analysis_id: Uuid, error: String },
}

impl ProgressEvent {
    pub fn analysis_id(&self) -> Uuid {
        match self {
            ProgressEvent::Update { analysis_id, .. }
            | ProgressEvent::Progress { analysis_id, .. }
            | ProgressEvent::Complete { analysis_id, .. }
            | ProgressEvent::Error { analysis_id, .. } => *analysis_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Complete { .. } | ProgressEvent::Error { .. }
        )
    }
}

/// 按任务划分的发布/订阅通道
///
/// 没有回放：订阅之前发布的事件不会补发。同一任务的事件按发布顺序送达。
#[derive(Debug, Clone)]
pub struct ProgressBroadcaster {
    topics: Arc<DashMap<Uuid, broadcast::Sender<ProgressEvent>>>,
    capacity: usize,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// 订阅某任务的事件
    pub fn subscribe(&self, id: Uuid) -> broadcast::Receiver<ProgressEvent> {
        self.topics
            .entry(id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// 发布事件，返回收到事件的订阅者数
    pub fn publish(&self, event: ProgressEvent) -> usize {
        let id = event.analysis_id();
        let delivered = match self.topics.get(&id) {
            Some(topic) => topic.send(event).unwrap_or(0),
            None => 0,
        };

        // 没有订阅者的主题不保留
        self.topics.remove_if(&id, |_, topic| topic.receiver_count() == 0);

        debug!(job_id = %id, subscribers = delivered, "发布任务事件");
        delivered
    }

    /// 任务结束后关闭主题；订阅者读完剩余事件后收到 Closed
    pub fn close(&self, id: Uuid) {
        self.topics.remove(&id);
    }

    /// 移除已无订阅者的主题，返回是否移除
    pub fn release(&self, id: Uuid) -> bool {
        self.topics
            .remove_if(&id, |_, topic| topic.receiver_count() == 0)
            .is_some()
    }

    pub fn subscriber_count(&self, id: Uuid) -> usize {
        self.topics
            .get(&id)
            .map(|topic| topic.receiver_count())
            .unwrap_or(0)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    fn progress(id: Uuid, pct: u8) -> ProgressEvent {
        ProgressEvent::Progress {
            analysis_id: id,
            progress: pct,
            current_step: format!("step {}", pct),
        }
    }

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let broadcaster = ProgressBroadcaster::new(16);
        let id = Uuid::new_v4();
        let mut rx = broadcaster.subscribe(id);

        for pct in [10, 25, 35] {
            assert_eq!(broadcaster.publish(progress(id, pct)), 1);
        }

        for expected in [10, 25, 35] {
            match rx.recv().await.unwrap() {
                ProgressEvent::Progress { progress, .. } => assert_eq!(progress, expected),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscribers() {
        let broadcaster = ProgressBroadcaster::new(16);
        let id = Uuid::new_v4();
        let _early = broadcaster.subscribe(id);

        broadcaster.publish(progress(id, 10));
        let mut late = broadcaster.subscribe(id);
        assert!(matches!(late.try_recv(), Err(TryRecvError::Empty)));

        broadcaster.publish(progress(id, 25));
        assert!(matches!(
            late.recv().await.unwrap(),
            ProgressEvent::Progress { progress: 25, .. }
        ));
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let broadcaster = ProgressBroadcaster::new(16);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut rx_a = broadcaster.subscribe(a);
        let _rx_b = broadcaster.subscribe(b);

        broadcaster.publish(progress(b, 50));
        assert!(matches!(rx_a.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_keeps_no_topic() {
        let broadcaster = ProgressBroadcaster::new(16);
        let id = Uuid::new_v4();

        assert_eq!(broadcaster.publish(progress(id, 10)), 0);
        assert_eq!(broadcaster.topic_count(), 0);

        let rx = broadcaster.subscribe(id);
        drop(rx);
        broadcaster.publish(progress(id, 20));
        assert_eq!(broadcaster.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_close_ends_subscription() {
        let broadcaster = ProgressBroadcaster::new(16);
        let id = Uuid::new_v4();
        let mut rx = broadcaster.subscribe(id);

        broadcaster.publish(ProgressEvent::Error {
            analysis_id: id,
            error: "APK decoding failed".to_string(),
        });
        broadcaster.close(id);

        assert!(rx.recv().await.unwrap().is_terminal());
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
    }

    #[tokio::test]
    async fn test_release_keeps_topics_with_subscribers() {
        let broadcaster = ProgressBroadcaster::new(16);
        let id = Uuid::new_v4();
        let rx = broadcaster.subscribe(id);

        assert!(!broadcaster.release(id));
        assert_eq!(broadcaster.topic_count(), 1);

        drop(rx);
        assert!(broadcaster.release(id));
        assert_eq!(broadcaster.topic_count(), 0);
    }

    #[test]
    fn test_event_wire_names() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(progress(id, 40)).unwrap();
        assert_eq!(json["event"], "analysis_progress");
        assert_eq!(json["progress"], 40);

        let json = serde_json::to_value(ProgressEvent::Update {
            analysis_id: id,
            status: JobStatus::Running,
            progress: 0,
            current_step: "Initializing analysis".to_string(),
        })
        .unwrap();
        assert_eq!(json["event"], "analysis_update");
        assert_eq!(json["status"], "running");
    }
}
