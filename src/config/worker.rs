use serde::{Deserialize, Serialize};

/// 分析工作池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// 并发工作者数量
    pub pool_size: usize,
    /// 每个任务主题的进度事件缓冲容量
    pub broadcast_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            broadcast_capacity: 64,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_size == 0 || self.pool_size > 64 {
            return Err("工作者数量应在1-64之间".into());
        }
        if self.broadcast_capacity == 0 {
            return Err("进度事件缓冲容量不能为0".into());
        }
        Ok(())
    }
}
