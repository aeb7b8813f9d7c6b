//! 任务进度的 WebSocket 推送
//!
//! 客户端发送 `{"action":"join","analysis_id":"…"}` 订阅某个任务，
//! `{"action":"leave",…}` 取消订阅。加入之后才发布的事件才会被推送，
//! 不回放历史事件；`joined` 回复里带上当前状态与进度供客户端对齐。

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{AppState, AuthUser};
use crate::jobs::ProgressEvent;
use crate::models::JobStatus;

/// 客户端消息
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(alias = "join_analysis")]
    Join { analysis_id: Uuid },
    #[serde(alias = "leave_analysis")]
    Leave { analysis_id: Uuid },
}

/// 服务端对客户端消息的回复
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerMessage {
    Joined {
        analysis_id: Uuid,
        status: JobStatus,
        progress: u8,
    },
    Left {
        analysis_id: Uuid,
    },
    Error {
        message: String,
    },
}

/// 建立 WebSocket 连接（需要令牌，可放在 `?token=` 中）
#[utoipa::path(
    get,
    path = "/api/ws",
    tag = "analysis",
    params(("token" = Option<String>, Query, description = "会话令牌，浏览器无法设置请求头时使用")),
    responses(
        (status = 101, description = "切换到 WebSocket 协议"),
        (status = 401, description = "需要身份认证")
    )
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    auth: AuthUser,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, auth))
}

async fn handle_socket(mut socket: WebSocket, app_state: AppState, auth: AuthUser) {
    info!("WebSocket 已连接: {}", auth.user.username);
    let (outgoing, mut events) = mpsc::unbounded_channel::<String>();
    let mut subscriptions = Subscriptions::new(app_state, auth, outgoing);

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = subscriptions.handle(text.as_str());
                    match serde_json::to_string(&reply) {
                        Ok(reply) => {
                            if socket.send(Message::Text(reply.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "序列化回复失败"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket 读取失败");
                    break;
                }
            },
            Some(event) = events.recv() => {
                if socket.send(Message::Text(event.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("WebSocket 已断开: {}", subscriptions.auth.user.username);
}

/// 单个连接的订阅集合；每个订阅由一个转发任务把广播事件写入连接的发送队列
struct Subscriptions {
    app_state: AppState,
    auth: AuthUser,
    outgoing: mpsc::UnboundedSender<String>,
    forwards: HashMap<Uuid, JoinHandle<()>>,
}

impl Subscriptions {
    fn new(app_state: AppState, auth: AuthUser, outgoing: mpsc::UnboundedSender<String>) -> Self {
        Self {
            app_state,
            auth,
            outgoing,
            forwards: HashMap::new(),
        }
    }

    fn handle(&mut self, text: &str) -> ServerMessage {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Join { analysis_id }) => self.join(analysis_id),
            Ok(ClientMessage::Leave { analysis_id }) => self.leave(analysis_id),
            Err(e) => ServerMessage::Error {
                message: format!("无法解析消息: {}", e),
            },
        }
    }

    fn join(&mut self, analysis_id: Uuid) -> ServerMessage {
        if let Err(e) = self.app_state.owned_job(&self.auth, analysis_id) {
            return ServerMessage::Error {
                message: e.to_string(),
            };
        }

        let forwarding = self
            .forwards
            .get(&analysis_id)
            .is_some_and(|handle| !handle.is_finished());

        // 先订阅再读状态：工作者先写入终态再发布并关闭主题，
        // 因此要么收到终态事件，要么这里读到的就是终态
        let receiver = (!forwarding).then(|| self.app_state.broadcaster.subscribe(analysis_id));
        let job = match self.app_state.store.get(analysis_id) {
            Ok(job) => job,
            Err(e) => {
                drop(receiver);
                self.app_state.broadcaster.release(analysis_id);
                return ServerMessage::Error {
                    message: e.to_string(),
                };
            }
        };

        match receiver {
            Some(receiver) if job.status.is_terminal() => {
                drop(receiver);
                self.app_state.broadcaster.release(analysis_id);
                debug!(job_id = %analysis_id, "任务已结束，不再订阅");
            }
            Some(receiver) => {
                let handle = forward(analysis_id, receiver, self.outgoing.clone());
                self.forwards.insert(analysis_id, handle);
                debug!(job_id = %analysis_id, "客户端加入任务频道");
            }
            None => {}
        }

        ServerMessage::Joined {
            analysis_id,
            status: job.status,
            progress: job.progress,
        }
    }

    fn leave(&mut self, analysis_id: Uuid) -> ServerMessage {
        if let Some(handle) = self.forwards.remove(&analysis_id) {
            handle.abort();
            debug!(job_id = %analysis_id, "客户端离开任务频道");
        }
        ServerMessage::Left { analysis_id }
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        for handle in self.forwards.values() {
            handle.abort();
        }
    }
}

/// 转发单个任务的事件，终态事件之后结束
fn forward(
    analysis_id: Uuid,
    mut receiver: broadcast::Receiver<ProgressEvent>,
    outgoing: mpsc::UnboundedSender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    match serde_json::to_string(&event) {
                        Ok(text) => {
                            if outgoing.send(text).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(job_id = %analysis_id, error = %e, "序列化事件失败"),
                    }
                    if terminal {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(job_id = %analysis_id, skipped, "订阅者处理过慢，丢弃部分事件");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
