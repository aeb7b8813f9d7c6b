//! 用户与会话表
//!
//! 只负责签发与校验不透明令牌；核心逻辑只使用其中的用户 id 作为任务归属。

mod password;

pub use password::PasswordHasher;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tokio::time::{MissedTickBehavior, interval};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::User;

const MIN_PASSWORD_LEN: usize = 6;

/// 已签发的会话
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// 用户表与令牌表，按键分片加锁
#[derive(Debug, Clone)]
pub struct SessionStore {
    users: Arc<DashMap<Uuid, User>>,
    /// 小写用户名 → 用户 id
    usernames: Arc<DashMap<String, Uuid>>,
    /// 小写邮箱 → 用户 id
    emails: Arc<DashMap<String, Uuid>>,
    sessions: Arc<DashMap<String, Session>>,
    hasher: PasswordHasher,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl_hours: i64, hasher: PasswordHasher) -> Self {
        Self {
            users: Arc::new(DashMap::new()),
            usernames: Arc::new(DashMap::new()),
            emails: Arc::new(DashMap::new()),
            sessions: Arc::new(DashMap::new()),
            hasher,
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// 注册新用户；用户名或邮箱重复时返回冲突
    pub async fn register(&self, username: &str, email: &str, password: &str) -> AppResult<User> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() {
            return Err(AppError::validation("用户名不能为空"));
        }
        if !email.contains('@') {
            return Err(AppError::validation("邮箱格式不正确"));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AppError::validation(format!(
                "密码长度不能少于{}位",
                MIN_PASSWORD_LEN
            )));
        }

        // 哈希耗时，先算好再占位，避免持锁等待
        let password_hash = self.hasher.hash(password.to_string()).await?;
        let user_id = Uuid::new_v4();
        let (name_key, email_key) = (username.to_lowercase(), email.to_lowercase());

        match self.usernames.entry(name_key.clone()) {
            Entry::Occupied(_) => return Err(AppError::conflict("用户名已存在")),
            Entry::Vacant(slot) => {
                slot.insert(user_id);
            }
        }
        match self.emails.entry(email_key) {
            Entry::Occupied(_) => {
                self.usernames.remove(&name_key);
                return Err(AppError::conflict("邮箱已被注册"));
            }
            Entry::Vacant(slot) => {
                slot.insert(user_id);
            }
        }

        let user = User {
            id: user_id,
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
            created_at: Utc::now(),
            last_login: None,
        };
        self.users.insert(user.id, user.clone());

        tracing::info!("注册新用户: {}", user.username);
        Ok(user)
    }

    /// 校验凭据并签发令牌
    pub async fn login(&self, username: &str, password: &str) -> AppResult<(Session, User)> {
        let user_id = self
            .usernames
            .get(&username.trim().to_lowercase())
            .map(|id| *id)
            .ok_or(AppError::Unauthorized)?;
        let stored = self
            .users
            .get(&user_id)
            .map(|u| u.password_hash.clone())
            .ok_or(AppError::Unauthorized)?;

        if !self.hasher.verify(password.to_string(), stored).await? {
            return Err(AppError::Unauthorized);
        }

        let user = {
            let mut user = self.users.get_mut(&user_id).ok_or(AppError::Unauthorized)?;
            user.last_login = Some(Utc::now());
            user.clone()
        };

        let session = Session {
            token: Uuid::new_v4().simple().to_string(),
            user_id,
            expires_at: Utc::now() + self.ttl,
        };
        self.sessions.insert(session.token.clone(), session.clone());

        tracing::debug!("用户登录: {}", user.username);
        Ok((session, user))
    }

    /// 根据令牌查找用户；过期令牌会被移除
    pub fn authenticate(&self, token: &str) -> AppResult<User> {
        let user_id = {
            let session = self.sessions.get(token).ok_or(AppError::Unauthorized)?;
            if session.expires_at <= Utc::now() {
                None
            } else {
                Some(session.user_id)
            }
        };

        let Some(user_id) = user_id else {
            self.sessions.remove(token);
            return Err(AppError::Unauthorized);
        };

        self.users
            .get(&user_id)
            .map(|u| u.clone())
            .ok_or(AppError::Unauthorized)
    }

    pub fn logout(&self, token: &str) {
        self.sessions.remove(token);
    }

    /// 清理所有过期令牌，返回清理数量
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.expires_at > now);
        before - self.sessions.len()
    }

    /// 定时清理过期令牌，随服务常驻
    pub async fn start_purge_loop(self, interval_secs: u64) {
        let mut ticker = interval(std::time::Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let purged = self.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "已清理过期会话");
            }
        }
    }
}
