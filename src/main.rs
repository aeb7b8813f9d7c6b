/*
 * APK Scan - Android Package Vulnerability Analysis Service
 * Copyright (c) 2024 APK Scan Project
 * 
 * This work is licensed under CC BY-NC-SA 4.0
 * https://creativecommons.org/licenses/by-nc-sa/4.0/
 */

use apkscan_backend::{
    config::Config,
    docs::ApiDoc,
    error::AppResult,
    handlers::AppState,
    jobs::WorkerPool,
    routes::create_api_routes,
    scanner::VulnerabilityScanner,
    storage::{ResultStore, create_storage},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::Method,
    response::Json,
    routing::get,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

const CONFIG_FILE: &str = "config.toml";

/// 过期会话清理间隔（秒）
const SESSION_PURGE_INTERVAL_SECS: u64 = 600;

#[tokio::main]
async fn main() -> AppResult<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "apkscan_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置；文件不存在时写出默认配置
    let config = if std::path::Path::new(CONFIG_FILE).exists() {
        let config = Config::from_file(CONFIG_FILE)?;
        tracing::info!("已加载配置文件: {}", CONFIG_FILE);
        config
    } else {
        tracing::warn!("未找到配置文件，使用默认配置");
        let default_config = Config::default();
        if let Err(e) = default_config.save_to_file(CONFIG_FILE) {
            tracing::warn!("保存默认配置失败: {}", e);
        }
        default_config
    };

    tracing::info!("服务器配置: {}", config.server_addr());

    // 上传目录与结果存储
    tokio::fs::create_dir_all(&config.upload.dir).await?;
    let storage = create_storage(&config).await?;
    tracing::info!("结果存储后端: {}", storage.backend_name());

    // 创建应用状态
    let app_state = AppState::new(config.clone(), ResultStore::new(storage))?;

    // 启动分析工作池
    let scanner = VulnerabilityScanner::from_config(&config.scanner);
    let workers = WorkerPool::spawn(app_state.worker_context(scanner), config.worker.pool_size);
    tracing::info!("分析工作池已启动，工作者数量: {}", workers.size());

    // 启动会话清理
    let sessions = app_state.sessions.clone();
    tokio::spawn(async move {
        sessions.start_purge_loop(SESSION_PURGE_INTERVAL_SECS).await;
    });

    // 创建CORS中间件
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let queue = app_state.queue.clone();
    let app = Router::new()
        // OpenAPI JSON 路由
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        // 业务API路由
        .merge(create_api_routes())
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(config.upload.max_size as usize)) // 设置请求体大小限制
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // 启动服务器
    let listener = tokio::net::TcpListener::bind(&config.server_addr()).await?;
    tracing::info!("🚀 服务器启动成功，监听地址: {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("监听退出信号失败: {}", e);
            }
        })
        .await?;

    // 停止接收新任务，等待进行中的分析结束
    tracing::info!("服务器正在关闭，等待分析任务结束");
    queue.shutdown();
    workers.join().await;
    tracing::info!("服务器已关闭");

    Ok(())
}
