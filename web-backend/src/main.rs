use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use anyhow::Result;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod state;
mod store;

use api::create_api_router;
use state::{AppState, Settings};

async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let database = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => "ok",
        Err(e) => {
            tracing::warn!("Health check database query failed: {}", e);
            "unavailable"
        }
    };
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "database": database,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sastgate_web=debug,sastgate_core=info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 初始化状态
    let settings = Settings::from_env();
    let state = AppState::new(&settings).await?;

    // 上次进程退出时未完成的任务
    let recovered = state.manager.recover_interrupted().await?;
    if recovered > 0 {
        tracing::warn!("Marked {} interrupted scans as failed", recovered);
    }

    // 启动服务器
    tracing::info!("SAST gateway listening on {}", settings.bind);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(Cors::permissive())
            .wrap(TracingLogger::default())
            // API 路由
            .service(create_api_router())
            // 健康检查
            .route("/health", web::get().to(health_check))
    })
    .bind(settings.bind.as_str())?
    .run()
    .await?;

    Ok(())
}
