use actix_web::{middleware, web, App, HttpServer};
use campus_notify::{
    auth::SessionKey,
    handlers::{producer, subscribe},
    metrics, Config, ConnectionRegistry,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting notification service");

    let config = Config::from_env()?;
    let session_key = SessionKey(config.auth.jwt_secret.clone());

    let registry = ConnectionRegistry::new();
    tracing::info!("Connection registry initialized");

    let addr = format!("0.0.0.0:{}", config.app.port);
    tracing::info!("Starting HTTP server on {}", addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::new(session_key.clone()))
            .wrap(middleware::Logger::default())
            .wrap(metrics::MetricsMiddleware)
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .configure(|cfg| {
                subscribe::register_routes(cfg);
                producer::register_routes(cfg);
            })
    })
    .bind(&addr)?
    .run()
    .await?;

    Ok(())
}
