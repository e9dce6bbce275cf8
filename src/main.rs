/// Image Service - HTTP Server
///
/// Accepts uploads, serves originals and processed variants, and queues
/// processing tasks for the worker fleet.
use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer};
use image_service::db::{self, PgImageRepository};
use image_service::handlers;
use image_service::kafka::KafkaTaskProducer;
use image_service::services::IngestService;
use image_service::storage::S3ObjectStore;
use image_service::Config;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[actix_web::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Configuration loading failed: {e:#}");
            eprintln!("ERROR: Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let retries = config.retry.strategy();

    let pool = match db::create_pool(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Database pool creation failed: {e}");
            eprintln!("ERROR: Failed to connect to database: {e}");
            std::process::exit(1);
        }
    };
    info!(
        max_connections = config.database.max_connections,
        "Connected to database"
    );

    let store = match S3ObjectStore::new(&config.s3, retries.clone()).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Object store initialization failed: {e}");
            eprintln!("ERROR: Failed to initialize object store: {e}");
            std::process::exit(1);
        }
    };
    info!(bucket = %config.s3.bucket, "Object store ready");

    let producer = match KafkaTaskProducer::new(&config.kafka, retries.clone()) {
        Ok(producer) => producer,
        Err(e) => {
            tracing::error!("Kafka producer initialization failed: {e}");
            eprintln!("ERROR: Failed to initialize Kafka producer: {e}");
            std::process::exit(1);
        }
    };

    let service = IngestService::new(
        Arc::new(PgImageRepository::new(pool, retries)),
        Arc::new(store),
        Arc::new(producer),
    );

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    info!(address = %bind_address, "Starting HTTP server");

    let server_config = config.server.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(service.clone()))
            .wrap(Logger::default())
            .route(
                "/api/health",
                web::get()
                    .to(|| async { HttpResponse::Ok().json(serde_json::json!({"status": "ok"})) }),
            )
            .service(
                web::scope("/api/images")
                    .route("/upload", web::post().to(handlers::upload_image))
                    .route("", web::get().to(handlers::list_images))
                    .route("/{id}/status", web::get().to(handlers::get_status))
                    .route("/{id}", web::get().to(handlers::get_image))
                    .route("/{id}", web::delete().to(handlers::delete_image)),
            )
    })
    .client_request_timeout(Duration::from_secs(server_config.read_timeout_secs))
    .keep_alive(Duration::from_secs(server_config.idle_timeout_secs))
    .shutdown_timeout(server_config.shutdown_timeout_secs)
    .bind(&bind_address)?
    .run()
    .await?;

    info!("Server stopped gracefully");
    Ok(())
}
