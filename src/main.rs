use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use img_thumb_rs::codec::native_encoders;
use img_thumb_rs::handlers;
use img_thumb_rs::probe::{RuntimeProber, StaticCapabilities};
use img_thumb_rs::{Config, Pipeline};
use log::info;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load configuration first
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        Config::default()
    });

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.logging.level)
    ).init();

    info!("Starting Image Thumbnail Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Server will listen on http://{}", config.bind_address());
    info!("Maximum payload size: {}MB", config.server.max_file_size_mb);
    info!(
        "Thumbnails bounded to {}px, budget {} bytes, JPEG via {}",
        config.thumbnail.max_dimension,
        config.thumbnail.budget_bytes,
        config.thumbnail.jpeg_backend().name()
    );

    // Probe once per process; the chain is read-only afterwards.
    let encoders = native_encoders(config.thumbnail.jpeg_backend(), config.thumbnail.avif_speed);
    let probed = RuntimeProber::new(encoders.clone()).probe();
    let chain = config.thumbnail.restrict(&probed);
    info!("Codec chain: {:?}", chain.codecs());

    let pipeline = web::Data::new(Pipeline::new(
        config.thumbnail.pipeline_config(),
        Arc::new(StaticCapabilities(chain)),
        encoders,
    ));

    let bind_address = config.bind_address();
    let max_payload_size = config.max_file_size_bytes();
    let worker_threads = config.server.worker_threads;
    let enable_cors = config.server.enable_cors;
    let request_logging = config.logging.enable_request_logging;

    let mut server = HttpServer::new(move || {
        let mut cors = actix_web::middleware::DefaultHeaders::new();
        if enable_cors {
            cors = cors
                .add(("Access-Control-Allow-Origin", "*"))
                .add(("Access-Control-Allow-Methods", "GET, POST, OPTIONS"))
                .add(("Access-Control-Allow-Headers", "Content-Type, Authorization"));
        }

        App::new()
            .app_data(web::PayloadConfig::new(max_payload_size))
            .app_data(web::Data::new(config.clone()))
            .app_data(pipeline.clone())
            .wrap(actix_web::middleware::Condition::new(request_logging, Logger::default()))
            .wrap(cors)
            .route("/health", web::get().to(handlers::health_check))
            .route("/info", web::get().to(handlers::info_endpoint))
            .route("/thumbnail", web::post().to(handlers::thumbnail_endpoint))
    });

    if let Some(workers) = worker_threads {
        server = server.workers(workers);
    }

    server.bind(&bind_address)?.run().await
}
