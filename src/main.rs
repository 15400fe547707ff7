use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use std::io;
use std::sync::Arc;

use snapfeed::api::{self, AppState};
use snapfeed::config::Config;
use snapfeed::service::FeedService;
use snapfeed::store::Store;

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = Config::from_env().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // All state lives in memory and is gone on restart
    let store = Arc::new(Store::new());
    let service = Arc::new(FeedService::new(store));
    let state = web::Data::new(AppState::new(service, config.clone()));

    log::info!(
        "Starting snapfeed on {}:{} (upload limit {} bytes)",
        config.host,
        config.port,
        config.max_upload_bytes
    );

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(state.clone())
            .configure(api::configure_routes)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
