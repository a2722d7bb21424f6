use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use bbs_server::config::CorsConfig;
use bbs_server::memory::BoardStore;
use bbs_server::{http, AppState, Settings};
use dotenv::dotenv;
use std::net::TcpListener;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn cors(config: &CorsConfig) -> Cors {
    if !config.enabled {
        return Cors::default();
    }

    let cors = if config.allow_any_origin {
        Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
    } else {
        Cors::default()
            .allowed_methods(vec!["GET", "POST"])
            .allowed_headers(vec!["Content-Type"])
    };
    cors.max_age(config.max_age as usize)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Load configuration
    let config = Settings::new()?;
    info!("Configuration loaded successfully");

    let store = BoardStore::new(config.board.name.clone(), config.board.description.clone());
    store.add_board("general", "General", "General discussion").await;
    let state = AppState::new(config.clone(), store.factory());

    if config.websocket.enabled {
        let listener = tokio::net::TcpListener::bind(config.websocket_addr()).await?;
        info!("WebSocket server ready at ws://{}", config.websocket_addr());
        tokio::spawn(state.websocket_server().run(listener));
    }

    if config.session.idle_timeout_secs > 0 {
        let sweep_state = state.clone();
        let max_idle = chrono::Duration::seconds(config.session.idle_timeout_secs as i64);
        let interval = Duration::from_secs(config.session.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                sweep_state.registry.evict_idle(max_idle).await;
            }
        });
    } else {
        warn!("Idle session eviction disabled");
    }

    // Create and bind TCP listener
    let listener = TcpListener::bind(config.http_addr())?;
    info!("Starting server at http://{}{}", config.http_addr(), config.server.path);

    let data = web::Data::new(state.clone());
    let server_config = config.clone();
    HttpServer::new(move || {
        let path = server_config.server.path.clone();
        App::new()
            .wrap(cors(&server_config.cors))
            .app_data(data.clone())
            .configure(move |cfg| http::routes(cfg, &path))
    })
    .listen(listener)?
    .workers(config.server.workers.max(1) as usize)
    .run()
    .await?;

    state.shutdown().await?;
    Ok(())
}
