use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use linkstat::analytics::{geo_lookup_from_config, VisitRecorder, WootheeParser};
use linkstat::api;
use linkstat::config::{Config, DatabaseBackend};
use linkstat::redirect;
use linkstat::service::LinkService;
use linkstat::shortcode::SlugGenerator;
use linkstat::storage::{CachedStorage, LinkStore, PostgresStorage, SqliteStorage};
use linkstat::title::title_extractor_from_config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Initialize storage
    let backend: Arc<dyn LinkStore> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.url);
            Arc::new(
                SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
            )
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage: {}", config.database.url);
            Arc::new(
                PostgresStorage::new(&config.database.url, config.database.max_connections)
                    .await?,
            )
        }
    };

    info!("Initializing database...");
    backend.init().await?;
    info!("Database initialized successfully");

    let storage: Arc<dyn LinkStore> = if config.cache.enabled {
        info!(
            "Link cache enabled (max {} entries, ttl {}s)",
            config.cache.max_entries, config.cache.ttl_secs
        );
        Arc::new(CachedStorage::new(
            backend,
            config.cache.max_entries,
            config.cache.ttl_secs,
        ))
    } else {
        backend
    };

    let recorder = Arc::new(VisitRecorder::new(
        Arc::clone(&storage),
        geo_lookup_from_config(&config.analytics),
        Arc::new(WootheeParser::new()),
    ));

    let mut service = LinkService::new(
        storage,
        recorder,
        SlugGenerator::new(config.links.slug_length),
        config.links.short_domain.clone(),
    );
    if let Some(titles) = title_extractor_from_config(&config.links) {
        service = service.with_title_extractor(titles);
    }
    let service = Arc::new(service);

    // Create routers
    let api_router = api::create_api_router(Arc::clone(&service));
    let redirect_router = redirect::create_redirect_router(
        Arc::clone(&service),
        config.links.redirect_status_code(),
    );

    // Start API server
    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!("API server listening on http://{}", api_addr);

    // Start redirect server
    let redirect_addr = format!(
        "{}:{}",
        config.redirect_server.host, config.redirect_server.port
    );
    let redirect_listener = tokio::net::TcpListener::bind(&redirect_addr).await?;
    info!(
        "Redirect server listening on http://{} (short links at {}, status {})",
        redirect_addr, config.links.short_domain, config.links.redirect_status
    );

    // Run both servers concurrently
    tokio::try_join!(
        axum::serve(api_listener, api_router),
        axum::serve(
            redirect_listener,
            redirect_router.into_make_service_with_connect_info::<SocketAddr>(),
        ),
    )?;

    Ok(())
}
