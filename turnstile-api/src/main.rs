use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turnstile_api::{app, state::{AppState, AuthConfig}};
use turnstile_core::TicketRepository;
use turnstile_store::{
    app_config::Config, DbClient, InMemoryTicketRepository, LocalDocumentStore, PgTicketRepository,
    RedisClient, WebhookNotifier,
};
use turnstile_ticket::{
    DocumentPipeline, HtmlSheetRenderer, IssuanceService, PersistenceGateway, QrRenderer,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turnstile_api=debug,turnstile_ticket=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().expect("Failed to load config");
    tracing::info!("Starting Turnstile API on port {}", config.server.port);

    // Ticket store
    let repo: Arc<dyn TicketRepository> = match &config.database.url {
        Some(url) => {
            let db = DbClient::new(url, config.database.max_connections)
                .await
                .expect("Failed to connect to Postgres");
            db.migrate().await.expect("Failed to run migrations");
            Arc::new(PgTicketRepository::new(db.pool.clone()))
        }
        None => {
            tracing::warn!("No database configured; tickets are kept in memory");
            Arc::new(InMemoryTicketRepository::new())
        }
    };

    // Issuance pipeline
    let documents =
        LocalDocumentStore::new(&config.documents.root_dir, &config.documents.public_base_url);
    let mut issuance = IssuanceService::new(
        PersistenceGateway::new(repo.clone(), config.issuance.chunk_size),
        QrRenderer::new(config.issuance.qr_size, config.issuance.qr_margin),
    )
    .with_unit_delay(Duration::from_millis(config.issuance.unit_delay_ms))
    .with_documents(DocumentPipeline {
        renderer: Arc::new(
            HtmlSheetRenderer::new().expect("Failed to compile ticket sheet template"),
        ),
        store: Arc::new(documents),
    });

    if let Some(url) = &config.webhook.url {
        let webhook = WebhookNotifier::new(url, Duration::from_secs(config.webhook.timeout_seconds))
            .expect("Failed to build webhook client");
        issuance = issuance.with_notifier(Arc::new(webhook));
    }

    #[cfg(feature = "kafka")]
    if let Some(brokers) = &config.kafka.brokers {
        let producer = turnstile_store::EventProducer::new(brokers, &config.kafka.topic_prefix)
            .expect("Failed to create Kafka producer");
        issuance = issuance.with_notifier(Arc::new(producer));
    }

    let mut app_state = AppState::new(
        repo,
        issuance,
        AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    )
    .expect("Failed to register metrics");

    // Redis Connection
    if let Some(url) = &config.redis.url {
        let redis = RedisClient::new(url).await.expect("Failed to connect to Redis");
        app_state =
            app_state.with_rate_limit(Arc::new(redis), config.rate_limit.requests_per_minute);
    }

    let app = app(app_state).nest_service("/documents", ServeDir::new(&config.documents.root_dir));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.expect("Failed to bind");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .expect("Server error");
}
