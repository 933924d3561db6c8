pub mod app_config;
pub mod database;
pub mod documents;
#[cfg(feature = "kafka")]
pub mod events;
pub mod memory;
pub mod redis_repo;
pub mod ticket_repo;
pub mod webhook;

pub use database::DbClient;
pub use documents::LocalDocumentStore;
#[cfg(feature = "kafka")]
pub use events::EventProducer;
pub use memory::InMemoryTicketRepository;
pub use redis_repo::RedisClient;
pub use ticket_repo::PgTicketRepository;
pub use webhook::WebhookNotifier;
