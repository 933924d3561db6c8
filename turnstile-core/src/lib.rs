pub mod repository;
pub mod documents;
pub mod notify;

pub use repository::TicketRepository;
pub use documents::{DocumentRenderer, DocumentStore, RenderedDocument};
pub use notify::IssuanceNotifier;

/// Failure reported by the persistent store
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Store rejected request: {0}")]
    Backend(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Document generation failed: {0}")]
    Document(String),
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type CoreResult<T> = Result<T, CoreError>;
