use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use turnstile_shared::BatchDetail;
use uuid::Uuid;

use crate::CoreResult;

/// A rendered printable document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedDocument {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Turns an issued batch into a printable document
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, detail: &BatchDetail) -> CoreResult<RenderedDocument>;
}

/// Blob storage for generated documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Upload under a path namespaced by owner and batch, returning a public URL
    async fn upload(
        &self,
        owner_id: &str,
        batch_id: Uuid,
        document: &RenderedDocument,
    ) -> CoreResult<String>;
}
