use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;
use turnstile_core::{CoreError, CoreResult, DocumentStore, RenderedDocument};
use uuid::Uuid;

/// Writes documents under `<root>/<owner>/<batch>/<file>` and serves them
/// from `<base_url>/<owner>/<batch>/<file>`.
#[derive(Debug, Clone)]
pub struct LocalDocumentStore {
    root: PathBuf,
    base_url: String,
}

impl LocalDocumentStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

/// Owner ids come from tokens; keep them from escaping the root
fn path_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn file_segment(raw: &str) -> String {
    let name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    name.trim_start_matches('.').to_string()
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn upload(
        &self,
        owner_id: &str,
        batch_id: Uuid,
        document: &RenderedDocument,
    ) -> CoreResult<String> {
        let owner = path_segment(owner_id);
        let file_name = file_segment(&document.file_name);
        let dir = self.root.join(&owner).join(batch_id.to_string());

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CoreError::Document(format!("create {}: {}", dir.display(), e)))?;
        let path = dir.join(&file_name);
        tokio::fs::write(&path, &document.bytes)
            .await
            .map_err(|e| CoreError::Document(format!("write {}: {}", path.display(), e)))?;

        info!("Stored {} bytes at {}", document.bytes.len(), path.display());
        Ok(format!("{}/{}/{}/{}", self.base_url, owner, batch_id, file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_writes_under_owner_and_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDocumentStore::new(dir.path(), "http://localhost:3000/documents/");
        let batch_id = Uuid::new_v4();
        let doc = RenderedDocument {
            file_name: "tickets-abcd1234.html".to_string(),
            content_type: "text/html".to_string(),
            bytes: b"<html></html>".to_vec(),
        };

        let url = store.upload("organizer-1", batch_id, &doc).await.unwrap();
        assert_eq!(
            url,
            format!("http://localhost:3000/documents/organizer-1/{}/tickets-abcd1234.html", batch_id)
        );

        let written = std::fs::read(dir.path().join("organizer-1").join(batch_id.to_string()).join("tickets-abcd1234.html")).unwrap();
        assert_eq!(written, doc.bytes);
    }

    #[test]
    fn test_path_segment_strips_separators() {
        assert_eq!(path_segment("../etc"), "___etc");
        assert_eq!(path_segment("user|42"), "user_42");
        assert_eq!(file_segment("../sheet.html"), "_sheet.html");
    }
}
