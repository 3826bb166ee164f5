use async_trait::async_trait;
use gleaner_core::{ExtractedItem, PersistenceError, ResultSink};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Writes the whole result set as a JSON array, replacing the file atomically.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_failed(&self, e: std::io::Error) -> PersistenceError {
        PersistenceError::WriteFailed {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl ResultSink for JsonFileSink {
    fn name(&self) -> &str {
        "json-file"
    }

    async fn persist(&self, items: &[ExtractedItem]) -> Result<usize, PersistenceError> {
        let body = serde_json::to_vec_pretty(items)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.write_failed(e))?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, &body)
            .await
            .map_err(|e| self.write_failed(e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| self.write_failed(e))?;

        debug!("Wrote {} bytes to {}", body.len(), self.path.display());
        Ok(items.len())
    }
}

/// POSTs the result set to an ingest endpoint.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>) -> Result<Self, PersistenceError> {
        let url = url.into();
        let client = Client::builder()
            .user_agent(concat!("gleaner/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PersistenceError::SinkUnreachable {
                sink: url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl ResultSink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn persist(&self, items: &[ExtractedItem]) -> Result<usize, PersistenceError> {
        let response = self
            .client
            .post(&self.url)
            .json(items)
            .send()
            .await
            .map_err(|e| PersistenceError::SinkUnreachable {
                sink: self.url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PersistenceError::SinkRejected {
                sink: self.url.clone(),
                status_code: status.as_u16(),
            });
        }

        info!("Ingest endpoint accepted {} items ({})", items.len(), status);
        Ok(items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gleaner_core::{Comment, ItemKind, ItemMetadata, ItemRef};

    fn items() -> Vec<ExtractedItem> {
        let item_ref = ItemRef::new("C1", ItemKind::Reel, "https://example.com/reel/C1");
        let metadata = ItemMetadata {
            author: "someone".to_string(),
            content: "sunset".to_string(),
            likes: 12,
            comment_count: 1,
        };
        vec![ExtractedItem::from_parts(
            &item_ref,
            metadata,
            vec![Comment::new("fan", "beautiful")],
        )]
    }

    #[tokio::test]
    async fn test_json_file_sink_replaces_file() {
        let path = std::env::temp_dir()
            .join(format!("gleaner-{}", uuid::Uuid::new_v4()))
            .join("results.json");
        let sink = JsonFileSink::new(&path);

        assert_eq!(sink.persist(&[]).await.unwrap(), 0);
        assert_eq!(sink.persist(&items()).await.unwrap(), 1);

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: Vec<ExtractedItem> = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].item_id, "C1");
        assert_eq!(parsed[0].kind, ItemKind::Reel);
        assert!(!sink.temp_path().exists());

        let _ = tokio::fs::remove_dir_all(path.parent().unwrap()).await;
    }

    #[tokio::test]
    async fn test_http_sink_posts_items() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Regex(r#""item_id":"C1""#.to_string()))
            .with_status(202)
            .create_async()
            .await;

        let sink = HttpSink::new(format!("{}/ingest", server.url())).unwrap();
        assert_eq!(sink.persist(&items()).await.unwrap(), 1);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_sink_reports_rejection() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/ingest")
            .with_status(500)
            .create_async()
            .await;

        let sink = HttpSink::new(format!("{}/ingest", server.url())).unwrap();
        let result = sink.persist(&items()).await;

        assert!(matches!(
            result,
            Err(PersistenceError::SinkRejected {
                status_code: 500,
                ..
            })
        ));
    }
}
