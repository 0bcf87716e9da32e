//! Server test utilities.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use bytes::Bytes;
use canopy_cache::{MemorySizeCache, SizeCache};
use canopy_core::config::AppConfig;
use canopy_metadata::{MetadataStore, SqliteStore};
use canopy_server::{AppState, create_router};
use canopy_storage::{BlobStore, FilesystemBackend};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server over SQLite, an in-memory cache and a
    /// temporary blob directory.
    pub async fn new() -> Self {
        Self::build(None, None).await
    }

    /// Create a test server on top of an existing metadata store.
    pub async fn with_metadata(metadata: Arc<dyn MetadataStore>) -> Self {
        Self::build(Some(metadata), None).await
    }

    /// Create a test server with a custom size cache.
    pub async fn with_cache(cache: Arc<dyn SizeCache>) -> Self {
        Self::build(None, Some(cache)).await
    }

    async fn build(
        metadata: Option<Arc<dyn MetadataStore>>,
        cache: Option<Arc<dyn SizeCache>>,
    ) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let config = AppConfig::for_testing(temp_dir.path());

        let blobs: Arc<dyn BlobStore> = Arc::new(
            FilesystemBackend::new(temp_dir.path().join("blobs"), Some("http://blobs.test"))
                .await
                .expect("Failed to create blob backend"),
        );

        let metadata = match metadata {
            Some(metadata) => metadata,
            None => Arc::new(
                SqliteStore::new(temp_dir.path().join("metadata.db"))
                    .await
                    .expect("Failed to create metadata store"),
            ),
        };

        let cache = cache.unwrap_or_else(|| Arc::new(MemorySizeCache::new(None)));

        let state = AppState::new(config, metadata, cache, blobs);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Directory holding uploaded blobs.
    pub fn blob_dir(&self) -> std::path::PathBuf {
        self.temp_dir.path().join("blobs")
    }

    /// Number of blobs currently stored.
    pub fn blob_count(&self) -> usize {
        count_files(&self.blob_dir())
    }

    /// Send a raw request and decode the JSON response body, if any.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&body).into_owned())
            })
        };
        (status, value)
    }

    /// Send a JSON request as `user_id`.
    pub async fn json(
        &self,
        method: Method,
        uri: &str,
        user_id: i64,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("user_id", user_id.to_string());
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");
        self.send(request).await
    }

    /// Upload `data` as `name` into `folder_id`.
    pub async fn upload(
        &self,
        user_id: i64,
        folder_id: i64,
        name: &str,
        data: Bytes,
        transaction_id: Option<i64>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(format!("/v1/folders/{folder_id}/files?file_name={name}"))
            .header("user_id", user_id.to_string())
            .header("content-type", "application/octet-stream");
        if let Some(tid) = transaction_id {
            builder = builder.header("transaction_id", tid.to_string());
        }
        let request = builder.body(Body::from(data)).expect("build request");
        self.send(request).await
    }

    /// Create a folder over the API and return its id.
    pub async fn create_folder(&self, user_id: i64, name: &str, parent: Option<i64>) -> i64 {
        let (status, body) = self
            .json(
                Method::POST,
                "/v1/folders",
                user_id,
                Some(serde_json::json!({ "name": name, "parent_folder_id": parent })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create folder: {body}");
        body["folder_id"].as_i64().expect("folder_id")
    }

    /// Size of a folder as reported by the API.
    pub async fn folder_size(&self, user_id: i64, folder_id: i64) -> i64 {
        let (status, body) = self
            .json(Method::GET, &format!("/v1/folders/{folder_id}"), user_id, None)
            .await;
        assert_eq!(status, StatusCode::OK, "get folder: {body}");
        body["folder"]["size_bytes"].as_i64().expect("size_bytes")
    }
}

fn count_files(dir: &std::path::Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}
