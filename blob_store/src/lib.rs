use std::{env, sync::Arc};

use anyhow::{anyhow, Result};
use bytes::{Bytes, BytesMut};
use futures::{stream::BoxStream, Stream, StreamExt, TryStreamExt};
use object_store::{parse_url, path::Path, ObjectStore, WriteMultipart};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStorageConfig {
    pub path: Option<String>,
}

impl BlobStorageConfig {
    pub fn new(path: &str) -> Self {
        BlobStorageConfig {
            path: Some(format!("file://{}", path)),
        }
    }
}

impl Default for BlobStorageConfig {
    fn default() -> Self {
        let blob_store_path = format!(
            "file://{}",
            env::current_dir()
                .expect("current dir is accessible")
                .join("filestore_storage/blobs")
                .display()
        );
        info!("using blob store path: {}", blob_store_path);
        BlobStorageConfig {
            path: Some(blob_store_path),
        }
    }
}

/// Where and how much the storage writer wrote. Checksums are not computed
/// here; hashing belongs to the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct PutResult {
    pub url: String,
    pub size_bytes: u64,
}

/// Writes file content to a blob location derived from a key. The backend is
/// any `object_store` URL (`file://` or `s3://`); this crate depends only on
/// the put/get call shapes, not on a particular backend.
#[derive(Clone)]
pub struct BlobStorage {
    object_store: Arc<dyn ObjectStore>,
    path: Path,
}

impl BlobStorage {
    pub fn new(config: BlobStorageConfig) -> Result<Self> {
        let url_str = config
            .path
            .ok_or_else(|| anyhow!("blob storage path is not configured"))?;
        let url = url_str.parse::<Url>()?;
        let (object_store, path) = parse_url(&url)?;
        Ok(Self {
            object_store: Arc::new(object_store),
            path,
        })
    }

    /// Write a fully materialized buffer in a single operation. Creates or
    /// overwrites the blob at the location derived from `key`.
    pub async fn put(&self, key: &str, data: Bytes) -> Result<PutResult> {
        let path = self.path.child(key);
        let size_bytes = data.len() as u64;
        self.object_store.put(&path, data.into()).await?;
        Ok(PutResult {
            url: path.to_string(),
            size_bytes,
        })
    }

    /// Write a finite chunk stream in arrival order without buffering the
    /// whole file. `wait_for_capacity` bounds the number of in-flight parts.
    /// A failed write aborts the multipart upload; the backend keeps its
    /// staging file around unless the upload is aborted or finished.
    pub async fn put_stream(
        &self,
        key: &str,
        data: impl Stream<Item = Result<Bytes>> + Send + Unpin,
    ) -> Result<PutResult> {
        let path = self.path.child(key);
        let m = self.object_store.put_multipart(&path).await?;
        let mut w = WriteMultipart::new(m);
        let size_bytes = match drain_into(&mut w, data).await {
            Ok(size_bytes) => size_bytes,
            Err(e) => {
                if let Err(abort_err) = w.abort().await {
                    warn!(
                        "failed to abort multipart write to {:?}: {:?}",
                        path, abort_err
                    );
                }
                return Err(e);
            }
        };
        w.finish().await?;
        Ok(PutResult {
            url: path.to_string(),
            size_bytes,
        })
    }

    pub async fn get(&self, key: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        let path = self.path.child(key);
        let get_result = self
            .object_store
            .get(&path)
            .await
            .map_err(|e| anyhow!("can't get object {:?}: {:?}", path, e))?;
        Ok(get_result
            .into_stream()
            .map_err(anyhow::Error::from)
            .boxed())
    }

    pub async fn read_bytes(&self, key: &str) -> Result<Bytes> {
        let mut reader = self.get(key).await?;
        let mut bytes = BytesMut::new();
        while let Some(chunk) = reader.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(bytes.into())
    }
}

async fn drain_into(
    w: &mut WriteMultipart,
    mut data: impl Stream<Item = Result<Bytes>> + Send + Unpin,
) -> Result<u64> {
    let mut size_bytes = 0;
    while let Some(chunk) = data.next().await {
        w.wait_for_capacity(1).await?;
        let chunk = chunk?;
        size_bytes += chunk.len() as u64;
        w.write(&chunk);
    }
    Ok(size_bytes)
}
