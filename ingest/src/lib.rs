//! File ingestion pipeline: consume a byte source, checksum it, write the
//! content to blob storage, and persist a metadata record. Three strategies
//! share one output contract (identical checksum and size for identical
//! content) but trade memory, disk, and latency differently.

use std::{env, path::PathBuf, sync::Arc};

use blob_store::BlobStorage;
use bytes::{Bytes, BytesMut};
use data_model::FileMetadata;
use futures::{stream, stream::BoxStream, StreamExt};
use state_store::FileMetadataStore;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

pub mod checksum;

use checksum::{Checksum, DigestAlgorithm};

const SPOOL_READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Fatal configuration error, raised at service construction.
    #[error("checksum algorithm {0:?} is not available")]
    AlgorithmUnavailable(String),
    #[error("failed to store content for {file_name}: {reason:#}")]
    Storage {
        file_name: String,
        reason: anyhow::Error,
    },
    /// The blob was written but the metadata persist failed. The orphaned
    /// blob is unreachable from every query path; no compensation runs.
    #[error("failed to persist metadata for {file_name}: {reason:#}")]
    Metadata {
        file_name: String,
        reason: anyhow::Error,
    },
    #[error("spool i/o failed for {file_name}: {reason:#}")]
    Spool {
        file_name: String,
        reason: anyhow::Error,
    },
}

impl IngestError {
    fn storage(file_name: &str, reason: impl Into<anyhow::Error>) -> Self {
        IngestError::Storage {
            file_name: file_name.to_string(),
            reason: reason.into(),
        }
    }

    fn metadata(file_name: &str, reason: impl Into<anyhow::Error>) -> Self {
        IngestError::Metadata {
            file_name: file_name.to_string(),
            reason: reason.into(),
        }
    }

    fn spool(file_name: &str, reason: impl Into<anyhow::Error>) -> Self {
        IngestError::Spool {
            file_name: file_name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Destination for persisted metadata records. The production sink is the
/// RocksDB-backed [`FileMetadataStore`]; the seam exists so persist failures
/// can be exercised without breaking a live store.
pub trait MetadataSink: Send + Sync {
    fn create(&self, metadata: FileMetadata) -> anyhow::Result<FileMetadata>;
}

impl MetadataSink for FileMetadataStore {
    fn create(&self, metadata: FileMetadata) -> anyhow::Result<FileMetadata> {
        FileMetadataStore::create(self, metadata)
    }
}

/// A file's content: either fully materialized or a finite, single-pass
/// sequence of chunks. The pipeline borrows a source for the duration of one
/// `ingest` call and never retains it.
pub enum ByteSource<'a> {
    Buffer(Bytes),
    Stream(BoxStream<'a, anyhow::Result<Bytes>>),
}

impl<'a> ByteSource<'a> {
    fn into_stream(self) -> BoxStream<'a, anyhow::Result<Bytes>> {
        match self {
            ByteSource::Buffer(bytes) => stream::iter([Ok(bytes)]).boxed(),
            ByteSource::Stream(s) => s,
        }
    }
}

/// Selected by the caller; all strategies yield the same checksum and size
/// for the same content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStrategy {
    /// Materialize everything in memory, digest and store in one pass each.
    /// O(file) memory, simplest correctness argument.
    Buffered,
    /// Drain the source to a temp file first, then re-read it through the
    /// chunked path. Bounded memory, unbounded disk; the temp file is
    /// removed on every exit path.
    Spooled,
    /// Digest and store each chunk as it arrives. Never buffers the whole
    /// file, never touches local disk.
    Chunked,
}

pub struct FileIngestor {
    blob_storage: Arc<BlobStorage>,
    metadata_store: Arc<dyn MetadataSink>,
    algorithm: DigestAlgorithm,
    spool_dir: PathBuf,
}

impl std::fmt::Debug for FileIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIngestor")
            .field("algorithm", &self.algorithm)
            .field("spool_dir", &self.spool_dir)
            .finish_non_exhaustive()
    }
}

impl FileIngestor {
    pub fn new(
        blob_storage: Arc<BlobStorage>,
        metadata_store: Arc<dyn MetadataSink>,
        algorithm: &str,
        spool_dir: Option<PathBuf>,
    ) -> Result<Self, IngestError> {
        let algorithm = DigestAlgorithm::resolve(algorithm)?;
        Ok(Self {
            blob_storage,
            metadata_store,
            algorithm,
            spool_dir: spool_dir.unwrap_or_else(env::temp_dir),
        })
    }

    /// Ingest one file: checksum its content, store it durably, persist a
    /// metadata record, and return the persisted record. Per-request shared
    /// state is limited to the storage and metadata collaborators; no
    /// retries happen here.
    pub async fn ingest(
        &self,
        file_name: &str,
        source: ByteSource<'_>,
        strategy: IngestStrategy,
    ) -> Result<FileMetadata, IngestError> {
        debug!(file_name, ?strategy, "ingesting file");
        let metadata = match strategy {
            IngestStrategy::Buffered => self.ingest_buffered(file_name, source).await?,
            IngestStrategy::Spooled => self.ingest_spooled(file_name, source).await?,
            IngestStrategy::Chunked => self.ingest_chunked(file_name, source).await?,
        };
        info!(
            file_name,
            id = metadata.id,
            size = metadata.size,
            checksum = metadata.checksum,
            "ingested file"
        );
        Ok(metadata)
    }

    async fn ingest_buffered(
        &self,
        file_name: &str,
        source: ByteSource<'_>,
    ) -> Result<FileMetadata, IngestError> {
        let bytes = match source {
            ByteSource::Buffer(bytes) => bytes,
            ByteSource::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| IngestError::storage(file_name, e))?;
                    buf.extend_from_slice(&chunk);
                }
                buf.freeze()
            }
        };

        let mut checksum = Checksum::new(self.algorithm);
        checksum.update(&bytes);
        let checksum = checksum.finalize();
        let size_bytes = bytes.len() as u64;

        self.blob_storage
            .put(file_name, bytes)
            .await
            .map_err(|e| IngestError::storage(file_name, e))?;

        self.persist(file_name, checksum, size_bytes)
    }

    async fn ingest_spooled(
        &self,
        file_name: &str,
        source: ByteSource<'_>,
    ) -> Result<FileMetadata, IngestError> {
        let spool_dir = self.spool_dir.clone();
        let tmp = tokio::task::spawn_blocking(move || NamedTempFile::new_in(spool_dir))
            .await
            .map_err(|e| IngestError::spool(file_name, e))?
            .map_err(|e| IngestError::spool(file_name, e))?;
        // TempPath removes the spool file when dropped, on every exit path
        // below, including `?` returns and cancellation.
        let tmp_path = tmp.into_temp_path();

        let mut stream = source.into_stream();
        let mut spool = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| IngestError::spool(file_name, e))?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| IngestError::spool(file_name, e))?;
            spool
                .write_all(&chunk)
                .await
                .map_err(|e| IngestError::spool(file_name, e))?;
        }
        spool
            .flush()
            .await
            .map_err(|e| IngestError::spool(file_name, e))?;
        drop(spool);

        let spooled = tokio::fs::File::open(&tmp_path)
            .await
            .map_err(|e| IngestError::spool(file_name, e))?;
        let chunks = ReaderStream::with_capacity(spooled, SPOOL_READ_CHUNK_SIZE)
            .map(|chunk| chunk.map_err(anyhow::Error::from));
        let (checksum, size_bytes) = self.write_and_hash(file_name, chunks.boxed()).await?;

        self.persist(file_name, checksum, size_bytes)
    }

    async fn ingest_chunked(
        &self,
        file_name: &str,
        source: ByteSource<'_>,
    ) -> Result<FileMetadata, IngestError> {
        let (checksum, size_bytes) = self
            .write_and_hash(file_name, source.into_stream())
            .await?;
        self.persist(file_name, checksum, size_bytes)
    }

    /// Feed every chunk to the incremental digest and the storage writer, in
    /// arrival order, from the single consumer of the stream; finalize only
    /// after the source is fully drained.
    async fn write_and_hash(
        &self,
        file_name: &str,
        stream: BoxStream<'_, anyhow::Result<Bytes>>,
    ) -> Result<(String, u64), IngestError> {
        let mut checksum = Checksum::new(self.algorithm);
        let mut size_bytes: u64 = 0;
        let hashed = stream.map(|chunk| {
            chunk.map(|bytes| {
                checksum.update(&bytes);
                size_bytes += bytes.len() as u64;
                bytes
            })
        });
        self.blob_storage
            .put_stream(file_name, hashed)
            .await
            .map_err(|e| IngestError::storage(file_name, e))?;
        Ok((checksum.finalize(), size_bytes))
    }

    fn persist(
        &self,
        file_name: &str,
        checksum: String,
        size_bytes: u64,
    ) -> Result<FileMetadata, IngestError> {
        // A failure here leaves the already-written blob orphaned; see the
        // IngestError::Metadata docs.
        self.metadata_store
            .create(FileMetadata::new(file_name, checksum, size_bytes))
            .map_err(|e| IngestError::metadata(file_name, e))
    }
}

#[cfg(test)]
mod tests {
    use blob_store::BlobStorageConfig;
    use tempfile::TempDir;

    use super::*;

    const SAMPLE_CONTENT_SHA256: &str =
        "ca83c6acbe7f1270c63b0b4d0b2b180c347b6d5cab6e95b2fd7be152f345314b";

    struct Harness {
        ingestor: FileIngestor,
        blob_storage: Arc<BlobStorage>,
        metadata_store: Arc<FileMetadataStore>,
        spool_dir: TempDir,
        _blob_dir: TempDir,
        _state_dir: TempDir,
    }

    fn harness() -> Harness {
        let blob_dir = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();
        let spool_dir = TempDir::new().unwrap();
        let blob_storage = Arc::new(
            BlobStorage::new(BlobStorageConfig::new(blob_dir.path().to_str().unwrap())).unwrap(),
        );
        let metadata_store =
            Arc::new(FileMetadataStore::open(state_dir.path().to_path_buf()).unwrap());
        let ingestor = FileIngestor::new(
            blob_storage.clone(),
            metadata_store.clone(),
            "sha-256",
            Some(spool_dir.path().to_path_buf()),
        )
        .unwrap();
        Harness {
            ingestor,
            blob_storage,
            metadata_store,
            spool_dir,
            _blob_dir: blob_dir,
            _state_dir: state_dir,
        }
    }

    /// Same as `harness` but with a blob path routed through a regular file,
    /// so every storage write fails with ENOTDIR.
    fn harness_with_broken_storage() -> Harness {
        let h = harness();
        let blob_dir = TempDir::new().unwrap();
        std::fs::write(blob_dir.path().join("not-a-dir"), b"x").unwrap();
        let path = blob_dir.path().join("not-a-dir/blobs");
        let blob_storage = Arc::new(
            BlobStorage::new(BlobStorageConfig::new(path.to_str().unwrap())).unwrap(),
        );
        let ingestor = FileIngestor::new(
            blob_storage.clone(),
            h.metadata_store.clone(),
            "sha-256",
            Some(h.spool_dir.path().to_path_buf()),
        )
        .unwrap();
        Harness {
            ingestor,
            blob_storage,
            _blob_dir: blob_dir,
            ..h
        }
    }

    fn chunked(content: Bytes, chunk_size: usize) -> ByteSource<'static> {
        let mut chunks = Vec::new();
        let mut offset = 0;
        while offset < content.len() {
            let end = (offset + chunk_size).min(content.len());
            chunks.push(Ok(content.slice(offset..end)));
            offset = end;
        }
        ByteSource::Stream(stream::iter(chunks).boxed())
    }

    fn spool_entries(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    #[tokio::test]
    async fn all_strategies_agree_on_checksum_and_size() {
        let h = harness();
        let content = Bytes::from_static(b"Sample content");

        let buffered = h
            .ingestor
            .ingest(
                "buffered.txt",
                ByteSource::Buffer(content.clone()),
                IngestStrategy::Buffered,
            )
            .await
            .unwrap();
        let spooled = h
            .ingestor
            .ingest(
                "spooled.txt",
                chunked(content.clone(), 4),
                IngestStrategy::Spooled,
            )
            .await
            .unwrap();
        let streamed = h
            .ingestor
            .ingest(
                "streamed.txt",
                chunked(content.clone(), 4),
                IngestStrategy::Chunked,
            )
            .await
            .unwrap();

        for metadata in [&buffered, &spooled, &streamed] {
            assert_eq!(metadata.checksum, SAMPLE_CONTENT_SHA256);
            assert_eq!(metadata.size, 14);
        }
        for name in ["buffered.txt", "spooled.txt", "streamed.txt"] {
            let stored = h.blob_storage.read_bytes(name).await.unwrap();
            assert_eq!(stored, content);
        }
    }

    #[tokio::test]
    async fn buffered_strategy_materializes_stream_sources() {
        let h = harness();
        let metadata = h
            .ingestor
            .ingest(
                "test.txt",
                chunked(Bytes::from_static(b"Sample content"), 5),
                IngestStrategy::Buffered,
            )
            .await
            .unwrap();
        assert_eq!(metadata.checksum, SAMPLE_CONTENT_SHA256);
        assert_eq!(metadata.size, 14);
    }

    #[tokio::test]
    async fn ids_are_absent_before_and_present_after_persistence() {
        let h = harness();
        assert!(FileMetadata::new("test.txt", "", 0).id.is_none());
        let first = h
            .ingestor
            .ingest(
                "file1.txt",
                ByteSource::Buffer(Bytes::from_static(b"content1")),
                IngestStrategy::Buffered,
            )
            .await
            .unwrap();
        let second = h
            .ingestor
            .ingest(
                "file2.txt",
                ByteSource::Buffer(Bytes::from_static(b"content2")),
                IngestStrategy::Buffered,
            )
            .await
            .unwrap();
        assert_eq!(first.id, Some(1));
        assert_eq!(second.id, Some(2));

        let all = h.metadata_store.all_files().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].file_name, "file1.txt");
        assert_eq!(
            all[0].checksum,
            "d0b425e00e15a0d36b9b361f02bab63563aed6cb4665083905386c55d5b679fa"
        );
        assert_eq!(all[0].size, 8);
        assert_eq!(all[1].file_name, "file2.txt");
        assert_eq!(
            all[1].checksum,
            "dab741b6289e7dccc1ed42330cae1accc2b755ce8079c2cd5d4b5366c9f769a6"
        );
        assert_eq!(all[1].size, 8);
    }

    #[tokio::test]
    async fn storage_failure_persists_no_metadata() {
        let h = harness_with_broken_storage();
        let err = h
            .ingestor
            .ingest(
                "doomed.txt",
                ByteSource::Buffer(Bytes::from_static(b"content")),
                IngestStrategy::Buffered,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Storage { .. }));
        assert_eq!(h.metadata_store.file_by_name("doomed.txt").unwrap(), None);
    }

    /// Refuses every persist, standing in for an unreachable metadata store.
    struct UnavailableMetadataStore;

    impl MetadataSink for UnavailableMetadataStore {
        fn create(&self, _metadata: FileMetadata) -> anyhow::Result<FileMetadata> {
            Err(anyhow::anyhow!("metadata store unavailable"))
        }
    }

    #[tokio::test]
    async fn metadata_failure_after_write_leaves_orphaned_blob() {
        let blob_dir = TempDir::new().unwrap();
        let blob_storage = Arc::new(
            BlobStorage::new(BlobStorageConfig::new(blob_dir.path().to_str().unwrap())).unwrap(),
        );
        let ingestor = FileIngestor::new(
            blob_storage.clone(),
            Arc::new(UnavailableMetadataStore),
            "sha-256",
            None,
        )
        .unwrap();

        let err = ingestor
            .ingest(
                "orphan.txt",
                ByteSource::Buffer(Bytes::from_static(b"Sample content")),
                IngestStrategy::Buffered,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Metadata { .. }));
        // The blob was already written; it stays behind, unreachable from
        // every query path.
        let stored = blob_storage.read_bytes("orphan.txt").await.unwrap();
        assert_eq!(&stored[..], b"Sample content");
    }

    #[tokio::test]
    async fn spool_file_is_removed_on_success() {
        let h = harness();
        h.ingestor
            .ingest(
                "test.txt",
                chunked(Bytes::from_static(b"Sample content"), 4),
                IngestStrategy::Spooled,
            )
            .await
            .unwrap();
        assert_eq!(spool_entries(&h.spool_dir), 0);
    }

    #[tokio::test]
    async fn spool_file_is_removed_on_failure() {
        let h = harness_with_broken_storage();
        let err = h
            .ingestor
            .ingest(
                "doomed.txt",
                chunked(Bytes::from_static(b"Sample content"), 4),
                IngestStrategy::Spooled,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Storage { .. }));
        assert_eq!(spool_entries(&h.spool_dir), 0);
        assert_eq!(h.metadata_store.file_by_name("doomed.txt").unwrap(), None);
    }

    #[tokio::test]
    async fn source_error_during_spooling_surfaces_and_cleans_up() {
        let h = harness();
        let source = ByteSource::Stream(
            stream::iter(vec![
                Ok(Bytes::from_static(b"abc")),
                Err(anyhow::anyhow!("client disconnected")),
            ])
            .boxed(),
        );
        let err = h
            .ingestor
            .ingest("partial.txt", source, IngestStrategy::Spooled)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Spool { .. }));
        assert_eq!(spool_entries(&h.spool_dir), 0);
        assert_eq!(h.metadata_store.file_by_name("partial.txt").unwrap(), None);
    }

    #[tokio::test]
    async fn source_error_during_chunked_ingest_persists_no_metadata() {
        let h = harness();
        let source = ByteSource::Stream(
            stream::iter(vec![
                Ok(Bytes::from_static(b"abc")),
                Err(anyhow::anyhow!("client disconnected")),
            ])
            .boxed(),
        );
        let err = h
            .ingestor
            .ingest("partial.txt", source, IngestStrategy::Chunked)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Storage { .. }));
        assert_eq!(h.metadata_store.file_by_name("partial.txt").unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_algorithm_fails_construction() {
        let h = harness();
        let err = FileIngestor::new(
            h.blob_storage.clone(),
            h.metadata_store.clone(),
            "md5",
            None,
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::AlgorithmUnavailable(_)));
    }

    #[tokio::test]
    async fn large_file_strategies_agree() {
        const SIZE: usize = 100 * 1024 * 1024;
        const LARGE_FILE_SHA256: &str =
            "cd1f2a4b7893d1c70893ed2ba347e140d34bdcd2794097424083d9367fa5caa6";
        let h = harness();
        let content = Bytes::from(vec![b'A'; SIZE]);

        let buffered = h
            .ingestor
            .ingest(
                "large_buffered.bin",
                ByteSource::Buffer(content.clone()),
                IngestStrategy::Buffered,
            )
            .await
            .unwrap();
        let spooled = h
            .ingestor
            .ingest(
                "large_spooled.bin",
                chunked(content.clone(), 4 * 1024 * 1024),
                IngestStrategy::Spooled,
            )
            .await
            .unwrap();
        let streamed = h
            .ingestor
            .ingest(
                "large_streamed.bin",
                chunked(content.clone(), 4 * 1024 * 1024),
                IngestStrategy::Chunked,
            )
            .await
            .unwrap();

        for metadata in [&buffered, &spooled, &streamed] {
            assert_eq!(metadata.checksum, LARGE_FILE_SHA256);
            assert_eq!(metadata.size, SIZE as u64);
        }
        assert_eq!(spool_entries(&h.spool_dir), 0);
    }
}
