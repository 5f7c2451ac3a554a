use std::{
    fs,
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::{anyhow, Result};
use data_model::FileMetadata;
use rocksdb::{
    ColumnFamily,
    ColumnFamilyDescriptor,
    IteratorMode,
    Options,
    TransactionDB,
    TransactionDBOptions,
};
use tracing::{debug, info};

pub mod serializer;

use serializer::{JsonEncode, JsonEncoder};

/// Rows are keyed by their 8-byte big-endian id, so a forward scan returns
/// records in insertion order.
const FILES_CF: &str = "files";

/// Durable store of file metadata. Ids are assigned here, monotonically,
/// starting at 1; records are immutable once written (no update or delete
/// operations exist). Safe for concurrent use from multiple in-flight
/// ingestions.
pub struct FileMetadataStore {
    db: TransactionDB,
    next_id: AtomicU64,
}

impl FileMetadataStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&path)
            .map_err(|e| anyhow!("failed to create state store dir: {}", e))?;

        let mut db_opts = Options::default();
        db_opts.create_missing_column_families(true);
        db_opts.create_if_missing(true);
        let db = TransactionDB::open_cf_descriptors(
            &db_opts,
            &TransactionDBOptions::default(),
            &path,
            vec![ColumnFamilyDescriptor::new(FILES_CF, Options::default())],
        )
        .map_err(|e| anyhow!("failed to open db: {}", e))?;

        let store = Self {
            db,
            next_id: AtomicU64::new(1),
        };
        let last_id = store.last_assigned_id()?;
        store.next_id.store(last_id + 1, Ordering::SeqCst);
        info!(path = %path.display(), next_id = last_id + 1, "opened file metadata store");
        Ok(store)
    }

    fn files_cf(&self) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(FILES_CF)
            .ok_or_else(|| anyhow!("failed to get column family {}", FILES_CF))
    }

    fn last_assigned_id(&self) -> Result<u64> {
        let cf = self.files_cf()?;
        let mut iter = self.db.iterator_cf(cf, IteratorMode::End);
        match iter.next() {
            Some(kv) => {
                let (key, _) = kv?;
                let key: [u8; 8] = key
                    .as_ref()
                    .try_into()
                    .map_err(|_| anyhow!("malformed row key, expected 8 bytes"))?;
                Ok(u64::from_be_bytes(key))
            }
            None => Ok(0),
        }
    }

    /// Persist a new metadata record, assigning its id. The returned record
    /// is the canonical persisted form.
    pub fn create(&self, metadata: FileMetadata) -> Result<FileMetadata> {
        if metadata.id.is_some() {
            return Err(anyhow!(
                "metadata for {} is already persisted",
                metadata.file_name
            ));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut row = metadata;
        row.id = Some(id);
        let cf = self.files_cf()?;
        self.db
            .put_cf(cf, id.to_be_bytes(), JsonEncoder::encode(&row)?)
            .map_err(|e| anyhow!("failed to write metadata row {}: {}", id, e))?;
        debug!(id, file_name = row.file_name, "persisted file metadata");
        Ok(row)
    }

    /// All records, in insertion order.
    pub fn all_files(&self) -> Result<Vec<FileMetadata>> {
        let cf = self.files_cf()?;
        let mut files = Vec::new();
        for kv in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = kv?;
            files.push(JsonEncoder::decode(&value)?);
        }
        Ok(files)
    }

    pub fn file_by_id(&self, id: u64) -> Result<Option<FileMetadata>> {
        let cf = self.files_cf()?;
        let value = self.db.get_cf(cf, id.to_be_bytes())?;
        value.map(|v| JsonEncoder::decode(&v)).transpose()
    }

    /// First record with the given name, in id order. Names are not unique;
    /// the oldest record wins.
    pub fn file_by_name(&self, file_name: &str) -> Result<Option<FileMetadata>> {
        let cf = self.files_cf()?;
        for kv in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = kv?;
            let row: FileMetadata = JsonEncoder::decode(&value)?;
            if row.file_name == file_name {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}
