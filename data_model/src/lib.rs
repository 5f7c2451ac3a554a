use serde::{Deserialize, Serialize};

/// Metadata record for one stored file.
///
/// `id` is absent until the record is persisted; the metadata store assigns
/// it and returns the canonical record. `checksum` and `size` always describe
/// the exact bytes that were durably written, never a partial buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub id: Option<u64>,
    pub file_name: String,
    pub checksum: String,
    pub size: u64,
}

impl FileMetadata {
    pub fn new(file_name: impl Into<String>, checksum: impl Into<String>, size: u64) -> Self {
        Self {
            id: None,
            file_name: file_name.into(),
            checksum: checksum.into(),
            size,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }
}
