use {
    crate::{error::TransferError, fetch::ObjectLocation},
    async_trait::async_trait,
    rangecrypt_protocol::{ContentDigest, EncryptionFormat, FileId, KeyMaterial},
    serde::Deserialize,
    std::collections::HashMap,
};

/// Storage facts about an archived file.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub location: ObjectLocation,
    /// Size of the stored object.
    pub stored_size: u64,
    pub checksum: Option<ContentDigest>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    #[error("file {0} not found")]
    NotFound(FileId),
    #[error("access to file {0} denied")]
    Forbidden(FileId),
    #[error("file {file_id} is not available: {reason}")]
    Unavailable { file_id: FileId, reason: String },
}

impl From<MetadataError> for TransferError {
    #[inline]
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(id) => Self::NotFound(id),
            MetadataError::Forbidden(id) => Self::PermissionDenied(id),
            MetadataError::Unavailable { file_id, reason } => Self::Unavailable { file_id, reason },
        }
    }
}

/// Answers where a file is stored, how it is encrypted and with which key.
#[async_trait]
pub trait FileMetadataService: Send + Sync {
    async fn file_info(&self, id: &FileId) -> Result<FileInfo, MetadataError>;
    async fn encryption_format(&self, id: &FileId) -> Result<EncryptionFormat, MetadataError>;
    async fn file_key(&self, id: &FileId) -> Result<Option<KeyMaterial>, MetadataError>;
}

fn default_available() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub id: FileId,
    #[serde(flatten)]
    pub location: ObjectLocation,
    /// Size of the stored object, including the IV of encrypted files.
    pub size: u64,
    pub format: EncryptionFormat,
    #[serde(default)]
    pub key: Option<KeyMaterial>,
    #[serde(default)]
    pub checksum: Option<ContentDigest>,
    #[serde(default = "default_available")]
    pub available: bool,
}

/// Metadata service backed by a fixed list of files.
#[derive(Debug, Default)]
pub struct Catalog {
    entries: HashMap<FileId, CatalogEntry>,
}

impl Catalog {
    #[must_use]
    #[inline]
    pub fn new(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.id.clone(), entry))
                .collect(),
        }
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, id: &FileId) -> Result<&CatalogEntry, MetadataError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| MetadataError::NotFound(id.clone()))?;
        if !entry.available {
            return Err(MetadataError::Unavailable {
                file_id: id.clone(),
                reason: "file is marked unavailable".into(),
            });
        }
        Ok(entry)
    }
}

#[async_trait]
impl FileMetadataService for Catalog {
    async fn file_info(&self, id: &FileId) -> Result<FileInfo, MetadataError> {
        let entry = self.entry(id)?;
        Ok(FileInfo {
            location: entry.location.clone(),
            stored_size: entry.size,
            checksum: entry.checksum,
        })
    }

    async fn encryption_format(&self, id: &FileId) -> Result<EncryptionFormat, MetadataError> {
        Ok(self.entry(id)?.format.clone())
    }

    async fn file_key(&self, id: &FileId) -> Result<Option<KeyMaterial>, MetadataError> {
        Ok(self.entry(id)?.key.clone())
    }
}
