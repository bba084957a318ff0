use {
    crate::fetch::FetchError,
    hyper::StatusCode,
    rangecrypt_protocol::{ContentDigest, FileId},
};

/// Failure of a transfer, either before the response head is committed or
/// while bytes are being streamed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransferError {
    #[error("file {0} not found")]
    NotFound(FileId),
    #[error("access to file {0} denied")]
    PermissionDenied(FileId),
    #[error("file {file_id} is not available: {reason}")]
    Unavailable { file_id: FileId, reason: String },
    #[error("unsupported request: {0}")]
    Unsupported(String),
    #[error("range {start}-{end} is not satisfiable for file {file_id}")]
    RangeNotSatisfiable { file_id: FileId, start: i64, end: i64 },
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error(transparent)]
    RemoteFetch(#[from] FetchError),
    #[error("error getting page {file_id} page {page}: {reason}")]
    Page {
        file_id: FileId,
        page: u64,
        reason: String,
    },
    #[error("streaming of {file_id} failed after {bytes} bytes: {reason}")]
    Streaming {
        file_id: FileId,
        bytes: u64,
        reason: String,
    },
    #[error("integrity check failed for {file_id}: expected {expected}, streamed {actual}")]
    IntegrityMismatch {
        file_id: FileId,
        expected: ContentDigest,
        actual: ContentDigest,
    },
}

impl TransferError {
    #[must_use]
    #[inline]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unsupported(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::InvalidKey(_) => StatusCode::BAD_REQUEST,
            Self::RemoteFetch(_) => StatusCode::BAD_GATEWAY,
            Self::Page { .. } | Self::Streaming { .. } | Self::IntegrityMismatch { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
