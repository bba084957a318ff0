use {
    rangecrypt_protocol::{ContentDigest, DestinationFormat, FileId},
    tracing::{info, warn},
};

/// Longest error message kept in a failure record.
pub const MAX_ERROR_LEN: usize = 256;

#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub file_id: FileId,
    pub session_id: String,
    pub destination: DestinationFormat,
    pub start: u64,
    pub end: u64,
    pub bytes: u64,
    pub speed_mb_per_sec: f64,
    pub source_digest: Option<ContentDigest>,
}

/// Receives a record of every finished transfer.
///
/// Implementations must not block and must not fail; a transfer never waits
/// for or depends on its audit record.
pub trait AuditSink: Send + Sync {
    fn record_success(&self, record: &TransferRecord);
    fn record_failure(&self, file_id: &FileId, error: &str);
}

/// Writes audit records to the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    #[inline]
    fn record_success(&self, record: &TransferRecord) {
        info!(
            target: "audit",
            file_id = %record.file_id,
            session = %record.session_id,
            destination = %record.destination,
            start = record.start,
            end = record.end,
            bytes = record.bytes,
            speed = format_args!("{:.2} MB/s", record.speed_mb_per_sec),
            source_md5 = record.source_digest.map(|d| d.to_string()),
            "transfer completed",
        );
    }

    #[inline]
    fn record_failure(&self, file_id: &FileId, error: &str) {
        warn!(target: "audit", %file_id, error = truncate_message(error), "transfer failed");
    }
}

/// Cuts the message to at most [`MAX_ERROR_LEN`] bytes on a character boundary.
#[must_use]
#[inline]
pub fn truncate_message(message: &str) -> &str {
    if message.len() <= MAX_ERROR_LEN {
        return message;
    }
    let mut end = MAX_ERROR_LEN;
    while !message.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    message.get(..end).unwrap_or_default()
}
