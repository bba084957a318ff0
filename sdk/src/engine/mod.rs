//! Streams byte ranges of archived files to clients, re-encrypted on the fly.
//!
//! A transfer is prepared first: metadata and the cipher header are resolved
//! and the range is validated, so that every error that can be reported with a
//! proper status happens before the response head is sent. Streaming then runs
//! to completion or fails midway; a mid-stream failure can only be observed by
//! the client as a truncated body, and is reported to the audit sink.

mod config;
mod envelope;
mod reader;
mod sink;
mod transfer;

pub use {
    config::{EngineConfig, ReadStrategy},
    envelope::{EnvelopeDecoder, PlaintextStream},
    sink::TransferSink,
    transfer::{PreparedTransfer, TransferHead, TransferState},
};

use {
    crate::{
        audit::AuditSink,
        cache::{HeaderStore, PageCache},
        content::FileHandle,
        crypto::{BLOCK_SIZE, CipherKey, DestinationCipher},
        error::TransferError,
        fetch::RangeFetcher,
        metadata::FileMetadataService,
    },
    rangecrypt_protocol::{
        AES_HEADER_LEN, DestinationFormat, EncryptionFormat, FileId, TransferRequest, TransferResult,
    },
    std::sync::Arc,
    tracing::{debug, instrument},
};

/// Shared entry point for all transfers. Cheap to clone.
#[derive(Clone)]
pub struct TransferEngine {
    metadata: Arc<dyn FileMetadataService>,
    fetcher: Arc<dyn RangeFetcher>,
    audit: Arc<dyn AuditSink>,
    envelope: Option<Arc<dyn EnvelopeDecoder>>,
    headers: HeaderStore,
    pages: PageCache,
    strategy: ReadStrategy,
    integrity_prefix: u64,
}

impl TransferEngine {
    #[inline]
    pub fn new(
        config: &EngineConfig,
        metadata: Arc<dyn FileMetadataService>,
        fetcher: Arc<dyn RangeFetcher>,
        audit: Arc<dyn AuditSink>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            headers: HeaderStore::new(Arc::clone(&fetcher), config.header_store()),
            pages: PageCache::new(Arc::clone(&fetcher), config.page_cache()?),
            metadata,
            fetcher,
            audit,
            envelope: None,
            strategy: config.read_strategy,
            integrity_prefix: config.integrity_prefix,
        })
    }

    #[must_use]
    #[inline]
    pub fn with_envelope_decoder(mut self, decoder: Arc<dyn EnvelopeDecoder>) -> Self {
        self.envelope = Some(decoder);
        self
    }

    #[must_use]
    #[inline]
    pub fn headers(&self) -> &HeaderStore {
        &self.headers
    }

    #[must_use]
    #[inline]
    pub fn pages(&self) -> &PageCache {
        &self.pages
    }

    /// Forgets cached header and pages of the file.
    #[inline]
    pub fn invalidate(&self, file_id: &FileId) {
        self.headers.invalidate(file_id);
        self.pages.invalidate_file(file_id);
    }

    /// Size of the file's plaintext.
    #[instrument(skip(self))]
    #[inline]
    pub async fn plain_file_size(&self, file_id: &FileId) -> Result<u64, TransferError> {
        Ok(self.resolve(file_id).await?.plain_size())
    }

    /// Resolves everything needed to answer the request, without streaming.
    ///
    /// `end_coordinate` is exclusive; zero or a value past the end of the file
    /// means end of file.
    #[instrument(skip_all, fields(file_id = %request.file_id))]
    #[inline]
    pub async fn prepare(&self, request: TransferRequest) -> Result<PreparedTransfer, TransferError> {
        let file_id = request.file_id.clone();
        let result = async {
            let file = self.resolve(&request.file_id).await?;
            self.prepare_resolved(file, request).await
        }
        .await;
        self.audit_rejection(&file_id, result)
    }

    /// Like [`TransferEngine::prepare`] for a strict inclusive plaintext range
    /// with plaintext output. Out-of-range requests are rejected, not clamped.
    #[instrument(skip(self))]
    #[inline]
    pub async fn prepare_range(
        &self,
        file_id: &FileId,
        start: i64,
        end: i64,
    ) -> Result<PreparedTransfer, TransferError> {
        let result = async {
            let file = self.resolve(file_id).await?;
            if !file.format.is_random_access() {
                return Err(TransferError::Unsupported(format!(
                    "byte ranges of {} files",
                    file.format
                )));
            }
            let not_satisfiable = || TransferError::RangeNotSatisfiable {
                file_id: file_id.clone(),
                start,
                end,
            };
            let plain_size = file.plain_size();
            let (Ok(first), Ok(last)) = (u64::try_from(start), u64::try_from(end)) else {
                return Err(not_satisfiable());
            };
            if last < first || last >= plain_size {
                return Err(not_satisfiable());
            }
            let request = TransferRequest::plain(file_id.clone())
                .with_range(first, last.saturating_add(1));
            self.prepare_resolved(file, request).await
        }
        .await;
        self.audit_rejection(file_id, result)
    }

    /// Prepares and streams a transfer.
    #[inline]
    pub async fn transfer<S: TransferSink>(
        &self,
        request: TransferRequest,
        sink: &mut S,
    ) -> Result<TransferResult, TransferError> {
        Ok(self.prepare(request).await?.stream(sink).await)
    }

    /// Streams the plaintext of the inclusive range `start..=end`.
    #[inline]
    pub async fn read_range<S: TransferSink>(
        &self,
        file_id: &FileId,
        start: i64,
        end: i64,
        sink: &mut S,
    ) -> Result<TransferResult, TransferError> {
        Ok(self
            .prepare_range(file_id, start, end)
            .await?
            .stream(sink)
            .await)
    }

    fn audit_rejection(
        &self,
        file_id: &FileId,
        result: Result<PreparedTransfer, TransferError>,
    ) -> Result<PreparedTransfer, TransferError> {
        if let Err(err) = &result {
            debug!(?err, "transfer rejected");
            self.audit.record_failure(file_id, &err.to_string());
        }
        result
    }

    async fn resolve(&self, file_id: &FileId) -> Result<FileHandle, TransferError> {
        let info = self.metadata.file_info(file_id).await?;
        let format = self.metadata.encryption_format(file_id).await?;
        let key = if format == EncryptionFormat::Plain {
            None
        } else {
            self.metadata.file_key(file_id).await?
        };
        let data_offset = if format.aes_bits().is_some() {
            self.integrity_prefix.saturating_add(AES_HEADER_LEN)
        } else {
            0
        };
        Ok(FileHandle {
            id: file_id.clone(),
            location: info.location,
            stored_size: info.stored_size,
            data_offset,
            format,
            key,
            checksum: info.checksum,
        })
    }

    async fn prepare_resolved(
        &self,
        file: FileHandle,
        request: TransferRequest,
    ) -> Result<PreparedTransfer, TransferError> {
        let plain_size = file.plain_size();
        let range = if file.format.is_random_access() {
            Some(self.clamp_range(&file, &request)?)
        } else {
            if !request.is_whole_file() {
                return Err(TransferError::Unsupported(format!(
                    "byte ranges of {} files",
                    file.format
                )));
            }
            if self.envelope.is_none() {
                return Err(TransferError::Unsupported(format!(
                    "no decoder for {} files",
                    file.format
                )));
            }
            None
        };

        let start = range.map_or(0, |(start, _)| start);
        let destination = match request.destination_format {
            DestinationFormat::Plain => DestinationCipher::Passthrough,
            DestinationFormat::Aes(bits) => {
                let material = request.destination_key.as_ref().ok_or_else(|| {
                    TransferError::InvalidKey("destination key is required".into())
                })?;
                let key = CipherKey::from_material(material, bits)?;
                DestinationCipher::encrypting(key, request.destination_iv.map(|iv| iv.0), start)
            }
        };

        let header = if file.format.aes_bits().is_some() {
            Some(self.headers.get(&file).await?)
        } else {
            None
        };

        Ok(PreparedTransfer::new(
            self.clone(),
            file,
            header,
            range,
            plain_size,
            destination,
            request,
        ))
    }

    /// Applies the clamping rules for exclusive coordinates. Returns the
    /// half-open range of plaintext to send.
    fn clamp_range(
        &self,
        file: &FileHandle,
        request: &TransferRequest,
    ) -> Result<(u64, u64), TransferError> {
        let plain_size = file.plain_size();
        let end = if request.end_coordinate == 0 {
            plain_size
        } else {
            request.end_coordinate.min(plain_size)
        };
        let mut start = request.start_coordinate;
        let empty_file = plain_size == 0 && start == 0;
        if start >= end && !empty_file {
            return Err(TransferError::RangeNotSatisfiable {
                file_id: file.id.clone(),
                start: i64::try_from(request.start_coordinate).unwrap_or(i64::MAX),
                end: i64::try_from(request.end_coordinate).unwrap_or(i64::MAX),
            });
        }
        if matches!(request.destination_format, DestinationFormat::Aes(_))
            && request.destination_iv.is_some()
        {
            // A supplied IV addresses whole blocks, so output starts on a block.
            let aligned = start.saturating_sub(start % BLOCK_SIZE);
            if aligned != start {
                debug!(start, aligned, "start moved to block boundary");
            }
            start = aligned;
        }
        Ok((start, end))
    }

    pub(crate) fn fetcher(&self) -> &Arc<dyn RangeFetcher> {
        &self.fetcher
    }

    pub(crate) fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub(crate) fn envelope(&self) -> Option<&Arc<dyn EnvelopeDecoder>> {
        self.envelope.as_ref()
    }

    pub(crate) fn strategy(&self) -> ReadStrategy {
        self.strategy
    }
}
