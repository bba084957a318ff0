use {
    crate::{
        audit::TransferRecord,
        content::{CipherHeader, FileHandle},
        crypto::DestinationCipher,
        engine::{ReadStrategy, TransferEngine, reader::PlaintextReader, sink::TransferSink},
        error::TransferError,
        integrity::{IntegrityReport, IntegrityVerifier},
    },
    derive_more::Display,
    futures::TryStreamExt,
    hyper::StatusCode,
    rangecrypt_protocol::{ByteRange, DestinationFormat, TransferRequest, TransferResult},
    std::{sync::Arc, time::Instant},
    tracing::{debug, info, warn},
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TransferState {
    Resolving,
    HeaderLoading,
    Streaming,
    Finalizing,
    Completed,
    Failed,
}

/// Response metadata, known before the first byte is streamed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHead {
    /// Fresh identifier of this transfer.
    pub session_id: String,
    /// A proper sub-range of the file is sent.
    pub partial: bool,
    /// Bytes that will be sent, including a generated IV. Unknown for
    /// envelope formats.
    pub content_length: Option<u64>,
    /// `bytes first-last/size` in plaintext coordinates, for partial transfers.
    pub content_range: Option<String>,
    pub plain_size: u64,
}

impl TransferHead {
    #[must_use]
    #[inline]
    pub fn status_code(&self) -> StatusCode {
        if self.partial {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        }
    }
}

/// A transfer whose metadata and header are resolved, ready to stream.
pub struct PreparedTransfer {
    engine: TransferEngine,
    file: FileHandle,
    header: Option<Arc<CipherHeader>>,
    /// Half-open plaintext range; `None` for envelope formats.
    range: Option<(u64, u64)>,
    destination: DestinationCipher,
    destination_format: DestinationFormat,
    client_session: Option<String>,
    head: TransferHead,
    state: TransferState,
    bytes_transferred: u64,
    started: Instant,
}

impl PreparedTransfer {
    pub(crate) fn new(
        engine: TransferEngine,
        file: FileHandle,
        header: Option<Arc<CipherHeader>>,
        range: Option<(u64, u64)>,
        plain_size: u64,
        destination: DestinationCipher,
        request: TransferRequest,
    ) -> Self {
        let prefix_len = destination.prefix_len();
        let head = match range {
            Some((start, end)) => {
                let partial = start > 0 || end < plain_size;
                TransferHead {
                    session_id: Uuid::new_v4().to_string(),
                    partial,
                    content_length: Some(end.saturating_sub(start).saturating_add(prefix_len)),
                    content_range: partial.then(|| {
                        format!("bytes {start}-{}/{plain_size}", end.saturating_sub(1))
                    }),
                    plain_size,
                }
            }
            None => TransferHead {
                session_id: Uuid::new_v4().to_string(),
                partial: false,
                content_length: None,
                content_range: None,
                plain_size,
            },
        };
        Self {
            engine,
            file,
            header,
            range,
            destination,
            destination_format: request.destination_format,
            client_session: request.session_id,
            head,
            state: TransferState::HeaderLoading,
            bytes_transferred: 0,
            started: Instant::now(),
        }
    }

    #[must_use]
    #[inline]
    pub fn head(&self) -> &TransferHead {
        &self.head
    }

    #[must_use]
    #[inline]
    pub fn state(&self) -> TransferState {
        self.state
    }

    fn set_state(&mut self, state: TransferState) {
        debug!(
            file_id = %self.file.id,
            session = %self.head.session_id,
            from = %self.state,
            to = %state,
            "transfer state",
        );
        self.state = state;
    }

    fn to_transfer(&self) -> Option<u64> {
        self.range.map(|(start, end)| end.saturating_sub(start))
    }

    /// Streams the payload into `sink` and closes it.
    ///
    /// Errors are reported in the result and to the audit sink; the response
    /// head has been committed by then.
    #[inline]
    pub async fn stream<S: TransferSink>(mut self, sink: &mut S) -> TransferResult {
        self.set_state(TransferState::Streaming);
        let mut verifier = IntegrityVerifier::new(self.destination.inverse());
        let mut outcome = self.pump(sink, &mut verifier).await;

        self.set_state(TransferState::Finalizing);
        if let Err(err) = sink.close().await {
            warn!(file_id = %self.file.id, ?err, "failed to close sink");
        }
        let report = verifier.finish();
        if outcome.is_ok() {
            outcome = self.check_integrity(&report);
        }

        let elapsed = self.started.elapsed();
        let mut result = TransferResult {
            file_id: self.file.id.clone(),
            bytes_transferred: self.bytes_transferred,
            elapsed,
            success: outcome.is_ok(),
            source_digest: Some(report.source),
            sink_digest: Some(report.sink),
            error: None,
        };
        match outcome {
            Ok(()) => {
                self.set_state(TransferState::Completed);
                let (start, end) = self.range.unwrap_or((0, self.bytes_transferred));
                info!(
                    file_id = %self.file.id,
                    session = %self.head.session_id,
                    client_session = self.client_session.as_deref(),
                    bytes = self.bytes_transferred,
                    source_md5 = %report.source,
                    "transfer completed",
                );
                self.engine.audit().record_success(&TransferRecord {
                    file_id: self.file.id.clone(),
                    session_id: self.head.session_id.clone(),
                    destination: self.destination_format,
                    start,
                    end,
                    bytes: self.bytes_transferred,
                    speed_mb_per_sec: result.speed_mb_per_sec(),
                    source_digest: Some(report.source),
                });
            }
            Err(err) => {
                self.set_state(TransferState::Failed);
                warn!(
                    file_id = %self.file.id,
                    session = %self.head.session_id,
                    client_session = self.client_session.as_deref(),
                    bytes = self.bytes_transferred,
                    ?err,
                    "transfer failed",
                );
                self.engine
                    .audit()
                    .record_failure(&self.file.id, &err.to_string());
                result.error = Some(err.to_string());
            }
        }
        result
    }

    async fn pump<S: TransferSink>(
        &mut self,
        sink: &mut S,
        verifier: &mut IntegrityVerifier,
    ) -> Result<(), TransferError> {
        let to_transfer = self.to_transfer();
        if let Some(prefix) = self.destination.take_prefix() {
            verifier.observe_prefix(&prefix);
            sink.send(prefix)
                .await
                .map_err(|err| self.streaming_error(&err.to_string()))?;
        }
        if to_transfer == Some(0) {
            return Ok(());
        }

        let mut reader = self.open_reader().await?;
        loop {
            let remaining = to_transfer.map(|total| total.saturating_sub(self.bytes_transferred));
            if remaining == Some(0) {
                break;
            }
            let Some(mut chunk) = reader.next_chunk().await? else {
                if remaining.is_some() {
                    return Err(self.streaming_error("archive ended before the requested range"));
                }
                break;
            };
            if let Some(remaining) = remaining {
                chunk.truncate(usize::try_from(remaining).unwrap_or(usize::MAX));
            }
            if chunk.is_empty() {
                continue;
            }
            let len = u64::try_from(chunk.len()).unwrap_or_default();
            verifier.observe_source(&chunk);
            let sent = self.destination.apply(chunk);
            verifier.observe_sink(&sent);
            sink.send(sent)
                .await
                .map_err(|err| self.streaming_error(&format!("sink failed: {err}")))?;
            self.bytes_transferred = self.bytes_transferred.saturating_add(len);
        }
        Ok(())
    }

    async fn open_reader(&self) -> Result<PlaintextReader, TransferError> {
        let fetcher = self.engine.fetcher();
        match (&self.header, self.range) {
            (Some(header), Some((start, end))) => match self.engine.strategy() {
                ReadStrategy::Paged => Ok(PlaintextReader::paged(
                    self.engine.pages().clone(),
                    Arc::clone(header),
                    start,
                )),
                ReadStrategy::Direct => {
                    let requested = ByteRange::new(start, end.saturating_sub(1));
                    let (aligned, stored) = PlaintextReader::direct_range(header, requested);
                    let stream = fetcher.fetch_range(&header.location, stored).await?;
                    Ok(PlaintextReader::direct(header, aligned, stream))
                }
            },
            (None, Some((start, end))) => {
                let stored = ByteRange::new(start, end.saturating_sub(1));
                let stream = fetcher.fetch_range(&self.file.location, stored).await?;
                Ok(PlaintextReader::Passthrough {
                    stream: Box::pin(stream.map_err(TransferError::from)),
                })
            }
            (_, None) => {
                let decoder = self.engine.envelope().ok_or_else(|| {
                    TransferError::Unsupported(format!("no decoder for {} files", self.file.format))
                })?;
                let stored = ByteRange::new(0, self.file.stored_size.saturating_sub(1));
                let stream = fetcher.fetch_range(&self.file.location, stored).await?;
                Ok(PlaintextReader::Passthrough {
                    stream: decoder.decode(&self.file, stream).await?,
                })
            }
        }
    }

    fn covers_whole_file(&self) -> bool {
        self.range
            .is_none_or(|(start, end)| start == 0 && end == self.head.plain_size)
    }

    /// Output must decode to the source, and a whole file must match the
    /// checksum recorded in the archive.
    fn check_integrity(&self, report: &IntegrityReport) -> Result<(), TransferError> {
        if !report.is_consistent() {
            return Err(TransferError::IntegrityMismatch {
                file_id: self.file.id.clone(),
                expected: report.source,
                actual: report.decoded,
            });
        }
        match self.file.checksum {
            Some(expected) if self.covers_whole_file() && expected != report.source => {
                Err(TransferError::IntegrityMismatch {
                    file_id: self.file.id.clone(),
                    expected,
                    actual: report.source,
                })
            }
            _ => Ok(()),
        }
    }

    fn streaming_error(&self, reason: &str) -> TransferError {
        TransferError::Streaming {
            file_id: self.file.id.clone(),
            bytes: self.bytes_transferred,
            reason: reason.to_owned(),
        }
    }
}
