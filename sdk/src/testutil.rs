use {
    crate::{
        audit::{AuditSink, TransferRecord},
        content::FileHandle,
        crypto::{CipherKey, CounterCipher, Iv},
        fetch::{
            ByteStream, FetchError, FetchErrorKind, ObjectLocation, RangeFetcher, chunked_stream,
        },
        metadata::{FileInfo, FileMetadataService, MetadataError},
    },
    async_trait::async_trait,
    bytes::Bytes,
    futures::StreamExt,
    parking_lot::Mutex,
    rangecrypt_protocol::{AesBits, ByteRange, EncryptionFormat, FileId, KeyMaterial},
    std::{
        collections::HashMap,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    },
};

pub const PASSPHRASE: &str = "archive passphrase";

pub fn sample_plaintext(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from(i.wrapping_mul(31) % 251).unwrap_or_default())
        .collect()
}

pub fn encrypt(plaintext: &[u8], bits: AesBits, iv: Iv) -> Vec<u8> {
    let key = CipherKey::from_material(&KeyMaterial::Passphrase(PASSPHRASE.into()), bits)
        .unwrap_or_else(|_| unreachable!());
    let mut stored = iv.to_vec();
    let mut ciphertext = plaintext.to_vec();
    CounterCipher::new(&key, &iv).apply(&mut ciphertext);
    stored.extend_from_slice(&ciphertext);
    stored
}

fn location(id: &str) -> ObjectLocation {
    ObjectLocation::new(
        format!("http://store.test/archive/{id}")
            .parse()
            .unwrap_or_else(|_| unreachable!()),
    )
}

/// Stores an AES-CTR encrypted copy of `plaintext` and returns its handle.
pub fn aes_file(
    store: &MemoryStore,
    id: &str,
    plaintext: &[u8],
    bits: AesBits,
    iv: Iv,
) -> FileHandle {
    let stored = encrypt(plaintext, bits, iv);
    let location = location(id);
    store.insert(&location, stored.clone());
    FileHandle {
        id: id.into(),
        location,
        stored_size: u64::try_from(stored.len()).unwrap_or_default(),
        data_offset: 16,
        format: EncryptionFormat::Aes(bits),
        key: Some(KeyMaterial::Passphrase(PASSPHRASE.into())),
        checksum: None,
    }
}

pub fn plain_file(store: &MemoryStore, id: &str, plaintext: &[u8]) -> FileHandle {
    let location = location(id);
    store.insert(&location, plaintext.to_vec());
    FileHandle {
        id: id.into(),
        location,
        stored_size: u64::try_from(plaintext.len()).unwrap_or_default(),
        data_offset: 0,
        format: EncryptionFormat::Plain,
        key: None,
        checksum: None,
    }
}

#[derive(Default)]
struct StoreState {
    objects: HashMap<String, Vec<u8>>,
    failing: HashMap<String, u16>,
    /// Object and number of bytes after which its streams fail.
    broken_after: HashMap<String, u64>,
    slow_ranges: HashMap<u64, Duration>,
    fail_next: usize,
    latency: Duration,
    log: Vec<ByteRange>,
}

/// In-memory object store with fault injection.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    pub requests: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Delays every request whose range starts at `start`.
    pub fn slow_range(&self, start: u64, delay: Duration) {
        self.state.lock().slow_ranges.insert(start, delay);
    }

    pub fn fetcher(&self) -> Arc<dyn RangeFetcher> {
        Arc::new(self.clone())
    }

    pub fn insert(&self, location: &ObjectLocation, data: Vec<u8>) {
        self.state
            .lock()
            .objects
            .insert(location.url.to_string(), data);
    }

    pub fn object(&self, location: &ObjectLocation) -> Vec<u8> {
        self.state
            .lock()
            .objects
            .get(location.url.as_str())
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_with_status(&self, location: &ObjectLocation, status: u16) {
        self.state
            .lock()
            .failing
            .insert(location.url.to_string(), status);
    }

    /// Streams of this object fail once `bytes` bytes of it have been read.
    pub fn break_after(&self, location: &ObjectLocation, bytes: u64) {
        self.state
            .lock()
            .broken_after
            .insert(location.url.to_string(), bytes);
    }

    /// The next `count` requests fail with a transient status.
    pub fn fail_next_requests(&self, count: usize) {
        self.state.lock().fail_next = count;
    }

    pub fn ranges(&self) -> Vec<ByteRange> {
        self.state.lock().log.clone()
    }
}

#[async_trait]
impl RangeFetcher for MemoryStore {
    async fn fetch_range(
        &self,
        location: &ObjectLocation,
        range: ByteRange,
    ) -> Result<ByteStream, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let error = |kind| FetchError {
            backend: location.backend(),
            range,
            kind,
        };
        let (delay, outcome) = {
            let mut state = self.state.lock();
            state.log.push(range);
            let delay = state
                .slow_ranges
                .get(&range.start)
                .copied()
                .unwrap_or(state.latency);
            let key = location.url.to_string();
            let outcome = if state.fail_next > 0 {
                state.fail_next -= 1;
                Err(FetchErrorKind::Status(503))
            } else if let Some(status) = state.failing.get(&key) {
                Err(FetchErrorKind::Status(*status))
            } else {
                let object = state.objects.get(&key).cloned().unwrap_or_default();
                let start = usize::try_from(range.start).unwrap_or(usize::MAX);
                let end = usize::try_from(range.end)
                    .unwrap_or(usize::MAX)
                    .saturating_add(1)
                    .min(object.len());
                match object.get(start..end) {
                    Some(data) => {
                        let data_end = range
                            .start
                            .saturating_add(u64::try_from(data.len()).unwrap_or(u64::MAX));
                        let broken = state
                            .broken_after
                            .get(&key)
                            .copied()
                            .filter(|limit| *limit < data_end);
                        Ok((data.to_vec(), broken))
                    }
                    None => Err(FetchErrorKind::Status(416)),
                }
            };
            (delay, outcome)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let (data, broken_after) = outcome.map_err(error)?;
        let available = match broken_after {
            Some(limit) => usize::try_from(limit.saturating_sub(range.start))
                .unwrap_or(usize::MAX)
                .min(data.len()),
            None => data.len(),
        };
        let mut stream = chunked_stream(Bytes::from(data).slice(..available), 7);
        if broken_after.is_some() {
            let failure = error(FetchErrorKind::Transport("connection reset".into()));
            stream = stream
                .chain(futures::stream::iter([Err(failure)]))
                .boxed();
        }
        Ok(stream)
    }
}

#[derive(Default)]
pub struct StaticMetadata {
    files: Mutex<HashMap<FileId, Result<FileHandle, MetadataError>>>,
    pub calls: AtomicUsize,
}

impl StaticMetadata {
    pub fn add(&self, file: FileHandle) {
        self.files.lock().insert(file.id.clone(), Ok(file));
    }

    pub fn add_error(&self, id: &str, error: MetadataError) {
        self.files.lock().insert(id.into(), Err(error));
    }

    fn lookup(&self, id: &FileId) -> Result<FileHandle, MetadataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .get(id)
            .cloned()
            .unwrap_or_else(|| Err(MetadataError::NotFound(id.clone())))
    }
}

#[async_trait]
impl FileMetadataService for StaticMetadata {
    async fn file_info(&self, id: &FileId) -> Result<FileInfo, MetadataError> {
        let file = self.lookup(id)?;
        Ok(FileInfo {
            location: file.location,
            stored_size: file.stored_size,
            checksum: file.checksum,
        })
    }

    async fn encryption_format(&self, id: &FileId) -> Result<EncryptionFormat, MetadataError> {
        Ok(self.lookup(id)?.format)
    }

    async fn file_key(&self, id: &FileId) -> Result<Option<KeyMaterial>, MetadataError> {
        Ok(self.lookup(id)?.key)
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    pub successes: Mutex<Vec<TransferRecord>>,
    pub failures: Mutex<Vec<(FileId, String)>>,
}

impl AuditSink for RecordingAudit {
    fn record_success(&self, record: &TransferRecord) {
        self.successes.lock().push(record.clone());
    }

    fn record_failure(&self, file_id: &FileId, error: &str) {
        self.failures.lock().push((file_id.clone(), error.to_owned()));
    }
}
