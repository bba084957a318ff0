use {
    anyhow::{Result, format_err},
    portpicker::pick_unused_port,
    rangecrypt_protocol::{AesBits, EncryptionFormat, FileId, KeyMaterial},
    rangecrypt_sdk::{
        EngineConfig,
        crypto::{CipherKey, CounterCipher, Iv},
        fetch::{FetchConfig, ObjectLocation},
        metadata::CatalogEntry,
    },
    rangecrypt_server::{Config, serve},
    reqwest::RequestBuilder,
    std::{net::SocketAddr, sync::Once, time::Duration},
    tokio::{net::TcpListener, sync::oneshot, task::JoinHandle},
    tracing_subscriber::EnvFilter,
    url::Url,
};

pub const ACCESS_TOKEN: &str = "e2eAccessToken0123456789";
pub const ARCHIVE_PASSPHRASE: &str = "archive passphrase";

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn sample_plaintext(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from(i.wrapping_mul(7) % 253).unwrap_or_default())
        .collect()
}

pub fn key(material: &str, bits: AesBits) -> CipherKey {
    CipherKey::from_material(&KeyMaterial::Passphrase(material.into()), bits)
        .unwrap_or_else(|_| unreachable!())
}

/// Stored form of an AES-CTR archived file: IV followed by ciphertext.
pub fn encrypt_archived(plaintext: &[u8], bits: AesBits, iv: Iv) -> Vec<u8> {
    let mut stored = iv.to_vec();
    let mut ciphertext = plaintext.to_vec();
    CounterCipher::new(&key(ARCHIVE_PASSPHRASE, bits), &iv).apply(&mut ciphertext);
    stored.extend_from_slice(&ciphertext);
    stored
}

/// Decrypts client output produced with `passphrase` starting at `offset`.
pub fn decrypt_output(data: &[u8], passphrase: &str, bits: AesBits, iv: &Iv, offset: u64) -> Vec<u8> {
    let mut plaintext = data.to_vec();
    CounterCipher::at_offset(&key(passphrase, bits), iv, offset).apply(&mut plaintext);
    plaintext
}

pub fn catalog_entry(id: &str, url: Url, size: usize, format: EncryptionFormat) -> CatalogEntry {
    CatalogEntry {
        id: FileId::from(id),
        location: ObjectLocation::new(url),
        size: u64::try_from(size).unwrap_or_default(),
        key: (format != EncryptionFormat::Plain)
            .then(|| KeyMaterial::Passphrase(ARCHIVE_PASSPHRASE.into())),
        format,
        checksum: None,
        available: true,
    }
}

/// A running server on a local port.
pub struct TestServer {
    addr: SocketAddr,
    client: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<()>>>,
}

impl TestServer {
    pub async fn start(engine: EngineConfig, catalog: Vec<CatalogEntry>) -> Result<Self> {
        init_logging();
        let port = pick_unused_port().ok_or_else(|| format_err!("no free port"))?;
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let addr = listener.local_addr()?;
        let config = Config {
            bind_addr: addr,
            log_file: None,
            log_filter: "info".into(),
            access_tokens: vec![ACCESS_TOKEN.parse()?],
            engine,
            fetch: FetchConfig::default(),
            catalog,
            shutdown_grace: Duration::from_secs(5),
        };
        config.validate()?;
        let (shutdown, stop) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            serve(listener, &config, async {
                let _ = stop.await;
            })
            .await
        });
        Ok(Self {
            addr,
            client: reqwest::Client::new(),
            shutdown: Some(shutdown),
            task: Some(task),
        })
    }

    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{path_and_query}", self.addr)
    }

    /// Authorized GET request.
    pub fn get(&self, path_and_query: &str) -> RequestBuilder {
        self.anonymous_get(path_and_query).bearer_auth(ACCESS_TOKEN)
    }

    pub fn anonymous_get(&self, path_and_query: &str) -> RequestBuilder {
        self.client.get(self.url(path_and_query))
    }

    /// Stops accepting connections and waits for the server to drain.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        match self.task.take() {
            Some(task) => task.await?,
            None => Ok(()),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}
