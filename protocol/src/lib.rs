pub mod credentials;
pub mod endpoints;

pub use crate::credentials::{AccessToken, DestinationIv, KeyMaterial};

use {
    anyhow::{Error, bail, format_err},
    derive_more::{Display, From, Into},
    serde::{Deserialize, Serialize},
    std::{borrow::Cow, fmt, str::FromStr, time::Duration},
};

/// Archive-wide identifier of a stored file.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into, Display,
)]
pub struct FileId(pub String);

impl From<&str> for FileId {
    #[inline]
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Length of the AES-CTR header (the IV) stored in front of the ciphertext.
pub const AES_HEADER_LEN: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AesBits {
    Aes128,
    Aes256,
}

impl AesBits {
    #[must_use]
    #[inline]
    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes256 => 32,
        }
    }
}

/// Encryption of a file as it is stored in the archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EncryptionFormat {
    Plain,
    Aes(AesBits),
    SymmetricGpg,
    /// Public-key GPG envelope. The full format name is kept because
    /// variants such as `publicgpg_sanger` select different keyrings.
    PublicGpg(String),
}

impl EncryptionFormat {
    /// Whether plaintext offsets can be reached without reading the whole object.
    #[must_use]
    #[inline]
    pub fn is_random_access(&self) -> bool {
        matches!(self, Self::Plain | Self::Aes(_))
    }

    /// Bytes stored in front of the payload.
    #[must_use]
    #[inline]
    pub fn header_len(&self) -> u64 {
        match self {
            Self::Aes(_) => AES_HEADER_LEN,
            Self::Plain | Self::SymmetricGpg | Self::PublicGpg(_) => 0,
        }
    }

    #[must_use]
    #[inline]
    pub fn aes_bits(&self) -> Option<AesBits> {
        if let Self::Aes(bits) = self {
            Some(*bits)
        } else {
            None
        }
    }
}

impl FromStr for EncryptionFormat {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Ok(match lower.as_str() {
            "plain" => Self::Plain,
            "aes" | "aes128" => Self::Aes(AesBits::Aes128),
            "aes256" => Self::Aes(AesBits::Aes256),
            "symmetricgpg" => Self::SymmetricGpg,
            _ if lower.starts_with("publicgpg") => Self::PublicGpg(lower),
            _ => bail!("unknown encryption format `{s}`"),
        })
    }
}

impl fmt::Display for EncryptionFormat {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::Aes(AesBits::Aes128) => write!(f, "aes128"),
            Self::Aes(AesBits::Aes256) => write!(f, "aes256"),
            Self::SymmetricGpg => write!(f, "symmetricgpg"),
            Self::PublicGpg(name) => write!(f, "{name}"),
        }
    }
}

impl<'de> Deserialize<'de> for EncryptionFormat {
    #[inline]
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Cow::<'_, str>::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

impl Serialize for EncryptionFormat {
    #[inline]
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_string().serialize(serializer)
    }
}

/// Encryption applied to bytes on their way to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestinationFormat {
    Plain,
    Aes(AesBits),
}

impl FromStr for DestinationFormat {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<EncryptionFormat>()? {
            EncryptionFormat::Plain => Ok(Self::Plain),
            EncryptionFormat::Aes(bits) => Ok(Self::Aes(bits)),
            other => bail!("`{other}` is not supported as a destination format"),
        }
    }
}

impl fmt::Display for DestinationFormat {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => EncryptionFormat::Plain.fmt(f),
            Self::Aes(bits) => EncryptionFormat::Aes(*bits).fmt(f),
        }
    }
}

/// Inclusive byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    #[must_use]
    #[inline]
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    #[must_use]
    #[inline]
    pub fn byte_count(&self) -> u64 {
        self.end.saturating_sub(self.start).saturating_add(1)
    }
}

impl fmt::Display for ByteRange {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// MD5 digest of a byte stream. Written as 32 hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From, Into)]
pub struct ContentDigest(pub [u8; 16]);

impl fmt::Display for ContentDigest {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for ContentDigest {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut digest = [0; 16];
        hex::decode_to_slice(s.trim(), &mut digest)
            .map_err(|err| format_err!("invalid md5 digest `{s}`: {err}"))?;
        Ok(Self(digest))
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    #[inline]
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Cow::<'_, str>::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

impl Serialize for ContentDigest {
    #[inline]
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_string().serialize(serializer)
    }
}

/// Request to stream a plaintext byte range of an archived file, re-encrypted
/// for the destination. Source format and key come from the metadata service.
///
/// `end_coordinate` is exclusive; zero means end of file.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub file_id: FileId,
    pub destination_format: DestinationFormat,
    pub destination_key: Option<KeyMaterial>,
    pub destination_iv: Option<DestinationIv>,
    pub start_coordinate: u64,
    pub end_coordinate: u64,
    pub session_id: Option<String>,
}

impl TransferRequest {
    /// Whole-file request with plaintext output.
    #[must_use]
    #[inline]
    pub fn plain(file_id: impl Into<FileId>) -> Self {
        Self {
            file_id: file_id.into(),
            destination_format: DestinationFormat::Plain,
            destination_key: None,
            destination_iv: None,
            start_coordinate: 0,
            end_coordinate: 0,
            session_id: None,
        }
    }

    #[must_use]
    #[inline]
    pub fn with_range(mut self, start: u64, end: u64) -> Self {
        self.start_coordinate = start;
        self.end_coordinate = end;
        self
    }

    #[must_use]
    #[inline]
    pub fn with_destination(
        mut self,
        format: DestinationFormat,
        key: Option<KeyMaterial>,
        iv: Option<DestinationIv>,
    ) -> Self {
        self.destination_format = format;
        self.destination_key = key;
        self.destination_iv = iv;
        self
    }

    #[must_use]
    #[inline]
    pub fn is_whole_file(&self) -> bool {
        self.start_coordinate == 0 && self.end_coordinate == 0
    }
}

/// Outcome of a completed or aborted transfer.
#[derive(Debug, Clone, Serialize)]
pub struct TransferResult {
    pub file_id: FileId,
    /// Payload bytes written to the sink, excluding a generated IV prefix.
    pub bytes_transferred: u64,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    pub success: bool,
    pub source_digest: Option<ContentDigest>,
    pub sink_digest: Option<ContentDigest>,
    pub error: Option<String>,
}

impl TransferResult {
    /// Throughput in megabytes per second.
    #[must_use]
    #[inline]
    #[expect(clippy::cast_precision_loss, reason = "approximate statistics")]
    pub fn speed_mb_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64().max(0.001);
        self.bytes_transferred as f64 / 1_048_576.0 / secs
    }
}

mod duration_millis {
    use {serde::Serializer, std::time::Duration};

    #[inline]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u128(value.as_millis())
    }
}
