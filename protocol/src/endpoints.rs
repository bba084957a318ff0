use {
    crate::{
        DestinationFormat, DestinationIv, EncryptionFormat, FileId, KeyMaterial, TransferRequest,
    },
    anyhow::{Context as _, Result, format_err},
    derive_more::Display,
    std::{collections::HashMap, str::FromStr},
};

pub const ARCHIVE_PREFIX: &str = "/file/archive/";
pub const SIZE_SUFFIX: &str = "/size";
pub const BYTES_SUFFIX: &str = "/bytes";

/// Request header carrying the caller's correlation id.
pub const SESSION_ID_HEADER: &str = "Session-Id";
/// Response header carrying the id assigned to the transfer.
pub const SESSION_RESPONSE_HEADER: &str = "X-Session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Re-encrypted transfer with exclusive, clamped coordinates.
    ArchiveFile(FileId),
    /// Plaintext size of the file.
    ArchiveFileSize(FileId),
    /// Plaintext bytes of a strict inclusive range.
    ArchiveFileBytes(FileId),
}

impl Endpoint {
    #[must_use]
    #[inline]
    pub fn route(path: &str) -> Option<Self> {
        let rest = path.strip_prefix(ARCHIVE_PREFIX)?;
        let (id, make): (&str, fn(FileId) -> Self) =
            if let Some(id) = rest.strip_suffix(SIZE_SUFFIX) {
                (id, Self::ArchiveFileSize)
            } else if let Some(id) = rest.strip_suffix(BYTES_SUFFIX) {
                (id, Self::ArchiveFileBytes)
            } else {
                (rest, Self::ArchiveFile)
            };
        if id.is_empty() || id.contains('/') {
            return None;
        }
        Some(make(FileId(id.to_owned())))
    }
}

fn query_pairs(query: Option<&str>) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .into_owned()
        .collect()
}

fn optional<T>(pairs: &HashMap<String, String>, name: &str) -> Result<Option<T>>
where
    T: FromStr<Err = anyhow::Error>,
{
    pairs
        .get(name)
        .filter(|value| !value.is_empty())
        .map(|value| value.parse().with_context(|| format!("invalid `{name}`")))
        .transpose()
}

fn coordinate(pairs: &HashMap<String, String>, name: &str) -> Result<Option<i64>> {
    pairs
        .get(name)
        .filter(|value| !value.is_empty())
        .map(|value| {
            value
                .parse::<i64>()
                .map_err(|err| format_err!("invalid `{name}`: {err}"))
        })
        .transpose()
}

/// Parameters of [`Endpoint::ArchiveFile`].
#[derive(Debug, Clone)]
pub struct ArchiveFileQuery {
    /// Any known format; whether it can be produced is checked by
    /// [`ArchiveFileQuery::into_request`].
    pub destination_format: EncryptionFormat,
    pub destination_key: Option<KeyMaterial>,
    pub destination_iv: Option<DestinationIv>,
    pub start_coordinate: i64,
    pub end_coordinate: i64,
}

impl ArchiveFileQuery {
    #[inline]
    pub fn parse(query: Option<&str>) -> Result<Self> {
        let pairs = query_pairs(query);
        Ok(Self {
            destination_format: optional(&pairs, "destinationFormat")?
                .unwrap_or(EncryptionFormat::Plain),
            destination_key: optional(&pairs, "destinationKey")?,
            destination_iv: optional(&pairs, "destinationIV")?,
            start_coordinate: coordinate(&pairs, "startCoordinate")?.unwrap_or(0),
            end_coordinate: coordinate(&pairs, "endCoordinate")?.unwrap_or(0),
        })
    }

    /// Builds the engine request.
    #[inline]
    pub fn into_request(
        self,
        file_id: FileId,
        session_id: Option<String>,
    ) -> Result<TransferRequest, InvalidTransfer> {
        let (Ok(start), Ok(end)) = (
            u64::try_from(self.start_coordinate),
            u64::try_from(self.end_coordinate),
        ) else {
            return Err(InvalidTransfer::NegativeCoordinates {
                start: self.start_coordinate,
                end: self.end_coordinate,
            });
        };
        let destination_format = match self.destination_format {
            EncryptionFormat::Plain => DestinationFormat::Plain,
            EncryptionFormat::Aes(bits) => DestinationFormat::Aes(bits),
            other => return Err(InvalidTransfer::UnsupportedDestination(other)),
        };
        let mut request = TransferRequest::plain(file_id)
            .with_range(start, end)
            .with_destination(destination_format, self.destination_key, self.destination_iv);
        request.session_id = session_id;
        Ok(request)
    }
}

/// A well-formed [`ArchiveFileQuery`] that cannot be served.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum InvalidTransfer {
    #[display("negative coordinates {start}..{end}")]
    NegativeCoordinates { start: i64, end: i64 },
    #[display("`{_0}` is not supported as a destination format")]
    UnsupportedDestination(EncryptionFormat),
}

/// Parameters of [`Endpoint::ArchiveFileBytes`]: an inclusive range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRangeQuery {
    pub start: i64,
    pub end: i64,
}

impl ByteRangeQuery {
    #[inline]
    pub fn parse(query: Option<&str>) -> Result<Self> {
        let pairs = query_pairs(query);
        Ok(Self {
            start: coordinate(&pairs, "start")?.context("missing `start`")?,
            end: coordinate(&pairs, "end")?.context("missing `end`")?,
        })
    }
}
