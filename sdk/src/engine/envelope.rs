use {
    crate::{content::FileHandle, error::TransferError, fetch::ByteStream},
    async_trait::async_trait,
    bytes::Bytes,
    futures::stream::BoxStream,
};

pub type PlaintextStream = BoxStream<'static, Result<Bytes, TransferError>>;

/// Decodes files stored in a forward-only envelope format such as GPG.
///
/// Such files can only be streamed from the beginning, so they are served as
/// whole files only.
#[async_trait]
pub trait EnvelopeDecoder: Send + Sync {
    async fn decode(
        &self,
        file: &FileHandle,
        stored: ByteStream,
    ) -> Result<PlaintextStream, TransferError>;
}
