use {
    bytes::Bytes,
    std::{future::Future, io},
    tokio::sync::mpsc,
};

/// Destination of transferred bytes, typically an HTTP response body.
pub trait TransferSink: Send {
    fn send(&mut self, chunk: Bytes) -> impl Future<Output = io::Result<()>> + Send;

    /// Called once after the last chunk, whether or not the transfer succeeded.
    #[inline]
    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        async { Ok(()) }
    }
}

impl TransferSink for Vec<u8> {
    #[inline]
    async fn send(&mut self, chunk: Bytes) -> io::Result<()> {
        self.extend_from_slice(&chunk);
        Ok(())
    }
}

/// Feeds a streaming response body. Fails once the receiving side is gone.
impl TransferSink for mpsc::Sender<io::Result<Bytes>> {
    #[inline]
    async fn send(&mut self, chunk: Bytes) -> io::Result<()> {
        mpsc::Sender::send(self, Ok(chunk))
            .await
            .map_err(|_closed| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))
    }
}
