use {
    hyper::{
        Request, Response,
        body::{Body, Incoming},
        server::conn::http1,
        service::service_fn,
    },
    hyper_util::{rt::TokioIo, server::graceful::Watcher},
    std::{convert::Infallible, error::Error, future::Future, io},
    tokio::io::{AsyncRead, AsyncWrite},
    tracing::{debug, warn},
};

/// Serves HTTP/1 requests from one client connection.
///
/// The connection is watched by `shutdown` so that it is closed after its
/// current response once a graceful shutdown starts. Client disconnects are
/// logged at debug level only.
#[inline]
pub async fn serve_connection<C, H, Fut, B>(io: C, handler: H, shutdown: Watcher)
where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    H: Fn(Request<Incoming>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Response<B>, Infallible>> + Send + 'static,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Error + Send + Sync + 'static,
{
    let connection = http1::Builder::new()
        .keep_alive(true)
        .serve_connection(TokioIo::new(io), service_fn(handler));
    if let Err(err) = shutdown.watch(connection).await {
        if let Some(err) = err.source().and_then(|err| err.downcast_ref::<io::Error>()) {
            match err.kind() {
                io::ErrorKind::NotConnected
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::BrokenPipe => {
                    debug!(error = ?err, "client went away");
                }
                _ => warn!(error = ?err, "error while serving"),
            }
        } else if err.is_incomplete_message() || err.is_body_write_aborted() {
            debug!(error = ?err, "interrupted response");
        } else {
            warn!(error = ?err, "failed to serve HTTP");
        }
    }
}
