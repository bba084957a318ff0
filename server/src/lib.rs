mod config;
mod handler;
mod logging;

pub use {
    config::Config,
    logging::{log_writer, setup_logger},
};

use {
    anyhow::{Context as _, Result},
    hyper_util::server::graceful::GracefulShutdown,
    rangecrypt_sdk::{
        TransferEngine,
        audit::TracingAuditSink,
        fetch::HttpFetcher,
        metadata::Catalog,
        server::serve_connection,
        signal::{drain, shutdown_signal},
    },
    std::{
        collections::HashSet,
        future::{Future, pending},
        pin::pin,
        sync::Arc,
    },
    tokio::net::TcpListener,
    tracing::{debug, info, warn},
};

#[derive(Clone)]
struct Context {
    engine: TransferEngine,
    access_tokens: Arc<HashSet<String>>,
}

impl Context {
    fn new(config: &Config) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config.fetch)?;
        let catalog = Catalog::new(config.catalog.iter().cloned());
        info!(files = catalog.len(), "catalog loaded");
        let engine = TransferEngine::new(
            &config.engine,
            Arc::new(catalog),
            Arc::new(fetcher),
            Arc::new(TracingAuditSink),
        )?;
        Ok(Self {
            engine,
            access_tokens: Arc::new(
                config
                    .access_tokens
                    .iter()
                    .map(|token| token.as_unmasked_str().to_owned())
                    .collect(),
            ),
        })
    }
}

/// Serves until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    serve(listener, &config, async {
        match shutdown_signal().await {
            Ok(signal) => info!(%signal, "shutting down"),
            Err(err) => {
                warn!(?err, "shutdown signals are unavailable");
                pending::<()>().await;
            }
        }
    })
    .await
}

/// Accepts connections on `listener` until `shutdown` resolves, then waits for
/// open transfers to finish.
pub async fn serve(
    listener: TcpListener,
    config: &Config,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let ctx = Context::new(config)?;
    info!(addr = %listener.local_addr()?, "listening");
    let connections = GracefulShutdown::new();
    let mut shutdown = pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection accepted");
                    let ctx = ctx.clone();
                    tokio::spawn(serve_connection(
                        stream,
                        move |request| handler::handle_request(ctx.clone(), request),
                        connections.watcher(),
                    ));
                }
                Err(err) => warn!(?err, "failed to accept"),
            },
        }
    }
    drop(listener);
    drain(connections, config.shutdown_grace).await;
    Ok(())
}
