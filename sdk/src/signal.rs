use {
    anyhow::{Context, Result},
    derive_more::Display,
    futures::{FutureExt, future::select},
    hyper_util::server::graceful::GracefulShutdown,
    std::{future::Future, pin::pin, time::Duration},
    tokio::signal::ctrl_c,
    tracing::{info, warn},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ShutdownSignal {
    #[display("SIGINT")]
    Sigint,
    #[display("SIGTERM")]
    Sigterm,
}

/// Resolves on the first SIGINT or SIGTERM.
#[inline]
pub async fn shutdown_signal() -> Result<ShutdownSignal> {
    let sigint = ctrl_c().map(|signal| {
        signal
            .map(|()| ShutdownSignal::Sigint)
            .context("failed to install sigint signal handler")
    });
    let sigint = pin!(sigint);
    let sigterm = sigterm()
        .context("failed to install sigterm signal handler")?
        .map(|()| Ok(ShutdownSignal::Sigterm));
    let sigterm = pin!(sigterm);
    let (signal, _unfired_signal) = select(sigint, sigterm).await.factor_first();
    signal
}

/// Waits for open connections to finish their current transfers, at most
/// `grace`. Returns `false` if some were still open when time ran out.
#[inline]
pub async fn drain(connections: GracefulShutdown, grace: Duration) -> bool {
    info!(?grace, "waiting for open connections");
    if tokio::time::timeout(grace, connections.shutdown())
        .await
        .is_ok()
    {
        true
    } else {
        warn!("connections still open after the grace period");
        false
    }
}

fn sigterm() -> Result<impl Future<Output = ()>> {
    #[cfg(target_family = "unix")]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        Ok(async move {
            sigterm.recv().await;
        })
    }

    #[cfg(not(target_family = "unix"))]
    Ok(std::future::pending())
}
