//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()`, so no new connections are made.
//! 2. Asking every open connection to close: idle HTTP/1.1 keep-alive
//!    connections close at once, busy ones after their in-flight request,
//!    and HTTP/2 clients receive GOAWAY.
//! 3. Waiting for every connection task to finish.
//! 4. Running the application's shutdown hooks.
//! 5. Returning from [`Server::serve`], which lets `main` exit cleanly.
//!
//! Set `terminationGracePeriodSeconds` in your pod spec to a value longer
//! than your slowest request. 30 s is a reasonable default for most APIs.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::app::Application;
use crate::error::Error;
use crate::request::PeerAddr;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use keev::Server;
    /// let server = Server::bind("0.0.0.0:3000")?;
    /// # Ok::<(), keev::Error>(())
    /// ```
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let parsed = addr
            .parse()
            .map_err(|e| Error::Configuration(format!("invalid socket address `{addr}`: {e}")))?;
        Ok(Self { addr: parsed })
    }

    /// Serves `app` until SIGTERM or Ctrl-C.
    ///
    /// Returns only after a full graceful shutdown: in-flight requests have
    /// completed and the shutdown hooks have run.
    pub async fn serve(self, app: Application) -> Result<(), Error> {
        self.serve_with_shutdown(app, shutdown_signal()).await
    }

    /// Like [`serve`](Server::serve), with `signal` as the shutdown trigger.
    pub async fn serve_with_shutdown(
        self,
        app: Application,
        signal: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        serve_listener(listener, app, signal).await
    }
}

/// Serves `app` on an already-bound listener until `signal` resolves.
///
/// Runs [`Application::startup`] before the first accept and
/// [`Application::shutdown`] after the last connection has drained.
pub async fn serve_listener(
    listener: TcpListener,
    app: Application,
    signal: impl Future<Output = ()>,
) -> Result<(), Error> {
    // Shared across concurrent connection tasks without copying the routing
    // table.
    let app = Arc::new(app);
    app.startup().await?;

    let addr = listener.local_addr()?;
    info!(%addr, "keev listening");

    // HTTP/1.1 and HTTP/2, whatever the client negotiates.
    let conn_builder = ConnBuilder::new(TokioExecutor::new());

    // Every connection is watched so shutdown can tell it to wind down,
    // and tracked in the JoinSet so we can wait for it to finish.
    let graceful = GracefulShutdown::new();
    let mut tasks = tokio::task::JoinSet::new();

    tokio::pin!(signal);

    loop {
        tokio::select! {
            // Check shutdown first so a signal immediately stops accepting
            // new connections, even if more are queued.
            biased;

            () = &mut signal => {
                info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let app = Arc::clone(&app);

                // Called once per request on the connection, not once per
                // connection.
                let svc = service_fn(move |mut req: hyper::Request<Incoming>| {
                    let app = Arc::clone(&app);
                    req.extensions_mut().insert(PeerAddr(remote_addr));
                    async move { Ok::<_, Infallible>(app.handle(req).await) }
                });

                let conn = conn_builder.serve_connection(TokioIo::new(stream), svc);
                let conn = graceful.watch(conn.into_owned());

                tasks.spawn(async move {
                    if let Err(e) = conn.await {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                });
            }

            // Reap finished connection tasks so the JoinSet does not grow
            // without bound on long-running servers.
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    // Drain: close idle connections, let in-flight requests complete.
    graceful.shutdown().await;
    while tasks.join_next().await.is_some() {}

    app.shutdown().await;
    info!("keev stopped");
    Ok(())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available. A handler that cannot be installed
/// is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_rejects_invalid_addresses() {
        assert!(Server::bind("127.0.0.1:0").is_ok());
        assert!(matches!(Server::bind("localhost"), Err(Error::Configuration(_))));
        assert!(matches!(Server::bind("1.2.3.4:99999"), Err(Error::Configuration(_))));
    }
}
