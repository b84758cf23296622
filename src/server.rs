//! HTTP server and graceful shutdown.
//!
//! # Shutdown
//!
//! On SIGTERM (what an orchestrator sends before SIGKILL) or Ctrl-C the
//! server:
//! 1. stops calling `listener.accept()`, so no new connection is taken;
//! 2. lets every in-flight connection task run to completion;
//! 3. returns from [`Server::serve`], and `main` exits.
//!
//! Each in-flight request still gets its audit record. A request whose
//! connection is torn down before it answers is audited as abandoned
//! (status 499), through the drop guard in [`middleware`](crate::middleware).
//!
//! Give the process a termination grace period longer than the slowest
//! route (the demo `PUT /items/{item_id}` sleeps 2 s by default).

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::app::App;
use crate::error::Error;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Errors
    ///
    /// [`Error::Addr`] if `addr` is not a valid `host:port` string.
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let addr = addr.parse::<SocketAddr>().map_err(|source| Error::Addr { addr: addr.to_owned(), source })?;
        Ok(Self { addr })
    }

    /// Starts accepting connections and dispatching them through `app`.
    ///
    /// Returns only after a full graceful shutdown.
    pub async fn serve(self, app: App) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        // One app for every connection task; the routing table, pipeline
        // and sources are shared, never copied.
        let app = Arc::new(app);

        info!(addr = %self.addr, "reqscope listening");

        // Every connection task is tracked so shutdown can wait for all of
        // them.
        let mut tasks = tokio::task::JoinSet::new();

        // Polled once per loop iteration, so it must stay put in memory.
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // `biased` polls the arms top to bottom instead of at random.
                // Shutdown comes first so a signal stops accepts immediately,
                // even with connections still queued on the listener.
                biased;

                () = &mut shutdown => {
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
                    // Adapts tokio's AsyncRead/AsyncWrite to hyper's IO traits.
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection, not once
                        // per connection. Errors never reach hyper: every
                        // failure is already a response by the time
                        // `handle` returns.
                        let svc = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            async move {
                                Ok::<_, std::convert::Infallible>(app.handle(req).await.into_inner())
                            }
                        });

                        // HTTP/1.1 or HTTP/2, whichever the client speaks.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on a long-running server.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Drain: every in-flight connection finishes before we return.
        while tasks.join_next().await.is_some() {}

        info!("reqscope stopped");
        Ok(())
    }
}

/// Resolves on the first shutdown signal.
///
/// SIGTERM and SIGINT (Ctrl-C) on Unix, Ctrl-C only elsewhere. A handler
/// that cannot be installed is logged and its arm never fires, so the other
/// one still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    // Never resolves: the SIGTERM arm is disabled off Unix.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
