//! Server lifecycle
//!
//! `Server::bind` claims the listening socket and records the start instant
//! reported as uptime. `serve_with_shutdown` runs the accept loop on a
//! background task and waits on a single-slot completion channel. When the
//! shutdown signal fires, or [`Shutdown::trigger`] is called, the loop stops
//! accepting, every in-flight stream is told to finish, and the server
//! returns once all connection tasks have drained.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::VERSION;
use crate::broker::Broker;
use crate::config::Settings;
use crate::transport::gate::Gate;
use crate::transport::websocket::handle_connection;
use crate::utils::error::{Error, Result};

/// State shared by every connection handler.
#[derive(Debug)]
pub(crate) struct Context {
    pub broker: Arc<Broker>,
    pub gate: Gate,
    pub started: Instant,
    pub shutdown: watch::Receiver<bool>,
}

/// Resolves once shutdown has been requested.
pub(crate) async fn stopping(shutdown: &mut watch::Receiver<bool>) {
    let requested = shutdown.wait_for(|stopping| *stopping).await.is_ok();
    if !requested {
        // sender gone without a request: nothing will ever stop us
        std::future::pending::<()>().await;
    }
}

/// Handle used to request a graceful stop. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    sender: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Request a graceful stop. Only the first call has any effect; it returns
    /// `true`, later calls return `false`.
    pub fn trigger(&self) -> bool {
        if self.sender.send_replace(true) {
            debug!("shutdown already in progress");
            false
        } else {
            info!("gracefully shutting down");
            true
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    context: Arc<Context>,
    shutdown: Shutdown,
}

impl Server {
    /// Bind `settings.bind_addr` and prepare a fresh broker.
    pub async fn bind(settings: &Settings) -> Result<Self> {
        let listener = TcpListener::bind(&settings.bind_addr).await.map_err(|e| {
            error!(addr = %settings.bind_addr, error = %e, "could not listen");
            Error::Io(e)
        })?;
        let local_addr = listener.local_addr()?;

        let shutdown = Shutdown::new();
        let broker = Arc::new(Broker::with_mailbox(
            settings.mailbox_capacity,
            settings.backpressure,
        ));
        let context = Arc::new(Context {
            broker,
            gate: Gate::new(settings.maintenance),
            started: Instant::now(),
            shutdown: shutdown.subscribe(),
        });

        Ok(Self {
            listener,
            local_addr,
            context,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn broker(&self) -> Arc<Broker> {
        self.context.broker.clone()
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Serve until interrupted with Ctrl-C.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "could not listen for interrupt signal");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve until `signal` resolves or the shutdown handle is triggered,
    /// then drain in-flight connections.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Server {
            listener,
            local_addr,
            context,
            shutdown,
        } = self;

        if context.gate.maintenance() {
            warn!("starting server in maintenance mode");
        }

        let trigger = shutdown.clone();
        let watcher = tokio::spawn(async move {
            signal.await;
            trigger.trigger();
        });

        let (done_tx, done_rx) = oneshot::channel();
        let stop = shutdown.subscribe();
        tokio::spawn(async move {
            let _ = done_tx.send(run(listener, context, stop).await);
        });

        info!(listen = %local_addr, version = VERSION, "switchback server started");

        let result = done_rx.await.map_err(|_| Error::ServerExited);
        watcher.abort();
        result?
    }
}

async fn run(
    listener: TcpListener,
    context: Arc<Context>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "connection accepted");
                    connections.spawn(handle_connection(stream, peer, context.clone()));
                }
                Err(e) => warn!(error = %e, "could not accept connection"),
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => reap(joined),
            _ = stopping(&mut shutdown) => break,
        }
    }

    drop(listener);
    info!(connections = connections.len(), "draining in-flight connections");
    while let Some(joined) = connections.join_next().await {
        reap(joined);
    }
    info!("switchback server stopped");
    Ok(())
}

fn reap(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "connection task failed");
    }
}
