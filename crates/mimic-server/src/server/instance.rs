//! Accept loop for one running environment.

use super::signature::RoutingSignature;
use crate::pipeline::Pipeline;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

/// Live listener handle for one environment.
pub struct RunningInstance {
    local_addr: SocketAddr,
    signature: RoutingSignature,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl RunningInstance {
    /// Start serving `listener` through `pipeline`.
    pub fn spawn(
        listener: TcpListener,
        local_addr: SocketAddr,
        tls: Option<TlsAcceptor>,
        pipeline: Arc<Pipeline>,
        signature: RoutingSignature,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(accept_loop(listener, local_addr, tls, pipeline, shutdown_rx));
        Self {
            local_addr,
            signature,
            shutdown_tx,
            task,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Routing signature captured when the instance started.
    pub fn signature(&self) -> &RoutingSignature {
        &self.signature
    }

    /// Close the listener and every open connection, then wait for the
    /// accept loop to finish.
    pub async fn shutdown(self) {
        if self.shutdown_tx.send(()).is_err() {
            // the loop already exited; make sure it is gone
            self.task.abort();
        }
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                error!("Accept loop on {} ended abnormally: {}", self.local_addr, e);
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    local_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    pipeline: Arc<Pipeline>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        connections.spawn(serve_connection(
                            stream,
                            addr,
                            tls.clone(),
                            Arc::clone(&pipeline),
                        ));
                    }
                    Err(e) => {
                        error!("Accept error on {}: {}", local_addr, e);
                    }
                }
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown_rx.recv() => {
                info!("Listener on {} shutting down", local_addr);
                break;
            }
        }
    }

    // Keep-alive connections would otherwise outlive the listener.
    let open = connections.len();
    connections.shutdown().await;
    drop(listener);
    debug!("Closed listener on {} and {} open connection(s)", local_addr, open);
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    pipeline: Arc<Pipeline>,
) {
    let service = service_fn(move |req| {
        let pipeline = Arc::clone(&pipeline);
        async move { pipeline.handle(req, addr).await }
    });

    let result = match tls {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => {
                http1::Builder::new()
                    .serve_connection(TokioIo::new(tls_stream), service)
                    .await
            }
            Err(e) => {
                debug!("TLS handshake with {} failed: {}", addr, e);
                return;
            }
        },
        None => {
            http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
        }
    };

    if let Err(e) = result {
        debug!("Connection error from {}: {}", addr, e);
    }
}
