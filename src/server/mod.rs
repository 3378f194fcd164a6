//! Connection multiplexing: one acceptor owns the listener and shards
//! accepted connections round-robin across N reactors.

mod dispatcher;
mod reactor;

pub use dispatcher::{Dispatcher, Session};

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

// Accepted-but-unclaimed connections a reactor may queue before the
// acceptor backpressures.
const INTAKE_DEPTH: usize = 32;

pub struct Server {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    reactor_count: usize,
}

impl Server {
    pub async fn bind(
        addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
        reactor_count: usize,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            dispatcher,
            reactor_count: reactor_count.max(1),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until the stop signal flips. Dropping the intake senders on
    /// the way out lets every reactor drain and finish cleanly.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut intakes: Vec<mpsc::Sender<TcpStream>> = Vec::with_capacity(self.reactor_count);
        let mut reactors: Vec<JoinHandle<()>> = Vec::with_capacity(self.reactor_count);
        for id in 0..self.reactor_count {
            let (tx, rx) = mpsc::channel(INTAKE_DEPTH);
            intakes.push(tx);
            reactors.push(tokio::spawn(reactor::run(
                id,
                rx,
                Arc::clone(&self.dispatcher),
                shutdown.clone(),
            )));
        }

        let mut stop = shutdown;
        let mut next = 0usize;
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let slot = next % intakes.len();
                        next = next.wrapping_add(1);
                        tracing::debug!(%peer, reactor = slot, "connection accepted");
                        if intakes[slot].send(stream).await.is_err() {
                            tracing::error!(reactor = slot, "reactor intake closed; dropping connection");
                        }
                    }
                    Err(err) => tracing::warn!(%err, "failed to accept connection"),
                },
                _ = stop.changed() => break,
            }
        }

        tracing::info!("acceptor stopping");
        drop(intakes);
        for handle in reactors {
            if let Err(err) = handle.await {
                tracing::warn!(%err, "reactor task failed");
            }
        }
        Ok(())
    }
}
