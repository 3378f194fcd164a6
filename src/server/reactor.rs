use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use super::dispatcher::{Dispatcher, Session};
use crate::proto::{write_frame, FrameError, FrameReader};

/// One reactor cooperatively drives its assigned connection subset on a
/// single task: new connections arrive on the intake channel, live ones
/// progress through the `FuturesUnordered`, and the stop signal ends the
/// loop promptly even while every connection is idle.
pub(super) async fn run(
    id: usize,
    mut intake: mpsc::Receiver<TcpStream>,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = FuturesUnordered::new();
    loop {
        tokio::select! {
            accepted = intake.recv() => match accepted {
                Some(stream) => connections.push(drive_connection(stream, Arc::clone(&dispatcher))),
                // Acceptor hung up; nothing more will arrive.
                None => break,
            },
            Some(()) = connections.next(), if !connections.is_empty() => {}
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!(reactor = id, open = connections.len(), "reactor stopped");
}

async fn drive_connection(stream: TcpStream, dispatcher: Arc<Dispatcher>) {
    let peer = stream.peer_addr().ok();
    match connection_loop(stream, &dispatcher).await {
        Ok(()) => tracing::debug!(?peer, "connection closed"),
        Err(err) => tracing::debug!(?peer, %err, "connection closed on protocol error"),
    }
}

/// Request/reply loop interleaved with the session's follow-event pushes.
/// Dispatch runs synchronously here; it is CPU/memory bound and holds no
/// lock across an await point.
async fn connection_loop(stream: TcpStream, dispatcher: &Dispatcher) -> Result<(), FrameError> {
    let (reader, mut writer) = stream.into_split();
    let mut frames = FrameReader::new(reader);
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let mut session = Session::new(event_tx);

    let result = loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Ok(Some(payload)) => {
                    let reply = dispatcher.handle(&mut session, &payload);
                    if let Err(err) = write_frame(&mut writer, &reply.encode()).await {
                        break Err(err);
                    }
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            },
            Some(event) = events.recv() => {
                if let Err(err) = write_frame(&mut writer, &event.encode()).await {
                    break Err(err);
                }
            }
        }
    };
    dispatcher.hangup(&mut session);
    result
}
