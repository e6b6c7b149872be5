//! Stream splitting — one SSE line source, client and observer branches.
//!
//! DESIGN
//! ======
//! `tee` forwards lines as they arrive. The client branch is a bounded
//! channel with backpressure; the observer branch is unbounded so the
//! persistence collector can never stall the client. When the client
//! disconnects, forwarding stops and the source is dropped, which cancels
//! the upstream model read; the observer branch then ends and the collector
//! finalizes whatever it saw.
//!
//! `buffer` drains the source completely before either branch yields
//! anything. Same observable content, different latency profile; useful
//! when a proxy in front cannot handle incremental bodies.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};

pub const CLIENT_CHANNEL_CAPACITY: usize = 32;

/// How to share the response stream with the persistence collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitMode {
    #[default]
    Tee,
    Buffer,
}

impl std::str::FromStr for SplitMode {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "tee" => Ok(Self::Tee),
            "buffer" => Ok(Self::Buffer),
            _ => Err(()),
        }
    }
}

pub type LineStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// The two branches of a split stream.
pub struct SplitStreams {
    pub client: LineStream,
    pub observer: LineStream,
}

/// Split one line stream into client and observer branches.
///
/// In buffer mode this awaits the entire source first.
pub async fn split(source: LineStream, mode: SplitMode) -> SplitStreams {
    match mode {
        SplitMode::Tee => tee(source),
        SplitMode::Buffer => buffer(source).await,
    }
}

fn tee(mut source: LineStream) -> SplitStreams {
    let (client_tx, client_rx) = mpsc::channel::<String>(CLIENT_CHANNEL_CAPACITY);
    let (observer_tx, observer_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        while let Some(line) = source.next().await {
            // Observer first: it never blocks, and it must see lines the
            // client branch may drop on disconnect.
            let _ = observer_tx.send(line.clone());
            if client_tx.send(line).await.is_err() {
                // Client gone. Stop pulling so the source is dropped and the
                // upstream read is cancelled.
                break;
            }
        }
    });

    SplitStreams {
        client: Box::pin(ReceiverStream::new(client_rx)),
        observer: Box::pin(UnboundedReceiverStream::new(observer_rx)),
    }
}

async fn buffer(mut source: LineStream) -> SplitStreams {
    let mut lines = Vec::new();
    while let Some(line) = source.next().await {
        lines.push(line);
    }
    SplitStreams {
        client: Box::pin(futures::stream::iter(lines.clone())),
        observer: Box::pin(futures::stream::iter(lines)),
    }
}

#[cfg(test)]
#[path = "split_test.rs"]
mod tests;
