//! Seams between the connection manager and the outside world: the push and pull
//! transports, the reference lookup and the observer that receives results.

use crate::error::StreamError;
use crate::market::pipeline::Inbox;
use crate::market::types::{PriceUpdate, RawQuote, ReferencePrice};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Open,
    Message(Vec<u8>),
    Error(String),
}

/// Where a push transport reports what happens to it. Each sink is bound to the push
/// generation it was created for; events from an older generation are discarded by the
/// manager.
#[derive(Debug, Clone)]
pub struct PushEventSink {
    generation: u64,
    inbox: mpsc::UnboundedSender<Inbox>,
}

impl PushEventSink {
    pub(crate) fn new(generation: u64, inbox: mpsc::UnboundedSender<Inbox>) -> Self {
        Self { generation, inbox }
    }

    /// Returns `false` once the manager has gone away.
    pub fn send(&self, event: PushEvent) -> bool {
        self.inbox
            .send(Inbox::Push {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn opened(&self) -> bool {
        self.send(PushEvent::Open)
    }

    pub fn message(&self, payload: impl Into<Vec<u8>>) -> bool {
        self.send(PushEvent::Message(payload.into()))
    }

    pub fn error(&self, reason: impl Into<String>) -> bool {
        self.send(PushEvent::Error(reason.into()))
    }
}

/// Owning handle of an open push transport. Closing or dropping it tells the transport
/// task to shut down.
#[derive(Debug)]
pub struct PushHandle {
    cancel_token: CancellationToken,
}

impl PushHandle {
    pub fn new(cancel_token: CancellationToken) -> Self {
        Self { cancel_token }
    }

    pub fn close(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for PushHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Opens push transports. `open` must not block: it allocates the transport and returns,
/// reporting `open`/`message`/`error` later through the sink. An `Err` means the
/// transport could not be created at all and is treated as terminal.
pub trait PushConnector: Send + Sync + 'static {
    fn open(&self, endpoint: &str, sink: PushEventSink) -> Result<PushHandle, StreamError>;
}

/// Request/response spot endpoint polled on a fixed period.
#[async_trait]
pub trait SpotSource: Send + Sync + 'static {
    async fn fetch_spot(&self) -> Result<RawQuote, StreamError>;
}

/// Infrequent "last prices" query, newest first.
#[async_trait]
pub trait ReferenceLookup: Send + Sync + 'static {
    async fn last_prices(
        &self,
        asset: &str,
        currency: &str,
    ) -> Result<Vec<ReferencePrice>, StreamError>;
}

/// Receives pipeline output. Called on the manager task; implementations must return
/// quickly.
pub trait StreamObserver: Send + Sync + 'static {
    fn on_price_update(&self, _update: &PriceUpdate) {}

    fn on_connection_change(&self, _connected: bool) {}

    /// Reported once per failed connect when a transport cannot be created.
    fn on_terminal_error(&self, _error: &StreamError) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl StreamObserver for NoopObserver {}
