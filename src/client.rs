use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::market::notify::{Notifier, TerminalNotifier};
use crate::market::pipeline::{Collaborators, Command, ConnectionManager, Inbox};
use crate::market::transport::{
    NoopObserver, PushConnector, ReferenceLookup, SpotSource, StreamObserver,
};
use crate::market::types::{ConnectionState, StreamSnapshot, StreamStatusSnapshot};
use crate::market::upstream::{HttpReferenceLookup, HttpSpotSource, WsPushConnector};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct ManagerHandle {
    cancellation_token: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

/// Handle to one live quote stream. Commands are queued to the manager task and applied
/// in call order.
pub struct QuoteStreamClient {
    inbox: mpsc::UnboundedSender<Inbox>,
    status: Arc<RwLock<StreamStatusSnapshot>>,
    sound_enabled: Arc<AtomicBool>,
    manager: ManagerHandle,
}

impl QuoteStreamClient {
    pub fn builder(config: StreamConfig) -> QuoteStreamClientBuilder {
        QuoteStreamClientBuilder::new(config)
    }

    pub fn connect(&self) -> Result<(), StreamError> {
        self.send(Command::Connect)
    }

    pub fn disconnect(&self) -> Result<(), StreamError> {
        self.send(Command::Disconnect)
    }

    pub fn pause(&self) -> Result<(), StreamError> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<(), StreamError> {
        self.send(Command::Resume)
    }

    pub fn clear_history(&self) -> Result<(), StreamError> {
        self.send(Command::ClearHistory)
    }

    pub async fn export_snapshot(&self) -> Result<StreamSnapshot, StreamError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        response.await.map_err(|_| StreamError::ClientClosed)
    }

    pub async fn export_snapshot_json(&self) -> Result<String, StreamError> {
        self.export_snapshot().await?.to_json()
    }

    /// Current state as seen by the manager after every previously queued command.
    pub async fn state(&self) -> Result<ConnectionState, StreamError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::State(reply))?;
        response.await.map_err(|_| StreamError::ClientClosed)
    }

    /// Last published status; may lag queued commands.
    pub fn status(&self) -> StreamStatusSnapshot {
        self.status.read().clone()
    }

    pub fn sound_enabled(&self) -> bool {
        self.sound_enabled.load(Ordering::Relaxed)
    }

    pub fn set_sound_enabled(&self, enabled: bool) {
        self.sound_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Stops the manager task and waits for it to release its transports.
    pub async fn shutdown(mut self) {
        self.manager.cancellation_token.cancel();
        if let Some(join_handle) = self.manager.join_handle.take() {
            let _ = join_handle.await;
        }
    }

    fn send(&self, command: Command) -> Result<(), StreamError> {
        self.inbox
            .send(Inbox::Command(command))
            .map_err(|_| StreamError::ClientClosed)
    }
}

impl Drop for QuoteStreamClient {
    fn drop(&mut self) {
        self.manager.cancellation_token.cancel();
    }
}

pub struct QuoteStreamClientBuilder {
    config: StreamConfig,
    push: Option<Arc<dyn PushConnector>>,
    spot: Option<Arc<dyn SpotSource>>,
    reference: Option<Arc<dyn ReferenceLookup>>,
    observer: Option<Arc<dyn StreamObserver>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl QuoteStreamClientBuilder {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            push: None,
            spot: None,
            reference: None,
            observer: None,
            notifier: None,
        }
    }

    pub fn push_connector(mut self, push: Arc<dyn PushConnector>) -> Self {
        self.push = Some(push);
        self
    }

    pub fn spot_source(mut self, spot: Arc<dyn SpotSource>) -> Self {
        self.spot = Some(spot);
        self
    }

    pub fn reference_lookup(mut self, reference: Arc<dyn ReferenceLookup>) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn StreamObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Spawns the manager on the current tokio runtime. Collaborators not supplied fall
    /// back to the WebSocket/HTTP implementations built from the config.
    pub fn build(self) -> Result<QuoteStreamClient, StreamError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|error| StreamError::Resource(format!("no async runtime: {error}")))?;

        let config = self.config;
        let push = self.push.unwrap_or_else(|| Arc::new(WsPushConnector));
        let spot: Arc<dyn SpotSource> = match self.spot {
            Some(spot) => spot,
            None => Arc::new(HttpSpotSource::new(
                config.pull_url.clone(),
                config.request_timeout,
            )?),
        };
        let reference: Option<Arc<dyn ReferenceLookup>> = match (self.reference, &config.reference_url)
        {
            (Some(reference), _) => Some(reference),
            (None, Some(url)) => Some(Arc::new(HttpReferenceLookup::new(
                url.clone(),
                config.request_timeout,
            )?)),
            (None, None) => None,
        };
        let observer = self.observer.unwrap_or_else(|| Arc::new(NoopObserver));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(TerminalNotifier));

        let status = Arc::new(RwLock::new(StreamStatusSnapshot::disconnected(
            config.asset.clone(),
            config.currency.clone(),
            Some("stream idle".to_string()),
        )));
        let sound_enabled = Arc::new(AtomicBool::new(config.sound_enabled));
        let cancellation_token = CancellationToken::new();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        let manager = {
            let _guard = runtime.enter();
            ConnectionManager::new(
                config,
                Collaborators {
                    push,
                    spot,
                    reference,
                    observer,
                    notifier,
                },
                inbox_tx.clone(),
                inbox_rx,
                Arc::clone(&status),
                Arc::clone(&sound_enabled),
                cancellation_token.clone(),
            )
        };
        let join_handle = runtime.spawn(manager.run());

        Ok(QuoteStreamClient {
            inbox: inbox_tx,
            status,
            sound_enabled,
            manager: ManagerHandle {
                cancellation_token,
                join_handle: Some(join_handle),
            },
        })
    }
}
