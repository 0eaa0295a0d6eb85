use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::market::change::ChangeCalculator;
use crate::market::history::HistoryBuffer;
use crate::market::notify::{NotificationDispatcher, Notifier};
use crate::market::stats::StatsAggregator;
use crate::market::transport::{
    PushConnector, PushEvent, PushEventSink, PushHandle, ReferenceLookup, SpotSource,
    StreamObserver,
};
use crate::market::types::{
    parse_push_payload, ConnectionState, PriceUpdate, RawNumber, RawQuote, RawTimestamp,
    ReferencePrice, StreamSnapshot, StreamStatusSnapshot, TransportKind,
};
use crate::market::validator::Validator;
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reference lookups older than this many refresh periods no longer seed derivations.
const REFERENCE_TTL_PERIODS: u32 = 2;

#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect,
    Pause,
    Resume,
    ClearHistory,
    Snapshot(oneshot::Sender<StreamSnapshot>),
    State(oneshot::Sender<ConnectionState>),
}

/// Everything the manager reacts to arrives here, in order.
#[derive(Debug)]
pub(crate) enum Inbox {
    Command(Command),
    Push {
        generation: u64,
        event: PushEvent,
    },
    Pull {
        session: u64,
        result: Result<RawQuote, StreamError>,
    },
    Reference {
        session: u64,
        result: Result<Vec<ReferencePrice>, StreamError>,
    },
}

pub(crate) struct Collaborators {
    pub push: Arc<dyn PushConnector>,
    pub spot: Arc<dyn SpotSource>,
    pub reference: Option<Arc<dyn ReferenceLookup>>,
    pub observer: Arc<dyn StreamObserver>,
    pub notifier: Arc<dyn Notifier>,
}

/// Owns the transport state machine and every piece of mutable pipeline state. Runs as
/// a single task; the public client only talks to it through the inbox.
pub(crate) struct ConnectionManager {
    config: StreamConfig,
    push: Arc<dyn PushConnector>,
    spot: Arc<dyn SpotSource>,
    reference: Option<Arc<dyn ReferenceLookup>>,
    observer: Arc<dyn StreamObserver>,
    notifications: NotificationDispatcher,
    inbox_tx: mpsc::UnboundedSender<Inbox>,
    inbox: mpsc::UnboundedReceiver<Inbox>,
    state: ConnectionState,
    // Bumped whenever a connect negotiation starts or stops; tags pull and reference work.
    session: u64,
    // Bumped whenever a push transport is opened or torn down; tags push events.
    push_generation: u64,
    push_handle: Option<PushHandle>,
    connect_deadline: Option<Instant>,
    poll_timer: Option<Interval>,
    reference_timer: Option<Interval>,
    uptime_timer: Option<Interval>,
    validator: Validator,
    calculator: ChangeCalculator,
    history: HistoryBuffer,
    stats: StatsAggregator,
    reported_connected: bool,
    status_store: Arc<RwLock<StreamStatusSnapshot>>,
    cancel_token: CancellationToken,
}

impl ConnectionManager {
    pub(crate) fn new(
        config: StreamConfig,
        collaborators: Collaborators,
        inbox_tx: mpsc::UnboundedSender<Inbox>,
        inbox: mpsc::UnboundedReceiver<Inbox>,
        status_store: Arc<RwLock<StreamStatusSnapshot>>,
        sound_enabled: Arc<AtomicBool>,
        cancel_token: CancellationToken,
    ) -> Self {
        let notifications = NotificationDispatcher::spawn(
            collaborators.notifier,
            config.change_threshold_percent,
            config.notification_gap,
            sound_enabled,
            cancel_token.child_token(),
        );
        let reference_ttl = config.reference_refresh * REFERENCE_TTL_PERIODS;

        Self {
            validator: Validator::new(config.min_price),
            calculator: ChangeCalculator::new(reference_ttl),
            history: HistoryBuffer::with_capacity(config.history_capacity),
            stats: StatsAggregator::default(),
            config,
            push: collaborators.push,
            spot: collaborators.spot,
            reference: collaborators.reference,
            observer: collaborators.observer,
            notifications,
            inbox_tx,
            inbox,
            state: ConnectionState::Disconnected,
            session: 0,
            push_generation: 0,
            push_handle: None,
            connect_deadline: None,
            poll_timer: None,
            reference_timer: None,
            uptime_timer: None,
            reported_connected: false,
            status_store,
            cancel_token,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let connect_deadline = self.connect_deadline;
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                message = self.inbox.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
                _ = sleep_until_deadline(connect_deadline) => self.on_connect_timeout(),
                _ = next_tick(&mut self.poll_timer) => self.spawn_spot_fetch(),
                _ = next_tick(&mut self.reference_timer) => self.spawn_reference_lookup(),
                _ = next_tick(&mut self.uptime_timer) => self.stats.tick_uptime(Instant::now()),
            }
        }

        if self.state != ConnectionState::Disconnected {
            self.stop_session();
            self.set_state(ConnectionState::Disconnected, Some("client shut down".to_string()));
            self.report_connection(false);
        }
        debug!("connection manager stopped");
    }

    fn handle(&mut self, message: Inbox) {
        match message {
            Inbox::Command(command) => self.handle_command(command),
            Inbox::Push { generation, event } => self.on_push_event(generation, event),
            Inbox::Pull { session, result } => self.on_spot_result(session, result),
            Inbox::Reference { session, result } => self.on_reference_result(session, result),
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect => self.disconnect(),
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::ClearHistory => {
                self.history.clear();
                self.publish_status(None);
                debug!("history cleared");
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::State(reply) => {
                let _ = reply.send(self.state);
            }
        }
    }

    fn connect(&mut self) {
        if self.state.is_active() {
            debug!(state = self.state.as_str(), "connect ignored, negotiation already running");
            return;
        }
        self.begin_negotiation();
    }

    fn begin_negotiation(&mut self) {
        self.session = self.session.wrapping_add(1);
        self.set_state(
            ConnectionState::Connecting,
            Some("opening push transport".to_string()),
        );

        self.push_generation = self.push_generation.wrapping_add(1);
        let sink = PushEventSink::new(self.push_generation, self.inbox_tx.clone());
        match self.push.open(&self.config.push_url, sink) {
            Ok(handle) => {
                self.push_handle = Some(handle);
                self.connect_deadline = Some(Instant::now() + self.config.connect_timeout);
                if self.reference.is_some() {
                    self.reference_timer = Some(periodic(self.config.reference_refresh));
                    self.spawn_reference_lookup();
                }
            }
            Err(error) => {
                error!("failed to create push transport: {error}");
                self.observer.on_terminal_error(&error);
                self.stop_session();
                self.set_state(ConnectionState::Disconnected, Some(error.to_string()));
                self.report_connection(false);
            }
        }
    }

    fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            debug!("disconnect ignored, already disconnected");
            return;
        }
        self.stop_session();
        self.set_state(
            ConnectionState::Disconnected,
            Some("disconnected by caller".to_string()),
        );
        self.reported_connected = false;
        self.observer.on_connection_change(false);
    }

    fn pause(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::Paused
        ) {
            debug!(state = self.state.as_str(), "pause ignored");
            return;
        }
        self.stop_session();
        self.set_state(ConnectionState::Paused, Some("paused by caller".to_string()));
        self.report_connection(false);
    }

    fn resume(&mut self) {
        if self.state != ConnectionState::Paused {
            debug!(state = self.state.as_str(), "resume ignored, stream not paused");
            return;
        }
        self.stats.record_reconnect_attempt();
        self.begin_negotiation();
    }

    /// Cancels every timer and transport owned by the current session. Buffered data is
    /// kept.
    fn stop_session(&mut self) {
        self.session = self.session.wrapping_add(1);
        self.close_push();
        self.connect_deadline = None;
        self.poll_timer = None;
        self.reference_timer = None;
        self.uptime_timer = None;
        self.calculator.clear_reference_prices();
        self.stats.mark_disconnected();
    }

    fn close_push(&mut self) {
        if let Some(handle) = self.push_handle.take() {
            handle.close();
        }
        self.push_generation = self.push_generation.wrapping_add(1);
    }

    fn on_push_event(&mut self, generation: u64, event: PushEvent) {
        if generation != self.push_generation || self.push_handle.is_none() {
            debug!(generation, "discarding event from retired push transport");
            return;
        }

        match event {
            PushEvent::Open => {
                if self.state == ConnectionState::Connecting {
                    self.connect_deadline = None;
                    self.enter_connected(
                        ConnectionState::ConnectedPush,
                        "push transport open".to_string(),
                    );
                }
            }
            PushEvent::Message(mut payload) => {
                if self.state != ConnectionState::ConnectedPush {
                    debug!("push message before open ignored");
                    return;
                }
                match parse_push_payload(payload.as_mut_slice()) {
                    Ok(wire) => self.ingest(wire.into(), TransportKind::Push),
                    Err(error) => debug!("undecodable push payload dropped: {error}"),
                }
            }
            PushEvent::Error(reason) => {
                if matches!(
                    self.state,
                    ConnectionState::Connecting | ConnectionState::ConnectedPush
                ) {
                    self.fail_over(reason);
                }
            }
        }
    }

    fn on_connect_timeout(&mut self) {
        self.connect_deadline = None;
        if self.state == ConnectionState::Connecting {
            let reason = format!(
                "push transport did not open within {}ms",
                self.config.connect_timeout.as_millis()
            );
            self.fail_over(reason);
        }
    }

    /// Swaps the push transport for polling: one immediate fetch, then a fixed period.
    fn fail_over(&mut self, reason: String) {
        warn!(%reason, "push transport unavailable, falling back to polling");
        self.close_push();
        self.connect_deadline = None;
        self.stats.record_reconnect_attempt();
        self.enter_connected(ConnectionState::ConnectedPull, reason);
        self.poll_timer = Some(periodic(self.config.poll_interval));
        self.spawn_spot_fetch();
    }

    fn enter_connected(&mut self, state: ConnectionState, reason: String) {
        self.stats.mark_connected(Instant::now());
        if self.uptime_timer.is_none() {
            self.uptime_timer = Some(periodic(self.config.uptime_tick));
        }
        self.set_state(state, Some(reason));
        self.report_connection(true);
    }

    fn spawn_spot_fetch(&mut self) {
        if self.state != ConnectionState::ConnectedPull {
            return;
        }
        let spot = Arc::clone(&self.spot);
        let inbox = self.inbox_tx.clone();
        let session = self.session;
        tokio::spawn(async move {
            let result = spot.fetch_spot().await;
            let _ = inbox.send(Inbox::Pull { session, result });
        });
    }

    fn on_spot_result(&mut self, session: u64, result: Result<RawQuote, StreamError>) {
        if session != self.session || self.state != ConnectionState::ConnectedPull {
            debug!(session, "discarding spot result from a finished session");
            return;
        }
        match result {
            Ok(quote) => self.ingest(quote, TransportKind::Pull),
            Err(error) => warn!("spot poll failed, retrying next tick: {error}"),
        }
    }

    fn spawn_reference_lookup(&mut self) {
        let Some(reference) = self.reference.as_ref().map(Arc::clone) else {
            return;
        };
        let inbox = self.inbox_tx.clone();
        let session = self.session;
        let asset = self.config.asset.clone();
        let currency = self.config.currency.clone();
        tokio::spawn(async move {
            let result = reference.last_prices(&asset, &currency).await;
            let _ = inbox.send(Inbox::Reference { session, result });
        });
    }

    fn on_reference_result(
        &mut self,
        session: u64,
        result: Result<Vec<ReferencePrice>, StreamError>,
    ) {
        if session != self.session {
            debug!(session, "discarding reference prices from a finished session");
            return;
        }
        match result {
            Ok(prices) => {
                debug!(count = prices.len(), "reference prices refreshed");
                self.calculator.set_reference_prices(prices, Instant::now());
            }
            Err(error) => warn!("reference lookup failed: {error}"),
        }
    }

    /// validate → derive → buffer → notify → stats → observer.
    fn ingest(&mut self, quote: RawQuote, source: TransportKind) {
        let Some(price) = self.validator.validate(quote.price.as_ref()) else {
            debug!(?source, "sample rejected by validator");
            return;
        };

        let now = Utc::now();
        let derived = self.calculator.derive(
            price,
            finite(quote.change.as_ref()),
            finite(quote.change_percent.as_ref()),
            &self.history,
            Instant::now(),
        );

        let update = PriceUpdate {
            asset: non_empty(quote.asset).unwrap_or_else(|| self.config.asset.clone()),
            currency: non_empty(quote.currency).unwrap_or_else(|| self.config.currency.clone()),
            price,
            change: derived.change,
            change_percent: derived.change_percent,
            timestamp: quote
                .timestamp
                .as_ref()
                .and_then(RawTimestamp::to_datetime)
                .unwrap_or(now),
            source,
            volume: finite(quote.volume.as_ref()),
            high_24h: finite(quote.high_24h.as_ref()),
            low_24h: finite(quote.low_24h.as_ref()),
        };

        self.history.push(update.clone());
        self.calculator.record_accepted(price);
        self.notifications.maybe_notify(&update);
        self.stats.record_update(update.timestamp, now);
        self.observer.on_price_update(&update);
        self.publish_status(None);
    }

    fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            history: self.history.to_vec(),
            stats: self.stats.snapshot(),
            timestamp: Utc::now(),
        }
    }

    fn set_state(&mut self, state: ConnectionState, reason: Option<String>) {
        if self.state != state {
            info!(
                from = self.state.as_str(),
                to = state.as_str(),
                reason = reason.as_deref().unwrap_or(""),
                "stream state changed"
            );
        }
        self.state = state;
        self.publish_status(reason);
    }

    fn report_connection(&mut self, connected: bool) {
        if self.reported_connected == connected {
            return;
        }
        self.reported_connected = connected;
        self.observer.on_connection_change(connected);
    }

    fn publish_status(&self, reason: Option<String>) {
        let stats = self.stats.stats();
        let mut writable = self.status_store.write();
        let reason = reason.or_else(|| writable.reason.take());
        *writable = StreamStatusSnapshot {
            state: self.state,
            connected: self.state.is_connected(),
            asset: self.config.asset.clone(),
            currency: self.config.currency.clone(),
            last_price: self.history.latest().map(|update| update.price),
            messages_received: stats.messages_received,
            reconnect_attempts: stats.reconnect_attempts,
            latency_ms: stats.latency_ms,
            reason,
        };
    }
}

fn finite(raw: Option<&RawNumber>) -> Option<f64> {
    raw.and_then(RawNumber::as_finite)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_ascii_uppercase())
        .filter(|text| !text.is_empty())
}

fn periodic(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
