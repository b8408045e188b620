//! Viewer session controller.
//!
//! The viewer registers anonymously, opens a signaling connection to
//! `host-<sessionId>` and waits to be called. "Broadcaster not live yet" is
//! an expected condition and is retried quietly; any other registration
//! failure is surfaced. Once streaming, a lost signaling server is repaired
//! in place so the media call keeps running.
//!
//! Each connect attempt bumps a generation counter. Events and timers from
//! earlier attempts carry an older generation and are dropped.

use std::fmt;
use std::sync::Arc;

use oculus_common::{IceServer, OculusConfig, PeerIdentity, SessionId};
use oculus_peer::{
    forward_events, CallEvent, ConnectOptions, ConnectionEvent, DataConnection, FetchOutcome,
    IceFetcher, IncomingCall, MediaConnection, PeerConfig, PeerError, PeerEvent, PeerHandle,
    PeerTransport, RetryPolicy, ScheduledTask, Scheduler,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, ViewerError};
use crate::playback::Playback;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewState {
    Connecting,
    Waiting,
    Streaming,
    Disconnected,
    Error,
}

impl ViewState {
    /// Status line shown to the viewer.
    pub fn message(self) -> &'static str {
        match self {
            ViewState::Streaming => "Stream connected — watching live",
            ViewState::Waiting => "Waiting for broadcast to start…",
            ViewState::Connecting => "Establishing connection…",
            ViewState::Disconnected => "Stream has ended",
            ViewState::Error => "Connection failed",
        }
    }
}

impl fmt::Display for ViewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViewState::Connecting => "connecting",
            ViewState::Waiting => "waiting",
            ViewState::Streaming => "streaming",
            ViewState::Disconnected => "disconnected",
            ViewState::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum ViewerEvent {
    IceFetched {
        generation: u64,
        outcome: FetchOutcome,
    },
    Peer {
        generation: u64,
        event: PeerEvent,
    },
    Signaling {
        generation: u64,
        event: ConnectionEvent,
    },
    Call {
        generation: u64,
        event: CallEvent,
    },
    RetryDue {
        generation: u64,
    },
}

impl ViewerEvent {
    fn generation(&self) -> u64 {
        match self {
            ViewerEvent::IceFetched { generation, .. }
            | ViewerEvent::Peer { generation, .. }
            | ViewerEvent::Signaling { generation, .. }
            | ViewerEvent::Call { generation, .. }
            | ViewerEvent::RetryDue { generation } => *generation,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ViewerContext {
    pub transport: Arc<dyn PeerTransport>,
    pub ice: Arc<dyn IceFetcher>,
    pub scheduler: Arc<dyn Scheduler>,
    pub playback: Arc<dyn Playback>,
}

#[derive(Debug)]
pub struct ViewerSessionController {
    session_id: SessionId,
    host: PeerIdentity,
    config: OculusConfig,
    context: ViewerContext,
    retry_policy: RetryPolicy,
    state: ViewState,
    error: Option<String>,
    muted: bool,
    retry_count: u32,
    /// Consecutive scheduled retries since media last flowed.
    attempt: u32,
    generation: u64,
    peer: Option<Arc<dyn PeerHandle>>,
    data: Option<Arc<dyn DataConnection>>,
    call: Option<Arc<dyn MediaConnection>>,
    ice_cancel: Option<CancellationToken>,
    retry_timer: Option<ScheduledTask>,
    closed: bool,
    events_tx: mpsc::UnboundedSender<ViewerEvent>,
    events_rx: mpsc::UnboundedReceiver<ViewerEvent>,
}

impl ViewerSessionController {
    pub fn new(session_id: SessionId, config: OculusConfig, context: ViewerContext) -> Self {
        let retry_policy = RetryPolicy::Fixed(config.retry_delay());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            host: PeerIdentity::host(&session_id),
            session_id,
            config,
            context,
            retry_policy,
            state: ViewState::Connecting,
            error: None,
            muted: true,
            retry_count: 0,
            attempt: 0,
            generation: 0,
            peer: None,
            data: None,
            call: None,
            ice_cancel: None,
            retry_timer: None,
            closed: false,
            events_tx,
            events_rx,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn host(&self) -> &PeerIdentity {
        &self.host
    }

    pub fn state(&self) -> ViewState {
        self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_timer.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn call(&self) -> Option<&Arc<dyn MediaConnection>> {
        self.call.as_ref()
    }

    fn set_state(&mut self, state: ViewState) {
        if self.state != state {
            info!("viewer of {}: {} -> {}", self.session_id, self.state, state);
            self.state = state;
        }
    }

    /// Starts a fresh attempt: tears down the previous peer, fetches relay
    /// credentials and registers anonymously. Progress arrives as events.
    pub fn connect(&mut self) -> Result<()> {
        if self.closed {
            return Err(ViewerError::Closed);
        }
        self.teardown();

        self.generation += 1;
        let generation = self.generation;
        let cancel = CancellationToken::new();
        self.ice_cancel = Some(cancel.clone());

        debug!("connect attempt {} for {}", generation, self.host);
        let ice = self.context.ice.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let outcome = ice.fetch(&cancel).await;
            let _ = tx.send(ViewerEvent::IceFetched {
                generation,
                outcome,
            });
        });
        Ok(())
    }

    /// User-initiated retry: starts over from `Connecting`.
    pub fn retry(&mut self) -> Result<()> {
        if self.closed {
            return Err(ViewerError::Closed);
        }
        self.set_state(ViewState::Connecting);
        self.error = None;
        self.cancel_retry();
        self.retry_count += 1;
        self.connect()
    }

    /// Flips playback mute and returns the new setting.
    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        self.context.playback.set_muted(self.muted);
        self.muted
    }

    /// Releases the peer and any pending timer. The controller cannot be
    /// reconnected afterwards.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.teardown();
        debug!("viewer of {} closed", self.session_id);
    }

    fn teardown(&mut self) {
        self.cancel_retry();
        if let Some(cancel) = self.ice_cancel.take() {
            cancel.cancel();
        }
        self.data = None;
        self.call = None;
        if let Some(peer) = self.peer.take() {
            peer.destroy();
        }
    }

    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.cancel();
        }
    }

    /// Schedules the next full reconnect, replacing any pending one.
    fn schedule_retry(&mut self) {
        self.cancel_retry();
        let delay = self.retry_policy.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        let generation = self.generation;
        let tx = self.events_tx.clone();
        info!("retrying {} in {:?}", self.host, delay);
        self.retry_timer = Some(self.context.scheduler.schedule(
            delay,
            Box::new(move || {
                let _ = tx.send(ViewerEvent::RetryDue { generation });
            }),
        ));
    }

    pub async fn next_event(&mut self) -> Option<ViewerEvent> {
        self.events_rx.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<ViewerEvent> {
        self.events_rx.try_recv().ok()
    }

    pub async fn handle_event(&mut self, event: ViewerEvent) {
        if self.closed || event.generation() != self.generation {
            debug!("dropping event from attempt {}", event.generation());
            return;
        }
        match event {
            ViewerEvent::IceFetched { outcome, .. } => {
                self.ice_cancel = None;
                if let FetchOutcome::Servers(servers) = outcome {
                    self.register(servers).await;
                }
            }
            ViewerEvent::Peer { event, .. } => self.on_peer_event(event).await,
            ViewerEvent::Signaling { event, .. } => match event {
                ConnectionEvent::Open => debug!("signaling open to {}", self.host),
                ConnectionEvent::Data(data) => debug!("data from {}: {}", self.host, data),
                ConnectionEvent::Close => debug!("signaling to {} closed", self.host),
                ConnectionEvent::Error(e) => warn!("Data connection error: {}", e),
            },
            ViewerEvent::Call { event, .. } => self.on_call_event(event),
            ViewerEvent::RetryDue { .. } => {
                self.retry_timer = None;
                self.retry_count += 1;
                if let Err(e) = self.connect() {
                    debug!("retry skipped: {}", e);
                }
            }
        }
    }

    async fn register(&mut self, ice_servers: Vec<IceServer>) {
        let config = PeerConfig {
            ice_servers,
            ice_candidate_pool_size: self.config.ice_candidate_pool_size,
        };
        match self.context.transport.register(None, config).await {
            Ok(link) => {
                let generation = self.generation;
                self.peer = Some(link.handle);
                forward_events(link.events, self.events_tx.clone(), move |event| {
                    ViewerEvent::Peer { generation, event }
                });
            }
            Err(e) => self.on_peer_error(e),
        }
    }

    async fn on_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Open(id) => {
                debug!("registered as {}", id);
                self.set_state(ViewState::Waiting);
                self.open_signaling().await;
            }
            PeerEvent::Call(incoming) => self.answer(incoming).await,
            PeerEvent::Connection(link) => {
                debug!("closing unexpected connection from {}", link.connection.peer());
                link.connection.close();
            }
            PeerEvent::Error(e) => self.on_peer_error(e),
            PeerEvent::Disconnected => self.on_signaling_lost(),
            PeerEvent::Close => debug!("peer closed"),
        }
    }

    async fn open_signaling(&mut self) {
        let Some(peer) = self.peer.clone() else {
            return;
        };
        match peer
            .connect(&self.host, ConnectOptions { reliable: true })
            .await
        {
            Ok(link) => {
                let generation = self.generation;
                self.data = Some(link.connection);
                forward_events(link.events, self.events_tx.clone(), move |event| {
                    ViewerEvent::Signaling { generation, event }
                });
            }
            Err(e) => self.on_peer_error(e),
        }
    }

    async fn answer(&mut self, incoming: Box<dyn IncomingCall>) {
        debug!("incoming call from {}", incoming.peer());
        match incoming.answer(None).await {
            Ok(link) => {
                let generation = self.generation;
                self.call = Some(link.call);
                forward_events(link.events, self.events_tx.clone(), move |event| {
                    ViewerEvent::Call { generation, event }
                });
            }
            Err(e) => warn!("failed to answer call from {}: {}", self.host, e),
        }
    }

    fn on_call_event(&mut self, event: CallEvent) {
        match event {
            CallEvent::Stream(remote) => {
                if let Err(e) = self.context.playback.attach(remote, true) {
                    warn!("Autoplay failed: {}", e);
                }
                self.muted = true;
                self.attempt = 0;
                self.cancel_retry();
                self.set_state(ViewState::Streaming);
            }
            CallEvent::Close => self.end_stream(),
            CallEvent::Error(e) => {
                warn!("call from {} failed: {}", self.host, e);
                self.end_stream();
            }
        }
    }

    fn end_stream(&mut self) {
        self.call = None;
        self.context.playback.detach();
        self.set_state(ViewState::Disconnected);
    }

    fn on_peer_error(&mut self, error: PeerError) {
        if error.is_peer_unavailable() {
            debug!("{} is not live yet", self.host);
            self.set_state(ViewState::Waiting);
            self.schedule_retry();
        } else {
            error!("viewer of {} failed: {}", self.session_id, error);
            self.cancel_retry();
            self.error = Some(format!("Connection error: {}", error.message));
            self.set_state(ViewState::Error);
        }
    }

    /// Lost the signaling server. A live call survives this, so only the
    /// signaling link is repaired; without one there is nothing to keep and
    /// a full retry is scheduled instead.
    fn on_signaling_lost(&mut self) {
        match self.state {
            ViewState::Error => debug!("signaling lost after a fatal error; waiting for retry"),
            ViewState::Streaming => {
                let Some(peer) = self.peer.clone() else {
                    self.schedule_retry();
                    return;
                };
                warn!("signaling lost while streaming; reconnecting in place");
                if let Err(e) = peer.reconnect() {
                    warn!("in-place reconnect failed: {}", e);
                    self.schedule_retry();
                }
            }
            _ => self.schedule_retry(),
        }
    }
}
