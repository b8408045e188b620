//! Broadcaster session controller.
//!
//! Owns the broadcaster's peer registration under `host-<sessionId>`, the
//! viewer registry and the outgoing stream composer. All state is mutated
//! from a single event loop: transport callbacks arrive as [`HostEvent`]s on
//! the controller's own channel and are applied one at a time through
//! [`BroadcasterSessionController::handle_event`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;
use oculus_common::{ControlMessage, IceServer, OculusConfig, PeerIdentity, SessionId};
use oculus_media::{OutgoingStreamComposer, QualityPreset, TrackKind, TrackRef};
use oculus_peer::{
    forward_events, CallEvent, ConnectionEvent, DataConnection, EncodingParameters, FetchOutcome,
    IceFetcher, PeerConfig, PeerEvent, PeerHandle, PeerTransport, Priority, RtpSender,
    ScheduledTask, Scheduler,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::control::ControlSink;
use crate::error::{HostError, Result};
use crate::registry::ViewerRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastState {
    Idle,
    Requesting,
    Live,
    Stopped,
    Error,
}

impl BroadcastState {
    /// Operator-facing label.
    pub fn label(self) -> &'static str {
        match self {
            BroadcastState::Idle => "Idle",
            BroadcastState::Requesting => "Requesting…",
            BroadcastState::Live => "LIVE",
            BroadcastState::Stopped => "Stopped",
            BroadcastState::Error => "Error",
        }
    }
}

impl fmt::Display for BroadcastState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BroadcastState::Idle => "idle",
            BroadcastState::Requesting => "requesting",
            BroadcastState::Live => "live",
            BroadcastState::Stopped => "stopped",
            BroadcastState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Everything that can happen to a broadcast, in delivery order.
#[derive(Debug)]
pub enum HostEvent {
    IceFetched {
        generation: u64,
        outcome: FetchOutcome,
    },
    Peer(PeerEvent),
    Signaling {
        link: u64,
        viewer_id: PeerIdentity,
        event: ConnectionEvent,
    },
    Call {
        viewer_id: PeerIdentity,
        call_id: String,
        event: CallEvent,
    },
    /// The post-negotiation settle delay elapsed.
    ReapplyBitrate,
    /// A capture source ended the given video track.
    CaptureEnded { track_id: String },
}

/// Outcomes of an event that the owner of the controller must act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostNotice {
    /// The host identity is registered; capture can start.
    PeerReady,
    /// The live video source ended; the broadcast should stop.
    CaptureEnded,
}

/// Per-call results of a track replacement fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceReport {
    pub replaced: usize,
    /// Calls without a sending leg of the track's kind.
    pub skipped: usize,
    pub failed: usize,
}

/// External collaborators of a broadcast.
#[derive(Debug, Clone)]
pub struct HostContext {
    pub transport: Arc<dyn PeerTransport>,
    pub ice: Arc<dyn IceFetcher>,
    pub scheduler: Arc<dyn Scheduler>,
    pub control: Arc<dyn ControlSink>,
}

#[derive(Debug)]
pub struct BroadcasterSessionController {
    session_id: SessionId,
    identity: PeerIdentity,
    config: OculusConfig,
    context: HostContext,
    state: BroadcastState,
    error: Option<String>,
    preset: QualityPreset,
    peer: Option<Arc<dyn PeerHandle>>,
    registry: ViewerRegistry,
    composer: OutgoingStreamComposer,
    /// Signaling connections that have not opened yet, keyed by link serial.
    connecting: HashMap<u64, Arc<dyn DataConnection>>,
    next_link: u64,
    generation: u64,
    ice_cancel: Option<CancellationToken>,
    bitrate_timer: Option<ScheduledTask>,
    stopped: bool,
    events_tx: mpsc::UnboundedSender<HostEvent>,
    events_rx: mpsc::UnboundedReceiver<HostEvent>,
}

impl BroadcasterSessionController {
    pub fn new(session_id: SessionId, config: OculusConfig, context: HostContext) -> Self {
        let preset = config.default_quality.parse().unwrap_or_else(|e| {
            warn!("{}; falling back to {}", e, QualityPreset::default());
            QualityPreset::default()
        });
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            identity: PeerIdentity::host(&session_id),
            session_id,
            config,
            context,
            state: BroadcastState::Idle,
            error: None,
            preset,
            peer: None,
            registry: ViewerRegistry::new(),
            composer: OutgoingStreamComposer::new(),
            connecting: HashMap::new(),
            next_link: 0,
            generation: 0,
            ice_cancel: None,
            bitrate_timer: None,
            stopped: false,
            events_tx,
            events_rx,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub fn share_url(&self) -> String {
        self.config.share_url(&self.session_id)
    }

    pub fn state(&self) -> BroadcastState {
        self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn preset(&self) -> QualityPreset {
        self.preset
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn is_registered(&self) -> bool {
        self.peer.is_some()
    }

    pub fn viewer_count(&self) -> usize {
        self.registry.viewer_count()
    }

    pub fn registry(&self) -> &ViewerRegistry {
        &self.registry
    }

    pub fn composer(&self) -> &OutgoingStreamComposer {
        &self.composer
    }

    pub(crate) fn composer_mut(&mut self) -> &mut OutgoingStreamComposer {
        &mut self.composer
    }

    pub(crate) fn set_preset(&mut self, preset: QualityPreset) {
        self.preset = preset;
    }

    pub(crate) fn set_state(&mut self, state: BroadcastState) {
        if self.state != state {
            info!("broadcast {}: {} -> {}", self.session_id, self.state, state);
            self.state = state;
        }
    }

    pub(crate) fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub(crate) fn clear_error(&mut self) {
        self.error = None;
    }

    /// Moves to `Error` unless the broadcast is already live or stopped.
    /// A live broadcast keeps running and only reports the failure.
    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        match self.state {
            BroadcastState::Live => {
                warn!("broadcast {} keeps running despite: {}", self.session_id, message);
                self.error = Some(message);
            }
            BroadcastState::Stopped => {
                debug!("ignoring failure after stop: {}", message);
            }
            _ => {
                error!("broadcast {} failed: {}", self.session_id, message);
                self.error = Some(message);
                self.set_state(BroadcastState::Error);
            }
        }
    }

    pub(crate) fn event_sender(&self) -> mpsc::UnboundedSender<HostEvent> {
        self.events_tx.clone()
    }

    /// Fetches relay credentials and then registers the host identity.
    ///
    /// Returns immediately; progress arrives as events. Calling `start`
    /// again while a registration is underway or done does nothing; after a
    /// failed registration it tries again.
    pub fn start(&mut self) -> Result<()> {
        if self.stopped {
            return Err(HostError::Stopped);
        }
        if self.peer.is_some() || self.ice_cancel.is_some() {
            debug!("broadcast {} already started", self.session_id);
            return Ok(());
        }
        if self.state == BroadcastState::Error {
            self.clear_error();
            self.set_state(BroadcastState::Idle);
        }

        self.generation += 1;
        let generation = self.generation;
        let cancel = CancellationToken::new();
        self.ice_cancel = Some(cancel.clone());

        info!("starting broadcast {} as {}", self.session_id, self.identity);
        let ice = self.context.ice.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let outcome = ice.fetch(&cancel).await;
            let _ = tx.send(HostEvent::IceFetched {
                generation,
                outcome,
            });
        });
        Ok(())
    }

    pub async fn next_event(&mut self) -> Option<HostEvent> {
        self.events_rx.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<HostEvent> {
        self.events_rx.try_recv().ok()
    }

    pub async fn handle_event(&mut self, event: HostEvent) -> Option<HostNotice> {
        match event {
            HostEvent::IceFetched {
                generation,
                outcome,
            } => {
                if generation != self.generation || self.stopped {
                    debug!("discarding stale ICE result (generation {})", generation);
                    return None;
                }
                self.ice_cancel = None;
                if let FetchOutcome::Servers(servers) = outcome {
                    self.register(servers).await;
                }
                None
            }
            HostEvent::Peer(event) => self.on_peer_event(event),
            HostEvent::Signaling {
                link,
                viewer_id,
                event,
            } => {
                self.on_signaling_event(link, viewer_id, event).await;
                None
            }
            HostEvent::Call {
                viewer_id,
                call_id,
                event,
            } => {
                self.on_call_event(&viewer_id, &call_id, event);
                None
            }
            HostEvent::ReapplyBitrate => {
                self.bitrate_timer = None;
                if !self.stopped {
                    self.apply_bitrate_cap(self.preset).await;
                }
                None
            }
            HostEvent::CaptureEnded { track_id } => {
                let current = self
                    .composer
                    .current()
                    .is_some_and(|stream| stream.video().id() == track_id);
                if current && !self.stopped {
                    info!("capture source ended track {}", track_id);
                    Some(HostNotice::CaptureEnded)
                } else {
                    debug!("ignoring end of superseded track {}", track_id);
                    None
                }
            }
        }
    }

    async fn register(&mut self, ice_servers: Vec<IceServer>) {
        let config = PeerConfig {
            ice_servers,
            ice_candidate_pool_size: self.config.ice_candidate_pool_size,
        };
        match self
            .context
            .transport
            .register(Some(self.identity.clone()), config)
            .await
        {
            Ok(link) => {
                debug!("registration requested for {}", self.identity);
                self.peer = Some(link.handle);
                forward_events(link.events, self.events_tx.clone(), HostEvent::Peer);
            }
            Err(e) => self.fail(format!("Connection error: {}", e.message)),
        }
    }

    fn on_peer_event(&mut self, event: PeerEvent) -> Option<HostNotice> {
        match event {
            PeerEvent::Open(id) => {
                info!("registered as {}", id);
                return Some(HostNotice::PeerReady);
            }
            PeerEvent::Connection(link) => {
                if self.stopped {
                    link.connection.close();
                    return None;
                }
                self.next_link += 1;
                let serial = self.next_link;
                let viewer_id = link.connection.peer().clone();
                debug!("signaling connection {} from {}", serial, viewer_id);
                self.connecting.insert(serial, link.connection);
                forward_events(link.events, self.events_tx.clone(), move |event| {
                    HostEvent::Signaling {
                        link: serial,
                        viewer_id: viewer_id.clone(),
                        event,
                    }
                });
            }
            PeerEvent::Call(call) => {
                debug!("ignoring inbound call from {}", call.peer());
            }
            PeerEvent::Disconnected => {
                warn!("{} lost the signaling server; reconnecting", self.identity);
                if let Some(peer) = &self.peer {
                    if let Err(e) = peer.reconnect() {
                        warn!("signaling reconnect failed: {}", e);
                    }
                }
            }
            PeerEvent::Error(e) if e.is_peer_unavailable() => {
                debug!("viewer went away before it could be reached: {}", e);
            }
            PeerEvent::Error(e) => self.fail(format!("Connection error: {}", e.message)),
            PeerEvent::Close => debug!("{} closed", self.identity),
        }
        None
    }

    async fn on_signaling_event(
        &mut self,
        link: u64,
        viewer_id: PeerIdentity,
        event: ConnectionEvent,
    ) {
        match event {
            ConnectionEvent::Open => {
                let Some(data) = self.connecting.remove(&link) else {
                    return;
                };
                if self.stopped {
                    data.close();
                    return;
                }
                self.registry.on_viewer_announced(viewer_id.clone(), link, data);
                if self.composer.current().is_some() {
                    if let Err(e) = self.call_viewer(&viewer_id).await {
                        warn!("failed to call viewer {}: {}", viewer_id, e);
                    }
                } else {
                    info!("viewer {} queued until the stream is ready", viewer_id);
                }
            }
            ConnectionEvent::Data(data) => {
                debug!("data from viewer {}: {}", viewer_id, data);
            }
            ConnectionEvent::Close | ConnectionEvent::Error(_) => {
                if let ConnectionEvent::Error(e) = &event {
                    warn!("signaling error from viewer {}: {}", viewer_id, e);
                }
                if let Some(data) = self.connecting.remove(&link) {
                    data.close();
                }
                if self.registry.on_signaling_closed(&viewer_id, link) {
                    info!(
                        "viewer {} left; {} watching",
                        viewer_id,
                        self.registry.viewer_count()
                    );
                }
            }
        }
    }

    fn on_call_event(&mut self, viewer_id: &PeerIdentity, call_id: &str, event: CallEvent) {
        match event {
            CallEvent::Stream(_) => {
                debug!("media flowing to {} on {}", viewer_id, call_id);
                self.schedule_bitrate_reapply();
            }
            CallEvent::Close | CallEvent::Error(_) => {
                if let CallEvent::Error(e) = &event {
                    warn!("call {} to {} failed: {}", call_id, viewer_id, e);
                }
                if self.registry.on_call_closed(viewer_id, call_id) {
                    info!(
                        "call to {} ended; {} watching",
                        viewer_id,
                        self.registry.viewer_count()
                    );
                }
            }
        }
    }

    /// Encoder parameters are only negotiable once media flows, so caps are
    /// re-applied after a short settle delay. Bursts collapse into one run.
    fn schedule_bitrate_reapply(&mut self) {
        if let Some(timer) = self.bitrate_timer.take() {
            timer.cancel();
        }
        let tx = self.events_tx.clone();
        self.bitrate_timer = Some(self.context.scheduler.schedule(
            self.config.bitrate_settle_delay(),
            Box::new(move || {
                let _ = tx.send(HostEvent::ReapplyBitrate);
            }),
        ));
    }

    /// Places the outgoing media call to an announced viewer.
    ///
    /// Viewers that already have a call are left alone.
    pub async fn call_viewer(&mut self, viewer_id: &PeerIdentity) -> Result<()> {
        if self.stopped {
            return Err(HostError::Stopped);
        }
        let stream = self.composer.current().cloned().ok_or(HostError::NoStream)?;
        if !self.registry.contains(viewer_id) {
            return Err(HostError::UnknownViewer(viewer_id.to_string()));
        }
        if !self.registry.needs_call(viewer_id) {
            debug!("viewer {} already has a call", viewer_id);
            return Ok(());
        }
        let peer = self.peer.clone().ok_or(HostError::NotStarted)?;

        let link = peer.call(viewer_id, &stream).await?;
        let call_id = link.call.id().to_string();
        self.registry.attach_call(viewer_id, link.call)?;

        let tagged_viewer = viewer_id.clone();
        let tagged_call = call_id.clone();
        forward_events(link.events, self.events_tx.clone(), move |event| {
            HostEvent::Call {
                viewer_id: tagged_viewer.clone(),
                call_id: tagged_call.clone(),
                event,
            }
        });

        info!(
            "calling viewer {} ({}); {} watching",
            viewer_id,
            call_id,
            self.registry.viewer_count()
        );
        Ok(())
    }

    /// Calls every viewer that announced itself before a stream was ready.
    pub async fn call_pending_viewers(&mut self) -> usize {
        let mut called = 0;
        for viewer_id in self.registry.pending_viewers() {
            match self.call_viewer(&viewer_id).await {
                Ok(()) => called += 1,
                Err(e) => warn!("failed to call queued viewer {}: {}", viewer_id, e),
            }
        }
        called
    }

    /// Caps the video bitrate on every active call.
    ///
    /// Best effort: legs that reject runtime parameter changes are skipped.
    /// Returns how many legs accepted the cap.
    pub async fn apply_bitrate_cap(&self, preset: QualityPreset) -> usize {
        let senders: Vec<Arc<dyn RtpSender>> = self
            .registry
            .calls()
            .iter()
            .flat_map(|call| call.senders())
            .filter(|sender| sender.kind() == Some(TrackKind::Video))
            .collect();
        let max_bitrate = preset.max_bitrate_bps();

        let results = join_all(senders.iter().map(|sender| async move {
            let mut parameters = sender.parameters();
            if parameters.encodings.is_empty() {
                parameters.encodings.push(EncodingParameters::default());
            }
            for encoding in &mut parameters.encodings {
                encoding.max_bitrate_bps = Some(max_bitrate);
                encoding.scale_resolution_down_by = Some(1.0);
                encoding.priority = Some(Priority::High);
                encoding.network_priority = Some(Priority::High);
            }
            sender.set_parameters(parameters).await
        }))
        .await;

        let mut applied = 0;
        for result in results {
            match result {
                Ok(()) => applied += 1,
                Err(e) => debug!("bitrate cap not applied: {}", e),
            }
        }
        debug!(
            "{} bitrate cap ({} bps) applied to {}/{} video legs",
            preset,
            max_bitrate,
            applied,
            senders.len()
        );
        applied
    }

    /// Swaps `track` into the matching leg of every active call without
    /// renegotiating. Calls are updated concurrently and fail independently.
    pub async fn replace_track(&self, track: &TrackRef) -> ReplaceReport {
        let kind = track.kind();
        let calls = self.registry.calls();

        let results = join_all(calls.iter().map(|call| {
            let track = track.clone();
            async move {
                let sender = call
                    .senders()
                    .into_iter()
                    .find(|sender| sender.kind() == Some(kind));
                match sender {
                    Some(sender) => sender.replace_track(track).await.map(|()| true),
                    None => Ok(false),
                }
            }
        }))
        .await;

        let mut report = ReplaceReport::default();
        for (call, result) in calls.iter().zip(results) {
            match result {
                Ok(true) => report.replaced += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!("replacing {} track on {} failed: {}", kind, call.id(), e);
                    report.failed += 1;
                }
            }
        }
        debug!("replaced {} track {}: {:?}", kind, track.id(), report);
        report
    }

    /// Tears the broadcast down: every viewer connection, the host
    /// registration and the composed stream. Returns `false` if the
    /// broadcast was already stopped.
    pub fn stop(&mut self) -> bool {
        if self.stopped {
            debug!("broadcast {} already stopped", self.session_id);
            return false;
        }
        self.stopped = true;

        if let Some(cancel) = self.ice_cancel.take() {
            cancel.cancel();
        }
        if let Some(timer) = self.bitrate_timer.take() {
            timer.cancel();
        }
        for (_, data) in self.connecting.drain() {
            data.close();
        }
        let removed = self.registry.clear();
        self.composer.clear();
        if let Some(peer) = self.peer.take() {
            peer.destroy();
        }

        self.set_state(BroadcastState::Stopped);
        self.context.control.notify(ControlMessage::STOP_BROADCAST);
        info!(
            "broadcast {} stopped; disconnected {} viewers",
            self.session_id, removed
        );
        true
    }
}
