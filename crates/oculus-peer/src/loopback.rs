//! In-memory peer transport.
//!
//! Every registered peer lives on a shared switchboard keyed by identity.
//! Data connections and calls are pairs of channel ends wired directly to
//! each other, so the whole broadcaster/viewer protocol runs inside one
//! process. Faults can be injected to exercise the recovery paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use oculus_common::PeerIdentity;
use oculus_media::{OutgoingStream, TrackKind, TrackRef};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PeerError, PeerErrorKind, SenderError};
use crate::transport::{
    CallEvent, CallLink, ConnectOptions, ConnectionEvent, DataConnection, DataLink,
    EncodingParameters, IncomingCall, MediaConnection, PeerConfig, PeerEvent, PeerHandle,
    PeerLink, PeerTransport, RemoteStream, RtpSender, SendParameters,
};

#[derive(Debug, Default)]
struct Faults {
    fail_reconnect: AtomicBool,
    reject_parameters: AtomicBool,
    next_registration: Mutex<Option<PeerErrorKind>>,
}

#[derive(Debug)]
struct Slot {
    serial: u64,
    events: mpsc::UnboundedSender<PeerEvent>,
    disconnected: Arc<AtomicBool>,
    data: Vec<Arc<LoopbackData>>,
    calls: Vec<Arc<LoopbackCall>>,
}

#[derive(Debug, Default)]
struct Switchboard {
    peers: HashMap<String, Slot>,
    next_serial: u64,
    next_call: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    board: Arc<Mutex<Switchboard>>,
    faults: Arc<Faults>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn board(&self) -> std::sync::MutexGuard<'_, Switchboard> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.board().peers.contains_key(id)
    }

    pub fn peer_count(&self) -> usize {
        self.board().peers.len()
    }

    /// Drops `id`'s link to the signaling server. Established connections
    /// keep working.
    pub fn disconnect(&self, id: &str) -> bool {
        let board = self.board();
        match board.peers.get(id) {
            Some(slot) => {
                slot.disconnected.store(true, Ordering::Release);
                let _ = slot.events.send(PeerEvent::Disconnected);
                info!("loopback: {} disconnected from signaling", id);
                true
            }
            None => false,
        }
    }

    /// Delivers `error` on `id`'s peer event channel.
    pub fn emit_error(&self, id: &str, error: PeerError) -> bool {
        match self.board().peers.get(id) {
            Some(slot) => slot.events.send(PeerEvent::Error(error)).is_ok(),
            None => false,
        }
    }

    /// Removes `id` as if its process died: every connection it holds closes
    /// and no close event reaches the peer itself.
    pub fn drop_peer(&self, id: &str) -> bool {
        let slot = self.board().peers.remove(id);
        match slot {
            Some(slot) => {
                close_links(&slot);
                info!("loopback: {} dropped", id);
                true
            }
            None => false,
        }
    }

    pub fn fail_reconnect(&self, fail: bool) {
        self.faults.fail_reconnect.store(fail, Ordering::Release);
    }

    /// Makes every sender reject `set_parameters`.
    pub fn reject_parameters(&self, reject: bool) {
        self.faults.reject_parameters.store(reject, Ordering::Release);
    }

    /// The next `register` call fails with `kind`.
    pub fn fail_next_registration(&self, kind: PeerErrorKind) {
        *self
            .faults
            .next_registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(kind);
    }

    fn take_registration_fault(&self) -> Option<PeerErrorKind> {
        self.faults
            .next_registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

fn close_links(slot: &Slot) {
    for data in &slot.data {
        data.close();
    }
    for call in &slot.calls {
        call.close();
    }
}

#[async_trait]
impl PeerTransport for LoopbackNetwork {
    async fn register(
        &self,
        identity: Option<PeerIdentity>,
        config: PeerConfig,
    ) -> Result<PeerLink, PeerError> {
        if let Some(kind) = self.take_registration_fault() {
            return Err(PeerError::new(kind, "injected registration failure"));
        }

        let id = identity.unwrap_or_else(|| PeerIdentity::anonymous(Uuid::new_v4().to_string()));
        let (tx, rx) = mpsc::unbounded_channel();
        let disconnected = Arc::new(AtomicBool::new(false));

        let serial = {
            let mut board = self.board();
            if board.peers.contains_key(id.as_str()) {
                return Err(PeerError::new(
                    PeerErrorKind::UnavailableId,
                    format!("ID \"{id}\" is taken"),
                ));
            }
            board.next_serial += 1;
            let serial = board.next_serial;
            board.peers.insert(
                id.as_str().to_string(),
                Slot {
                    serial,
                    events: tx.clone(),
                    disconnected: disconnected.clone(),
                    data: Vec::new(),
                    calls: Vec::new(),
                },
            );
            serial
        };

        debug!(
            "loopback: registered {} ({} ICE servers, pool {})",
            id,
            config.ice_servers.len(),
            config.ice_candidate_pool_size
        );
        let _ = tx.send(PeerEvent::Open(id.as_str().to_string()));

        Ok(PeerLink {
            handle: Arc::new(LoopbackPeer {
                id,
                serial,
                network: self.clone(),
                events: tx,
                disconnected,
                destroyed: AtomicBool::new(false),
            }),
            events: rx,
        })
    }
}

#[derive(Debug)]
struct LoopbackPeer {
    id: PeerIdentity,
    serial: u64,
    network: LoopbackNetwork,
    events: mpsc::UnboundedSender<PeerEvent>,
    disconnected: Arc<AtomicBool>,
    destroyed: AtomicBool,
}

impl LoopbackPeer {
    fn ensure_signaling(&self) -> Result<(), PeerError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(PeerError::new(
                PeerErrorKind::Disconnected,
                "peer has been destroyed",
            ));
        }
        if self.disconnected.load(Ordering::Acquire) {
            return Err(PeerError::new(
                PeerErrorKind::Disconnected,
                "Cannot connect to new Peer after disconnecting from server.",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerHandle for LoopbackPeer {
    fn id(&self) -> &PeerIdentity {
        &self.id
    }

    async fn connect(
        &self,
        target: &PeerIdentity,
        options: ConnectOptions,
    ) -> Result<DataLink, PeerError> {
        self.ensure_signaling()?;

        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let pipe = Arc::new(Pipe {
            open: AtomicBool::new(true),
            ends: [local_tx, remote_tx],
        });
        let local = Arc::new(LoopbackData {
            pipe: pipe.clone(),
            side: 0,
            peer: target.clone(),
        });
        let remote = Arc::new(LoopbackData {
            pipe: pipe.clone(),
            side: 1,
            peer: self.id.clone(),
        });

        {
            let mut board = self.network.board();
            let target_slot = match board.peers.get_mut(target.as_str()) {
                Some(slot) if !slot.disconnected.load(Ordering::Acquire) => slot,
                _ => return Err(PeerError::peer_unavailable(target.as_str())),
            };
            target_slot.data.push(remote.clone());
            let _ = target_slot.events.send(PeerEvent::Connection(DataLink {
                connection: remote,
                events: remote_rx,
            }));
            if let Some(own) = board.peers.get_mut(self.id.as_str()) {
                own.data.push(local.clone());
            }
        }

        debug!(
            "loopback: data connection {} -> {} (reliable={})",
            self.id, target, options.reliable
        );
        for end in &pipe.ends {
            let _ = end.send(ConnectionEvent::Open);
        }

        Ok(DataLink {
            connection: local,
            events: local_rx,
        })
    }

    async fn call(
        &self,
        target: &PeerIdentity,
        stream: &OutgoingStream,
    ) -> Result<CallLink, PeerError> {
        self.ensure_signaling()?;

        let (caller_tx, caller_rx) = mpsc::unbounded_channel();
        let (callee_tx, callee_rx) = mpsc::unbounded_channel();

        let mut board = self.network.board();
        board.next_call += 1;
        let shared = Arc::new(CallShared {
            id: format!("mc_{}", board.next_call),
            open: AtomicBool::new(true),
            ends: [caller_tx, callee_tx],
        });
        let caller = Arc::new(LoopbackCall {
            shared: shared.clone(),
            side: 0,
            peer: target.clone(),
            senders: senders_for(Some(stream), &shared, &self.network.faults),
        });

        let target_slot = match board.peers.get_mut(target.as_str()) {
            Some(slot) if !slot.disconnected.load(Ordering::Acquire) => slot,
            _ => return Err(PeerError::peer_unavailable(target.as_str())),
        };
        let _ = target_slot.events.send(PeerEvent::Call(Box::new(LoopbackIncoming {
            shared: shared.clone(),
            caller: self.id.clone(),
            callee: target.clone(),
            callee_serial: target_slot.serial,
            offered: stream.tracks().into_iter().cloned().collect(),
            events: Mutex::new(Some(callee_rx)),
            network: self.network.clone(),
        })));
        if let Some(own) = board.peers.get_mut(self.id.as_str()) {
            own.calls.push(caller.clone());
        }
        drop(board);

        debug!("loopback: {} calling {} ({})", self.id, target, shared.id);
        Ok(CallLink {
            call: caller,
            events: caller_rx,
        })
    }

    fn reconnect(&self) -> Result<(), PeerError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(PeerError::new(
                PeerErrorKind::Disconnected,
                "cannot reconnect a destroyed peer",
            ));
        }
        if self.network.faults.fail_reconnect.load(Ordering::Acquire) {
            return Err(PeerError::new(
                PeerErrorKind::Network,
                "Lost connection to server.",
            ));
        }
        self.disconnected.store(false, Ordering::Release);
        debug!("loopback: {} reconnected to signaling", self.id);
        Ok(())
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let slot = {
            let mut board = self.network.board();
            let owned = board
                .peers
                .get(self.id.as_str())
                .is_some_and(|slot| slot.serial == self.serial);
            if owned {
                board.peers.remove(self.id.as_str())
            } else {
                None
            }
        };
        if let Some(slot) = slot {
            close_links(&slot);
        }
        let _ = self.events.send(PeerEvent::Close);
        debug!("loopback: {} destroyed", self.id);
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct Pipe {
    open: AtomicBool,
    ends: [mpsc::UnboundedSender<ConnectionEvent>; 2],
}

#[derive(Debug)]
struct LoopbackData {
    pipe: Arc<Pipe>,
    side: usize,
    peer: PeerIdentity,
}

impl DataConnection for LoopbackData {
    fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    fn is_open(&self) -> bool {
        self.pipe.open.load(Ordering::Acquire)
    }

    fn send(&self, data: serde_json::Value) -> Result<(), PeerError> {
        if !self.is_open() {
            return Err(PeerError::new(
                PeerErrorKind::Other,
                "data connection is closed",
            ));
        }
        let _ = self.pipe.ends[1 - self.side].send(ConnectionEvent::Data(data));
        Ok(())
    }

    fn close(&self) {
        if self.pipe.open.swap(false, Ordering::AcqRel) {
            for end in &self.pipe.ends {
                let _ = end.send(ConnectionEvent::Close);
            }
        }
    }
}

#[derive(Debug)]
struct CallShared {
    id: String,
    open: AtomicBool,
    ends: [mpsc::UnboundedSender<CallEvent>; 2],
}

impl CallShared {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct LoopbackCall {
    shared: Arc<CallShared>,
    side: usize,
    peer: PeerIdentity,
    senders: Vec<Arc<LoopbackSender>>,
}

impl MediaConnection for LoopbackCall {
    fn id(&self) -> &str {
        &self.shared.id
    }

    fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    fn senders(&self) -> Vec<Arc<dyn RtpSender>> {
        self.senders
            .iter()
            .map(|s| s.clone() as Arc<dyn RtpSender>)
            .collect()
    }

    fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    fn close(&self) {
        if self.shared.open.swap(false, Ordering::AcqRel) {
            debug!("loopback: call {} closed by side {}", self.shared.id, self.side);
            for end in &self.shared.ends {
                let _ = end.send(CallEvent::Close);
            }
        }
    }
}

#[derive(Debug)]
struct LoopbackIncoming {
    shared: Arc<CallShared>,
    caller: PeerIdentity,
    callee: PeerIdentity,
    callee_serial: u64,
    offered: Vec<TrackRef>,
    events: Mutex<Option<mpsc::UnboundedReceiver<CallEvent>>>,
    network: LoopbackNetwork,
}

#[async_trait]
impl IncomingCall for LoopbackIncoming {
    fn peer(&self) -> &PeerIdentity {
        &self.caller
    }

    async fn answer(&self, stream: Option<&OutgoingStream>) -> Result<CallLink, PeerError> {
        let events = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| PeerError::new(PeerErrorKind::Other, "call already answered"))?;
        if !self.shared.is_open() {
            return Err(PeerError::new(PeerErrorKind::Other, "call was closed"));
        }

        let callee = Arc::new(LoopbackCall {
            shared: self.shared.clone(),
            side: 1,
            peer: self.caller.clone(),
            senders: senders_for(stream, &self.shared, &self.network.faults),
        });

        {
            let mut board = self.network.board();
            if let Some(slot) = board.peers.get_mut(self.callee.as_str()) {
                if slot.serial == self.callee_serial {
                    slot.calls.push(callee.clone());
                }
            }
        }

        let answered: Vec<TrackRef> = stream
            .map(|s| s.tracks().into_iter().cloned().collect())
            .unwrap_or_default();
        let _ = self.shared.ends[1].send(CallEvent::Stream(RemoteStream {
            id: format!("{}-offer", self.shared.id),
            tracks: self.offered.clone(),
        }));
        let _ = self.shared.ends[0].send(CallEvent::Stream(RemoteStream {
            id: format!("{}-answer", self.shared.id),
            tracks: answered,
        }));

        Ok(CallLink {
            call: callee,
            events,
        })
    }
}

fn senders_for(
    stream: Option<&OutgoingStream>,
    call: &Arc<CallShared>,
    faults: &Arc<Faults>,
) -> Vec<Arc<LoopbackSender>> {
    stream
        .map(|stream| {
            stream
                .tracks()
                .into_iter()
                .map(|track| {
                    Arc::new(LoopbackSender {
                        kind: track.kind(),
                        track: Mutex::new(track.clone()),
                        parameters: Mutex::new(SendParameters {
                            encodings: vec![EncodingParameters::default()],
                        }),
                        call: call.clone(),
                        faults: faults.clone(),
                        replacements: AtomicU64::new(0),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug)]
struct LoopbackSender {
    kind: TrackKind,
    track: Mutex<TrackRef>,
    parameters: Mutex<SendParameters>,
    call: Arc<CallShared>,
    faults: Arc<Faults>,
    replacements: AtomicU64,
}

#[async_trait]
impl RtpSender for LoopbackSender {
    fn track(&self) -> Option<TrackRef> {
        Some(
            self.track
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        )
    }

    fn kind(&self) -> Option<TrackKind> {
        Some(self.kind)
    }

    async fn replace_track(&self, track: TrackRef) -> Result<(), SenderError> {
        if !self.call.is_open() {
            return Err(SenderError::Closed);
        }
        if track.kind() != self.kind {
            return Err(SenderError::KindMismatch {
                expected: self.kind,
                got: track.kind(),
            });
        }
        *self.track.lock().unwrap_or_else(PoisonError::into_inner) = track;
        let n = self.replacements.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("loopback: {} {} sender replaced ({})", self.call.id, self.kind, n);
        Ok(())
    }

    fn parameters(&self) -> SendParameters {
        self.parameters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn set_parameters(&self, parameters: SendParameters) -> Result<(), SenderError> {
        if !self.call.is_open() {
            return Err(SenderError::Closed);
        }
        if self.faults.reject_parameters.load(Ordering::Acquire) {
            return Err(SenderError::Unsupported);
        }
        *self
            .parameters
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = parameters;
        Ok(())
    }
}
