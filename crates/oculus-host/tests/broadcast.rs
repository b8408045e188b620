//! Broadcaster scenarios over the loopback transport.

use std::sync::Arc;
use std::time::Duration;

use oculus_common::{ControlMessage, OculusConfig, PeerIdentity, SessionId};
use oculus_host::{
    AudioToggle, BroadcastCommand, BroadcastState, Broadcaster, BroadcasterSessionController,
    CaptureLifecycle, HostContext, HostError, HostNotice, RecordingControlSink,
    CAPTURE_DENIED_MESSAGE, NO_TAB_AUDIO_MESSAGE,
};
use oculus_media::{CaptureOutcome, DummyCapture, MediaTrack, QualityPreset, TrackKind, TrackState};
use oculus_peer::{
    CallEvent, CallLink, ConnectOptions, DataLink, LoopbackNetwork, ManualScheduler, PeerConfig,
    PeerErrorKind, PeerEvent, PeerLink, PeerTransport, RemoteStream, RtpSender, StaticIceFetcher,
    TokioScheduler,
};
use tokio::time::timeout;

struct Harness {
    net: LoopbackNetwork,
    scheduler: ManualScheduler,
    control: RecordingControlSink,
    source: Arc<DummyCapture>,
    session: BroadcasterSessionController,
    capture: CaptureLifecycle,
    auto_capture: bool,
}

impl Harness {
    fn new(source: DummyCapture) -> Self {
        let net = LoopbackNetwork::new();
        let scheduler = ManualScheduler::new();
        let control = RecordingControlSink::default();
        let source = Arc::new(source);
        let context = HostContext {
            transport: Arc::new(net.clone()),
            ice: Arc::new(StaticIceFetcher::default()),
            scheduler: Arc::new(scheduler.clone()),
            control: Arc::new(control.clone()),
        };
        let session =
            BroadcasterSessionController::new(SessionId::mint(), OculusConfig::default(), context);
        let capture = CaptureLifecycle::new(source.clone());
        Self {
            net,
            scheduler,
            control,
            source,
            session,
            capture,
            auto_capture: true,
        }
    }

    async fn start(&mut self) {
        self.session.start().unwrap();
        self.settle().await;
    }

    /// Applies events until the controller has been quiet for a moment.
    async fn settle(&mut self) -> Vec<HostNotice> {
        let mut notices = Vec::new();
        while let Ok(Some(event)) =
            timeout(Duration::from_millis(50), self.session.next_event()).await
        {
            if let Some(notice) = self.session.handle_event(event).await {
                notices.push(notice);
                match notice {
                    HostNotice::PeerReady if self.auto_capture => {
                        let _ = self.capture.start_capture(&mut self.session, false).await;
                    }
                    HostNotice::PeerReady => {}
                    HostNotice::CaptureEnded => {
                        self.capture.stop_stream(&mut self.session);
                    }
                }
            }
        }
        notices
    }

    fn host_id(&self) -> PeerIdentity {
        self.session.identity().clone()
    }

    fn video_senders(&self) -> Vec<Arc<dyn RtpSender>> {
        self.senders(TrackKind::Video)
    }

    fn senders(&self, kind: TrackKind) -> Vec<Arc<dyn RtpSender>> {
        self.session
            .registry()
            .calls()
            .iter()
            .flat_map(|call| call.senders())
            .filter(|sender| sender.kind() == Some(kind))
            .collect()
    }

    fn call_ids(&self) -> Vec<String> {
        self.session
            .registry()
            .calls()
            .iter()
            .map(|call| call.id().to_string())
            .collect()
    }
}

struct TestViewer {
    id: PeerIdentity,
    peer: PeerLink,
    data: DataLink,
    call: Option<CallLink>,
}

impl TestViewer {
    async fn join(net: &LoopbackNetwork, host: &PeerIdentity) -> Self {
        let mut peer = net.register(None, PeerConfig::default()).await.unwrap();
        let id = match peer.events.recv().await {
            Some(PeerEvent::Open(id)) => PeerIdentity::anonymous(id),
            other => panic!("expected open, got {other:?}"),
        };
        let data = peer
            .handle
            .connect(host, ConnectOptions::default())
            .await
            .unwrap();
        Self {
            id,
            peer,
            data,
            call: None,
        }
    }

    async fn answer(&mut self) -> RemoteStream {
        let incoming = match timeout(Duration::from_millis(500), self.peer.events.recv()).await {
            Ok(Some(PeerEvent::Call(call))) => call,
            other => panic!("expected a call, got {other:?}"),
        };
        let mut call = incoming.answer(None).await.unwrap();
        let stream = match call.events.recv().await {
            Some(CallEvent::Stream(stream)) => stream,
            other => panic!("expected remote stream, got {other:?}"),
        };
        self.call = Some(call);
        stream
    }

    fn has_unanswered_call(&mut self) -> bool {
        matches!(self.peer.events.try_recv(), Ok(PeerEvent::Call(_)))
    }
}

#[tokio::test]
async fn test_viewer_announced_before_stream_is_called_exactly_once() {
    let mut h = Harness::new(DummyCapture::granting(false));
    h.auto_capture = false;
    h.start().await;
    assert!(h.session.is_registered());

    let mut viewer = TestViewer::join(&h.net, &h.host_id()).await;
    h.settle().await;
    assert_eq!(h.session.registry().len(), 1);
    assert_eq!(h.session.viewer_count(), 0);
    assert!(!viewer.has_unanswered_call());

    h.capture
        .start_capture(&mut h.session, false)
        .await
        .unwrap();
    h.settle().await;
    assert_eq!(h.session.viewer_count(), 1);

    viewer.answer().await;
    assert_eq!(h.session.call_pending_viewers().await, 0);
    h.session.call_viewer(&viewer.id).await.unwrap();
    h.settle().await;
    assert!(!viewer.has_unanswered_call());
    assert_eq!(h.session.viewer_count(), 1);
}

#[tokio::test]
async fn test_no_audio_capture_sends_silent_placeholder() {
    let mut h = Harness::new(DummyCapture::granting(false));
    h.start().await;
    assert_eq!(h.session.state(), BroadcastState::Live);

    let mut viewer = TestViewer::join(&h.net, &h.host_id()).await;
    h.settle().await;
    let remote = viewer.answer().await;

    assert_eq!(remote.tracks.len(), 2);
    let audio = remote.audio().unwrap();
    assert!(audio.id().starts_with("silent-audio"));
    assert!(!audio.enabled());
    assert!(h.session.composer().has_placeholder_audio());

    assert_eq!(h.capture.toggle_audio(&mut h.session), AudioToggle::NoRealAudio);
    assert!(!h.capture.audio_enabled());
    assert_eq!(h.session.error(), Some(NO_TAB_AUDIO_MESSAGE));
    assert_eq!(h.session.state(), BroadcastState::Live);
}

#[tokio::test]
async fn test_toggle_real_audio_mutes_and_unmutes() {
    let mut h = Harness::new(DummyCapture::granting(true));
    h.start().await;
    assert!(h.capture.audio_enabled());

    let audio = h.source.last_audio().unwrap();
    assert_eq!(h.capture.toggle_audio(&mut h.session), AudioToggle::Muted);
    assert!(!audio.enabled());
    assert_eq!(h.capture.toggle_audio(&mut h.session), AudioToggle::Enabled);
    assert!(audio.enabled());
    assert_eq!(h.session.error(), None);
}

#[tokio::test]
async fn test_bitrate_cap_applied_after_settle_delay() {
    let mut h = Harness::new(DummyCapture::granting(false));
    h.start().await;

    let mut viewers = Vec::new();
    for _ in 0..2 {
        viewers.push(TestViewer::join(&h.net, &h.host_id()).await);
    }
    h.settle().await;
    for viewer in &mut viewers {
        viewer.answer().await;
    }
    h.settle().await;

    assert_eq!(h.scheduler.pending(), 1);
    assert_eq!(h.scheduler.delays().last(), Some(&Duration::from_secs(1)));
    h.scheduler.fire_all();
    h.settle().await;

    let senders = h.video_senders();
    assert_eq!(senders.len(), 2);
    for sender in senders {
        let encoding = &sender.parameters().encodings[0];
        assert_eq!(encoding.max_bitrate_bps, Some(4_000_000));
        assert_eq!(encoding.scale_resolution_down_by, Some(1.0));
        assert_eq!(encoding.priority, Some(oculus_peer::Priority::High));
    }
    for sender in h.senders(TrackKind::Audio) {
        assert_eq!(sender.parameters().encodings[0].max_bitrate_bps, None);
    }
}

#[tokio::test]
async fn test_change_quality_while_live_keeps_calls() {
    let mut h = Harness::new(DummyCapture::granting(false));
    h.start().await;
    let mut viewers = Vec::new();
    for _ in 0..3 {
        viewers.push(TestViewer::join(&h.net, &h.host_id()).await);
    }
    h.settle().await;
    for viewer in &mut viewers {
        viewer.answer().await;
    }
    h.settle().await;
    let calls_before = h.call_ids();

    assert!(h.capture.change_quality(&mut h.session, QualityPreset::P480).await);

    let video = h.source.last_video().unwrap();
    assert_eq!(
        video.applied_constraints(),
        Some(QualityPreset::P480.constraints())
    );
    for sender in h.video_senders() {
        assert_eq!(
            sender.parameters().encodings[0].max_bitrate_bps,
            Some(1_500_000)
        );
    }
    assert_eq!(h.call_ids(), calls_before);
    assert_eq!(h.session.preset(), QualityPreset::P480);
}

#[tokio::test]
async fn test_change_screen_swaps_both_legs_on_every_call() {
    let mut h = Harness::new(DummyCapture::granting(false));
    h.start().await;
    let first_video = h.source.last_video().unwrap();
    let first_placeholder = h.session.composer().placeholder().cloned().unwrap();

    let mut viewers = Vec::new();
    for _ in 0..3 {
        viewers.push(TestViewer::join(&h.net, &h.host_id()).await);
    }
    h.settle().await;
    for viewer in &mut viewers {
        viewer.answer().await;
    }
    h.settle().await;
    let calls_before = h.call_ids();

    h.source.push(CaptureOutcome::Grant { audio: true });
    h.capture
        .start_capture(&mut h.session, true)
        .await
        .unwrap();

    let new_video = h.source.last_video().unwrap();
    let new_audio = h.source.last_audio().unwrap();
    for sender in h.video_senders() {
        assert_eq!(sender.track().unwrap().id(), new_video.id());
    }
    for sender in h.senders(TrackKind::Audio) {
        assert_eq!(sender.track().unwrap().id(), new_audio.id());
    }
    assert_eq!(h.call_ids(), calls_before);
    assert_eq!(h.session.viewer_count(), 3);
    assert_eq!(first_video.state(), TrackState::Ended);
    assert!(first_placeholder.is_stopped());
    assert!(!h.session.composer().has_placeholder_audio());
    assert!(h.capture.audio_enabled());
    assert_eq!(h.session.state(), BroadcastState::Live);
}

#[tokio::test]
async fn test_video_only_swap_leaves_audio_leg_of_same_kind() {
    let mut h = Harness::new(DummyCapture::granting(true));
    h.start().await;
    let mut viewer = TestViewer::join(&h.net, &h.host_id()).await;
    h.settle().await;
    viewer.answer().await;
    h.settle().await;

    let audio_before: Vec<String> = h
        .senders(TrackKind::Audio)
        .iter()
        .map(|s| s.track().unwrap().id().to_string())
        .collect();
    let replacement: oculus_media::TrackRef = oculus_media::DummyTrack::video("external-video");
    let report = h.session.replace_track(&replacement).await;

    assert_eq!(report.replaced, 1);
    assert_eq!(report.failed, 0);
    let audio_after: Vec<String> = h
        .senders(TrackKind::Audio)
        .iter()
        .map(|s| s.track().unwrap().id().to_string())
        .collect();
    assert_eq!(audio_before, audio_after);
    assert_eq!(
        h.video_senders()[0].track().unwrap().id(),
        "external-video"
    );
}

#[tokio::test]
async fn test_denied_initial_capture_is_an_error() {
    let mut h = Harness::new(DummyCapture::denying());
    h.start().await;

    assert_eq!(h.session.state(), BroadcastState::Error);
    assert_eq!(h.session.error(), Some(CAPTURE_DENIED_MESSAGE));
    assert!(h.session.composer().current().is_none());
}

#[tokio::test]
async fn test_denied_replacement_keeps_live_stream() {
    let mut h = Harness::new(DummyCapture::granting(false));
    h.start().await;
    let video = h.source.last_video().unwrap();
    let mut viewer = TestViewer::join(&h.net, &h.host_id()).await;
    h.settle().await;
    viewer.answer().await;

    h.source.push(CaptureOutcome::Cancel);
    assert!(h
        .capture
        .start_capture(&mut h.session, true)
        .await
        .is_err());

    assert_eq!(h.session.state(), BroadcastState::Live);
    assert_eq!(h.session.error(), None);
    assert_eq!(video.state(), TrackState::Live);
    assert_eq!(h.video_senders()[0].track().unwrap().id(), video.id());
}

#[tokio::test]
async fn test_viewer_accounting_survives_duplicate_close_and_error() {
    let mut h = Harness::new(DummyCapture::granting(false));
    h.start().await;
    let mut viewers = Vec::new();
    for _ in 0..3 {
        viewers.push(TestViewer::join(&h.net, &h.host_id()).await);
    }
    h.settle().await;
    for viewer in &mut viewers {
        viewer.answer().await;
    }
    h.settle().await;
    assert_eq!(h.session.viewer_count(), 3);

    // Viewer 0 hangs up the call; viewer 1's process disappears entirely.
    let call = viewers[0].call.as_ref().unwrap().call.clone();
    call.close();
    call.close();
    h.net.drop_peer(viewers[1].id.as_str());
    viewers[0].data.connection.close();
    h.settle().await;

    assert_eq!(h.session.viewer_count(), 1);
    assert_eq!(h.session.registry().len(), 1);
    assert_eq!(h.session.viewer_count(), h.session.registry().calls().len());
}

#[tokio::test]
async fn test_bitrate_failures_are_swallowed() {
    let mut h = Harness::new(DummyCapture::granting(false));
    h.start().await;
    let mut viewer = TestViewer::join(&h.net, &h.host_id()).await;
    h.settle().await;
    viewer.answer().await;
    h.settle().await;

    h.net.reject_parameters(true);
    assert_eq!(h.session.apply_bitrate_cap(QualityPreset::P1080).await, 0);
    assert!(h.capture.change_quality(&mut h.session, QualityPreset::P1080).await);
    assert_eq!(h.session.state(), BroadcastState::Live);
    assert_eq!(h.session.viewer_count(), 1);
}

#[tokio::test]
async fn test_stop_twice_is_a_noop() {
    let mut h = Harness::new(DummyCapture::granting(false));
    h.start().await;
    let placeholder = h.session.composer().placeholder().cloned().unwrap();
    let video = h.source.last_video().unwrap();
    let mut viewer = TestViewer::join(&h.net, &h.host_id()).await;
    h.settle().await;
    viewer.answer().await;

    assert!(h.capture.stop_stream(&mut h.session));
    assert!(!h.capture.stop_stream(&mut h.session));
    assert!(!h.session.stop());

    assert_eq!(h.control.messages(), vec![ControlMessage::STOP_BROADCAST]);
    assert_eq!(h.session.state(), BroadcastState::Stopped);
    assert_eq!(h.session.viewer_count(), 0);
    assert!(!h.net.is_registered(h.host_id().as_str()));
    assert!(placeholder.is_stopped());
    assert_eq!(video.state(), TrackState::Ended);

    let call = viewer.call.as_mut().unwrap();
    assert!(matches!(call.events.recv().await, Some(CallEvent::Close)));
}

#[tokio::test]
async fn test_capture_source_end_stops_broadcast() {
    let mut h = Harness::new(DummyCapture::granting(false));
    h.start().await;

    h.source.last_video().unwrap().end();
    let notices = h.settle().await;

    assert_eq!(notices, vec![HostNotice::CaptureEnded]);
    assert_eq!(h.session.state(), BroadcastState::Stopped);
    assert_eq!(h.control.messages().len(), 1);
}

#[tokio::test]
async fn test_registration_failure_is_fatal() {
    let mut h = Harness::new(DummyCapture::granting(false));
    h.net.fail_next_registration(PeerErrorKind::UnavailableId);
    h.start().await;

    assert_eq!(h.session.state(), BroadcastState::Error);
    assert!(h.session.error().unwrap().starts_with("Connection error:"));
    assert!(!h.session.is_registered());
}

#[tokio::test]
async fn test_capture_is_refused_without_registration() {
    let mut h = Harness::new(DummyCapture::granting(true));
    h.net.fail_next_registration(PeerErrorKind::UnavailableId);
    h.start().await;
    assert_eq!(h.session.state(), BroadcastState::Error);

    let result = h.capture.start_capture(&mut h.session, false).await;
    assert!(matches!(result, Err(HostError::NotStarted)));
    assert_eq!(h.session.state(), BroadcastState::Error);
    assert!(h.session.composer().current().is_none());
    assert_eq!(h.source.issued_count(), 0);
}

#[tokio::test]
async fn test_start_capture_after_registration_failure_registers_first() {
    let net = LoopbackNetwork::new();
    net.fail_next_registration(PeerErrorKind::UnavailableId);
    let session_id = SessionId::mint();
    let host_id = PeerIdentity::host(&session_id);
    let (broadcaster, handle) = Broadcaster::new(
        session_id,
        OculusConfig::default(),
        HostContext {
            transport: Arc::new(net.clone()),
            ice: Arc::new(StaticIceFetcher::default()),
            scheduler: Arc::new(TokioScheduler),
            control: Arc::new(RecordingControlSink::default()),
        },
        Arc::new(DummyCapture::granting(false)),
    );
    let task = tokio::spawn(broadcaster.run());

    let failed = timeout(
        Duration::from_secs(2),
        handle.wait_for(|s| s.state == BroadcastState::Error),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(failed.error.unwrap().starts_with("Connection error:"));
    assert!(!net.is_registered(host_id.as_str()));

    assert!(handle.start_capture());
    let live = timeout(
        Duration::from_secs(2),
        handle.wait_for(|s| s.state == BroadcastState::Live),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(live.error, None);
    assert!(net.is_registered(host_id.as_str()));

    let mut viewer = TestViewer::join(&net, &host_id).await;
    viewer.answer().await;

    assert!(handle.stop());
    timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_late_peer_error_does_not_end_live_broadcast() {
    let mut h = Harness::new(DummyCapture::granting(false));
    h.start().await;

    h.net.emit_error(
        h.host_id().as_str(),
        oculus_peer::PeerError::new(PeerErrorKind::Network, "Lost connection to server."),
    );
    h.net.emit_error(
        h.host_id().as_str(),
        oculus_peer::PeerError::peer_unavailable("gone-viewer"),
    );
    h.settle().await;

    assert_eq!(h.session.state(), BroadcastState::Live);
    assert_eq!(
        h.session.error(),
        Some("Connection error: Lost connection to server.")
    );
}

#[tokio::test]
async fn test_broadcaster_runs_to_completion() {
    let net = LoopbackNetwork::new();
    let control = RecordingControlSink::default();
    let context = HostContext {
        transport: Arc::new(net.clone()),
        ice: Arc::new(StaticIceFetcher::default()),
        scheduler: Arc::new(TokioScheduler),
        control: Arc::new(control.clone()),
    };
    let session_id = SessionId::mint();
    let (broadcaster, handle) = Broadcaster::new(
        session_id,
        OculusConfig::default(),
        context,
        Arc::new(DummyCapture::granting(false)),
    );
    let task = tokio::spawn(broadcaster.run());

    let live = timeout(
        Duration::from_secs(2),
        handle.wait_for(|s| s.state == BroadcastState::Live),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(live.label, "LIVE");
    assert_eq!(
        live.share_url,
        format!("http://localhost:3000/watch/{session_id}")
    );

    let mut viewer = TestViewer::join(&net, &PeerIdentity::host(&session_id)).await;
    viewer.answer().await;
    timeout(
        Duration::from_secs(2),
        handle.wait_for(|s| s.viewer_count == 1),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(handle.send(BroadcastCommand::ToggleAudio));
    let status = timeout(
        Duration::from_secs(2),
        handle.wait_for(|s| s.error.is_some()),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(status.error.as_deref(), Some(NO_TAB_AUDIO_MESSAGE));

    assert!(handle.stop());
    timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(handle.status().state, BroadcastState::Stopped);
    assert_eq!(control.messages(), vec![ControlMessage::STOP_BROADCAST]);
}
