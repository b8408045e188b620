//! Command loop tying the session controller and capture lifecycle
//! together, with status published for whatever surface drives it.

use std::sync::Arc;

use oculus_common::{OculusConfig, SessionId};
use oculus_media::{DisplayCapture, QualityPreset};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::capture::{AudioToggle, CaptureLifecycle};
use crate::error::Result;
use crate::session::{
    BroadcastState, BroadcasterSessionController, HostContext, HostNotice,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastCommand {
    StartCapture,
    /// Re-capture while live, swapping the new screen into every call.
    ChangeScreen,
    ChangeQuality(QualityPreset),
    ToggleAudio,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastStatus {
    pub session_id: SessionId,
    pub state: BroadcastState,
    pub label: &'static str,
    pub viewer_count: usize,
    pub quality: QualityPreset,
    pub audio_enabled: bool,
    pub error: Option<String>,
    pub share_url: String,
}

#[derive(Debug, Clone)]
pub struct BroadcasterHandle {
    commands: mpsc::UnboundedSender<BroadcastCommand>,
    status: watch::Receiver<BroadcastStatus>,
}

impl BroadcasterHandle {
    /// Returns `false` once the broadcaster has exited.
    pub fn send(&self, command: BroadcastCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn start_capture(&self) -> bool {
        self.send(BroadcastCommand::StartCapture)
    }

    pub fn change_screen(&self) -> bool {
        self.send(BroadcastCommand::ChangeScreen)
    }

    pub fn change_quality(&self, preset: QualityPreset) -> bool {
        self.send(BroadcastCommand::ChangeQuality(preset))
    }

    pub fn toggle_audio(&self) -> bool {
        self.send(BroadcastCommand::ToggleAudio)
    }

    pub fn stop(&self) -> bool {
        self.send(BroadcastCommand::Stop)
    }

    pub fn status(&self) -> BroadcastStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BroadcastStatus> {
        self.status.clone()
    }

    /// Waits until the published status satisfies `predicate`.
    ///
    /// Returns `None` if the broadcaster exits first without ever matching.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Option<BroadcastStatus>
    where
        F: FnMut(&BroadcastStatus) -> bool,
    {
        let mut rx = self.status.clone();
        rx.wait_for(|status| predicate(status))
            .await
            .ok()
            .map(|status| status.clone())
    }
}

#[derive(Debug)]
pub struct Broadcaster {
    session: BroadcasterSessionController,
    capture: CaptureLifecycle,
    commands: mpsc::UnboundedReceiver<BroadcastCommand>,
    status: watch::Sender<BroadcastStatus>,
}

impl Broadcaster {
    pub fn new(
        session_id: SessionId,
        config: OculusConfig,
        context: HostContext,
        source: Arc<dyn DisplayCapture>,
    ) -> (Self, BroadcasterHandle) {
        let session = BroadcasterSessionController::new(session_id, config, context);
        let capture = CaptureLifecycle::new(source);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(snapshot(&session, &capture));

        (
            Self {
                session,
                capture,
                commands: commands_rx,
                status: status_tx,
            },
            BroadcasterHandle {
                commands: commands_tx,
                status: status_rx,
            },
        )
    }

    /// Runs until the broadcast stops, either by command, by the capture
    /// source ending, or by every handle being dropped.
    pub async fn run(mut self) -> Result<()> {
        self.session.start()?;
        info!(
            "broadcasting {}; share {}",
            self.session.session_id(),
            self.session.share_url()
        );
        self.publish();

        while !self.session.is_stopped() {
            tokio::select! {
                event = self.session.next_event() => {
                    let Some(event) = event else { break };
                    if let Some(notice) = self.session.handle_event(event).await {
                        self.on_notice(notice).await;
                    }
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => {
                        debug!("all broadcaster handles dropped");
                        self.capture.stop_stream(&mut self.session);
                    }
                },
            }
            self.publish();
        }
        Ok(())
    }

    async fn on_notice(&mut self, notice: HostNotice) {
        match notice {
            HostNotice::PeerReady => {
                if let Err(e) = self.capture.start_capture(&mut self.session, false).await {
                    warn!("capture failed: {}", e);
                }
            }
            HostNotice::CaptureEnded => {
                self.capture.stop_stream(&mut self.session);
            }
        }
    }

    async fn on_command(&mut self, command: BroadcastCommand) {
        debug!("command {:?}", command);
        match command {
            BroadcastCommand::StartCapture if !self.session.is_registered() => {
                // Capture follows from the PeerReady notice once registered.
                if let Err(e) = self.session.start() {
                    warn!("cannot restart registration: {}", e);
                }
            }
            BroadcastCommand::StartCapture | BroadcastCommand::ChangeScreen => {
                let replace = command == BroadcastCommand::ChangeScreen;
                if let Err(e) = self.capture.start_capture(&mut self.session, replace).await {
                    warn!("capture failed: {}", e);
                }
            }
            BroadcastCommand::ChangeQuality(preset) => {
                self.capture.change_quality(&mut self.session, preset).await;
            }
            BroadcastCommand::ToggleAudio => {
                if self.capture.toggle_audio(&mut self.session) == AudioToggle::NoRealAudio {
                    info!("no tab audio to toggle");
                }
            }
            BroadcastCommand::Stop => {
                self.capture.stop_stream(&mut self.session);
            }
        }
    }

    fn publish(&self) {
        self.status
            .send_replace(snapshot(&self.session, &self.capture));
    }
}

fn snapshot(session: &BroadcasterSessionController, capture: &CaptureLifecycle) -> BroadcastStatus {
    BroadcastStatus {
        session_id: *session.session_id(),
        state: session.state(),
        label: session.state().label(),
        viewer_count: session.viewer_count(),
        quality: session.preset(),
        audio_enabled: capture.audio_enabled(),
        error: session.error().map(str::to_string),
        share_url: session.share_url(),
    }
}
