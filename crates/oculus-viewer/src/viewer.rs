//! Command loop around [`ViewerSessionController`] with a published status.

use oculus_common::{OculusConfig, SessionId};
use oculus_peer::RetryPolicy;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::error::Result;
use crate::session::{ViewState, ViewerContext, ViewerSessionController};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerCommand {
    ToggleMute,
    Retry,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewerStatus {
    pub session_id: SessionId,
    pub state: ViewState,
    pub message: &'static str,
    pub muted: bool,
    pub error: Option<String>,
    pub retry_count: u32,
}

#[derive(Debug, Clone)]
pub struct ViewerHandle {
    commands: mpsc::UnboundedSender<ViewerCommand>,
    status: watch::Receiver<ViewerStatus>,
}

impl ViewerHandle {
    pub fn send(&self, command: ViewerCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn toggle_mute(&self) -> bool {
        self.send(ViewerCommand::ToggleMute)
    }

    pub fn retry(&self) -> bool {
        self.send(ViewerCommand::Retry)
    }

    pub fn close(&self) -> bool {
        self.send(ViewerCommand::Close)
    }

    pub fn status(&self) -> ViewerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewerStatus> {
        self.status.clone()
    }

    /// Waits until the published status satisfies `predicate`, or returns
    /// `None` if the viewer exits first.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Option<ViewerStatus>
    where
        F: FnMut(&ViewerStatus) -> bool,
    {
        let mut rx = self.status.clone();
        rx.wait_for(|status| predicate(status))
            .await
            .ok()
            .map(|status| status.clone())
    }
}

#[derive(Debug)]
pub struct Viewer {
    session: ViewerSessionController,
    commands: mpsc::UnboundedReceiver<ViewerCommand>,
    status: watch::Sender<ViewerStatus>,
}

impl Viewer {
    pub fn new(
        session_id: SessionId,
        config: OculusConfig,
        context: ViewerContext,
        policy: Option<RetryPolicy>,
    ) -> (Self, ViewerHandle) {
        let mut session = ViewerSessionController::new(session_id, config, context);
        if let Some(policy) = policy {
            session = session.with_retry_policy(policy);
        }
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(snapshot(&session));
        (
            Self {
                session,
                commands: commands_rx,
                status: status_tx,
            },
            ViewerHandle {
                commands: commands_tx,
                status: status_rx,
            },
        )
    }

    /// Runs until closed by command or until every handle is dropped.
    pub async fn run(mut self) -> Result<()> {
        info!("watching {}", self.session.session_id());
        self.session.connect()?;
        self.publish();

        while !self.session.is_closed() {
            tokio::select! {
                event = self.session.next_event() => {
                    let Some(event) = event else { break };
                    self.session.handle_event(event).await;
                }
                command = self.commands.recv() => match command {
                    Some(ViewerCommand::ToggleMute) => {
                        let muted = self.session.toggle_mute();
                        debug!("muted: {}", muted);
                    }
                    Some(ViewerCommand::Retry) => self.session.retry()?,
                    Some(ViewerCommand::Close) | None => self.session.close(),
                },
            }
            self.publish();
        }
        Ok(())
    }

    fn publish(&self) {
        self.status.send_replace(snapshot(&self.session));
    }
}

fn snapshot(session: &ViewerSessionController) -> ViewerStatus {
    ViewerStatus {
        session_id: *session.session_id(),
        state: session.state(),
        message: session.state().message(),
        muted: session.muted(),
        error: session.error().map(str::to_string),
        retry_count: session.retry_count(),
    }
}
