//! Outbound half of the control channel.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use oculus_common::ControlMessage;
use tokio::sync::mpsc;
use tracing::debug;

/// Where the broadcaster reports lifecycle changes to the process that
/// holds the active session pointer.
pub trait ControlSink: Send + Sync + fmt::Debug {
    fn notify(&self, message: ControlMessage);
}

#[derive(Debug, Clone)]
pub struct ChannelControlSink {
    tx: mpsc::UnboundedSender<ControlMessage>,
}

impl ChannelControlSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ControlMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ControlSink for ChannelControlSink {
    fn notify(&self, message: ControlMessage) {
        if self.tx.send(message).is_err() {
            debug!("control channel receiver is gone");
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullControlSink;

impl ControlSink for NullControlSink {
    fn notify(&self, message: ControlMessage) {
        debug!("dropping control message {:?}", message);
    }
}

/// Keeps every message it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingControlSink {
    messages: Arc<Mutex<Vec<ControlMessage>>>,
}

impl RecordingControlSink {
    pub fn messages(&self) -> Vec<ControlMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ControlSink for RecordingControlSink {
    fn notify(&self, message: ControlMessage) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }
}
