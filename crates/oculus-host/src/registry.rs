//! Per-broadcast bookkeeping of connected viewers.
//!
//! An entry exists from the moment a viewer's signaling connection opens.
//! The media call is attached once an outgoing stream is ready. Removing an
//! entry always closes both of its connections so accounting never leaks.
//! Every removal is idempotent: transports may deliver close and error for
//! the same connection, in either order.

use std::collections::BTreeMap;
use std::sync::Arc;

use oculus_common::PeerIdentity;
use oculus_peer::{DataConnection, MediaConnection};
use tracing::debug;

use crate::error::{HostError, Result};

#[derive(Debug)]
pub struct ViewerEntry {
    viewer_id: PeerIdentity,
    /// Serial of the signaling connection that created this entry.
    link: u64,
    data: Arc<dyn DataConnection>,
    call: Option<Arc<dyn MediaConnection>>,
}

impl ViewerEntry {
    pub fn viewer_id(&self) -> &PeerIdentity {
        &self.viewer_id
    }

    pub fn data(&self) -> &Arc<dyn DataConnection> {
        &self.data
    }

    pub fn call(&self) -> Option<&Arc<dyn MediaConnection>> {
        self.call.as_ref()
    }

    fn close(&self) {
        if let Some(call) = &self.call {
            call.close();
        }
        self.data.close();
    }
}

#[derive(Debug, Default)]
pub struct ViewerRegistry {
    entries: BTreeMap<String, ViewerEntry>,
}

impl ViewerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a viewer whose signaling connection just opened.
    ///
    /// A viewer announcing again under the same id supersedes its previous
    /// entry, which is closed.
    pub fn on_viewer_announced(
        &mut self,
        viewer_id: PeerIdentity,
        link: u64,
        data: Arc<dyn DataConnection>,
    ) {
        let entry = ViewerEntry {
            viewer_id: viewer_id.clone(),
            link,
            data,
            call: None,
        };
        if let Some(previous) = self.entries.insert(viewer_id.as_str().to_string(), entry) {
            debug!("viewer {} re-announced; closing previous connection", viewer_id);
            previous.close();
        }
    }

    pub fn contains(&self, viewer_id: &PeerIdentity) -> bool {
        self.entries.contains_key(viewer_id.as_str())
    }

    pub fn get(&self, viewer_id: &PeerIdentity) -> Option<&ViewerEntry> {
        self.entries.get(viewer_id.as_str())
    }

    /// Whether the viewer is announced and still waiting for its call.
    pub fn needs_call(&self, viewer_id: &PeerIdentity) -> bool {
        self.entries
            .get(viewer_id.as_str())
            .is_some_and(|entry| entry.call.is_none())
    }

    /// Announced viewers that have not been called yet.
    pub fn pending_viewers(&self) -> Vec<PeerIdentity> {
        self.entries
            .values()
            .filter(|entry| entry.call.is_none())
            .map(|entry| entry.viewer_id.clone())
            .collect()
    }

    pub fn attach_call(
        &mut self,
        viewer_id: &PeerIdentity,
        call: Arc<dyn MediaConnection>,
    ) -> Result<()> {
        let entry = self
            .entries
            .get_mut(viewer_id.as_str())
            .ok_or_else(|| HostError::UnknownViewer(viewer_id.to_string()))?;
        if entry.call.is_some() {
            return Err(HostError::AlreadyCalled(viewer_id.to_string()));
        }
        entry.call = Some(call);
        Ok(())
    }

    /// Handles close or error on a viewer's signaling connection.
    ///
    /// Events from a superseded connection (`link` mismatch) are ignored.
    /// Returns whether an entry was removed.
    pub fn on_signaling_closed(&mut self, viewer_id: &PeerIdentity, link: u64) -> bool {
        let matches = self
            .entries
            .get(viewer_id.as_str())
            .is_some_and(|entry| entry.link == link);
        if !matches {
            return false;
        }
        match self.entries.remove(viewer_id.as_str()) {
            Some(entry) => {
                entry.close();
                true
            }
            None => false,
        }
    }

    /// Handles close or error on a viewer's media call.
    ///
    /// Returns whether an entry was removed.
    pub fn on_call_closed(&mut self, viewer_id: &PeerIdentity, call_id: &str) -> bool {
        let matches = self
            .entries
            .get(viewer_id.as_str())
            .and_then(|entry| entry.call.as_ref())
            .is_some_and(|call| call.id() == call_id);
        if !matches {
            return false;
        }
        match self.entries.remove(viewer_id.as_str()) {
            Some(entry) => {
                entry.close();
                true
            }
            None => false,
        }
    }

    /// Viewers with a live media call.
    pub fn viewer_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.call.is_some())
            .count()
    }

    pub fn calls(&self) -> Vec<Arc<dyn MediaConnection>> {
        self.entries
            .values()
            .filter_map(|entry| entry.call.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Closes and forgets every viewer. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        for entry in self.entries.values() {
            entry.close();
        }
        self.entries.clear();
        removed
    }
}
