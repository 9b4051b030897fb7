//! Wire-level types returned by the coordination store

use tokio::sync::mpsc;

/// Store-assigned, strictly increasing mutation counter
pub type Revision = u64;

/// Handle to a TTL-bound lease
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseId(pub u64);

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// A stored key and its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    /// Revision at which the key was created
    pub create_revision: Revision,
    /// Revision of the last modification
    pub mod_revision: Revision,
    /// Lease the key is attached to, if any
    pub lease: Option<LeaseId>,
}

/// Result of a consistent prefix read
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Entries under the prefix, ordered by key
    pub entries: Vec<KeyValue>,
    /// Store revision the read was served at
    pub revision: Revision,
}

/// Kind of change delivered by a watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Put,
    Delete,
}

/// A single change delivered by a watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    /// Current key state; for deletions the value is empty
    pub kv: KeyValue,
    /// Previous key state, when requested and available
    pub prev_kv: Option<KeyValue>,
}

impl WatchEvent {
    /// Revision at which this change was committed
    pub fn revision(&self) -> Revision {
        self.kv.mod_revision
    }
}

/// One watch notification: every change committed at `revision`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchResponse {
    pub revision: Revision,
    pub events: Vec<WatchEvent>,
}

/// Ordered stream of watch notifications
///
/// The stream ends (`next` returns `None`) when the store drops the
/// subscription, e.g. on restart or connection loss.
#[derive(Debug)]
pub struct WatchStream {
    rx: mpsc::UnboundedReceiver<WatchResponse>,
}

impl WatchStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<WatchResponse>) -> Self {
        Self { rx }
    }

    /// Waits for the next notification
    pub async fn next(&mut self) -> Option<WatchResponse> {
        self.rx.recv().await
    }
}
