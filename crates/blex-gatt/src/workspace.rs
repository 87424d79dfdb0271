//! Per-peer operation workspace
//!
//! Holds the state of the single GATT operation allowed in flight for one
//! peer: what is running, which UUID it targets, the completion signal and
//! any error recorded by the completion event.

use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use blex_core::{GattError, OperationKind};

#[derive(Debug, Default)]
pub(crate) struct WorkspaceState {
    pub(crate) payload_size: Option<usize>,
    pub(crate) current_operation: Option<OperationKind>,
    pub(crate) expected_uuid: Option<Uuid>,
    pub(crate) pending_error: Option<GattError>,
    pub(crate) waiter: Option<oneshot::Sender<()>>,
}

impl WorkspaceState {
    /// Clear everything describing the in-flight operation.
    pub(crate) fn finish(&mut self) {
        self.current_operation = None;
        self.expected_uuid = None;
        self.pending_error = None;
        self.waiter = None;
    }
}

/// Workspace for one operation target.
///
/// `gate` is held for the whole lifetime of an operation and serializes
/// callers; `state` is only locked briefly and is shared with the event path.
#[derive(Debug, Default)]
pub struct PeerWorkspace {
    pub(crate) gate: tokio::sync::Mutex<()>,
    pub(crate) state: Mutex<WorkspaceState>,
}

/// Point-in-time view of a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceSnapshot {
    pub payload_size: usize,
    pub current_operation: Option<OperationKind>,
    pub expected_uuid: Option<Uuid>,
}

impl PeerWorkspace {
    pub(crate) fn snapshot(&self, default_payload_size: usize) -> WorkspaceSnapshot {
        let state = self.state.lock();
        WorkspaceSnapshot {
            payload_size: state.payload_size.unwrap_or(default_payload_size),
            current_operation: state.current_operation,
            expected_uuid: state.expected_uuid,
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.state.lock().current_operation.is_none()
    }
}

/// Resets the workspace when an `execute` call ends, however it ends.
pub(crate) struct OperationGuard<'a> {
    pub(crate) workspace: &'a PeerWorkspace,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.workspace.state.lock().finish();
    }
}
