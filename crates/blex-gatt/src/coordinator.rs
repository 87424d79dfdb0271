//! GATT operation coordinator
//!
//! BLE stacks accept one GATT operation per connection at a time and report
//! its outcome through a later callback. The coordinator turns that into an
//! awaitable call:
//!
//! 1. `execute` takes the target's gate, records the operation, starts it via
//!    the transport and waits for completion with a deadline
//! 2. the transport event path calls `resolve` with the reported status
//! 3. `execute` returns the recorded outcome and the workspace is reset
//!
//! Status codes other than success are hard failures. A completion that names
//! a different UUID or operation than the one in flight is logged and still
//! completes it, since real stacks deliver stale and duplicate callbacks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use blex_core::{GattError, GattResult, GattStatus, OperationKind, OperationTarget};

use crate::config::{GattConfig, LogConfig};
use crate::workspace::{OperationGuard, PeerWorkspace, WorkspaceSnapshot};

/// ATT header bytes subtracted from the negotiated MTU.
pub const ATT_HEADER_SIZE: usize = 3;

/// Smallest payload size ever recorded for a peer.
pub const MIN_PAYLOAD_SIZE: usize = 20;

#[derive(Debug)]
pub struct GattCoordinator {
    operation_timeout: Duration,
    default_payload_size: usize,
    log: LogConfig,
    workspaces: Mutex<HashMap<OperationTarget, Arc<PeerWorkspace>>>,
}

impl GattCoordinator {
    pub fn new(config: &GattConfig) -> Self {
        Self {
            operation_timeout: config.operation_timeout,
            default_payload_size: config.default_payload_size,
            log: config.log,
            workspaces: Mutex::new(HashMap::new()),
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// Workspace for `target`, created on first use.
    pub fn workspace(&self, target: &OperationTarget) -> Arc<PeerWorkspace> {
        let mut workspaces = self.workspaces.lock();
        Arc::clone(workspaces.entry(*target).or_default())
    }

    pub fn snapshot(&self, target: &OperationTarget) -> WorkspaceSnapshot {
        self.workspace(target).snapshot(self.default_payload_size)
    }

    pub fn is_idle(&self, target: &OperationTarget) -> bool {
        self.workspace(target).is_idle()
    }

    /// Usable payload bytes per packet for `target`.
    pub fn payload_size(&self, target: &OperationTarget) -> usize {
        self.snapshot(target).payload_size
    }

    /// Record a completed MTU exchange.
    pub fn on_mtu_changed(&self, target: &OperationTarget, att_mtu: usize) {
        let payload_size = att_mtu
            .saturating_sub(ATT_HEADER_SIZE)
            .max(MIN_PAYLOAD_SIZE);
        debug!(
            "MTU for {} changed to {}, payload size {}",
            target, att_mtu, payload_size
        );
        self.workspace(target).state.lock().payload_size = Some(payload_size);
    }

    /// Forget per-peer state, typically after a disconnect.
    pub fn remove(&self, target: &OperationTarget) {
        let removed = self.workspaces.lock().remove(target);
        if let Some(workspace) = removed {
            let mut state = workspace.state.lock();
            if state.current_operation.is_some() {
                state.pending_error = Some(GattError::NotConnected);
                if let Some(waiter) = state.waiter.take() {
                    let _ = waiter.send(());
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Operation Lifecycle
    // ------------------------------------------------------------------------

    /// Run one operation against `target` and wait for its completion event.
    ///
    /// `start` asks the transport to begin the operation. It is only invoked
    /// once every earlier operation on the same target has finished.
    pub async fn execute<F>(
        &self,
        target: &OperationTarget,
        op: OperationKind,
        expected_uuid: Option<Uuid>,
        start: F,
    ) -> GattResult<()>
    where
        F: FnOnce() -> GattResult<()>,
    {
        let workspace = self.workspace(target);
        let _gate = workspace.gate.lock().await;

        let (tx, rx) = oneshot::channel();
        {
            let mut state = workspace.state.lock();
            state.current_operation = Some(op);
            state.expected_uuid = expected_uuid;
            state.pending_error = None;
            state.waiter = Some(tx);
        }
        let _guard = OperationGuard {
            workspace: &workspace,
        };

        if self.log.operation_log {
            debug!("Start operation [{}] on {} ({:?})", op, target, expected_uuid);
        }
        let started = Instant::now();

        if let Err(error) = start() {
            warn!("Failed to start operation [{}] on {}: {}", op, target, error);
            return Err(error);
        }

        if tokio::time::timeout(self.operation_timeout, rx).await.is_err() {
            let timeout_ms = self.operation_timeout.as_millis() as u64;
            warn!(
                "Operation[{}] for {}/{:?} timeout after {}ms",
                op, target, expected_uuid, timeout_ms
            );
            return Err(GattError::OperationTimeout {
                op,
                target: *target,
                characteristic: expected_uuid,
                timeout_ms,
            });
        }

        let outcome = workspace.state.lock().pending_error.take();
        if self.log.operation_log {
            debug!(
                "Operation [{}] on {} finished in {}ms",
                op,
                target,
                started.elapsed().as_millis()
            );
        }
        match outcome {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Same as [`execute`](Self::execute) for operations on the local adapter.
    pub async fn execute_local<F>(
        &self,
        op: OperationKind,
        expected_uuid: Option<Uuid>,
        start: F,
    ) -> GattResult<()>
    where
        F: FnOnce() -> GattResult<()>,
    {
        self.execute(&OperationTarget::Adapter, op, expected_uuid, start)
            .await
    }

    /// Deliver the completion event of an operation on `target`.
    pub fn resolve(
        &self,
        target: &OperationTarget,
        op: OperationKind,
        status: GattStatus,
        uuid: Option<Uuid>,
    ) {
        let outcome = check_status(target, op, status);
        let workspace = self.workspace(target);
        let mut state = workspace.state.lock();

        if let (Some(reported), Some(expected)) = (uuid, state.expected_uuid) {
            if reported != expected {
                warn!(
                    "Unexpected UUID [{}] for operation [{}] on {}, expected [{}]",
                    reported, op, target, expected
                );
            }
        }
        match state.current_operation {
            Some(current) if current != op => warn!(
                "Unexpected result of operation [{}] while doing [{}] on {}",
                op, current, target
            ),
            None => {
                warn!(
                    "Result of operation [{}] on {} with no operation in flight ({})",
                    op, target, status
                );
                return;
            }
            _ => {}
        }

        if let Err(error) = outcome {
            warn!("Operation [{}] on {} failed: {}", op, target, error);
            state.pending_error = Some(error);
        }
        state.current_operation = None;
        if let Some(waiter) = state.waiter.take() {
            let _ = waiter.send(());
        }
    }

    /// Fail whatever is in flight on `target`. Returns whether anything was.
    pub fn fail_in_flight(&self, target: &OperationTarget, error: GattError) -> bool {
        let workspace = self.workspace(target);
        let mut state = workspace.state.lock();
        let Some(op) = state.current_operation.take() else {
            return false;
        };
        debug!("Failing in-flight operation [{}] on {}: {}", op, target, error);
        state.pending_error = Some(error);
        if let Some(waiter) = state.waiter.take() {
            let _ = waiter.send(());
        }
        true
    }

    /// Fail every in-flight operation, e.g. when a server shuts down.
    pub fn fail_all(&self, error: GattError) {
        let targets: Vec<OperationTarget> = self.workspaces.lock().keys().copied().collect();
        for target in targets {
            self.fail_in_flight(&target, error.clone());
        }
    }
}

fn check_status(target: &OperationTarget, op: OperationKind, status: GattStatus) -> GattResult<()> {
    match status {
        GattStatus::SUCCESS => Ok(()),
        GattStatus::INSUFFICIENT_ENCRYPTION => {
            Err(GattError::InsufficientEncryption { target: *target })
        }
        _ => Err(GattError::OperationFailed {
            op,
            target: *target,
            status,
        }),
    }
}
