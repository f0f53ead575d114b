//! The robot-control service seam.
//!
//! The bridge never speaks directly to the robot server.  It issues
//! [`RobotCall`]s through a [`RobotAdapter`] and observes their completion
//! through the returned [`OperationHandle`].
//!
//! # Overview
//!
//! - [`RobotAdapter`] – the trait every robot transport implements.
//! - [`WsRobotClient`][crate::robot_client::WsRobotClient] – JSON over
//!   WebSocket to a live robot server.
//! - [`SimRobotAdapter`][crate::sim_adapter::SimRobotAdapter] – in-memory
//!   robot used by tests and `--simulate` mode.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use robodhs_types::{AdapterError, OperationId, OperationOutcome, RobotCall, StateEvent, reason};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Every robot transport must implement this trait.
///
/// # Contract
///
/// * `invoke` – returns as soon as the call is accepted, never waiting for
///   the robot to finish.  Fails with [`AdapterError::Unavailable`] when there
///   is no link to the robot server; no retry happens at this layer.
///
/// * `subscribe` – a live stream of unsolicited [`StateEvent`]s for as long
///   as the adapter exists.
///
/// * `cancel` – best-effort request to abandon an outstanding operation.  The
///   operation still resolves exactly once.  Transports release whatever
///   they keep for routing the operation's result.
///
/// * `request_snapshot` – ask the robot to re-publish its full state on the
///   notification stream.  Transports without such a request keep the
///   default no-op.
#[async_trait]
pub trait RobotAdapter: Send + Sync {
    async fn invoke(&self, call: RobotCall) -> Result<OperationHandle, AdapterError>;

    async fn subscribe(&self) -> BoxStream<'static, StateEvent>;

    async fn cancel(&self, id: OperationId);

    async fn request_snapshot(&self) {}

    fn is_connected(&self) -> bool;
}

/// Handle to one accepted robot operation.
#[derive(Debug)]
pub struct OperationHandle {
    id: OperationId,
    issued_at: Instant,
    outcome: oneshot::Receiver<OperationOutcome>,
}

/// Sending half kept by the adapter; resolving consumes it so an operation
/// can only resolve once.
#[derive(Debug)]
pub struct OperationResolver {
    id: OperationId,
    tx: oneshot::Sender<OperationOutcome>,
}

impl OperationHandle {
    /// Create a linked handle / resolver pair for a freshly issued operation.
    pub fn channel(id: OperationId) -> (OperationHandle, OperationResolver) {
        let (tx, rx) = oneshot::channel();
        (
            OperationHandle {
                id,
                issued_at: Instant::now(),
                outcome: rx,
            },
            OperationResolver { id, tx },
        )
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    /// Wait for the resolution, bounded by `deadline` measured from issue
    /// time.
    ///
    /// Exceeding the deadline yields [`OperationOutcome::TimedOut`].  If the
    /// adapter drops the operation without resolving it (e.g. the robot link
    /// died) the outcome is a `robot_connection_lost` failure.
    pub async fn wait(self, deadline: Duration) -> OperationOutcome {
        match tokio::time::timeout_at(self.issued_at + deadline, self.outcome).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => OperationOutcome::Failed {
                reason: reason::ROBOT_CONNECTION_LOST.to_string(),
            },
            Err(_) => OperationOutcome::TimedOut,
        }
    }
}

impl OperationResolver {
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Deliver the outcome.  Returns `false` when nobody is waiting any more.
    pub fn resolve(self, outcome: OperationOutcome) -> bool {
        self.tx.send(outcome).is_ok()
    }
}
