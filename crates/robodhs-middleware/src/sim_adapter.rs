//! In-memory simulated robot.
//!
//! [`SimRobotAdapter`] stands in for the robot-control service:
//!
//! * **Manual mode** – every accepted call stays pending until the test (or
//!   operator) resolves it with [`SimRobotAdapter::resolve`] /
//!   [`SimRobotAdapter::resolve_next`].
//!
//! * **Auto mode** – every call succeeds after a fixed delay and a
//!   `task_message` [`StateEvent`] announcing the completion is broadcast.
//!   Used by `robodhs --simulate`.
//!
//! State notifications can be injected at any time with
//! [`SimRobotAdapter::emit`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use robodhs_types::{AdapterError, OperationId, OperationOutcome, RobotCall, StateEvent};
use tokio::sync::{Notify, broadcast};
use tracing::{debug, warn};

use crate::adapter::{OperationHandle, OperationResolver, RobotAdapter};

/// Default capacity of the notification broadcast channel.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimMode {
    Manual,
    AutoSucceed { delay: Duration },
}

struct PendingCall {
    id: OperationId,
    call: RobotCall,
    resolver: OperationResolver,
}

#[derive(Default)]
struct SimState {
    pending: Vec<PendingCall>,
    history: Vec<RobotCall>,
    cancelled: Vec<OperationId>,
    snapshot_requests: usize,
}

/// Simulated robot-control service.  Clone it cheaply – all clones share the
/// same robot.
#[derive(Clone)]
pub struct SimRobotAdapter {
    mode: SimMode,
    state: Arc<Mutex<SimState>>,
    events: broadcast::Sender<StateEvent>,
    connected: Arc<AtomicBool>,
    changed: Arc<Notify>,
}

impl SimRobotAdapter {
    /// A connected robot whose operations wait for explicit resolution.
    pub fn new() -> Self {
        Self::with_mode(SimMode::Manual)
    }

    /// A connected robot that completes every operation after `delay`.
    pub fn auto(delay: Duration) -> Self {
        Self::with_mode(SimMode::AutoSucceed { delay })
    }

    fn with_mode(mode: SimMode) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            mode,
            state: Arc::new(Mutex::new(SimState::default())),
            events,
            connected: Arc::new(AtomicBool::new(true)),
            changed: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate the link to the robot server going up or down.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every call accepted so far, in order.
    pub fn history(&self) -> Vec<RobotCall> {
        self.lock().history.clone()
    }

    /// Calls accepted but not yet resolved, oldest first.
    pub fn pending(&self) -> Vec<(OperationId, RobotCall)> {
        self.lock()
            .pending
            .iter()
            .map(|p| (p.id, p.call.clone()))
            .collect()
    }

    /// Operations the bridge asked to cancel.
    pub fn cancelled(&self) -> Vec<OperationId> {
        self.lock().cancelled.clone()
    }

    /// Resolve the pending operation `id`.  Returns `false` when `id` is not
    /// pending.
    pub fn resolve(&self, id: OperationId, outcome: OperationOutcome) -> bool {
        let entry = {
            let mut state = self.lock();
            let Some(index) = state.pending.iter().position(|p| p.id == id) else {
                return false;
            };
            state.pending.remove(index)
        };
        debug!(operation_id = %id, ?outcome, "sim robot resolving operation");
        entry.resolver.resolve(outcome);
        self.changed.notify_waiters();
        true
    }

    /// Resolve the oldest pending operation.
    pub fn resolve_next(&self, outcome: OperationOutcome) -> Option<OperationId> {
        let id = self.lock().pending.first().map(|p| p.id)?;
        self.resolve(id, outcome).then_some(id)
    }

    /// Broadcast an unsolicited notification to every subscriber.
    ///
    /// Returns the number of subscribers that received it.
    pub fn emit(&self, event: StateEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    /// Wait until at least `count` operations are pending.
    pub async fn wait_for_pending(&self, count: usize) {
        loop {
            let notified = self.changed.notified();
            if self.lock().pending.len() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Wait until at least `count` cancellations have been requested.
    pub async fn wait_for_cancelled(&self, count: usize) {
        loop {
            let notified = self.changed.notified();
            if self.lock().cancelled.len() >= count {
                return;
            }
            notified.await;
        }
    }

    /// How often the bridge asked for a full state snapshot.
    pub fn snapshot_requests(&self) -> usize {
        self.lock().snapshot_requests
    }

    /// Number of live notification subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for SimRobotAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RobotAdapter for SimRobotAdapter {
    async fn invoke(&self, call: RobotCall) -> Result<OperationHandle, AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::Unavailable(
                "simulated robot is disconnected".to_string(),
            ));
        }

        let id = OperationId::new();
        let (handle, resolver) = OperationHandle::channel(id);
        debug!(operation_id = %id, operation = %call.operation, "sim robot accepted call");

        match self.mode {
            SimMode::Manual => {
                let mut state = self.lock();
                state.history.push(call.clone());
                state.pending.push(PendingCall { id, call, resolver });
            }
            SimMode::AutoSucceed { delay } => {
                self.lock().history.push(call.clone());
                let events = self.events.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    resolver.resolve(OperationOutcome::Succeeded { message: None });
                    let message = format!("INFO {} finished", call.operation);
                    let _ = events.send(StateEvent::new("task_message", None, message));
                });
            }
        }
        self.changed.notify_waiters();
        Ok(handle)
    }

    async fn subscribe(&self) -> BoxStream<'static, StateEvent> {
        let rx = self.events.subscribe();
        Box::pin(stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(lagged_by = n, "sim robot subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }))
    }

    async fn cancel(&self, id: OperationId) {
        self.lock().cancelled.push(id);
        self.changed.notify_waiters();
    }

    async fn request_snapshot(&self) {
        self.lock().snapshot_requests += 1;
        self.changed.notify_waiters();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
