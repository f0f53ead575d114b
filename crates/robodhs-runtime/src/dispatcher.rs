//! [`Dispatcher`] – the bridge's single serialised processing point.
//!
//! Inbound DCSS frames, robot operation completions and session lifecycle
//! changes all arrive as [`DispatchMsg`]s on one channel and are handled one
//! at a time, so the [`CorrelationTable`] is only ever touched from here.
//!
//! Robot calls are issued in-line (`invoke` returns once the call is
//! accepted); waiting for each outcome happens in a small spawned task that
//! posts a [`DispatchMsg::Completion`] back when the operation resolves or
//! its deadline passes.

use std::sync::Arc;
use std::time::Duration;

use robodhs_kernel::translator;
use robodhs_kernel::{CorrelationTable, Resolution, Verdict};
use robodhs_middleware::{OperationHandle, RobotAdapter};
use robodhs_types::{
    CompletionStatus, Epoch, Frame, OperationId, OperationOutcome, Token, reason, tags,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::outbound::Outbound;
use crate::status::StatusBoard;

/// Everything the dispatcher reacts to.
#[derive(Debug)]
pub enum DispatchMsg {
    /// A new session connected; start a fresh epoch.
    SessionUp(Epoch),
    /// The session of `epoch` is gone.
    SessionDown(Epoch),
    /// A command-level frame received during `epoch`.
    Inbound { epoch: Epoch, frame: Frame },
    /// A robot operation issued during `epoch` resolved.
    Completion {
        epoch: Epoch,
        operation_id: OperationId,
        outcome: OperationOutcome,
    },
    /// Stop accepting new commands; in-flight ones continue.
    Drain,
}

/// Sending half used by the session manager and the coordinator.
pub type DispatchSender = mpsc::UnboundedSender<DispatchMsg>;

pub struct Dispatcher {
    adapter: Arc<dyn RobotAdapter>,
    outbound: Outbound,
    status: StatusBoard,
    /// Command shown as the robot's state in `robot_status`.
    foreground: Option<Token>,
    table: CorrelationTable,
    rx: mpsc::UnboundedReceiver<DispatchMsg>,
    tx: DispatchSender,
    operation_timeout: Duration,
    draining: bool,
    in_flight: watch::Sender<usize>,
}

impl Dispatcher {
    /// Build a dispatcher and the channel feeding it.
    pub fn new(
        adapter: Arc<dyn RobotAdapter>,
        outbound: Outbound,
        status: StatusBoard,
        operation_timeout: Duration,
    ) -> (Self, DispatchSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (in_flight, _) = watch::channel(0);
        let dispatcher = Self {
            adapter,
            outbound,
            status,
            foreground: None,
            table: CorrelationTable::default(),
            rx,
            tx: tx.clone(),
            operation_timeout,
            draining: false,
            in_flight,
        };
        (dispatcher, tx)
    }

    /// Number of unresolved commands, updated after every message.
    pub fn in_flight(&self) -> watch::Receiver<usize> {
        self.in_flight.subscribe()
    }

    /// Process messages until `teardown` fires.
    pub async fn run(mut self, teardown: CancellationToken) {
        loop {
            let msg = tokio::select! {
                _ = teardown.cancelled() => break,
                msg = self.rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            self.handle(msg).await;
            self.in_flight.send_replace(self.table.len());
        }

        for command in self.table.abort_all() {
            warn!(
                epoch = %self.table.epoch(),
                token = %command.token,
                op = %command.operation,
                "command aborted at shutdown"
            );
        }
        self.in_flight.send_replace(0);
    }

    async fn handle(&mut self, msg: DispatchMsg) {
        match msg {
            DispatchMsg::SessionUp(epoch) => {
                let aborted = self.table.rollover(epoch);
                for command in &aborted {
                    info!(%epoch, token = %command.token, op = %command.operation, "command aborted by session supersession");
                }
                debug!(%epoch, aborted = aborted.len(), "correlation table reset");
                self.set_foreground(None);
            }
            DispatchMsg::SessionDown(epoch) => {
                if epoch != self.table.epoch() {
                    return;
                }
                for command in self.table.abort_all() {
                    info!(%epoch, token = %command.token, op = %command.operation, "command aborted by session loss");
                }
                self.set_foreground(None);
            }
            DispatchMsg::Inbound { epoch, frame } => {
                if epoch != self.table.epoch() {
                    debug!(%epoch, current = %self.table.epoch(), op = %frame.operation, "frame from superseded session dropped");
                    return;
                }
                self.inbound(frame).await;
            }
            DispatchMsg::Completion {
                epoch,
                operation_id,
                outcome,
            } => {
                if epoch != self.table.epoch() {
                    debug!(%epoch, %operation_id, "stale completion discarded");
                    return;
                }
                if let Some(resolution) = self.table.resolve(operation_id, outcome) {
                    self.finish(resolution).await;
                }
            }
            DispatchMsg::Drain => {
                info!(in_flight = self.table.len(), "draining: new commands are refused");
                self.draining = true;
            }
        }
    }

    async fn inbound(&mut self, frame: Frame) {
        match frame.operation.as_str() {
            tags::STOH_START_OPERATION => self.start(frame).await,
            tags::STOH_REGISTER_OPERATION => {
                let name = frame.arg(0).unwrap_or_default();
                if translator::supports(name) {
                    debug!(op = name, "operation registered");
                } else {
                    warn!(op = name, "control system registered an operation this bridge does not handle");
                }
            }
            tags::STOH_REGISTER_STRING => {
                debug!(string = frame.arg(0).unwrap_or_default(), "string registered");
            }
            tags::STOH_ABORT_ALL => {
                info!(in_flight = self.table.len(), "abort requested; running robot operations are left to finish");
            }
            other => debug!(op = other, "frame ignored"),
        }
    }

    async fn start(&mut self, frame: Frame) {
        let epoch = self.table.epoch();
        let (Some(token), Some(op)) = (frame.token.clone(), frame.arg(0)) else {
            warn!(?frame, "start_operation without operation handle");
            return;
        };
        let op = op.to_string();
        let args = &frame.args[1..];

        if self.table.get(&token).is_some() {
            warn!(%epoch, %token, %op, "duplicate operation handle rejected");
            self.reply_error(&op, token, reason::DUPLICATE_TOKEN);
            return;
        }
        if self.draining {
            warn!(%epoch, %token, %op, "command refused while draining");
            self.reply_error(&op, token, reason::SHUTTING_DOWN);
            return;
        }

        let plan = match translator::translate(&op, args) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(%epoch, %token, %op, error = %e, "command rejected");
                self.reply_error(&op, token, e.reason());
                return;
            }
        };

        if let Err(e) = self.table.begin(token.clone(), op.clone(), plan.target.clone()) {
            warn!(%epoch, %token, %op, error = %e, "command rejected");
            self.reply_error(&op, token, reason::DUPLICATE_TOKEN);
            return;
        }
        info!(%epoch, %token, %op, target = ?plan.target, calls = plan.calls.len(), "command received");

        if plan.clears_fault {
            info!(%epoch, %token, "fault state cleared by operator");
            self.outbound.send_unsolicited(self.status.clear_fault());
        }
        if !plan.calls.is_empty() {
            self.set_foreground(Some((token.clone(), op.clone())));
        }

        if let Some(update) = &plan.update {
            self.outbound
                .send_reply(epoch, Frame::operation_update(&op, token.clone(), update));
        }

        let mut handles: Vec<OperationHandle> = Vec::with_capacity(plan.calls.len());
        for call in plan.calls {
            let robot_op = call.operation.clone();
            match self.adapter.invoke(call).await {
                Ok(handle) => {
                    debug!(%token, operation_id = %handle.id(), robot_op = %robot_op, "robot call accepted");
                    handles.push(handle);
                }
                Err(e) => {
                    warn!(%epoch, %token, %op, robot_op = %robot_op, error = %e, "robot call refused");
                    for handle in &handles {
                        self.adapter.cancel(handle.id()).await;
                    }
                    if let Some(resolution) = self.table.fail(&token, reason::ROBOT_UNAVAILABLE) {
                        self.finish(resolution).await;
                    }
                    return;
                }
            }
        }

        let ids = handles.iter().map(OperationHandle::id).collect();
        if let Some(resolution) = self.table.dispatch(&token, ids) {
            self.finish(resolution).await;
            return;
        }

        for handle in handles {
            let tx = self.tx.clone();
            let adapter = Arc::clone(&self.adapter);
            let deadline = self.operation_timeout;
            tokio::spawn(async move {
                let operation_id = handle.id();
                let outcome = handle.wait(deadline).await;
                if outcome == OperationOutcome::TimedOut {
                    // Releases whatever the adapter still holds for it.
                    adapter.cancel(operation_id).await;
                }
                let _ = tx.send(DispatchMsg::Completion {
                    epoch,
                    operation_id,
                    outcome,
                });
            });
        }
    }

    async fn finish(&mut self, resolution: Resolution) {
        let epoch = self.table.epoch();
        if self.foreground.as_ref() == Some(&resolution.token) {
            self.set_foreground(None);
        }
        for id in &resolution.cancel {
            debug!(%epoch, token = %resolution.token, operation_id = %id, "cancelling sibling operation");
            self.adapter.cancel(*id).await;
        }

        let frame = match &resolution.verdict {
            Verdict::Completed { result } => {
                info!(%epoch, token = %resolution.token, op = %resolution.operation, %result, "command completed");
                completed(&resolution.operation, resolution.token.clone(), CompletionStatus::Normal, result)
            }
            Verdict::Failed { reason } => {
                warn!(%epoch, token = %resolution.token, op = %resolution.operation, %reason, "command failed");
                completed(&resolution.operation, resolution.token.clone(), CompletionStatus::Error, reason)
            }
        };
        if !self.outbound.send_reply(epoch, frame) {
            warn!(%epoch, token = %resolution.token, "reply dropped: session gone");
        }
    }

    /// Track the command driving the robot and refresh `robot_status`.
    fn set_foreground(&mut self, command: Option<(Token, String)>) {
        let (token, op) = command.unzip();
        self.foreground = token;
        if let Some(frame) = self.status.set_foreground(op.as_deref()) {
            self.outbound.send_unsolicited(frame);
        }
    }

    fn reply_error(&self, op: &str, token: Token, reason: &str) {
        let frame = Frame::operation_completed(op, token, CompletionStatus::Error, &[reason]);
        self.outbound.send_reply(self.table.epoch(), frame);
    }
}

fn completed(op: &str, token: Token, status: CompletionStatus, message: &str) -> Frame {
    let mut words: Vec<&str> = message.split_whitespace().collect();
    if words.is_empty() {
        words.push(robodhs_kernel::correlation::DEFAULT_RESULT);
    }
    Frame::operation_completed(op, token, status, &words)
}
