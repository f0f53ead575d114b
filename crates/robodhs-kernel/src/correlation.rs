//! [`CorrelationTable`] – command lifecycle and completion matching.
//!
//! One table exists per session epoch.  It maps each DCSS correlation token
//! to its [`Command`] and each outstanding robot [`OperationId`] back to the
//! token that issued it.
//!
//! ```text
//!   begin ──► Received ──dispatch──► Dispatched ──resolve(all ok)──► Completed
//!                │                        │
//!                │                        └──resolve(any failure)──► Failed
//!                └──────────────rollover / abort_all─────────────► Aborted
//! ```
//!
//! Terminal commands leave the table immediately, together with every
//! operation id they owned, so a late completion for a sibling operation
//! finds nothing and is inert.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use robodhs_types::{BridgeError, CommandState, Epoch, OperationId, OperationOutcome, Token};
use tracing::debug;

/// Result word of a command that completed with no robot message.
pub const DEFAULT_RESULT: &str = "OK";

/// One robot call issued on behalf of a [`Command`].
#[derive(Debug, Clone)]
struct SubOperation {
    id: OperationId,
    done: bool,
    message: Option<String>,
}

/// An inbound request awaiting its terminal reply.
#[derive(Debug, Clone)]
pub struct Command {
    pub token: Token,
    /// DCSS operation name, echoed in the reply.
    pub operation: String,
    pub target: Option<String>,
    pub state: CommandState,
    pub received_at: DateTime<Utc>,
    ops: Vec<SubOperation>,
}

impl Command {
    /// Robot operations not yet resolved.
    pub fn outstanding(&self) -> Vec<OperationId> {
        self.ops.iter().filter(|op| !op.done).map(|op| op.id).collect()
    }
}

/// Terminal result for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Completed { result: String },
    Failed { reason: String },
}

/// What the dispatcher must do after a command reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub token: Token,
    pub operation: String,
    pub verdict: Verdict,
    /// Sibling operations still running; cancel them best-effort.
    pub cancel: Vec<OperationId>,
}

/// Per-epoch token → command map.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    epoch: Epoch,
    commands: HashMap<Token, Command>,
    ops: HashMap<OperationId, Token>,
}

impl CorrelationTable {
    pub fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            ..Self::default()
        }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Number of unresolved commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of robot operations still mapped to a command.
    pub fn outstanding_operations(&self) -> usize {
        self.ops.len()
    }

    pub fn state(&self, token: &Token) -> Option<CommandState> {
        self.commands.get(token).map(|c| c.state)
    }

    pub fn get(&self, token: &Token) -> Option<&Command> {
        self.commands.get(token)
    }

    /// Record a freshly received command.
    ///
    /// A token that is still unresolved in this epoch is a protocol
    /// violation; the existing command is left untouched.
    pub fn begin(
        &mut self,
        token: Token,
        operation: impl Into<String>,
        target: Option<String>,
    ) -> Result<(), BridgeError> {
        if self.commands.contains_key(&token) {
            return Err(BridgeError::DuplicateToken(token));
        }
        let command = Command {
            token: token.clone(),
            operation: operation.into(),
            target,
            state: CommandState::Received,
            received_at: Utc::now(),
            ops: Vec::new(),
        };
        self.commands.insert(token, command);
        Ok(())
    }

    /// Attach the accepted robot operations, in declaration order.
    ///
    /// With no operations the command completes on the spot and its
    /// [`Resolution`] is returned.  Unknown tokens are ignored.
    pub fn dispatch(&mut self, token: &Token, ids: Vec<OperationId>) -> Option<Resolution> {
        if ids.is_empty() {
            let command = self.commands.remove(token)?;
            return Some(Resolution {
                token: command.token,
                operation: command.operation,
                verdict: Verdict::Completed {
                    result: DEFAULT_RESULT.to_string(),
                },
                cancel: Vec::new(),
            });
        }

        let command = self.commands.get_mut(token)?;
        for id in &ids {
            self.ops.insert(*id, token.clone());
        }
        command.ops = ids
            .into_iter()
            .map(|id| SubOperation {
                id,
                done: false,
                message: None,
            })
            .collect();
        command.state = CommandState::Dispatched;
        None
    }

    /// Fail a command before or after dispatch (e.g. the robot refused a
    /// call).  Returns `None` if the token is not in the table.
    pub fn fail(&mut self, token: &Token, reason: impl Into<String>) -> Option<Resolution> {
        let command = self.commands.remove(token)?;
        Some(self.finish(command, Verdict::Failed {
            reason: reason.into(),
        }))
    }

    /// Route a robot operation outcome to its command.
    ///
    /// Returns a [`Resolution`] when the command became terminal.  Unknown
    /// ids (stale, or siblings of an already failed command) are inert.
    pub fn resolve(&mut self, id: OperationId, outcome: OperationOutcome) -> Option<Resolution> {
        let Some(token) = self.ops.remove(&id) else {
            debug!(operation_id = %id, "completion for unknown operation ignored");
            return None;
        };
        let command = self.commands.get_mut(&token)?;

        // The resolved operation is never a sibling to cancel.
        let failure = outcome.failure_reason().map(str::to_string);
        if let Some(op) = command.ops.iter_mut().find(|op| op.id == id) {
            op.done = true;
            if let OperationOutcome::Succeeded { message } = outcome {
                op.message = message;
            }
        }

        if let Some(reason) = failure {
            let command = self.commands.remove(&token)?;
            return Some(self.finish(command, Verdict::Failed { reason }));
        }
        if command.ops.iter().any(|op| !op.done) {
            return None;
        }

        let command = self.commands.remove(&token)?;
        let result = command
            .ops
            .last()
            .and_then(|op| op.message.clone())
            .unwrap_or_else(|| DEFAULT_RESULT.to_string());
        Some(self.finish(command, Verdict::Completed { result }))
    }

    /// Abort every unresolved command, leaving the table empty.
    ///
    /// Aborted commands produce no reply; the caller logs them.
    pub fn abort_all(&mut self) -> Vec<Command> {
        self.ops.clear();
        self.commands
            .drain()
            .map(|(_, mut command)| {
                command.state = CommandState::Aborted;
                command
            })
            .collect()
    }

    /// Start `epoch` with an empty table, aborting what the old one held.
    pub fn rollover(&mut self, epoch: Epoch) -> Vec<Command> {
        let aborted = self.abort_all();
        self.epoch = epoch;
        aborted
    }

    fn finish(&mut self, command: Command, verdict: Verdict) -> Resolution {
        let cancel = command.outstanding();
        for op in &command.ops {
            self.ops.remove(&op.id);
        }
        Resolution {
            token: command.token,
            operation: command.operation,
            verdict,
            cancel,
        }
    }
}
