use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Message tags of the DCSS text protocol understood by the bridge.
pub mod tags {
    pub const STOC_SEND_CLIENT_TYPE: &str = "stoc_send_client_type";
    pub const STOH_REGISTER_OPERATION: &str = "stoh_register_operation";
    pub const STOH_REGISTER_STRING: &str = "stoh_register_string";
    pub const STOH_START_OPERATION: &str = "stoh_start_operation";
    pub const STOH_ABORT_ALL: &str = "stoh_abort_all";
    pub const STOH_HEARTBEAT: &str = "stoh_heartbeat";

    pub const HTOS_CLIENT_IS_HARDWARE: &str = "htos_client_is_hardware";
    pub const HTOS_OPERATION_COMPLETED: &str = "htos_operation_completed";
    pub const HTOS_OPERATION_UPDATE: &str = "htos_operation_update";
    pub const HTOS_SET_STRING_COMPLETED: &str = "htos_set_string_completed";
    pub const HTOS_LOG: &str = "htos_log";
    pub const HTOS_HEARTBEAT: &str = "htos_heartbeat";
}

/// Reason codes carried by failure replies.
pub mod reason {
    pub const DUPLICATE_TOKEN: &str = "duplicate_token";
    pub const ROBOT_UNAVAILABLE: &str = "robot_unavailable";
    pub const ROBOT_CONNECTION_LOST: &str = "robot_connection_lost";
    pub const TIMEOUT: &str = "timeout";
    pub const UNSUPPORTED_OPERATION: &str = "unsupported_operation";
    pub const UNSUPPORTED_TASK: &str = "unsupported_task";
    pub const NOT_IMPLEMENTED: &str = "not_implemented";
    pub const BAD_ARGUMENT: &str = "bad_argument";
    pub const SHUTTING_DOWN: &str = "shutting_down";
    pub const CANCELLED: &str = "cancelled";
}

/// Which side of the bridge a [`Frame`] travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Control system → bridge (`stoh_*` / `stoc_*`).
    Inbound,
    /// Bridge → control system (`htos_*`).
    Outbound,
}

/// Correlation token linking an inbound command to its reply.
///
/// For DCSS this is the operation handle (e.g. `"1.7"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lifetime of one control-system connection. Every reconnect starts a new
/// epoch and invalidates the state of the previous one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Epoch(pub u64);

impl Epoch {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable parsed unit of the control-system wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub direction: Direction,
    /// Message tag, e.g. `stoh_start_operation`.
    pub operation: String,
    /// Positional arguments, excluding the correlation token.
    pub args: Vec<String>,
    pub token: Option<Token>,
}

/// Status word of an `htos_operation_completed` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Normal,
    Error,
    Aborted,
}

impl CompletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::Normal => "normal",
            CompletionStatus::Error => "error",
            CompletionStatus::Aborted => "aborted",
        }
    }
}

/// Severity word of an `htos_log` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Note,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Note => "note",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl Frame {
    pub fn inbound(operation: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            direction: Direction::Inbound,
            operation: operation.into(),
            args,
            token: None,
        }
    }

    pub fn outbound(operation: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            direction: Direction::Outbound,
            operation: operation.into(),
            args,
            token: None,
        }
    }

    /// Attach a correlation token (builder-style).
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// `htos_client_is_hardware <name>` – registration with DCSS.
    pub fn client_is_hardware(name: &str) -> Self {
        Self::outbound(tags::HTOS_CLIENT_IS_HARDWARE, vec![name.to_string()])
    }

    /// `htos_heartbeat <seq>` – liveness frame.
    pub fn heartbeat(seq: u64) -> Self {
        Self::outbound(tags::HTOS_HEARTBEAT, vec![seq.to_string()])
    }

    /// Terminal reply for the DCSS operation `op` identified by `token`.
    ///
    /// `words` are appended verbatim after the status word, one argument per
    /// word, so `["reason", "jam"]` encodes as `... error reason jam`.
    pub fn operation_completed(
        op: &str,
        token: Token,
        status: CompletionStatus,
        words: &[&str],
    ) -> Self {
        let mut args = vec![op.to_string(), status.as_str().to_string()];
        args.extend(words.iter().map(|w| w.to_string()));
        Self::outbound(tags::HTOS_OPERATION_COMPLETED, args).with_token(token)
    }

    /// Non-terminal progress message for an in-flight operation.
    pub fn operation_update(op: &str, token: Token, message: &str) -> Self {
        let mut args = vec![op.to_string()];
        args.extend(message.split_whitespace().map(str::to_string));
        Self::outbound(tags::HTOS_OPERATION_UPDATE, args).with_token(token)
    }

    /// `htos_set_string_completed <name> normal <value…>`.
    pub fn set_string(name: &str, values: Vec<String>) -> Self {
        let mut args = vec![name.to_string(), "normal".to_string()];
        args.extend(values);
        Self::outbound(tags::HTOS_SET_STRING_COMPLETED, args)
    }

    /// `htos_log <level> <message words>`.
    pub fn log(level: LogLevel, message: &str) -> Self {
        let mut args = vec![level.as_str().to_string()];
        args.extend(message.split_whitespace().map(str::to_string));
        Self::outbound(tags::HTOS_LOG, args)
    }
}

/// Sample-holder position inside the robot dewar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Middle,
    Right,
}

impl Position {
    pub const ALL: [Position; 3] = [Position::Left, Position::Middle, Position::Right];

    /// Parse the single-letter DCSS cassette code (`l`, `m`, `r`).
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "l" => Some(Position::Left),
            "m" => Some(Position::Middle),
            "r" => Some(Position::Right),
            _ => None,
        }
    }

    pub fn code(&self) -> char {
        match self {
            Position::Left => 'l',
            Position::Middle => 'm',
            Position::Right => 'r',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Left => "left",
            Position::Middle => "middle",
            Position::Right => "right",
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// A sample port addressed the way DCSS does: cassette, row, column letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SamplePort {
    pub position: Position,
    pub row: u32,
    pub column: char,
}

impl fmt::Display for SamplePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.position.code(), self.row, self.column)
    }
}

/// Identifier of one outstanding call against the robot-control service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single request against the robot-control service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotCall {
    /// Robot operation name, e.g. `"mount"` or `"reset_ports"`.
    pub operation: String,
    /// Target entity (position, output, calibration target …), if any.
    pub target: Option<String>,
    /// Operation-specific parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl RobotCall {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            target: None,
            params: serde_json::Value::Null,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// Final resolution of a robot operation. Every issued operation resolves
/// exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationOutcome {
    Succeeded { message: Option<String> },
    Failed { reason: String },
    TimedOut,
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Succeeded { .. })
    }

    /// Reason code reported to the control system for a failed outcome.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            OperationOutcome::Succeeded { .. } => None,
            OperationOutcome::Failed { reason } => Some(reason),
            OperationOutcome::TimedOut => Some(reason::TIMEOUT),
        }
    }
}

/// Unsolicited state-change notification from the robot-control service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"robot_status"`, `"lid_open"`, `"task_message"`.
    pub entity: String,
    pub old: Option<String>,
    pub new: String,
    pub fault: bool,
}

impl StateEvent {
    pub fn new(entity: impl Into<String>, old: Option<String>, new: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            entity: entity.into(),
            old,
            new: new.into(),
            fault: false,
        }
    }

    pub fn fault(entity: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            fault: true,
            ..Self::new(entity, None, new)
        }
    }
}

/// Lifecycle of one inbound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandState {
    Received,
    Dispatched,
    Completed,
    Failed,
    Aborted,
}

impl CommandState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandState::Completed | CommandState::Failed | CommandState::Aborted
        )
    }
}

/// Connectivity status of the control-system session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SessionState {
    Disconnected = 0,
    Connecting = 1,
    Registered = 2,
    Active = 3,
}

impl SessionState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Connecting,
            2 => SessionState::Registered,
            3 => SessionState::Active,
            _ => SessionState::Disconnected,
        }
    }
}

/// A frame that could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte stream can no longer be trusted; the session must end.
    #[error("framing corruption: {reason} (raw: {raw:?})")]
    Framing { raw: String, reason: String },

    #[error("unknown operation in frame {raw:?}")]
    UnknownOperation { raw: String },

    #[error("malformed frame {raw:?}: {reason}")]
    Malformed { raw: String, reason: String },

    #[error("transport error: {0}")]
    Io(String),
}

impl ProtocolError {
    /// `true` when the session must be terminated rather than the single
    /// frame dropped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::Framing { .. } | ProtocolError::Io(_))
    }

    pub fn raw(&self) -> Option<&str> {
        match self {
            ProtocolError::Framing { raw, .. }
            | ProtocolError::UnknownOperation { raw }
            | ProtocolError::Malformed { raw, .. } => Some(raw),
            ProtocolError::Io(_) => None,
        }
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::Io(e.to_string())
    }
}

/// Failures of the robot-control service client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("robot-control service unavailable: {0}")]
    Unavailable(String),

    #[error("robot transport error: {0}")]
    Transport(String),

    #[error("robot message encoding error: {0}")]
    Encode(String),
}

/// Bridge-wide error type.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("control-system session lost in epoch {epoch}: {reason}")]
    SessionLost { epoch: Epoch, reason: String },

    #[error("duplicate correlation token {0}")]
    DuplicateToken(Token),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fatal: {0}")]
    Fatal(String),
}
