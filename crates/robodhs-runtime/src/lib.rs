//! `robodhs-runtime` – The running bridge
//!
//! Wires the codec, the robot adapter and the kernel into a long-lived
//! DCSS hardware server.
//!
//! # Modules
//!
//! - [`coordinator`] – [`Bridge`][coordinator::Bridge]: startup order,
//!   graceful shutdown with a grace period, fatal error propagation.
//! - [`session`] – [`SessionManager`][session::SessionManager]: TCP
//!   connection to DCSS, registration, heartbeat, peer liveness and
//!   reconnect with bounded exponential backoff.  Every connection is a new
//!   [`Epoch`][robodhs_types::Epoch].
//! - [`dispatcher`] – [`Dispatcher`][dispatcher::Dispatcher]: the single
//!   serialised consumer of inbound commands, robot completions and session
//!   changes; sole owner of the
//!   [`CorrelationTable`][robodhs_kernel::CorrelationTable].
//! - [`relay`] – forwards robot state notifications to DCSS while the
//!   session is active; drops them otherwise.  Pushes the login snapshot on
//!   every activation.
//! - [`status`] – [`StatusBoard`][status::StatusBoard]: the shared robot
//!   model behind the `robot_status`, `robot_state`, `robot_cassette` and
//!   related DCSS strings.
//! - [`outbound`] – [`Outbound`][outbound::Outbound]: the epoch-checked,
//!   session-gated path to the DCSS writer.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: `tracing`
//!   subscriber with optional OTLP span export.

pub mod coordinator;
pub mod dispatcher;
pub mod outbound;
pub mod relay;
pub mod session;
pub mod status;
pub mod telemetry;

pub use coordinator::{Bridge, BridgeConfig};
pub use dispatcher::{DispatchMsg, Dispatcher};
pub use outbound::Outbound;
pub use session::{SessionConfig, SessionManager};
pub use status::StatusBoard;
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
