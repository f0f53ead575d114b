//! `robodhs-middleware` – Transports on both sides of the bridge
//!
//! Moves bytes and messages between the control system (DCSS) and the
//! robot-control service without deciding what any of them mean.
//!
//! # Modules
//!
//! - [`codec`] – Line-oriented DCSS text frame codec with per-tag schema
//!   validation; usable directly or as a `tokio_util` `Decoder`/`Encoder`.
//! - [`adapter`] – The [`RobotAdapter`] trait and the one-shot
//!   [`OperationHandle`] every robot call resolves through.
//! - [`robot_client`] – JSON-over-WebSocket robot adapter with automatic
//!   reconnect.
//! - [`sim_adapter`] – In-memory robot for tests and `--simulate`.
//! - [`backoff`] – Bounded exponential reconnect delays.

pub mod adapter;
pub mod backoff;
pub mod codec;
pub mod robot_client;
pub mod sim_adapter;

pub use adapter::{OperationHandle, OperationResolver, RobotAdapter};
pub use backoff::Backoff;
pub use codec::{FrameCodec, MAX_FRAME_LEN};
pub use robot_client::WsRobotClient;
pub use sim_adapter::SimRobotAdapter;
