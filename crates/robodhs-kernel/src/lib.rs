//! `robodhs-kernel` – Command translation & correlation
//!
//! The decision-making core of the bridge.  It performs no I/O: the runtime
//! feeds it inbound commands and robot outcomes and acts on what it returns.
//!
//! # Modules
//!
//! - [`translator`] – [`translate`][translator::translate]: turns a DCSS
//!   operation and its argument words into a
//!   [`CommandPlan`][translator::CommandPlan] of robot calls, or a
//!   [`TranslateError`][translator::TranslateError] carrying the reply reason.
//! - [`correlation`] – [`CorrelationTable`][correlation::CorrelationTable]:
//!   the per-epoch command state machine.  Matches robot completions back to
//!   their command, applies fan-out AND semantics and rejects duplicate
//!   tokens.
//! - [`robot_state`] – [`RobotState`][robot_state::RobotState]: the model of
//!   the robot fed by its notifications, rendered into the composite status
//!   strings DCSS displays.

pub mod correlation;
pub mod robot_state;
pub mod translator;

pub use correlation::{Command, CorrelationTable, Resolution, Verdict};
pub use robot_state::{RobotState, StatusString};
pub use translator::{CommandPlan, TranslateError, translate};
