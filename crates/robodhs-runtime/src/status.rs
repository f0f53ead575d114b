//! [`StatusBoard`] – the shared [`RobotState`] behind the DCSS status
//! strings.
//!
//! The event relay feeds robot notifications into it; the dispatcher records
//! the foreground operation and operator clears.  Each mutation hands back
//! the `htos_set_string_completed` frames that changed, ready for
//! [`Outbound::send_unsolicited`][crate::outbound::Outbound::send_unsolicited].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use robodhs_kernel::{RobotState, StatusString};
use robodhs_types::{Frame, StateEvent};
use tracing::warn;

#[derive(Clone, Default)]
pub struct StatusBoard {
    state: Arc<Mutex<RobotState>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RobotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current model.
    pub fn snapshot(&self) -> RobotState {
        self.state().clone()
    }

    /// Feed one robot notification into the model.
    ///
    /// `None` when the entity is not modelled.  A value that does not parse
    /// leaves the model untouched and refreshes nothing.
    pub fn apply(&self, event: &StateEvent) -> Option<Vec<Frame>> {
        let mut state = self.state();
        match state.apply(&event.entity, &event.new) {
            Ok(Some(strings)) => Some(render(&state, strings)),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "robot notification ignored");
                Some(Vec::new())
            }
        }
    }

    /// The strings DCSS gets when a session becomes active.
    pub fn login_frames(&self) -> Vec<Frame> {
        render(&self.state(), &StatusString::LOGIN)
    }

    /// Record the DCSS operation driving the robot.  Returns the refreshed
    /// `robot_status` frame when the value changed.
    pub fn set_foreground(&self, operation: Option<&str>) -> Option<Frame> {
        let mut state = self.state();
        if state.foreground.as_deref() == operation {
            return None;
        }
        state.foreground = operation.map(str::to_string);
        Some(status_frame(&state))
    }

    /// The operator acknowledged the fault state.
    pub fn clear_fault(&self) -> Frame {
        let mut state = self.state();
        state.needs_clear = false;
        status_frame(&state)
    }
}

fn render(state: &RobotState, strings: &[StatusString]) -> Vec<Frame> {
    strings
        .iter()
        .map(|s| Frame::set_string(s.name(), state.render(*s)))
        .collect()
}

fn status_frame(state: &RobotState) -> Frame {
    Frame::set_string(
        StatusString::Status.name(),
        state.render(StatusString::Status),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use robodhs_types::tags;

    #[test]
    fn login_frames_cover_every_login_string() {
        let board = StatusBoard::new();
        let names: Vec<String> = board
            .login_frames()
            .into_iter()
            .map(|f| {
                assert_eq!(f.operation, tags::HTOS_SET_STRING_COMPLETED);
                assert_eq!(f.args[1], "normal");
                f.args[0].clone()
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "robot_status",
                "robot_state",
                "robot_cassette",
                "robot_force_left",
                "robot_force_middle",
                "robot_force_right",
                "ts_robot_cal",
            ]
        );
    }

    #[test]
    fn notifications_refresh_their_strings() {
        let board = StatusBoard::new();
        let frames = board
            .apply(&StateEvent::new("sample_locations", None, r#"{"goniometer": null}"#))
            .unwrap();
        let names: Vec<&str> = frames.iter().map(|f| f.args[0].as_str()).collect();
        assert_eq!(names, vec!["robot_state", "robot_cassette"]);

        assert!(board.apply(&StateEvent::new("sample_barcode", None, "X1")).is_none());
        assert_eq!(
            board.apply(&StateEvent::new("pins_lost", None, "lots")),
            Some(Vec::new())
        );
    }

    #[test]
    fn clear_drops_need_clear_flag() {
        let board = StatusBoard::new();
        assert!(board.snapshot().needs_clear);
        let frame = board.clear_fault();
        assert!(!board.snapshot().needs_clear);
        let need_clear = frame.args.iter().position(|w| w == "need_clear:").unwrap();
        assert_eq!(frame.args[need_clear + 1], "0");
    }

    #[test]
    fn foreground_change_refreshes_status_once() {
        let board = StatusBoard::new();
        let frame = board.set_foreground(Some("mount_crystal")).unwrap();
        assert!(frame.args.contains(&"mount_crystal".to_string()));
        assert!(board.set_foreground(Some("mount_crystal")).is_none());
        assert!(board.set_foreground(None).is_some());
        assert_eq!(board.snapshot().foreground, None);
    }
}
