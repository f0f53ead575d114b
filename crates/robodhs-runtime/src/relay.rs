//! Event relay: robot [`StateEvent`]s → unsolicited DCSS frames.
//!
//! | Event | Frames |
//! |---|---|
//! | `task_message` `"<LEVEL> text"` | `robot_status`, then `htos_log note\|warning\|error text` |
//! | `system_error_message` `"OK"` | none |
//! | `system_error_message` anything else | `htos_log error <value>` |
//! | any fault event | `htos_log error <entity> <value>` |
//! | an entity of the robot model | the status strings it feeds ([`StatusBoard`]) |
//! | anything else | `htos_set_string_completed <entity> normal <value>` |
//!
//! Each time a session becomes active the relay asks the robot for a fresh
//! snapshot and pushes the login strings (`robot_status`, `robot_state`,
//! `robot_cassette`, `robot_force_*`, `ts_robot_cal`) to it.
//!
//! The session gate is checked by [`Outbound::send_unsolicited`] at the
//! moment each frame is emitted; nothing is buffered while DCSS is away.

use std::sync::Arc;

use futures_util::StreamExt;
use robodhs_middleware::RobotAdapter;
use robodhs_types::{Epoch, Frame, LogLevel, StateEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::outbound::Outbound;
use crate::status::StatusBoard;

const TASK_MESSAGE: &str = "task_message";
const SYSTEM_ERROR_MESSAGE: &str = "system_error_message";

/// Frames one robot notification turns into, in emission order.
pub fn frames_for(event: &StateEvent, board: &StatusBoard) -> Vec<Frame> {
    if event.fault {
        return vec![Frame::log(
            LogLevel::Error,
            &format!("{} {}", event.entity, event.new),
        )];
    }
    match event.entity.as_str() {
        TASK_MESSAGE => {
            let mut frames = board.apply(event).unwrap_or_default();
            let (level, message) = split_level(&event.new);
            frames.push(Frame::log(level, message));
            frames
        }
        SYSTEM_ERROR_MESSAGE if event.new.trim() == "OK" => Vec::new(),
        SYSTEM_ERROR_MESSAGE => vec![Frame::log(LogLevel::Error, &event.new)],
        _ => board
            .apply(event)
            .unwrap_or_else(|| vec![passthrough(event)]),
    }
}

/// An entity the robot model does not know, forwarded under its own name.
fn passthrough(event: &StateEvent) -> Frame {
    let mut values: Vec<String> = event.new.split_whitespace().map(str::to_string).collect();
    if values.is_empty() {
        values.push(String::new());
    }
    Frame::set_string(&event.entity, values)
}

/// Split the leading level word off a robot task message.
///
/// `DEBUG`/`INFO` are notes.  An unrecognised level word is treated as an
/// error and dropped; a message with no level word at all is a note.
fn split_level(message: &str) -> (LogLevel, &str) {
    let message = message.trim();
    let Some((word, rest)) = message.split_once(char::is_whitespace) else {
        return (LogLevel::Note, message);
    };
    let level = match word {
        "DEBUG" | "INFO" => LogLevel::Note,
        "WARNING" => LogLevel::Warning,
        _ => LogLevel::Error,
    };
    (level, rest.trim_start())
}

/// Push the login strings to the session of `epoch`.
async fn login(epoch: Epoch, adapter: &dyn RobotAdapter, outbound: &Outbound, board: &StatusBoard) {
    adapter.request_snapshot().await;
    let frames = board.login_frames();
    let count = frames.len();
    for frame in frames {
        if !outbound.send_session(epoch, frame) {
            debug!(%epoch, "login snapshot cut short: session gone");
            return;
        }
    }
    info!(%epoch, strings = count, "login snapshot sent");
}

/// Drain `adapter`'s notifications into `outbound` until `teardown` fires
/// or the stream ends.
pub async fn run(
    adapter: Arc<dyn RobotAdapter>,
    outbound: Outbound,
    board: StatusBoard,
    teardown: CancellationToken,
) {
    let mut events = adapter.subscribe().await;
    let mut activations = outbound.activations();
    info!("event relay started");

    let active = *activations.borrow_and_update();
    if let Some(epoch) = active {
        login(epoch, adapter.as_ref(), &outbound, &board).await;
    }

    loop {
        let event = tokio::select! {
            _ = teardown.cancelled() => break,
            changed = activations.changed() => {
                if changed.is_err() {
                    break;
                }
                let active = *activations.borrow_and_update();
                if let Some(epoch) = active {
                    login(epoch, adapter.as_ref(), &outbound, &board).await;
                }
                continue;
            }
            event = events.next() => match event {
                Some(event) => event,
                None => {
                    warn!("robot notification stream ended");
                    break;
                }
            },
        };

        for frame in frames_for(&event, &board) {
            if !outbound.send_unsolicited(frame) {
                debug!(entity = %event.entity, value = %event.new, "status event dropped: session inactive");
            }
        }
    }
    info!(dropped = outbound.dropped_events(), "event relay stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use robodhs_middleware::SimRobotAdapter;
    use robodhs_types::tags;
    use std::time::Duration;
    use tokio::sync::mpsc;

    async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Result<Frame, Box<dyn std::error::Error>> {
        let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await?
            .ok_or("writer closed")?;
        Ok(frame)
    }

    fn one(event: StateEvent) -> Frame {
        let mut frames = frames_for(&event, &StatusBoard::new());
        assert_eq!(frames.len(), 1, "{frames:?}");
        frames.remove(0)
    }

    #[test]
    fn unmodelled_state_becomes_set_string() {
        let frame = one(StateEvent::new("sample_barcode", Some("A1".into()), "B7 spare"));
        assert_eq!(frame.operation, tags::HTOS_SET_STRING_COMPLETED);
        assert_eq!(frame.args, vec!["sample_barcode", "normal", "B7", "spare"]);
        assert!(frame.token.is_none());

        let frame = one(StateEvent::new("sample_barcode", None, ""));
        assert_eq!(frame.args, vec!["sample_barcode", "normal", ""]);
    }

    #[test]
    fn modelled_state_refreshes_status_strings() {
        let board = StatusBoard::new();
        let frames = frames_for(&StateEvent::new("lid_open", Some("0".into()), "1"), &board);
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].args.join(" "),
            "robot_input normal 0 0 0 0 0 0 0 0 0 0 0 0 1 0 0 0"
        );

        let frames = frames_for(&StateEvent::new("port_distances", None, r#"{"left": []}"#), &board);
        let names: Vec<&str> = frames.iter().map(|f| f.args[0].as_str()).collect();
        assert_eq!(names, vec!["robot_force_left", "robot_force_middle", "robot_force_right"]);
        assert_eq!(frames[0].args, vec!["robot_force_left", "normal", "0"]);
    }

    #[test]
    fn faults_become_error_logs() {
        let frame = one(StateEvent::fault("gripper", "jammed open"));
        assert_eq!(frame.operation, tags::HTOS_LOG);
        assert_eq!(frame.args, vec!["error", "gripper", "jammed", "open"]);
    }

    #[test]
    fn task_messages_refresh_status_then_log() {
        let cases = [
            ("INFO mount finished", vec!["note", "mount", "finished"]),
            ("DEBUG step 3", vec!["note", "step", "3"]),
            ("WARNING low ln2", vec!["warning", "low", "ln2"]),
            ("ERROR collision", vec!["error", "collision"]),
            ("FATAL arm stuck", vec!["error", "arm", "stuck"]),
            ("calibrating", vec!["note", "calibrating"]),
        ];
        for (message, expected) in cases {
            let board = StatusBoard::new();
            let frames = frames_for(&StateEvent::new("task_message", None, message), &board);
            assert_eq!(frames.len(), 2, "message {message:?}");
            assert_eq!(frames[0].args[0], "robot_status");
            assert_eq!(frames[1].operation, tags::HTOS_LOG);
            assert_eq!(frames[1].args, expected, "message {message:?}");
            assert_eq!(board.snapshot().task_message, message);
        }
    }

    #[test]
    fn system_errors_are_logged_unless_ok() {
        assert!(frames_for(&StateEvent::new("system_error_message", None, "OK"), &StatusBoard::new()).is_empty());

        let frame = one(StateEvent::new("system_error_message", None, "Bad bad happened"));
        assert_eq!(frame.operation, tags::HTOS_LOG);
        assert_eq!(frame.args, vec!["error", "Bad", "bad", "happened"]);
    }

    #[tokio::test]
    async fn relay_respects_session_gate() -> Result<(), Box<dyn std::error::Error>> {
        let robot = SimRobotAdapter::new();
        let outbound = Outbound::new();
        let teardown = CancellationToken::new();
        let relay = tokio::spawn(run(
            Arc::new(robot.clone()),
            outbound.clone(),
            StatusBoard::new(),
            teardown.clone(),
        ));
        while robot.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }

        // No session: dropped, nothing retained.
        robot.emit(StateEvent::new("sample_barcode", None, "A1"));
        while outbound.dropped_events() == 0 {
            tokio::task::yield_now().await;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        outbound.attach(Epoch(1), tx);
        outbound.activate(Epoch(1));

        // The login snapshot comes first.
        for expected in ["robot_status", "robot_state", "robot_cassette"] {
            let frame = next_frame(&mut rx).await?;
            assert_eq!(frame.args[0], expected);
        }
        for _ in 0..4 {
            next_frame(&mut rx).await?;
        }
        assert_eq!(robot.snapshot_requests(), 1);

        robot.emit(StateEvent::new("sample_barcode", None, "B2"));
        let frame = next_frame(&mut rx).await?;
        assert_eq!(frame.args, vec!["sample_barcode", "normal", "B2"]);
        assert!(rx.try_recv().is_err());

        teardown.cancel();
        relay.await?;
        Ok(())
    }

    #[tokio::test]
    async fn every_activation_gets_a_snapshot() -> Result<(), Box<dyn std::error::Error>> {
        let robot = SimRobotAdapter::new();
        let outbound = Outbound::new();
        let teardown = CancellationToken::new();
        let relay = tokio::spawn(run(
            Arc::new(robot.clone()),
            outbound.clone(),
            StatusBoard::new(),
            teardown.clone(),
        ));

        for epoch in [Epoch(1), Epoch(2)] {
            let (tx, mut rx) = mpsc::unbounded_channel();
            outbound.attach(epoch, tx);
            outbound.activate(epoch);
            let mut names = Vec::new();
            for _ in 0..7 {
                names.push(next_frame(&mut rx).await?.args[0].clone());
            }
            assert_eq!(names.first().map(String::as_str), Some("robot_status"));
            assert_eq!(names.last().map(String::as_str), Some("ts_robot_cal"));
            outbound.detach(epoch);
        }
        assert_eq!(robot.snapshot_requests(), 2);

        teardown.cancel();
        relay.await?;
        Ok(())
    }
}
