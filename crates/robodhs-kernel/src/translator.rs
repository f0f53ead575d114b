//! [`translate`] – DCSS operation → robot-call plan.
//!
//! Every `stoh_start_operation` names a DCSS operation and carries its
//! arguments as loose words.  The translator validates those words and
//! decides which robot-control calls (zero, one or several) carry the
//! operation out.  It performs no I/O; the runtime invokes the calls and the
//! [`CorrelationTable`][crate::correlation::CorrelationTable] tracks them.
//!
//! Cassette addressing follows DCSS: a port is `<cassette> <row> <column>`
//! with cassette `l`, `m` or `r`.  Whole-dewar masks use 97 elements per
//! position, the first of which addresses the cassette holder itself.

use robodhs_types::{Position, RobotCall, SamplePort, reason};
use serde_json::{Value, json};
use thiserror::Error;

/// Ports in one cassette position.
pub const PORTS_PER_POSITION: usize = 96;

/// Elements per position in a flat dewar index: the holder plus its ports.
pub const ELEMENTS_PER_POSITION: usize = PORTS_PER_POSITION + 1;

/// Length of a flat dewar mask (`robot_config probe`).
pub const DEWAR_ELEMENTS: usize = ELEMENTS_PER_POSITION * Position::ALL.len();

/// DCSS operations this hardware server accepts.
pub const SUPPORTED_OPERATIONS: &[&str] = &[
    "prepare_mount_crystal",
    "prepare_dismount_crystal",
    "prepare_mount_next_crystal",
    "mount_crystal",
    "dismount_crystal",
    "mount_next_crystal",
    "robot_calibrate",
    "robot_standby",
    "robot_config",
];

/// Why an operation could not be turned into a plan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("unsupported operation {0:?}")]
    UnsupportedOperation(String),

    #[error("unsupported robot_config task {0:?}")]
    UnsupportedTask(String),

    #[error("{0} is not implemented")]
    NotImplemented(String),

    #[error("bad argument: {0}")]
    BadArgument(String),
}

impl TranslateError {
    /// Reason word reported in the `error` reply.
    pub fn reason(&self) -> &'static str {
        match self {
            TranslateError::UnsupportedOperation(_) => reason::UNSUPPORTED_OPERATION,
            TranslateError::UnsupportedTask(_) => reason::UNSUPPORTED_TASK,
            TranslateError::NotImplemented(_) => reason::NOT_IMPLEMENTED,
            TranslateError::BadArgument(_) => reason::BAD_ARGUMENT,
        }
    }
}

/// The robot work behind one DCSS operation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPlan {
    /// Entity the command acts on, for logs (e.g. `"l 3 B"`).
    pub target: Option<String>,
    /// Robot calls in declaration order.  Empty means "complete at once".
    pub calls: Vec<RobotCall>,
    /// Progress message sent before any robot call is issued.
    pub update: Option<String>,
    /// The operator acknowledged the fault state; the bridge drops its
    /// need-clear flag.
    pub clears_fault: bool,
}

impl CommandPlan {
    fn immediate() -> Self {
        Self {
            target: None,
            calls: Vec::new(),
            update: None,
            clears_fault: false,
        }
    }

    fn single(call: RobotCall) -> Self {
        Self {
            target: call.target.clone(),
            calls: vec![call],
            update: None,
            clears_fault: false,
        }
    }
}

/// `true` when `operation` is one [`translate`] knows.
pub fn supports(operation: &str) -> bool {
    SUPPORTED_OPERATIONS.contains(&operation)
}

/// Build the plan for DCSS `operation` with argument words `args`.
pub fn translate(operation: &str, args: &[String]) -> Result<CommandPlan, TranslateError> {
    match operation {
        "prepare_mount_crystal" | "prepare_dismount_crystal" | "prepare_mount_next_crystal" => {
            Ok(CommandPlan {
                target: None,
                calls: vec![RobotCall::new("prepare_for_mount")],
                update: Some("OK to prepare".to_string()),
                clears_fault: false,
            })
        }
        "mount_crystal" => {
            let port = parse_port(args, 0)?;
            Ok(CommandPlan::single(port_call("mount", port)))
        }
        "dismount_crystal" => {
            let port = parse_port(args, 0)?;
            Ok(CommandPlan::single(port_call("dismount", port)))
        }
        "mount_next_crystal" => {
            let current = parse_port(args, 0)?;
            let next = parse_port(args, 3)?;
            Ok(CommandPlan {
                target: Some(format!("{current} -> {next}")),
                calls: vec![port_call("dismount", current), port_call("mount", next)],
                update: None,
                clears_fault: false,
            })
        }
        "robot_calibrate" => calibrate(args),
        "robot_standby" => Ok(CommandPlan::immediate()),
        "robot_config" => robot_config(args),
        other => Err(TranslateError::UnsupportedOperation(other.to_string())),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Operations
// ────────────────────────────────────────────────────────────────────────────

fn calibrate(args: &[String]) -> Result<CommandPlan, TranslateError> {
    let target = args
        .first()
        .ok_or_else(|| TranslateError::BadArgument("robot_calibrate needs a target".into()))?;
    let target = match target.as_str() {
        "magnet_post" => "toolset",
        other => other,
    };
    let call = RobotCall::new("calibrate")
        .with_target(target)
        .with_params(json!({ "args": &args[1..] }));
    Ok(CommandPlan::single(call))
}

fn robot_config(args: &[String]) -> Result<CommandPlan, TranslateError> {
    let task = args
        .first()
        .ok_or_else(|| TranslateError::BadArgument("robot_config needs a task".into()))?;
    let rest = &args[1..];

    match task.as_str() {
        "clear" | "clear_all" => Ok(CommandPlan {
            clears_fault: true,
            ..CommandPlan::immediate()
        }),
        "hw_output_switch" => {
            let output: u32 = parse_number(rest, 0, "output")?;
            let target = match output {
                1 => "gripper",
                3 => "lid",
                13 => "dry_air",
                14 => "heater",
                other => {
                    return Err(TranslateError::NotImplemented(format!(
                        "hw_output_switch {other}"
                    )));
                }
            };
            Ok(CommandPlan::single(
                RobotCall::new("set_output")
                    .with_target(target)
                    .with_params(json!({ "value": "toggle" })),
            ))
        }
        "reset_cassette" => {
            let masks = [[true; PORTS_PER_POSITION]; 3];
            Ok(CommandPlan::single(mask_call("reset_ports", &masks, None)))
        }
        "set_index_state" => {
            let start: usize = parse_number(rest, 0, "start")?;
            let count: usize = parse_number(rest, 1, "count")?;
            let state = rest.get(2).map(String::as_str);
            let end = start
                .checked_add(count)
                .filter(|end| *end <= DEWAR_ELEMENTS)
                .ok_or_else(|| {
                    TranslateError::BadArgument(format!(
                        "index range {start}+{count} exceeds {DEWAR_ELEMENTS}"
                    ))
                })?;
            let mut masks = [[false; PORTS_PER_POSITION]; 3];
            for index in start..end {
                if let Some((position, port)) = flat_to_port(index) {
                    masks[position][port] = true;
                }
            }
            Ok(CommandPlan::single(mask_call("reset_ports", &masks, state)))
        }
        "set_port_state" => Err(TranslateError::NotImplemented("set_port_state".into())),
        "reset_mounted_counter" => Ok(CommandPlan::single(RobotCall::new("reset_mount_counters"))),
        "probe" => {
            if rest.len() != DEWAR_ELEMENTS {
                return Err(TranslateError::BadArgument(format!(
                    "probe expects {DEWAR_ELEMENTS} flags, got {}",
                    rest.len()
                )));
            }
            let mut masks = [[false; PORTS_PER_POSITION]; 3];
            for (index, word) in rest.iter().enumerate() {
                let flag: u32 = word
                    .parse()
                    .map_err(|_| TranslateError::BadArgument(format!("probe flag {word:?}")))?;
                if let Some((position, port)) = flat_to_port(index) {
                    masks[position][port] = flag != 0;
                }
            }
            Ok(CommandPlan::single(mask_call("probe", &masks, None)))
        }
        other => Err(TranslateError::UnsupportedTask(other.to_string())),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Argument helpers
// ────────────────────────────────────────────────────────────────────────────

/// Parse `<cassette> <row> <column>` starting at `args[at]`.
fn parse_port(args: &[String], at: usize) -> Result<SamplePort, TranslateError> {
    let word = |i: usize| {
        args.get(at + i)
            .map(String::as_str)
            .ok_or_else(|| TranslateError::BadArgument("missing port argument".into()))
    };

    let cassette = word(0)?;
    let position = Position::from_code(cassette)
        .ok_or_else(|| TranslateError::BadArgument(format!("cassette {cassette:?}")))?;

    let row_word = word(1)?;
    let row: u32 = row_word
        .parse()
        .ok()
        .filter(|row| *row > 0)
        .ok_or_else(|| TranslateError::BadArgument(format!("row {row_word:?}")))?;

    let column_word = word(2)?;
    let mut chars = column_word.chars();
    let column = match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => c.to_ascii_uppercase(),
        _ => return Err(TranslateError::BadArgument(format!("column {column_word:?}"))),
    };

    Ok(SamplePort {
        position,
        row,
        column,
    })
}

fn parse_number<T: std::str::FromStr>(
    args: &[String],
    at: usize,
    what: &str,
) -> Result<T, TranslateError> {
    let word = args
        .get(at)
        .ok_or_else(|| TranslateError::BadArgument(format!("missing {what}")))?;
    word.parse()
        .map_err(|_| TranslateError::BadArgument(format!("{what} {word:?}")))
}

/// Map a flat dewar index to `(position, port)`; `None` for holder elements.
fn flat_to_port(index: usize) -> Option<(usize, usize)> {
    let position = index / ELEMENTS_PER_POSITION;
    let offset = index % ELEMENTS_PER_POSITION;
    if position >= Position::ALL.len() || offset == 0 {
        return None;
    }
    Some((position, offset - 1))
}

fn port_call(operation: &str, port: SamplePort) -> RobotCall {
    RobotCall::new(operation)
        .with_target(port.to_string())
        .with_params(json!({
            "position": port.position.as_str(),
            "row": port.row,
            "column": port.column.to_string(),
        }))
}

fn mask_call(operation: &str, masks: &[[bool; PORTS_PER_POSITION]; 3], state: Option<&str>) -> RobotCall {
    let mut ports = serde_json::Map::new();
    for (position, mask) in Position::ALL.iter().zip(masks) {
        ports.insert(position.as_str().to_string(), json!(mask.to_vec()));
    }
    let mut params = json!({ "ports": Value::Object(ports) });
    if let Some(state) = state {
        params["state"] = json!(state);
    }
    RobotCall::new(operation).with_params(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    fn mask(call: &RobotCall, position: &str) -> Vec<bool> {
        call.params["ports"][position]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_bool().unwrap())
            .collect()
    }

    #[test]
    fn mount_crystal_addresses_port() {
        let plan = translate("mount_crystal", &words("l 3 b 0 0")).unwrap();
        assert_eq!(plan.calls.len(), 1);
        let call = &plan.calls[0];
        assert_eq!(call.operation, "mount");
        assert_eq!(call.target.as_deref(), Some("l 3 B"));
        assert_eq!(call.params["position"], "left");
        assert_eq!(call.params["row"], 3);
        assert_eq!(call.params["column"], "B");
        assert_eq!(plan.target.as_deref(), Some("l 3 B"));
    }

    #[test]
    fn mount_next_crystal_fans_out_dismount_then_mount() {
        let plan = translate("mount_next_crystal", &words("l 1 A r 2 C")).unwrap();
        let ops: Vec<_> = plan.calls.iter().map(|c| c.operation.as_str()).collect();
        assert_eq!(ops, vec!["dismount", "mount"]);
        assert_eq!(plan.calls[0].target.as_deref(), Some("l 1 A"));
        assert_eq!(plan.calls[1].target.as_deref(), Some("r 2 C"));
    }

    #[test]
    fn prepare_operations_send_progress_first() {
        for op in [
            "prepare_mount_crystal",
            "prepare_dismount_crystal",
            "prepare_mount_next_crystal",
        ] {
            let plan = translate(op, &[]).unwrap();
            assert_eq!(plan.update.as_deref(), Some("OK to prepare"));
            assert_eq!(plan.calls[0].operation, "prepare_for_mount");
        }
    }

    #[test]
    fn bad_port_words_are_rejected() {
        for args in ["x 1 A", "l zero A", "l 0 A", "l 1 AB", "l 1 7", "l 1"] {
            let err = translate("mount_crystal", &words(args)).unwrap_err();
            assert_eq!(err.reason(), reason::BAD_ARGUMENT, "args {args:?}");
        }
    }

    #[test]
    fn calibrate_renames_magnet_post() {
        let plan = translate("robot_calibrate", &words("magnet_post 1 2")).unwrap();
        assert_eq!(plan.calls[0].operation, "calibrate");
        assert_eq!(plan.calls[0].target.as_deref(), Some("toolset"));
        assert_eq!(plan.calls[0].params["args"], json!(["1", "2"]));

        let plan = translate("robot_calibrate", &words("cassette")).unwrap();
        assert_eq!(plan.calls[0].target.as_deref(), Some("cassette"));

        assert!(translate("robot_calibrate", &[]).is_err());
    }

    #[test]
    fn no_op_commands_have_no_calls() {
        let standby = translate("robot_standby", &[]).unwrap();
        assert!(standby.calls.is_empty());
        assert!(!standby.clears_fault);
        for task in ["clear", "clear_all"] {
            let plan = translate("robot_config", &words(task)).unwrap();
            assert!(plan.calls.is_empty());
            assert!(plan.clears_fault, "{task}");
        }
    }

    #[test]
    fn output_switch_maps_known_outputs() {
        let plan = translate("robot_config", &words("hw_output_switch 1")).unwrap();
        assert_eq!(plan.calls[0].operation, "set_output");
        assert_eq!(plan.calls[0].target.as_deref(), Some("gripper"));
        let plan = translate("robot_config", &words("hw_output_switch 3")).unwrap();
        assert_eq!(plan.calls[0].target.as_deref(), Some("lid"));
        let plan = translate("robot_config", &words("hw_output_switch 13")).unwrap();
        assert_eq!(plan.calls[0].target.as_deref(), Some("dry_air"));
        let plan = translate("robot_config", &words("hw_output_switch 14")).unwrap();
        assert_eq!(plan.calls[0].target.as_deref(), Some("heater"));

        let err = translate("robot_config", &words("hw_output_switch 2")).unwrap_err();
        assert_eq!(err.reason(), reason::NOT_IMPLEMENTED);
        let err = translate("robot_config", &words("hw_output_switch on")).unwrap_err();
        assert_eq!(err.reason(), reason::BAD_ARGUMENT);
    }

    #[test]
    fn reset_cassette_covers_every_port() {
        let plan = translate("robot_config", &words("reset_cassette")).unwrap();
        let call = &plan.calls[0];
        assert_eq!(call.operation, "reset_ports");
        for position in ["left", "middle", "right"] {
            let m = mask(call, position);
            assert_eq!(m.len(), PORTS_PER_POSITION);
            assert!(m.iter().all(|f| *f));
        }
    }

    #[test]
    fn set_index_state_skips_holder_elements() {
        // Indices 96..=98: last left port, middle holder, first middle port.
        let plan = translate("robot_config", &words("set_index_state 96 3 u")).unwrap();
        let call = &plan.calls[0];
        assert_eq!(call.params["state"], "u");

        let left = mask(call, "left");
        assert!(left[95]);
        assert_eq!(left.iter().filter(|f| **f).count(), 1);

        let middle = mask(call, "middle");
        assert!(middle[0]);
        assert_eq!(middle.iter().filter(|f| **f).count(), 1);

        assert!(mask(call, "right").iter().all(|f| !*f));
    }

    #[test]
    fn set_index_state_rejects_out_of_range() {
        let err = translate("robot_config", &words("set_index_state 290 5 u")).unwrap_err();
        assert_eq!(err.reason(), reason::BAD_ARGUMENT);
    }

    #[test]
    fn probe_needs_full_mask() {
        let mut flags = vec!["0".to_string(); DEWAR_ELEMENTS];
        flags[0] = "1".into(); // left holder, ignored
        flags[1] = "1".into(); // left port 0
        flags[2 * ELEMENTS_PER_POSITION + 96] = "1".into(); // right port 95
        let mut args = vec!["probe".to_string()];
        args.extend(flags);

        let plan = translate("robot_config", &args).unwrap();
        let call = &plan.calls[0];
        assert_eq!(call.operation, "probe");
        let left = mask(call, "left");
        assert!(left[0]);
        assert_eq!(left.iter().filter(|f| **f).count(), 1);
        assert!(mask(call, "right")[95]);

        let err = translate("robot_config", &words("probe 1 0 1")).unwrap_err();
        assert_eq!(err.reason(), reason::BAD_ARGUMENT);
    }

    #[test]
    fn unknown_work_is_rejected_with_reason() {
        let err = translate("robot_config", &words("set_port_state l1A b")).unwrap_err();
        assert_eq!(err.reason(), reason::NOT_IMPLEMENTED);

        let err = translate("robot_config", &words("dance")).unwrap_err();
        assert_eq!(err.reason(), reason::UNSUPPORTED_TASK);

        let err = translate("robot_config", &[]).unwrap_err();
        assert_eq!(err.reason(), reason::BAD_ARGUMENT);

        let err = translate("open_shutter", &[]).unwrap_err();
        assert_eq!(err.reason(), reason::UNSUPPORTED_OPERATION);
        assert!(!supports("open_shutter"));
        assert!(supports("mount_crystal"));
    }

    #[test]
    fn reset_mounted_counter_maps_directly() {
        let plan = translate("robot_config", &words("reset_mounted_counter")).unwrap();
        assert_eq!(plan.calls[0].operation, "reset_mount_counters");
    }
}
