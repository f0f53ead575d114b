//! [`RobotState`] – the bridge's picture of the robot, and the DCSS status
//! strings rendered from it.
//!
//! DCSS does not consume raw robot entities.  It expects a fixed set of
//! composite strings (`robot_status`, `robot_state`, `robot_cassette`,
//! `robot_force_<position>`, `ts_robot_cal`, `robot_output`, `robot_input`)
//! whose fields are positional.  The model absorbs each robot notification
//! with [`RobotState::apply`], which reports the strings that notification
//! affects, and [`RobotState::render`] produces a string's value words.
//!
//! Structured entities (`port_states`, `holder_types`, `sample_locations`,
//! `port_distances`, `height_errors`) carry JSON objects keyed by position
//! name; scalar entities carry a number or a plain string.

use robodhs_types::Position;
use serde_json::Value;
use thiserror::Error;

use crate::translator::PORTS_PER_POSITION;

/// Bits of the numeric `status:` field.
pub mod status {
    pub const NEED_CLEAR: u32 = 0x0000_0001;
    pub const NEED_RESET: u32 = 0x0000_0002;
    pub const NEED_CAL_MAGNET: u32 = 0x0000_0004;
    pub const NEED_CAL_CASSETTE: u32 = 0x0000_0008;
    pub const NEED_CAL_GONIO: u32 = 0x0000_0010;
    pub const NEED_CAL_BASIC: u32 = 0x0000_0020;
    pub const NEED_CAL_ALL: u32 = 0x0000_003C;
    pub const NEED_USER_ACTION: u32 = 0x0000_0040;
    pub const REASON_PORT_JAM: u32 = 0x0000_0080;
    pub const REASON_ESTOP: u32 = 0x0000_0100;
    pub const REASON_SAFEGUARD: u32 = 0x0000_0200;
    pub const REASON_NOT_HOME: u32 = 0x0000_0400;
    pub const REASON_COLLISION: u32 = 0x0000_8000;
    pub const IN_MANUAL: u32 = 0x8000_0000;
}

/// Number of digital lines in `robot_output` / `robot_input`.
const IO_LINES: usize = 16;

/// Output line numbers, shared with `robot_config hw_output_switch`.
pub const OUTPUT_GRIPPER: usize = 1;
pub const OUTPUT_LID: usize = 3;
pub const OUTPUT_DRY_AIR: usize = 13;
pub const OUTPUT_HEATER: usize = 14;

const INPUT_GRIPPER_OPEN: usize = 8;
const INPUT_GRIPPER_CLOSED: usize = 9;
const INPUT_LID_CLOSED: usize = 11;
const INPUT_LID_OPEN: usize = 12;
const INPUT_HEATER_HOT: usize = 13;

/// What is sitting in a dewar position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HolderType {
    #[default]
    Unknown,
    Cassette,
    CalibrationCassette,
    Adaptor,
    Bad,
}

impl HolderType {
    pub fn code(self) -> char {
        match self {
            HolderType::Unknown => 'u',
            HolderType::Cassette => '1',
            HolderType::CalibrationCassette => '2',
            HolderType::Adaptor => '3',
            HolderType::Bad => 'X',
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        let code = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        match code.as_str() {
            "u" => Some(HolderType::Unknown),
            "1" => Some(HolderType::Cassette),
            "2" => Some(HolderType::CalibrationCassette),
            "3" => Some(HolderType::Adaptor),
            "X" | "x" => Some(HolderType::Bad),
            _ => None,
        }
    }
}

/// Occupancy of one port as last reported by the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortState {
    Full,
    #[default]
    Unknown,
    Empty,
    Error,
}

impl PortState {
    pub fn code(self) -> char {
        match self {
            PortState::Full => '1',
            PortState::Unknown => 'u',
            PortState::Empty => '0',
            PortState::Error => 'b',
        }
    }

    /// The robot's numeric encoding: `-1` full, `0` unknown, `1` empty,
    /// `2` error.
    fn from_robot(value: i64) -> Option<Self> {
        match value {
            -1 => Some(PortState::Full),
            0 => Some(PortState::Unknown),
            1 => Some(PortState::Empty),
            2 => Some(PortState::Error),
            _ => None,
        }
    }
}

/// A port as the robot reports it: dewar position and zero-based index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRef {
    pub position: Position,
    pub index: usize,
}

impl PortRef {
    pub fn new(position: Position, index: usize) -> Self {
        Self { position, index }
    }
}

/// Where samples currently are outside the dewar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleLocations {
    pub goniometer: Option<PortRef>,
    pub cavity: Option<PortRef>,
    pub picker: Option<PortRef>,
    pub placer: Option<PortRef>,
}

/// One of the composite strings DCSS is kept up to date with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusString {
    Status,
    State,
    Cassette,
    Force(Position),
    Calibration,
    Output,
    Input,
}

impl StatusString {
    /// Strings pushed to DCSS as soon as a session becomes active.
    pub const LOGIN: [StatusString; 7] = [
        StatusString::Status,
        StatusString::State,
        StatusString::Cassette,
        StatusString::Force(Position::Left),
        StatusString::Force(Position::Middle),
        StatusString::Force(Position::Right),
        StatusString::Calibration,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StatusString::Status => "robot_status",
            StatusString::State => "robot_state",
            StatusString::Cassette => "robot_cassette",
            StatusString::Force(Position::Left) => "robot_force_left",
            StatusString::Force(Position::Middle) => "robot_force_middle",
            StatusString::Force(Position::Right) => "robot_force_right",
            StatusString::Calibration => "ts_robot_cal",
            StatusString::Output => "robot_output",
            StatusString::Input => "robot_input",
        }
    }
}

const STATUS: &[StatusString] = &[StatusString::Status];
const STATE: &[StatusString] = &[StatusString::State];
const CASSETTE: &[StatusString] = &[StatusString::Cassette];
const STATE_AND_CASSETTE: &[StatusString] = &[StatusString::State, StatusString::Cassette];
const FORCES: &[StatusString] = &[
    StatusString::Force(Position::Left),
    StatusString::Force(Position::Middle),
    StatusString::Force(Position::Right),
];
const CALIBRATION: &[StatusString] = &[StatusString::Calibration];
const OUTPUT: &[StatusString] = &[StatusString::Output];
const INPUT: &[StatusString] = &[StatusString::Input];

/// A notification whose value does not fit its entity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("bad {entity} value {value:?}: {reason}")]
pub struct StateError {
    pub entity: String,
    pub value: String,
    pub reason: String,
}

/// Everything the status strings are rendered from.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotState {
    /// Status bits reported by the robot itself.
    pub status: u32,
    /// Raised at startup; dropped by `robot_config clear`.
    pub needs_clear: bool,
    pub safety_gate: bool,
    pub at_home: bool,
    /// DCSS operation currently driving the robot.
    pub foreground: Option<String>,
    pub task_message: String,
    pub task_progress: String,
    pub pins_lost: i64,
    pub pins_mounted: i64,
    pub closest_point: i64,
    pub ln2_level: Option<i64>,
    pub holder_types: [HolderType; 3],
    pub port_states: [Vec<PortState>; 3],
    pub sample_locations: SampleLocations,
    pub port_distances: [Vec<Option<f64>>; 3],
    pub height_errors: [Option<f64>; 3],
    /// Toolset, left, middle, right, goniometer.
    pub calibrations: [Option<String>; 5],
    pub outputs: [bool; IO_LINES],
    pub inputs: [bool; IO_LINES],
}

impl Default for RobotState {
    fn default() -> Self {
        let ports = || vec![PortState::Unknown; PORTS_PER_POSITION];
        let distances = || vec![None; PORTS_PER_POSITION];
        Self {
            status: 0,
            needs_clear: true,
            safety_gate: false,
            at_home: false,
            foreground: None,
            task_message: String::new(),
            task_progress: String::new(),
            pins_lost: 0,
            pins_mounted: 0,
            closest_point: 0,
            ln2_level: None,
            holder_types: [HolderType::Unknown; 3],
            port_states: [ports(), ports(), ports()],
            sample_locations: SampleLocations::default(),
            port_distances: [distances(), distances(), distances()],
            height_errors: [None; 3],
            calibrations: Default::default(),
            outputs: [false; IO_LINES],
            inputs: [false; IO_LINES],
        }
    }
}

impl RobotState {
    /// Absorb one robot notification.
    ///
    /// Returns the strings whose content may have changed, or `Ok(None)` when
    /// the entity is not part of the model.
    pub fn apply(
        &mut self,
        entity: &str,
        value: &str,
    ) -> Result<Option<&'static [StatusString]>, StateError> {
        let bad = |reason: &str| StateError {
            entity: entity.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let refresh = match entity {
            "status" => {
                let bits = parse_int(value).ok_or_else(|| bad("not an integer"))?;
                self.status = u32::try_from(bits).map_err(|_| bad("out of range"))?;
                STATUS
            }
            "safety_gate" => {
                self.safety_gate = parse_flag(value).ok_or_else(|| bad("not a flag"))?;
                STATUS
            }
            "at_home" => {
                self.at_home = parse_flag(value).ok_or_else(|| bad("not a flag"))?;
                STATUS
            }
            "task_message" => {
                self.task_message = value.to_string();
                STATUS
            }
            "task_progress" => {
                self.task_progress = value.to_string();
                STATUS
            }
            "pins_lost" => {
                self.pins_lost = parse_int(value).ok_or_else(|| bad("not an integer"))?;
                STATUS
            }
            "pins_mounted" => {
                self.pins_mounted = parse_int(value).ok_or_else(|| bad("not an integer"))?;
                STATUS
            }
            "closest_point" => {
                self.closest_point = parse_int(value).ok_or_else(|| bad("not an integer"))?;
                STATE
            }
            "ln2_level" => {
                self.ln2_level = Some(parse_int(value).ok_or_else(|| bad("not an integer"))?);
                STATE
            }
            "holder_types" => {
                for (position, item) in by_position(value).map_err(|r| bad(&r))? {
                    self.holder_types[position] =
                        HolderType::from_value(&item).ok_or_else(|| bad("unknown holder type"))?;
                }
                CASSETTE
            }
            "port_states" => {
                for (position, item) in by_position(value).map_err(|r| bad(&r))? {
                    self.port_states[position] = port_states(&item).ok_or_else(|| bad("bad port list"))?;
                }
                CASSETTE
            }
            "sample_locations" => {
                self.sample_locations = sample_locations(value).map_err(|r| bad(&r))?;
                STATE_AND_CASSETTE
            }
            "port_distances" => {
                for (position, item) in by_position(value).map_err(|r| bad(&r))? {
                    self.port_distances[position] = distances(&item).ok_or_else(|| bad("bad distance list"))?;
                }
                FORCES
            }
            "height_errors" => {
                for (position, item) in by_position(value).map_err(|r| bad(&r))? {
                    self.height_errors[position] = match item {
                        Value::Null => None,
                        other => Some(other.as_f64().ok_or_else(|| bad("not a number"))?),
                    };
                }
                FORCES
            }
            "last_toolset_calibration" => self.set_calibration(0, value),
            "last_left_calibration" => self.set_calibration(1, value),
            "last_middle_calibration" => self.set_calibration(2, value),
            "last_right_calibration" => self.set_calibration(3, value),
            "last_goniometer_calibration" => self.set_calibration(4, value),
            "gripper_command" => self.set_line(Line::Output(OUTPUT_GRIPPER), value).ok_or_else(|| bad("not a flag"))?,
            "lid_command" => self.set_line(Line::Output(OUTPUT_LID), value).ok_or_else(|| bad("not a flag"))?,
            "heater_air_command" => self.set_line(Line::Output(OUTPUT_DRY_AIR), value).ok_or_else(|| bad("not a flag"))?,
            "heater_command" => self.set_line(Line::Output(OUTPUT_HEATER), value).ok_or_else(|| bad("not a flag"))?,
            "gripper_open" => self.set_line(Line::Input(INPUT_GRIPPER_OPEN), value).ok_or_else(|| bad("not a flag"))?,
            "gripper_closed" => self.set_line(Line::Input(INPUT_GRIPPER_CLOSED), value).ok_or_else(|| bad("not a flag"))?,
            "lid_closed" => self.set_line(Line::Input(INPUT_LID_CLOSED), value).ok_or_else(|| bad("not a flag"))?,
            "lid_open" => self.set_line(Line::Input(INPUT_LID_OPEN), value).ok_or_else(|| bad("not a flag"))?,
            "heater_hot" => self.set_line(Line::Input(INPUT_HEATER_HOT), value).ok_or_else(|| bad("not a flag"))?,
            _ => return Ok(None),
        };
        Ok(Some(refresh))
    }

    fn set_calibration(&mut self, slot: usize, value: &str) -> &'static [StatusString] {
        let value = value.trim();
        self.calibrations[slot] = (!value.is_empty() && value != "null").then(|| value.to_string());
        CALIBRATION
    }

    fn set_line(&mut self, line: Line, value: &str) -> Option<&'static [StatusString]> {
        let on = parse_flag(value)?;
        Some(match line {
            Line::Output(n) => {
                self.outputs[n] = on;
                OUTPUT
            }
            Line::Input(n) => {
                self.inputs[n] = on;
                INPUT
            }
        })
    }

    /// Numeric `status:` field: the robot's bits plus the bridge's own.
    pub fn status_bits(&self) -> u32 {
        let mut bits = self.status;
        if self.needs_clear {
            bits |= status::NEED_CLEAR;
        }
        if self.safety_gate {
            bits |= status::REASON_SAFEGUARD;
        }
        if !self.at_home {
            bits |= status::REASON_NOT_HOME;
        }
        bits
    }

    /// DCSS port name (`l 1 A`) for a robot port, or `invalid`.
    ///
    /// Cassettes have 8 rows per column; adaptors hold pucks of 16.
    pub fn port_name(&self, port: Option<PortRef>) -> String {
        let Some(port) = port else {
            return "invalid".to_string();
        };
        let per_group = match self.holder_types[port.position as usize] {
            HolderType::Cassette | HolderType::CalibrationCassette => 8,
            HolderType::Adaptor => 16,
            _ => return "invalid".to_string(),
        };
        let Some(letter) = u8::try_from(port.index / per_group)
            .ok()
            .and_then(|g| b'A'.checked_add(g))
            .filter(u8::is_ascii_uppercase)
        else {
            return "invalid".to_string();
        };
        format!(
            "{} {} {}",
            port.position.code(),
            port.index % per_group + 1,
            char::from(letter)
        )
    }

    pub fn sample_state(&self) -> &'static str {
        let here = &self.sample_locations;
        if here.goniometer.is_some() {
            "on gonio"
        } else if here.cavity.is_some() {
            "on tong"
        } else if here.picker.is_some() {
            "on picker"
        } else if here.placer.is_some() {
            "on placer"
        } else {
            "no"
        }
    }

    fn ln2(&self) -> &'static str {
        match self.ln2_level {
            Some(0) => "no",
            Some(1) => "yes",
            _ => "wrong",
        }
    }

    /// Value words of `string`, i.e. everything after `<name> normal`.
    pub fn render(&self, string: StatusString) -> Vec<String> {
        match string {
            StatusString::Status => self.render_status(),
            StatusString::State => self.render_state(),
            StatusString::Cassette => self.render_cassette(),
            StatusString::Force(position) => self.render_force(position),
            StatusString::Calibration => self
                .calibrations
                .iter()
                .map(|ts| ts.clone().unwrap_or_default())
                .collect(),
            StatusString::Output => lines(&self.outputs),
            StatusString::Input => lines(&self.inputs),
        }
    }

    fn render_status(&self) -> Vec<String> {
        let bits = self.status_bits();
        let flag = |mask: u32| u8::from(bits & mask != 0).to_string();
        let mounted = match self.sample_locations.goniometer {
            Some(port) => self.port_name(Some(port)),
            None => String::new(),
        };
        [
            ("status:", bits.to_string()),
            ("need_reset:", flag(status::NEED_RESET)),
            ("need_cal:", flag(status::NEED_CAL_ALL)),
            ("state:", self.foreground.clone().unwrap_or_else(|| "idle".to_string())),
            ("warning:", String::new()),
            ("cal_msg:", self.task_message.clone()),
            ("cal_step:", self.task_progress.clone()),
            ("mounted:", mounted),
            ("pin_lost:", self.pins_lost.to_string()),
            ("pin_mounted:", self.pins_mounted.to_string()),
            ("manual_mode:", flag(status::IN_MANUAL)),
            ("need_mag_cal:", flag(status::NEED_CAL_MAGNET)),
            ("need_cas_cal:", flag(status::NEED_CAL_CASSETTE)),
            ("need_clear:", flag(status::NEED_CLEAR)),
        ]
        .into_iter()
        .flat_map(|(label, value)| [label.to_string(), value])
        .collect()
    }

    fn render_state(&self) -> Vec<String> {
        let here = &self.sample_locations;
        let zero = || "0".to_string();
        vec![
            self.sample_state().to_string(),
            "in cradle".to_string(),
            format!("P{}", self.closest_point),
            self.ln2().to_string(),
            String::new(),
            zero(),
            zero(),
            zero(),
            u8::from(here.goniometer.is_some()).to_string(),
            zero(),
            zero(),
            self.port_name(here.cavity),
            self.port_name(here.picker),
            self.port_name(here.placer),
            zero(),
            zero(),
            zero(),
            zero(),
        ]
    }

    fn render_cassette(&self) -> Vec<String> {
        let mounted = self.sample_locations.goniometer;
        let mut words = Vec::with_capacity(Position::ALL.len() * (PORTS_PER_POSITION + 1));
        for position in Position::ALL {
            let slot = position as usize;
            words.push(self.holder_types[slot].code().to_string());
            for (index, state) in self.port_states[slot].iter().enumerate() {
                let code = match mounted {
                    Some(m) if m.position == position && m.index == index => 'm',
                    _ => state.code(),
                };
                words.push(code.to_string());
            }
        }
        words
    }

    fn render_force(&self, position: Position) -> Vec<String> {
        let slot = position as usize;
        let height = match self.height_errors[slot] {
            Some(e) if e != 0.0 => format!("{e:?}"),
            _ => "0".to_string(),
        };
        std::iter::once(height)
            .chain(self.port_distances[slot].iter().map(|d| match d {
                Some(d) => format!("{d:.1}"),
                None => "uuuu".to_string(),
            }))
            .collect()
    }
}

#[derive(Clone, Copy)]
enum Line {
    Output(usize),
    Input(usize),
}

fn lines(states: &[bool; IO_LINES]) -> Vec<String> {
    states.iter().map(|on| u8::from(*on).to_string()).collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Value parsing
// ────────────────────────────────────────────────────────────────────────────

fn parse_int(value: &str) -> Option<i64> {
    let value = value.trim();
    value.parse().ok().or_else(|| {
        let f: f64 = value.parse().ok()?;
        (f.fract() == 0.0).then_some(f as i64)
    })
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim() {
        "true" => Some(true),
        "false" => Some(false),
        other => parse_int(other).map(|n| n != 0),
    }
}

/// Split a `{"left": …, "middle": …}` object into per-position items.
fn by_position(value: &str) -> Result<Vec<(usize, Value)>, String> {
    let Value::Object(map) = serde_json::from_str(value).map_err(|e| e.to_string())? else {
        return Err("expected an object keyed by position".to_string());
    };
    let mut items = Vec::with_capacity(map.len());
    for (key, item) in map {
        let position = Position::ALL
            .iter()
            .position(|p| p.as_str() == key)
            .ok_or_else(|| format!("unknown position {key:?}"))?;
        items.push((position, item));
    }
    Ok(items)
}

fn port_states(value: &Value) -> Option<Vec<PortState>> {
    let list = value.as_array().filter(|l| l.len() == PORTS_PER_POSITION)?;
    list.iter()
        .map(|v| v.as_i64().and_then(PortState::from_robot))
        .collect()
}

fn distances(value: &Value) -> Option<Vec<Option<f64>>> {
    value
        .as_array()?
        .iter()
        .map(|v| match v {
            Value::Null => Some(None),
            other => other.as_f64().map(Some),
        })
        .collect()
}

/// The robot publishes every location on each change; an absent key means
/// nothing is there.
fn sample_locations(value: &str) -> Result<SampleLocations, String> {
    let Value::Object(map) = serde_json::from_str(value).map_err(|e| e.to_string())? else {
        return Err("expected an object keyed by location".to_string());
    };
    let mut locations = SampleLocations::default();
    for (key, item) in &map {
        let port = port_ref(item).ok_or_else(|| format!("bad port for {key}"))?;
        match key.as_str() {
            "goniometer" => locations.goniometer = port,
            "cavity" => locations.cavity = port,
            "picker" => locations.picker = port,
            "placer" => locations.placer = port,
            other => return Err(format!("unknown location {other:?}")),
        }
    }
    Ok(locations)
}

/// `null` and `[]` are empty; `["left", 5]` is a port.
fn port_ref(value: &Value) -> Option<Option<PortRef>> {
    match value {
        Value::Null => Some(None),
        Value::Array(items) if items.is_empty() => Some(None),
        Value::Array(items) if items.len() == 2 => {
            let position = Position::ALL
                .into_iter()
                .find(|p| Some(p.as_str()) == items[0].as_str())?;
            let index = usize::try_from(items[1].as_u64()?).ok()?;
            Some(Some(PortRef::new(position, index)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(s: &str) -> Vec<String> {
        s.split(' ').map(str::to_string).collect()
    }

    fn left_cassette() -> RobotState {
        let mut state = RobotState::default();
        state.holder_types[0] = HolderType::Cassette;
        state
    }

    #[test]
    fn port_names_follow_holder_geometry() {
        let mut state = left_cassette();
        assert_eq!(state.port_name(Some(PortRef::new(Position::Left, 16))), "l 1 C");
        assert_eq!(state.port_name(Some(PortRef::new(Position::Left, 0))), "l 1 A");
        assert_eq!(state.port_name(Some(PortRef::new(Position::Left, 95))), "l 8 L");

        state.holder_types[0] = HolderType::Adaptor;
        assert_eq!(state.port_name(Some(PortRef::new(Position::Left, 16))), "l 1 B");

        assert_eq!(state.port_name(Some(PortRef::new(Position::Right, 3))), "invalid");
        assert_eq!(state.port_name(None), "invalid");
    }

    #[test]
    fn status_string_fields() {
        let mut state = left_cassette();
        state.needs_clear = false;
        state.at_home = true;
        state.status = status::NEED_CLEAR | status::REASON_COLLISION | status::NEED_CAL_CASSETTE;
        state.task_message = "all good".into();
        state.task_progress = "1 of 10".into();
        state.sample_locations.goniometer = Some(PortRef::new(Position::Left, 0));
        state.pins_lost = 123;
        state.pins_mounted = 456;

        let mut expected = words(
            "status: 32777 need_reset: 0 need_cal: 1 state: idle warning: _ cal_msg: _ \
             cal_step: _ mounted: _ pin_lost: 123 pin_mounted: 456 manual_mode: 0 \
             need_mag_cal: 0 need_cas_cal: 1 need_clear: 1",
        );
        expected[9] = String::new();
        expected[11] = "all good".into();
        expected[13] = "1 of 10".into();
        expected[15] = "l 1 A".into();
        assert_eq!(state.render(StatusString::Status), expected);
    }

    #[test]
    fn status_bits_include_bridge_conditions() {
        let mut state = RobotState {
            needs_clear: false,
            at_home: true,
            ..RobotState::default()
        };
        assert_eq!(state.status_bits(), 0);

        state.needs_clear = true;
        state.safety_gate = true;
        assert_eq!(state.status_bits(), status::NEED_CLEAR | status::REASON_SAFEGUARD);

        state.needs_clear = false;
        state.safety_gate = false;
        state.at_home = false;
        assert_eq!(state.status_bits(), status::REASON_NOT_HOME);
    }

    #[test]
    fn foreground_operation_names_the_state() {
        let mut state = RobotState::default();
        state.foreground = Some("mount_crystal".into());
        let words = state.render(StatusString::Status);
        assert_eq!(words[6], "state:");
        assert_eq!(words[7], "mount_crystal");
    }

    #[test]
    fn state_string_fields() {
        let mut state = left_cassette();
        state.closest_point = 18;
        state.ln2_level = Some(0);
        state.sample_locations.cavity = Some(PortRef::new(Position::Left, 0));

        let expected: Vec<String> = [
            "on tong", "in cradle", "P18", "no", "", "0", "0", "0", "0", "0", "0", "l 1 A",
            "invalid", "invalid", "0", "0", "0", "0",
        ]
        .map(str::to_string)
        .to_vec();
        assert_eq!(state.render(StatusString::State), expected);
    }

    #[test]
    fn sample_state_names_where_the_sample_is() {
        let port = Some(PortRef::new(Position::Left, 0));
        let cases = [
            (SampleLocations::default(), "no"),
            (SampleLocations { cavity: port, ..Default::default() }, "on tong"),
            (SampleLocations { picker: port, ..Default::default() }, "on picker"),
            (SampleLocations { placer: port, ..Default::default() }, "on placer"),
            (SampleLocations { goniometer: port, ..Default::default() }, "on gonio"),
        ];
        for (locations, expected) in cases {
            let state = RobotState {
                sample_locations: locations,
                ..RobotState::default()
            };
            assert_eq!(state.sample_state(), expected);
        }
    }

    #[test]
    fn cassette_string_marks_mounted_port() {
        let mut state = RobotState::default();
        state.holder_types = [HolderType::Cassette, HolderType::Adaptor, HolderType::Unknown];
        state.port_states = [
            vec![PortState::Full; PORTS_PER_POSITION],
            vec![PortState::Empty; PORTS_PER_POSITION],
            vec![PortState::Unknown; PORTS_PER_POSITION],
        ];
        state.sample_locations.goniometer = Some(PortRef::new(Position::Left, 0));

        let mut expected = vec!["1".to_string(), "m".to_string()];
        expected.extend(std::iter::repeat_n("1".to_string(), 95));
        expected.push("3".to_string());
        expected.extend(std::iter::repeat_n("0".to_string(), 96));
        expected.push("u".to_string());
        expected.extend(std::iter::repeat_n("u".to_string(), 96));
        assert_eq!(state.render(StatusString::Cassette), expected);
    }

    #[test]
    fn calibration_timestamps_keep_order() -> Result<(), Box<dyn std::error::Error>> {
        let mut state = RobotState::default();
        state.apply("last_toolset_calibration", "2016/02/08 11:39:12")?;
        assert_eq!(
            state.render(StatusString::Calibration),
            vec!["2016/02/08 11:39:12", "", "", "", ""]
        );
        Ok(())
    }

    #[test]
    fn output_and_input_lines() -> Result<(), Box<dyn std::error::Error>> {
        let mut state = RobotState::default();
        for entity in ["gripper_command", "lid_command", "heater_command", "heater_air_command"] {
            assert_eq!(state.apply(entity, "1")?, Some(OUTPUT));
        }
        assert_eq!(
            state.render(StatusString::Output).join(" "),
            "0 1 0 1 0 0 0 0 0 0 0 0 0 1 1 0"
        );

        for entity in ["gripper_open", "gripper_closed", "lid_closed", "lid_open", "heater_hot"] {
            assert_eq!(state.apply(entity, "1")?, Some(INPUT));
        }
        assert_eq!(
            state.render(StatusString::Input).join(" "),
            "0 0 0 0 0 0 0 0 1 1 0 1 1 1 0 0"
        );
        Ok(())
    }

    #[test]
    fn force_string_formats_distances() -> Result<(), Box<dyn std::error::Error>> {
        let mut state = RobotState::default();
        assert_eq!(state.apply("height_errors", r#"{"left": 0.5, "middle": null}"#)?, Some(FORCES));
        state.apply("port_distances", r#"{"left": [1.26, null, 3]}"#)?;
        assert_eq!(
            state.render(StatusString::Force(Position::Left)),
            vec!["0.5", "1.3", "uuuu", "3.0"]
        );
        let middle = state.render(StatusString::Force(Position::Middle));
        assert_eq!(middle[0], "0");
        assert_eq!(middle.len(), PORTS_PER_POSITION + 1);
        assert!(middle[1..].iter().all(|d| d == "uuuu"));
        Ok(())
    }

    #[test]
    fn structured_entities_update_the_model() -> Result<(), Box<dyn std::error::Error>> {
        let mut state = RobotState::default();
        assert_eq!(state.apply("holder_types", r#"{"left": "1", "middle": 3}"#)?, Some(CASSETTE));
        assert_eq!(state.holder_types, [HolderType::Cassette, HolderType::Adaptor, HolderType::Unknown]);

        let full = format!("{{\"right\": [{}]}}", vec!["-1"; PORTS_PER_POSITION].join(","));
        state.apply("port_states", &full)?;
        assert!(state.port_states[2].iter().all(|p| *p == PortState::Full));

        let refreshed = state.apply("sample_locations", r#"{"goniometer": ["left", 9], "cavity": []}"#)?;
        assert_eq!(refreshed, Some(STATE_AND_CASSETTE));
        assert_eq!(state.sample_locations.goniometer, Some(PortRef::new(Position::Left, 9)));
        assert_eq!(state.sample_locations.cavity, None);
        assert_eq!(state.render(StatusString::Status)[15], "l 2 B");
        Ok(())
    }

    #[test]
    fn malformed_values_are_rejected_and_state_kept() {
        let mut state = RobotState::default();
        assert!(state.apply("pins_lost", "many").is_err());
        assert!(state.apply("port_states", r#"{"left": [1, 2]}"#).is_err());
        assert!(state.apply("holder_types", r#"{"attic": "1"}"#).is_err());
        assert!(state.apply("sample_locations", "not json").is_err());
        assert_eq!(state, RobotState::default());
    }

    #[test]
    fn unknown_entities_are_not_modelled() -> Result<(), Box<dyn std::error::Error>> {
        let mut state = RobotState::default();
        assert_eq!(state.apply("sample_barcode", "XYZ")?, None);
        assert_eq!(state, RobotState::default());
        Ok(())
    }

    #[test]
    fn ln2_level_is_reported_in_state() -> Result<(), Box<dyn std::error::Error>> {
        let mut state = RobotState::default();
        assert_eq!(state.render(StatusString::State)[3], "wrong");
        state.apply("ln2_level", "1")?;
        assert_eq!(state.render(StatusString::State)[3], "yes");
        state.apply("ln2_level", "0")?;
        assert_eq!(state.render(StatusString::State)[3], "no");
        Ok(())
    }
}
