use std::borrow::Cow;

use ndarray::Array1;
use serde::Serialize;

use crate::config::Dialect;
use crate::events::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControllerState {
    Disconnected,
    Idle,
    Run,
    Hold,
    Alarm,
    Door,
    Check,
    /// A state token this version of the firmware reports but we do not
    /// recognize (Jog, Home, Sleep, future additions). Never an error.
    Unknown,
}

/// Published snapshot of the machine. Always self-contained: the controller
/// task completes any elided fields from its residual record before
/// publishing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub state: ControllerState,
    #[serde(with = "array_serializer")]
    pub machine_coord: Array1<f64>,
    #[serde(with = "array_serializer")]
    pub work_coord: Array1<f64>,
    pub feed_speed: f64,
    pub spindle_speed: f64,
    pub feed_override: u8,
    pub rapid_override: u8,
    pub spindle_override: u8,
}

impl ControllerStatus {
    pub fn disconnected() -> Self {
        ControllerStatus {
            state: ControllerState::Disconnected,
            machine_coord: Array1::zeros(3),
            work_coord: Array1::zeros(3),
            feed_speed: 0.0,
            spindle_speed: 0.0,
            feed_override: 100,
            rapid_override: 100,
            spindle_override: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportPosition {
    Machine(Array1<f64>),
    Work(Array1<f64>),
}

/// One parsed `<...>` report, fields exactly as received. Most reports elide
/// `WCO:` and `Ov:`; see `ResidualStatus`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub state: ControllerState,
    pub position: ReportPosition,
    pub feed_speed: Option<f64>,
    pub spindle_speed: Option<f64>,
    pub work_coordinate_offset: Option<Array1<f64>>,
    pub overrides: Option<[u8; 3]>,
    pub pins: Option<String>,
    pub unknown_terms: Vec<String>,
}

impl StatusReport {
    pub fn new(state: ControllerState, position: ReportPosition) -> Self {
        StatusReport {
            state,
            position,
            feed_speed: None,
            spindle_speed: None,
            work_coordinate_offset: None,
            overrides: None,
            pins: None,
            unknown_terms: Vec::new(),
        }
    }

    /// Completes this report into a publishable snapshot, updating `residual`
    /// with whatever the report did carry.
    pub fn into_status(self, residual: &mut ResidualStatus) -> ControllerStatus {
        if let Some(wco) = &self.work_coordinate_offset {
            residual.work_coordinate_offset = Some(wco.clone());
        }
        if let Some(overrides) = self.overrides {
            residual.overrides = overrides;
        }
        if let Some(feed) = self.feed_speed {
            residual.feed_speed = feed;
        }
        if let Some(spindle) = self.spindle_speed {
            residual.spindle_speed = spindle;
        }
        let (machine_coord, work_coord) = match self.position {
            ReportPosition::Machine(machine) => {
                let wco = residual.wco_for(machine.len());
                let work = &machine - &wco;
                (machine, work)
            }
            ReportPosition::Work(work) => {
                let wco = residual.wco_for(work.len());
                let machine = &work + &wco;
                (machine, work)
            }
        };
        ControllerStatus {
            state: self.state,
            machine_coord,
            work_coord,
            feed_speed: residual.feed_speed,
            spindle_speed: residual.spindle_speed,
            feed_override: residual.overrides[0],
            rapid_override: residual.overrides[1],
            spindle_override: residual.overrides[2],
        }
    }
}

/// Carry-over of status fields the firmware elides from most reports.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualStatus {
    pub work_coordinate_offset: Option<Array1<f64>>,
    pub feed_speed: f64,
    pub spindle_speed: f64,
    /// Feed, rapid, spindle; percent.
    pub overrides: [u8; 3],
}

impl ResidualStatus {
    pub fn new() -> Self {
        ResidualStatus {
            work_coordinate_offset: None,
            feed_speed: 0.0,
            spindle_speed: 0.0,
            overrides: [100, 100, 100],
        }
    }

    /// Last-seen offset, or zeros before any `WCO:` has arrived.
    fn wco_for(&self, len: usize) -> Array1<f64> {
        match &self.work_coordinate_offset {
            Some(wco) if wco.len() == len => wco.clone(),
            _ => Array1::zeros(len),
        }
    }
}

impl Default for ResidualStatus {
    fn default() -> Self {
        ResidualStatus::new()
    }
}

/// One classified line from the firmware.
#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone, PartialEq)]
pub enum FirmwareMessage {
    Status(StatusReport),
    Feedback { severity: Severity, text: String },
    Ok,
    /// Whatever followed `error:` — a numeric code on GRBL, sometimes prose
    /// on FluidNC.
    Error(String),
    Alarm(String),
    Welcome,
    Unrecognized(String),
}

pub fn alarm_description(code: &str) -> Cow<'static, str> {
    match code {
        "1" => "Hard limit triggered. Machine position is likely lost due to sudden and immediate halt. Re-homing is highly recommended.".into(),
        "2" => "G-code motion target exceeds machine travel. Machine position safely retained. Alarm may be unlocked.".into(),
        "3" => "Reset while in motion. The controller cannot guarantee position. Lost steps are likely. Re-homing is highly recommended.".into(),
        "4" => "Probe fail. The probe is not in the expected initial state before starting probe cycle, where G38.2 and G38.3 is not triggered and G38.4 and G38.5 is triggered.".into(),
        "5" => "Probe fail. Probe did not contact the workpiece within the programmed travel for G38.2 and G38.4.".into(),
        "6" => "Homing fail. Reset during active homing cycle.".into(),
        "7" => "Homing fail. Safety door was opened during active homing cycle.".into(),
        "8" => "Homing fail. Cycle failed to clear limit switch when pulling off. Try increasing pull-off setting or check wiring.".into(),
        "9" => "Homing fail. Could not find limit switch within search distance. Defined as 1.5 * max_travel on search and 5 * pulloff on locate phases.".into(),
        _ => Cow::Owned(format!("Unknown ALARM:{}", code)),
    }
}

pub fn error_description(code: &str) -> Cow<'static, str> {
    match code {
        "1" => "G-code words consist of a letter and a value. Letter was not found.".into(),
        "2" => "Numeric value format is not valid or missing an expected value.".into(),
        "3" => "'$' system command was not recognized or supported.".into(),
        "4" => "Negative value received for an expected positive value.".into(),
        "5" => "Homing cycle is not enabled via settings.".into(),
        "6" => "Minimum step pulse time must be greater than 3usec".into(),
        "7" => "EEPROM read failed. Reset and restored to default values.".into(),
        "8" => "'$' command cannot be used unless the controller is IDLE. Ensures smooth operation during a job.".into(),
        "9" => "G-code locked out during alarm or jog state".into(),
        "10" => "Soft limits cannot be enabled without homing also enabled.".into(),
        "11" => "Max characters per line exceeded. Line was not processed and executed.".into(),
        "12" => "(Compile Option) '$' setting value exceeds the maximum step rate supported.".into(),
        "13" => "Safety door detected as opened and door state initiated.".into(),
        "14" => "Build info or startup line exceeded EEPROM line length limit.".into(),
        "15" => "Jog target exceeds machine travel. Command ignored.".into(),
        "16" => "Jog command with no '=' or contains prohibited g-code.".into(),
        "17" => "Laser mode disabled. Requires PWM output.".into(),
        "20" => "Unsupported or invalid g-code command found in block.".into(),
        "21" => "More than one g-code command from same modal group found in block.".into(),
        "22" => "Feed rate has not yet been set or is undefined.".into(),
        "23" => "G-code command in block requires an integer value.".into(),
        "24" => "Two G-code commands that both require the use of the XYZ axis words were detected in the block.".into(),
        "25" => "A G-code word was repeated in the block.".into(),
        "26" => "A G-code command implicitly or explicitly requires XYZ axis words in the block, but none were detected.".into(),
        "27" => "N line number value is not within the valid range of 1 - 9,999,999.".into(),
        "28" => "A G-code command was sent, but is missing some required P or L value words in the line.".into(),
        "29" => "Six work coordinate systems G54-G59 are supported. G59.1, G59.2, and G59.3 are not.".into(),
        "30" => "The G53 G-code command requires either a G0 seek or G1 feed motion mode to be active. A different motion was active.".into(),
        "31" => "There are unused axis words in the block and G80 motion mode cancel is active.".into(),
        "32" => "A G2 or G3 arc was commanded but there are no XYZ axis words in the selected plane to trace the arc.".into(),
        "33" => "The motion command has an invalid target. G2, G3, and G38.2 generates this error, if the arc is impossible to generate or if the probe target is the current position.".into(),
        "34" => "A G2 or G3 arc, traced with the radius definition, had a mathematical error when computing the arc geometry. Try either breaking up the arc into semi-circles or quadrants, or redefine them with the arc offset definition.".into(),
        "35" => "A G2 or G3 arc, traced with the offset definition, is missing the IJK offset word in the selected plane to trace the arc.".into(),
        "36" => "There are unused, leftover G-code words that aren't used by any command in the block.".into(),
        "37" => "The G43.1 dynamic tool length offset command cannot apply an offset to an axis other than its configured axis.".into(),
        "38" => "Tool number greater than max supported value.".into(),
        _ => Cow::Owned(format!("error:{}", code)),
    }
}

/// Severity of a `[MSG:...]` feedback line. FluidNC tags its messages
/// (`[MSG:WARN: ...]`); plain GRBL does not, so everything is Info there.
pub fn feedback_severity(dialect: Dialect, tail: &str) -> (Severity, String) {
    if dialect == Dialect::FluidNc {
        if let Some((tag, rest)) = tail.split_once(':') {
            let severity = match tag.trim() {
                "WARN" => Some(Severity::Warning),
                "ERR" | "ERROR" => Some(Severity::Error),
                "INFO" | "DBG" => Some(Severity::Info),
                _ => None,
            };
            if let Some(severity) = severity {
                return (severity, rest.trim().to_string());
            }
        }
    }
    (Severity::Info, tail.trim().to_string())
}

mod array_serializer {
    use ndarray::Array1;
    use serde::{Serialize, Serializer};

    pub fn serialize<S: Serializer>(array: &Array1<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        array.to_vec().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn residual_completes_elided_fields() {
        let mut residual = ResidualStatus::new();
        let mut first = StatusReport::new(
            ControllerState::Idle,
            ReportPosition::Machine(arr1(&[10.0, 20.0, 30.0])),
        );
        first.work_coordinate_offset = Some(arr1(&[1.0, 2.0, 3.0]));
        first.overrides = Some([90, 100, 110]);
        let status = first.into_status(&mut residual);
        assert_eq!(status.work_coord, arr1(&[9.0, 18.0, 27.0]));
        assert_eq!(status.feed_override, 90);

        // Next report elides WCO and Ov; residual fills them in.
        let second = StatusReport::new(
            ControllerState::Run,
            ReportPosition::Work(arr1(&[5.0, 5.0, 5.0])),
        );
        let status = second.into_status(&mut residual);
        assert_eq!(status.machine_coord, arr1(&[6.0, 7.0, 8.0]));
        assert_eq!(status.spindle_override, 110);
    }

    #[test]
    fn missing_offset_defaults_to_zero() {
        let mut residual = ResidualStatus::new();
        let report = StatusReport::new(
            ControllerState::Idle,
            ReportPosition::Machine(arr1(&[1.0, 2.0, 3.0])),
        );
        let status = report.into_status(&mut residual);
        assert_eq!(status.machine_coord, status.work_coord);
    }

    #[test]
    fn fluidnc_feedback_severity_tags() {
        assert_eq!(
            feedback_severity(Dialect::FluidNc, "WARN: Active limit switch on X axis motor 0"),
            (Severity::Warning, "Active limit switch on X axis motor 0".to_string())
        );
        assert_eq!(
            feedback_severity(Dialect::Grbl, "Restoring defaults"),
            (Severity::Info, "Restoring defaults".to_string())
        );
    }
}
