use ndarray::Array1;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while},
    combinator::{all_consuming, fail, map_res, success},
    error::{FromExternalError, ParseError},
    multi::separated_list0,
    sequence::{delimited, preceded, terminated, tuple},
    IResult, Parser,
};
use std::num::{ParseFloatError, ParseIntError};

use super::messages::{feedback_severity, FirmwareMessage, ReportPosition, StatusReport};
use crate::config::Dialect;
use crate::events::Severity;
use crate::grbl::messages::ControllerState;

fn all<'a, Error>(input: &'a str) -> IResult<&'a str, &'a str, Error> {
    Ok(("", input))
}
fn take_until_or_all<'a, Error: ParseError<&'a str>>(
    separator: &'a str,
) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str, Error> {
    move |input| match input.find(separator) {
        Some(offset) => Ok((&input[offset..], &input[..offset])),
        None => Ok(("", input)),
    }
}
fn take_until_or_nonempty_all<'a, Error: ParseError<&'a str>>(
    separator: &'a str,
) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str, Error> {
    move |input| match input.find(separator) {
        Some(offset) => Ok((&input[offset..], &input[..offset])),
        None if input.is_empty() => fail(input),
        None => Ok(("", input)),
    }
}
fn take_until_through<'a, Error: 'a + ParseError<&'a str>>(
    separator: &'a str,
) -> impl 'a + FnMut(&'a str) -> IResult<&'a str, &'a str, Error> {
    terminated(take_until(separator), tag(separator))
}
fn take_until_through_or_all<'a, Error: 'a + ParseError<&'a str>>(
    separator: &'a str,
) -> impl 'a + FnMut(&'a str) -> IResult<&'a str, &'a str, Error> {
    terminated(take_until_or_all(separator), tag(separator).or(success("")))
}
fn enclosed_by<'a, Error: 'a + ParseError<&'a str>>(
    open: &'a str,
    close: &'a str,
) -> impl 'a + FnMut(&'a str) -> IResult<&'a str, &'a str, Error> {
    delimited(tag(open), take_until(close), tag(close))
}
fn split_by<'a, Error: 'a + ParseError<&'a str>>(
    separator: &'a str,
) -> impl 'a + FnMut(&'a str) -> IResult<&'a str, Vec<&'a str>, Error> {
    separated_list0(tag(separator), take_until_or_nonempty_all(separator))
}

fn parse_f64<'a, Error: 'a + ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, f64, Error>
where
    Error: FromExternalError<&'a str, ParseFloatError>,
{
    map_res(
        take_while(|c: char| c.is_ascii_digit() || c == '.' || c == '-'),
        |substr: &str| substr.parse::<f64>(),
    )
    .parse(input)
}
fn parse_u8<'a, Error: 'a + ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, u8, Error>
where
    Error: FromExternalError<&'a str, ParseIntError>,
{
    map_res(take_while(|c: char| c.is_ascii_digit()), |substr: &str| {
        substr.parse::<u8>()
    })
    .parse(input)
}
fn parse_float_array<'a, Error: 'a + ParseError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Array1<f64>, Error>
where
    Error: FromExternalError<&'a str, ParseFloatError>,
{
    let (rest, parts) = all_consuming(split_by(",")).parse(input)?;
    let floats = parts
        .into_iter()
        .map(|part| all_consuming(parse_f64).parse(part).map(|(_, value)| value))
        .collect::<Result<Array1<f64>, _>>()?;
    Ok((rest, floats))
}

/// The state token may carry a sub-code (`Hold:0`, `Door:1`); the sub-code is
/// dropped. A token we do not recognize maps to `Unknown` rather than failing
/// the whole report.
fn parse_state(token: &str) -> ControllerState {
    let head = token.split(':').next().unwrap_or(token);
    match head {
        "Idle" => ControllerState::Idle,
        "Run" => ControllerState::Run,
        "Hold" => ControllerState::Hold,
        "Alarm" => ControllerState::Alarm,
        "Door" => ControllerState::Door,
        "Check" => ControllerState::Check,
        _ => ControllerState::Unknown,
    }
}
fn parse_position<'a, Error: 'a + ParseError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, ReportPosition, Error>
where
    Error: FromExternalError<&'a str, ParseFloatError>,
{
    all_consuming(alt((
        preceded(tag("MPos:"), parse_float_array.map(ReportPosition::Machine)),
        preceded(tag("WPos:"), parse_float_array.map(ReportPosition::Work)),
    )))
    .parse(input)
}

fn apply_status_field(mut report: StatusReport, field: &str) -> StatusReport {
    let recognized: IResult<&str, (), ()> = match field.split_once(':') {
        Some(("FS", tail)) => all_consuming(tuple((parse_f64, tag(","), parse_f64)))
            .parse(tail)
            .map(|(rest, (feed, _, spindle))| {
                report.feed_speed = Some(feed);
                report.spindle_speed = Some(spindle);
                (rest, ())
            }),
        Some(("F", tail)) => all_consuming(parse_f64).parse(tail).map(|(rest, feed)| {
            report.feed_speed = Some(feed);
            (rest, ())
        }),
        Some(("WCO", tail)) => parse_float_array(tail).map(|(rest, wco)| {
            report.work_coordinate_offset = Some(wco);
            (rest, ())
        }),
        Some(("Ov", tail)) => {
            all_consuming(tuple((parse_u8, tag(","), parse_u8, tag(","), parse_u8)))
                .parse(tail)
                .map(|(rest, (feed, _, rapid, _, spindle))| {
                    report.overrides = Some([feed, rapid, spindle]);
                    (rest, ())
                })
        }
        Some(("Pn", tail)) => {
            report.pins = Some(tail.to_string());
            Ok(("", ()))
        }
        _ => fail(field),
    };
    if recognized.is_err() {
        report.unknown_terms.push(field.to_string());
    }
    report
}

fn parse_status<'a, Error: 'a + ParseError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, StatusReport, Error>
where
    Error: FromExternalError<&'a str, ParseFloatError>,
    Error: FromExternalError<&'a str, ParseIntError>,
{
    let (rest, body) = enclosed_by("<", ">").parse(input)?;
    let (_, (state_token, (position, fields))) = all_consuming(
        take_until_through("|").and(
            take_until_through_or_all("|")
                .and_then(parse_position)
                .and(split_by("|")),
        ),
    )
    .parse(body)?;
    let report = StatusReport::new(parse_state(state_token), position);
    let report = fields.into_iter().fold(report, apply_status_field);
    Ok((rest, report))
}

fn parse_bracketed<'a, Error: 'a + ParseError<&'a str>>(
    dialect: Dialect,
    input: &'a str,
) -> IResult<&'a str, FirmwareMessage, Error> {
    let (rest, body) = enclosed_by("[", "]").parse(input)?;
    let message = match body.strip_prefix("MSG:") {
        Some(tail) => {
            let (severity, text) = feedback_severity(dialect, tail);
            FirmwareMessage::Feedback { severity, text }
        }
        // Other bracketed lines ([GC:...], [VER:...], startup echoes) are
        // informational feedback verbatim.
        None => FirmwareMessage::Feedback {
            severity: Severity::Info,
            text: body.to_string(),
        },
    };
    Ok((rest, message))
}

fn parse_welcome<'a, Error: 'a + ParseError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, FirmwareMessage, Error> {
    alt((tag("Grbl "), tag("GrblHAL "), tag("FluidNC ")))
        .and(all)
        .map(|_| FirmwareMessage::Welcome)
        .parse(input)
}

fn parse_line_impl<'a, Error: 'a + ParseError<&'a str>>(
    dialect: Dialect,
    line: &'a str,
) -> IResult<&'a str, FirmwareMessage, Error>
where
    Error: FromExternalError<&'a str, ParseFloatError>,
    Error: FromExternalError<&'a str, ParseIntError>,
{
    alt((
        parse_status.map(FirmwareMessage::Status),
        |input| parse_bracketed(dialect, input),
        all_consuming(tag("ok")).map(|_| FirmwareMessage::Ok),
        preceded(tag("error:"), all)
            .map(|code: &str| FirmwareMessage::Error(code.trim().to_string())),
        preceded(tag("ALARM:"), all)
            .map(|code: &str| FirmwareMessage::Alarm(code.trim().to_string())),
        parse_welcome,
        all.map(|text: &str| FirmwareMessage::Unrecognized(text.to_string())),
    ))
    .parse(line)
}

/// Classifies one line from the firmware. Total: anything that matches no
/// known form comes back as `Unrecognized`, never an error.
pub fn parse_line(dialect: Dialect, line: &str) -> FirmwareMessage {
    match parse_line_impl::<()>(dialect, line) {
        Ok((_, message)) => message,
        Err(_) => FirmwareMessage::Unrecognized(line.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use nom::error::VerboseError;

    use super::*;
    use ndarray::array;

    #[test]
    fn test_take_until_through() {
        let input = "abc|def";
        let result: Result<_, nom::Err<()>> = take_until_through("|").parse(input);
        assert_eq!(result, Ok(("def", "abc")));
    }
    #[test]
    fn test_split_by() {
        let input = "a|b|ced";
        let result: Result<_, nom::Err<()>> = split_by("|").parse(input);
        assert_eq!(result, Ok(("", vec!["a", "b", "ced"])));
    }
    #[test]
    fn test_parse_float_array() {
        let input = "10.5,1,-5.875";
        let result: Result<_, nom::Err<()>> = parse_float_array(input);
        assert_eq!(result, Ok(("", array![10.5, 1.0, -5.875])));
    }

    #[test]
    fn test_parse_status_minimal() {
        let input = "<Idle|MPos:1.000,2.000,3.000>";
        let result: Result<_, nom::Err<VerboseError<_>>> = parse_status(input);
        let report = StatusReport::new(
            ControllerState::Idle,
            ReportPosition::Machine(array![1.0, 2.0, 3.0]),
        );
        assert_eq!(result, Ok(("", report)));
    }
    #[test]
    fn test_parse_status_full() {
        let input = "<Run|WPos:0.00,1.00,3.00|FS:500,8000|WCO:5.00,-5.25,17|Ov:90,100,110|Pn:XY|Gadget:7>";
        let result: Result<_, nom::Err<VerboseError<_>>> = parse_status(input);
        let mut report = StatusReport::new(
            ControllerState::Run,
            ReportPosition::Work(array![0.0, 1.0, 3.0]),
        );
        report.feed_speed = Some(500.0);
        report.spindle_speed = Some(8000.0);
        report.work_coordinate_offset = Some(array![5.0, -5.25, 17.0]);
        report.overrides = Some([90, 100, 110]);
        report.pins = Some("XY".to_string());
        report.unknown_terms.push("Gadget:7".to_string());
        assert_eq!(result, Ok(("", report)));
    }
    #[test]
    fn test_unknown_state_token() {
        let message = parse_line(Dialect::FluidNc, "<Jog|MPos:0.0,0.0,0.0>");
        match message {
            FirmwareMessage::Status(report) => {
                assert_eq!(report.state, ControllerState::Unknown)
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }
    #[test]
    fn test_status_without_position_is_unrecognized() {
        let message = parse_line(Dialect::FluidNc, "<Idle|FS:0,0>");
        assert_eq!(
            message,
            FirmwareMessage::Unrecognized("<Idle|FS:0,0>".to_string())
        );
    }

    #[test]
    fn test_parse_ok_and_error() {
        assert_eq!(parse_line(Dialect::Grbl, "ok"), FirmwareMessage::Ok);
        assert_eq!(
            parse_line(Dialect::Grbl, "error:9"),
            FirmwareMessage::Error("9".to_string())
        );
        assert_eq!(
            parse_line(Dialect::FluidNc, "error:Unconfigured"),
            FirmwareMessage::Error("Unconfigured".to_string())
        );
        // "okay" is not an acknowledgement.
        assert_eq!(
            parse_line(Dialect::Grbl, "okay"),
            FirmwareMessage::Unrecognized("okay".to_string())
        );
    }
    #[test]
    fn test_parse_alarm() {
        assert_eq!(
            parse_line(Dialect::Grbl, "ALARM:1"),
            FirmwareMessage::Alarm("1".to_string())
        );
    }
    #[test]
    fn test_parse_welcome() {
        assert_eq!(
            parse_line(Dialect::Grbl, "Grbl 1.1h ['$' for help]"),
            FirmwareMessage::Welcome
        );
        assert_eq!(
            parse_line(Dialect::FluidNc, "FluidNC 3.7.8 ['$' for help]"),
            FirmwareMessage::Welcome
        );
    }
    #[test]
    fn test_parse_feedback_severities() {
        assert_eq!(
            parse_line(
                Dialect::FluidNc,
                "[MSG:WARN: Active limit switch on X axis motor 0]"
            ),
            FirmwareMessage::Feedback {
                severity: Severity::Warning,
                text: "Active limit switch on X axis motor 0".to_string()
            }
        );
        assert_eq!(
            parse_line(Dialect::Grbl, "[MSG:Reset to continue]"),
            FirmwareMessage::Feedback {
                severity: Severity::Info,
                text: "Reset to continue".to_string()
            }
        );
        assert_eq!(
            parse_line(Dialect::Grbl, "[GC:G0 G54 G17]"),
            FirmwareMessage::Feedback {
                severity: Severity::Info,
                text: "GC:G0 G54 G17".to_string()
            }
        );
    }
}
