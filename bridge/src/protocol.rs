use thiserror::Error;

/// Prefix of a sensor sample line, e.g. `XYZ:12:-40:-1010`.
const SAMPLE_PREFIX: &str = "XYZ:";
/// Delimiters between the sample fields.
const SAMPLE_DELIMITERS: [&str; 2] = [":", "XYZ"];
const SAMPLE_FIELDS: usize = 3;

const ACKNOWLEDGE: &str = "ACKNOWLEDGE";
const BUTTON_DOWN: &str = "BUTTON_DOWN";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed sensor sample {line:?}: {reason}")]
    MalformedSample { line: String, reason: String },
}

/// A decoded line received from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedEvent {
    /// Handshake reply to `DISCOVER`.
    Acknowledge,
    /// The physical button on the board was pressed.
    ButtonDown,
    /// Raw accelerometer reading in device units.
    SensorSample { x: i32, y: i32, z: i32 },
    /// Any other non-empty line.
    Unknown(String),
    Empty,
}

/// Commands sent from the host to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Discover,
    Terminate,
}

impl Command {
    /// The line sent over the wire, without the line terminator.
    pub fn as_line(&self) -> &'static str {
        match self {
            Command::Discover => "DISCOVER",
            Command::Terminate => "TERMINATE",
        }
    }
}

/// Decode one line from the device.
///
/// Sensor lines that carry the wrong number of fields, or fields that are not
/// base-10 `i32` values, are reported as [`ProtocolError::MalformedSample`].
pub fn parse_line(line: &str) -> Result<ParsedEvent, ProtocolError> {
    if line.is_empty() {
        return Ok(ParsedEvent::Empty);
    }
    if line == ACKNOWLEDGE {
        return Ok(ParsedEvent::Acknowledge);
    }
    if line == BUTTON_DOWN {
        return Ok(ParsedEvent::ButtonDown);
    }
    match line.strip_prefix(SAMPLE_PREFIX) {
        Some(rest) => parse_sample(line, rest),
        None => Ok(ParsedEvent::Unknown(line.to_string())),
    }
}

/// Like [`parse_line`], but a malformed sample degrades to `Unknown`.
pub fn parse(line: &str) -> ParsedEvent {
    match parse_line(line) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(%e, "Dropping malformed sample");
            ParsedEvent::Unknown(line.to_string())
        }
    }
}

fn parse_sample(line: &str, fields: &str) -> Result<ParsedEvent, ProtocolError> {
    let malformed = |reason: String| ProtocolError::MalformedSample {
        line: line.to_string(),
        reason,
    };

    let fragments = split_fields(fields);
    if fragments.len() != SAMPLE_FIELDS {
        return Err(malformed(format!(
            "expected {} fields, found {}",
            SAMPLE_FIELDS,
            fragments.len()
        )));
    }

    let mut values = [0i32; SAMPLE_FIELDS];
    for (value, fragment) in values.iter_mut().zip(&fragments) {
        *value = fragment
            .trim()
            .parse::<i32>()
            .map_err(|e| malformed(format!("field {:?}: {}", fragment, e)))?;
    }

    let [x, y, z] = values;
    Ok(ParsedEvent::SensorSample { x, y, z })
}

/// Split on every delimiter, dropping empty fragments.
fn split_fields(text: &str) -> Vec<&str> {
    let mut fragments = vec![text];
    for delimiter in SAMPLE_DELIMITERS {
        fragments = fragments
            .into_iter()
            .flat_map(|fragment| fragment.split(delimiter))
            .collect();
    }
    fragments.retain(|fragment| !fragment.is_empty());
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_malformed(line: &str) -> bool {
        matches!(parse_line(line), Err(ProtocolError::MalformedSample { .. }))
    }

    #[test]
    fn parse_control_lines() {
        assert_eq!(parse_line(""), Ok(ParsedEvent::Empty));
        assert_eq!(parse_line("ACKNOWLEDGE"), Ok(ParsedEvent::Acknowledge));
        assert_eq!(parse_line("BUTTON_DOWN"), Ok(ParsedEvent::ButtonDown));
    }

    #[test]
    fn control_lines_must_match_exactly() {
        assert_eq!(
            parse_line("acknowledge"),
            Ok(ParsedEvent::Unknown("acknowledge".into()))
        );
        assert_eq!(
            parse_line("ACKNOWLEDGED"),
            Ok(ParsedEvent::Unknown("ACKNOWLEDGED".into()))
        );
    }

    #[test]
    fn parse_samples_with_signs_and_zero() {
        for (x, y, z) in [(0, 0, 0), (12, -40, -1010), (-1, 2, -3), (i32::MAX, i32::MIN, 7)] {
            let line = format!("XYZ:{}:{}:{}", x, y, z);
            assert_eq!(
                parse_line(&line),
                Ok(ParsedEvent::SensorSample { x, y, z }),
                "{}",
                line
            );
        }
    }

    #[test]
    fn sample_delimiters_are_interchangeable() {
        assert_eq!(
            parse_line("XYZ:1XYZ2::3"),
            Ok(ParsedEvent::SensorSample { x: 1, y: 2, z: 3 })
        );
        assert_eq!(
            parse_line("XYZ: 4 : -5 : 6"),
            Ok(ParsedEvent::SensorSample { x: 4, y: -5, z: 6 })
        );
    }

    #[test]
    fn malformed_samples_are_errors() {
        assert!(is_malformed("XYZ:"));
        assert!(is_malformed("XYZ:1:2"));
        assert!(is_malformed("XYZ:1:2:3:4"));
        assert!(is_malformed("XYZ:1:two:3"));
        assert!(is_malformed("XYZ:1.5:2:3"));
        assert!(is_malformed("XYZ:1:2:2147483648"));
    }

    #[test]
    fn malformed_samples_degrade_to_unknown() {
        assert_eq!(
            parse("XYZ:1:2"),
            ParsedEvent::Unknown("XYZ:1:2".into())
        );
        assert_eq!(
            parse("XYZ:7:8:9"),
            ParsedEvent::SensorSample { x: 7, y: 8, z: 9 }
        );
    }

    #[test]
    fn other_text_is_unknown() {
        assert_eq!(parse("hello"), ParsedEvent::Unknown("hello".into()));
        assert_eq!(parse("XY:1:2:3"), ParsedEvent::Unknown("XY:1:2:3".into()));
    }

    #[test]
    fn command_lines() {
        assert_eq!(Command::Discover.as_line(), "DISCOVER");
        assert_eq!(Command::Terminate.as_line(), "TERMINATE");
    }
}
