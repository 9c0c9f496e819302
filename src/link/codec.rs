//! Text codec for the axis state protocol.
//!
//! Incoming batch grammar, reports joined with `:`:
//!
//! ```text
//! <axisID> <position> <velocity> <acceleration> : <axisID> ...
//! ```
//!
//! Outgoing feedback, one string per axis:
//!
//! ```text
//! <axisID> <setpoint_0> <setpoint_1> ... <setpoint_n>
//! ```
//!
//! Decoding is total: every report in a batch yields either a reading or a
//! typed error, so a malformed report never aborts the rest of the batch and
//! callers can assert on error counts instead of inspecting logs.

use std::fmt::Write as _;

use thiserror::Error;

/// One decoded axis state report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisReading {
    pub position: f32,
    pub velocity: f32,
    pub acceleration: f32,
}

/// Why a single report failed to decode.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("report is empty")]
    EmptyReport,

    #[error("report has {0} fields, expected 4")]
    FieldCount(usize),

    #[error("field {field} is not a number: {value:?}")]
    BadNumber { field: &'static str, value: String },
}

fn parse_field(field: &'static str, raw: &str) -> Result<f32, DecodeError> {
    raw.parse::<f32>().map_err(|_| DecodeError::BadNumber {
        field,
        value: raw.to_string(),
    })
}

fn decode_report(report: &str) -> Result<(String, AxisReading), DecodeError> {
    let fields: Vec<&str> = report.split_whitespace().collect();

    match fields.as_slice() {
        [] => Err(DecodeError::EmptyReport),
        [axis_id, position, velocity, acceleration] => Ok((
            axis_id.to_string(),
            AxisReading {
                position: parse_field("position", position)?,
                velocity: parse_field("velocity", velocity)?,
                acceleration: parse_field("acceleration", acceleration)?,
            },
        )),
        other => Err(DecodeError::FieldCount(other.len())),
    }
}

/// Splits a batch string on `:` and decodes every report.
///
/// Whitespace-only segments (the usual result of an empty receive) produce
/// no entry at all; everything else produces one entry per report. The axis
/// id is returned even for failed reports when one could be read, so the
/// caller can attribute the failure.
pub fn decode_batch(batch: &str) -> Vec<(String, Result<AxisReading, DecodeError>)> {
    batch
        .split(':')
        .map(str::trim)
        .filter(|report| !report.is_empty())
        .map(|report| {
            let axis_id = report
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
            match decode_report(report) {
                Ok((axis_id, reading)) => (axis_id, Ok(reading)),
                Err(e) => (axis_id, Err(e)),
            }
        })
        .collect()
}

/// Encodes the feedback string for one axis.
///
/// Setpoints are expected in axis-native units; formatting goes through
/// standard decimal text so the peer's parser round-trips the values.
pub fn encode_feedback(axis_id: &str, setpoints: &[f32]) -> String {
    let mut message = String::from(axis_id);
    for setpoint in setpoints {
        // Writing to a String cannot fail
        let _ = write!(message, " {}", setpoint);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_report() {
        let reports = decode_batch("Elbow 50 10 0");
        assert_eq!(reports.len(), 1);
        let (axis_id, reading) = &reports[0];
        assert_eq!(axis_id, "Elbow");
        assert_eq!(
            reading.as_ref().unwrap(),
            &AxisReading {
                position: 50.0,
                velocity: 10.0,
                acceleration: 0.0
            }
        );
    }

    #[test]
    fn decodes_batch_of_reports() {
        let reports = decode_batch("A 1 0 0 : B 2 0 0");
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].0, "A");
        assert_eq!(reports[0].1.as_ref().unwrap().position, 1.0);
        assert_eq!(reports[1].0, "B");
        assert_eq!(reports[1].1.as_ref().unwrap().position, 2.0);
    }

    #[test]
    fn empty_batch_yields_nothing() {
        assert!(decode_batch("").is_empty());
        assert!(decode_batch("  :  : ").is_empty());
    }

    #[test]
    fn bad_number_is_reported_per_report() {
        let reports = decode_batch("A 1 0 0 : B x 0 0 : C 3 0 0");
        assert_eq!(reports.len(), 3);
        assert!(reports[0].1.is_ok());
        assert_eq!(
            reports[1].1,
            Err(DecodeError::BadNumber {
                field: "position",
                value: "x".to_string()
            })
        );
        assert_eq!(reports[1].0, "B");
        assert!(reports[2].1.is_ok());
    }

    #[test]
    fn wrong_field_count_is_an_error() {
        let reports = decode_batch("A 1 0");
        assert_eq!(reports[0].1, Err(DecodeError::FieldCount(3)));

        let reports = decode_batch("A 1 0 0 7");
        assert_eq!(reports[0].1, Err(DecodeError::FieldCount(5)));
    }

    #[test]
    fn encodes_feedback_with_setpoints() {
        assert_eq!(
            encode_feedback("Elbow", &[12.5, -3.0, 0.25]),
            "Elbow 12.5 -3 0.25"
        );
        assert_eq!(encode_feedback("Elbow", &[]), "Elbow");
    }

    #[test]
    fn feedback_round_trips_as_a_report_prefix() {
        // A single-setpoint feedback has the same field count as a report;
        // the peer grammar is shared, so values must parse back exactly
        let encoded = encode_feedback("Wrist", &[42.125, 7.0, -0.5]);
        let reports = decode_batch(&encoded);
        let reading = reports[0].1.as_ref().unwrap();
        assert_eq!(reading.position, 42.125);
        assert_eq!(reading.velocity, 7.0);
        assert_eq!(reading.acceleration, -0.5);
    }
}
