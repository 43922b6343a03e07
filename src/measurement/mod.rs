//! Readings produced by a polling session and the response value parser.

pub mod parse;

pub use parse::{format_significant, parse_primary_value};

use crate::instrument::{InstrumentType, MeasurementFunction};
use crate::poller::PollRequest;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One successful query result.
///
/// # Fields
/// * `slot_index` - Position of the measurement in the caller's active list (0-based)
/// * `raw_response` - Response text exactly as received (trimmed)
/// * `value` - Leading numeric token, `None` when the response did not parse
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Local wall-clock time the response arrived
    pub timestamp: DateTime<Local>,
    /// Stable slot position, independent of the function assigned to it
    pub slot_index: usize,
    /// Instrument model that produced the reading
    pub instrument: InstrumentType,
    /// Identity string reported by the device at connect time
    pub device_identity: String,
    /// Quantity sampled
    pub function: MeasurementFunction,
    /// Response text as received
    pub raw_response: String,
    /// Parsed value, if the response starts with a number
    pub value: Option<f64>,
    /// Physical unit ("V", "A")
    pub unit: String,
}

impl Reading {
    /// Builds a reading for `request` from a raw response, stamped now.
    pub fn from_response(
        request: &PollRequest,
        instrument: InstrumentType,
        device_identity: &str,
        raw_response: String,
    ) -> Self {
        Self {
            timestamp: Local::now(),
            slot_index: request.slot_index,
            instrument,
            device_identity: device_identity.to_string(),
            function: request.function,
            value: parse_primary_value(&raw_response),
            raw_response,
            unit: request.unit.to_string(),
        }
    }

    /// 1-based slot number as shown to users.
    pub fn slot_number(&self) -> usize {
        self.slot_index + 1
    }

    /// Value with 6 significant digits and unit, or the raw response when
    /// the value did not parse.
    pub fn display_value(&self) -> String {
        match self.value {
            Some(value) => format!("{} {}", format_significant(value, 6), self.unit),
            None => self.raw_response.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PollRequest {
        PollRequest {
            slot_index: 1,
            function: MeasurementFunction::Current,
            query_command: "MEASure:CURRent?",
            unit: "A",
        }
    }

    #[test]
    fn test_reading_from_numeric_response() {
        let reading = Reading::from_response(
            &request(),
            InstrumentType::OwonSpe6103,
            "OWON,SPE6103",
            "0.0251,A".to_string(),
        );
        assert_eq!(reading.value, Some(0.0251));
        assert_eq!(reading.slot_number(), 2);
        assert_eq!(reading.display_value(), "0.0251 A");
    }

    #[test]
    fn test_unparsable_response_keeps_raw_text() {
        let reading = Reading::from_response(
            &request(),
            InstrumentType::OwonSpe6103,
            "OWON,SPE6103",
            "OVERLOAD".to_string(),
        );
        assert_eq!(reading.value, None);
        assert_eq!(reading.raw_response, "OVERLOAD");
        assert_eq!(reading.display_value(), "OVERLOAD");
    }
}
