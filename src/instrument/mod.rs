//! Supported instrument models and the quantities they report.
//!
//! Both enums are closed so that profile lookups and command-table indexing
//! are exhaustive. A new instrument is a new variant plus a catalog entry in
//! [`profile`].

pub mod profile;

pub use profile::{identity_matches, lookup, InstrumentProfile, MeasurementCommand};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Physical device model driven over SCPI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InstrumentType {
    /// Multicomp Pro MP730889 bench multimeter.
    #[serde(rename = "mp730889")]
    Mp730889,
    /// OWON SPE6103 programmable power supply.
    #[serde(rename = "spe6103", alias = "owon_spe6103")]
    OwonSpe6103,
}

impl InstrumentType {
    /// Every supported model, in catalog order.
    pub const ALL: [InstrumentType; 2] = [InstrumentType::Mp730889, InstrumentType::OwonSpe6103];

    /// Human readable model name used in logs and CSV records.
    pub fn label(self) -> &'static str {
        match self {
            InstrumentType::Mp730889 => "Multicomp Pro MP730889 DMM",
            InstrumentType::OwonSpe6103 => "OWON SPE6103 PSU",
        }
    }

    /// Short name accepted on the command line and in configuration files.
    pub fn short_name(self) -> &'static str {
        match self {
            InstrumentType::Mp730889 => "mp730889",
            InstrumentType::OwonSpe6103 => "spe6103",
        }
    }
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for InstrumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp730889" => Ok(InstrumentType::Mp730889),
            "spe6103" | "owon_spe6103" => Ok(InstrumentType::OwonSpe6103),
            other => Err(format!(
                "unknown instrument '{}'. Expected one of: {}",
                other,
                InstrumentType::ALL.map(InstrumentType::short_name).join(", ")
            )),
        }
    }
}

/// Quantity an instrument can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementFunction {
    /// DC voltage.
    Voltage,
    /// DC current.
    Current,
}

impl MeasurementFunction {
    /// Display label ("Voltage", "Current").
    pub fn label(self) -> &'static str {
        match self {
            MeasurementFunction::Voltage => "Voltage",
            MeasurementFunction::Current => "Current",
        }
    }
}

impl fmt::Display for MeasurementFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MeasurementFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "voltage" | "volt" | "v" => Ok(MeasurementFunction::Voltage),
            "current" | "curr" | "a" => Ok(MeasurementFunction::Current),
            other => Err(format!(
                "unknown measurement function '{}'. Expected voltage or current",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_from_short_name() {
        assert_eq!("MP730889".parse::<InstrumentType>(), Ok(InstrumentType::Mp730889));
        assert_eq!("spe6103".parse::<InstrumentType>(), Ok(InstrumentType::OwonSpe6103));
        assert!("keithley2000".parse::<InstrumentType>().is_err());
    }

    #[test]
    fn test_function_from_str() {
        assert_eq!("Voltage".parse::<MeasurementFunction>(), Ok(MeasurementFunction::Voltage));
        assert_eq!("curr".parse::<MeasurementFunction>(), Ok(MeasurementFunction::Current));
        assert!("resistance".parse::<MeasurementFunction>().is_err());
    }

    #[test]
    fn test_labels() {
        assert_eq!(InstrumentType::OwonSpe6103.to_string(), "OWON SPE6103 PSU");
        assert_eq!(MeasurementFunction::Current.to_string(), "Current");
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&InstrumentType::OwonSpe6103).unwrap();
        assert_eq!(json, "\"spe6103\"");
        let f: MeasurementFunction = serde_json::from_str("\"voltage\"").unwrap();
        assert_eq!(f, MeasurementFunction::Voltage);
    }
}
